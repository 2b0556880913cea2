//! Stack update client.
//!
//! Issues root-stack updates against CloudFormation and polls them to
//! completion. A stack update either settles in a success status, settles in
//! a failure status, or exceeds the configured timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_cloudformation::types::{Capability, Parameter, StackStatus};
use aws_sdk_cloudformation::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{ProviderError, Result, TablestepError};

/// Default interval between status polls.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default time allowed for a single stack update.
const DEFAULT_UPDATE_TIMEOUT_SECS: u64 = 1800;

/// A single event emitted by a stack while updating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEvent {
    /// Unique event identifier.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: Option<DateTime<Utc>>,
    /// Logical name of the resource the event concerns.
    pub logical_resource_id: String,
    /// Resource status, as reported by the provider.
    pub resource_status: String,
    /// Status reason, when the provider supplies one.
    pub reason: Option<String>,
}

/// How far along a polled stack update is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UpdateProgress {
    /// The update is still running.
    InProgress,
    /// The update settled successfully.
    Complete,
    /// The update settled in a failure status.
    Failed(String),
}

/// Trait for issuing and awaiting stack updates.
#[async_trait]
pub trait StackClient: Send + Sync {
    /// Starts a stack update from a stored template.
    async fn update_stack(
        &self,
        stack_name: &str,
        template_location: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Waits until the most recent update on the stack settles.
    async fn wait_for_update_complete(&self, stack_name: &str) -> Result<()>;

    /// Returns recent events for the stack, newest first.
    async fn stack_events(&self, stack_name: &str) -> Result<Vec<StackEvent>>;
}

/// CloudFormation-backed stack client.
#[derive(Debug)]
pub struct CloudFormationStackClient {
    /// CloudFormation client.
    client: Client,
    /// Bucket holding deployment bundles.
    bucket: String,
    /// Interval between status polls.
    poll_interval: Duration,
    /// Time allowed for a single update.
    update_timeout: Duration,
}

impl CloudFormationStackClient {
    /// Creates a new client against the ambient AWS configuration.
    pub async fn new(bucket: &str, region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket)
    }

    /// Creates a new client from an existing SDK client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            update_timeout: Duration::from_secs(DEFAULT_UPDATE_TIMEOUT_SECS),
        }
    }

    /// Overrides the polling interval and update timeout.
    #[must_use]
    pub const fn with_timing(mut self, poll_interval_secs: u64, update_timeout_secs: u64) -> Self {
        self.poll_interval = Duration::from_secs(poll_interval_secs);
        self.update_timeout = Duration::from_secs(update_timeout_secs);
        self
    }

    /// Builds the HTTPS URL for a template stored in the bundle bucket.
    fn template_url(&self, template_location: &str) -> String {
        format!(
            "https://{}.s3.amazonaws.com/{}",
            self.bucket,
            template_location.trim_start_matches('/')
        )
    }
}

/// Maps a provider stack status onto update progress.
pub(crate) fn classify_status(status: &StackStatus, reason: Option<&str>) -> UpdateProgress {
    match status {
        StackStatus::CreateComplete | StackStatus::UpdateComplete => UpdateProgress::Complete,
        StackStatus::CreateInProgress
        | StackStatus::UpdateInProgress
        | StackStatus::UpdateCompleteCleanupInProgress => UpdateProgress::InProgress,
        other => UpdateProgress::Failed(format!(
            "{}{}",
            other.as_str(),
            reason.map(|r| format!(": {r}")).unwrap_or_default()
        )),
    }
}

#[async_trait]
impl StackClient for CloudFormationStackClient {
    async fn update_stack(
        &self,
        stack_name: &str,
        template_location: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<()> {
        let url = self.template_url(template_location);
        info!("Updating stack {stack_name} from {url}");

        let params: Vec<Parameter> = parameters
            .iter()
            .map(|(key, value)| {
                Parameter::builder()
                    .parameter_key(key)
                    .parameter_value(value)
                    .build()
            })
            .collect();

        let result = self
            .client
            .update_stack()
            .stack_name(stack_name)
            .template_url(url)
            .set_parameters(Some(params))
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sdk_err) => {
                let message = sdk_err.to_string();
                // CloudFormation rejects updates that change nothing; for a
                // step whose template matches the live stack that is success.
                if message.contains("No updates are to be performed") {
                    debug!("Stack {stack_name} already matches the template");
                    Ok(())
                } else {
                    Err(TablestepError::Provider(ProviderError::UpdateFailed {
                        stack_name: stack_name.to_string(),
                        reason: message,
                    }))
                }
            }
        }
    }

    async fn wait_for_update_complete(&self, stack_name: &str) -> Result<()> {
        let started = tokio::time::Instant::now();

        loop {
            let response = self
                .client
                .describe_stacks()
                .stack_name(stack_name)
                .send()
                .await
                .map_err(|e| ProviderError::api(format!("describe_stacks failed: {e}")))?;

            let stack = response.stacks().first().ok_or_else(|| {
                ProviderError::api(format!("Stack {stack_name} not found"))
            })?;

            let Some(status) = stack.stack_status() else {
                return Err(TablestepError::Provider(ProviderError::api(format!(
                    "Stack {stack_name} reported no status"
                ))));
            };

            match classify_status(status, stack.stack_status_reason()) {
                UpdateProgress::Complete => {
                    info!("Stack {stack_name} update complete");
                    return Ok(());
                }
                UpdateProgress::Failed(reason) => {
                    warn!("Stack {stack_name} update failed: {reason}");
                    return Err(TablestepError::Provider(ProviderError::UpdateFailed {
                        stack_name: stack_name.to_string(),
                        reason,
                    }));
                }
                UpdateProgress::InProgress => {
                    let elapsed = started.elapsed();
                    if elapsed > self.update_timeout {
                        return Err(TablestepError::Provider(ProviderError::UpdateTimedOut {
                            stack_name: stack_name.to_string(),
                            elapsed_secs: elapsed.as_secs(),
                        }));
                    }
                    debug!(
                        "Stack {stack_name} still updating ({}s elapsed)",
                        elapsed.as_secs()
                    );
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn stack_events(&self, stack_name: &str) -> Result<Vec<StackEvent>> {
        let response = self
            .client
            .describe_stack_events()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| ProviderError::api(format!("describe_stack_events failed: {e}")))?;

        let events = response
            .stack_events()
            .iter()
            .map(|event| StackEvent {
                event_id: event.event_id().unwrap_or_default().to_string(),
                timestamp: event
                    .timestamp()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), 0)),
                logical_resource_id: event.logical_resource_id().unwrap_or_default().to_string(),
                resource_status: event
                    .resource_status()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                reason: event.resource_status_reason().map(ToString::to_string),
            })
            .collect();

        Ok(events)
    }
}

#[async_trait]
impl StackClient for Box<dyn StackClient> {
    async fn update_stack(
        &self,
        stack_name: &str,
        template_location: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<()> {
        (**self)
            .update_stack(stack_name, template_location, parameters)
            .await
    }

    async fn wait_for_update_complete(&self, stack_name: &str) -> Result<()> {
        (**self).wait_for_update_complete(stack_name).await
    }

    async fn stack_events(&self, stack_name: &str) -> Result<Vec<StackEvent>> {
        (**self).stack_events(stack_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CloudFormationStackClient {
        let config = aws_sdk_cloudformation::Config::builder()
            .behavior_version(aws_sdk_cloudformation::config::BehaviorVersion::latest())
            .build();
        CloudFormationStackClient::with_client(Client::from_conf(config), "deploy-bucket")
    }

    #[test]
    fn test_template_url_points_into_bundle_bucket() {
        let client = client();
        assert_eq!(
            client.template_url("deployments/abc/step-0/root.json"),
            "https://deploy-bucket.s3.amazonaws.com/deployments/abc/step-0/root.json"
        );
        // Leading slashes are normalized away.
        assert_eq!(
            client.template_url("/deployments/abc/root.json"),
            "https://deploy-bucket.s3.amazonaws.com/deployments/abc/root.json"
        );
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_status(&StackStatus::UpdateComplete, None),
            UpdateProgress::Complete
        );
        assert_eq!(
            classify_status(&StackStatus::UpdateInProgress, None),
            UpdateProgress::InProgress
        );
        assert_eq!(
            classify_status(&StackStatus::UpdateCompleteCleanupInProgress, None),
            UpdateProgress::InProgress
        );

        // Provider-side rollback means the forward update failed.
        let progress = classify_status(
            &StackStatus::UpdateRollbackComplete,
            Some("resource limit exceeded"),
        );
        match progress {
            UpdateProgress::Failed(reason) => {
                assert!(reason.contains("UPDATE_ROLLBACK_COMPLETE"));
                assert!(reason.contains("resource limit exceeded"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
