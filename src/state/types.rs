//! State types for tracking deployment progress.
//!
//! These types form the persisted state document. Step entries embed the
//! full deployment and rollback operations so a fresh process can resume or
//! unwind a deployment from the document alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::planner::{DeploymentOp, DeploymentStep};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// The complete deployment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    /// State format version.
    pub version: String,
    /// Environment this deployment targets.
    pub environment: String,
    /// Overall deployment status.
    pub status: DeploymentStatus,
    /// Index of the step currently being processed.
    pub current_step_index: usize,
    /// Per-step records, in forward execution order.
    pub steps: Vec<DeploymentStepState>,
    /// When the deployment started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the deployment reached a terminal status.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
}

/// Persisted record of a single deployment step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStepState {
    /// Status of this step.
    pub status: StepStatus,
    /// The forward stack update.
    pub deployment: DeploymentOp,
    /// The update that returns to the previous good state.
    pub rollback: DeploymentOp,
}

/// Overall deployment status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// No deployment is running.
    Idle,
    /// Steps are being applied forward.
    Deploying,
    /// Completed steps are being unwound.
    RollingBack,
    /// All steps applied successfully.
    Deployed,
    /// All applied steps were unwound successfully.
    RolledBack,
    /// The deployment or its rollback failed; manual intervention needed.
    Failed,
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// The step has not been applied, or its application is in flight.
    WaitingForDeployment,
    /// The step's forward update completed.
    Deployed,
    /// The step's rollback update completed.
    RolledBack,
}

impl DeploymentState {
    /// Creates a fresh state document for a planned set of steps.
    #[must_use]
    pub fn new(environment: &str, steps: &[DeploymentStep]) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            environment: environment.to_string(),
            status: DeploymentStatus::Idle,
            current_step_index: 0,
            steps: steps.iter().map(DeploymentStepState::from_step).collect(),
            started_at: None,
            finished_at: None,
            last_updated: Utc::now(),
        }
    }

    /// Returns whether a deployment is currently in progress.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(
            self.status,
            DeploymentStatus::Deploying | DeploymentStatus::RollingBack
        )
    }

    /// Returns the record of the current step, if any.
    #[must_use]
    pub fn current_step(&self) -> Option<&DeploymentStepState> {
        self.steps.get(self.current_step_index)
    }

    /// Touches the last-updated timestamp.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Returns whether an in-flight deployment has gone stale.
    ///
    /// Every orchestrator action touches the document, so an in-progress
    /// document that has not been updated for longer than `max_age_secs`
    /// belongs to a crashed or wedged process. Such a run can be picked up
    /// again or unwound from its recorded step index.
    #[must_use]
    pub fn is_stuck(&self, max_age_secs: u64) -> bool {
        self.is_in_progress()
            && u64::try_from((Utc::now() - self.last_updated).num_seconds())
                .is_ok_and(|age| age > max_age_secs)
    }
}

impl DeploymentStepState {
    /// Creates a step record from a planned step.
    #[must_use]
    pub fn from_step(step: &DeploymentStep) -> Self {
        Self {
            status: StepStatus::WaitingForDeployment,
            deployment: step.deployment.clone(),
            rollback: step.rollback.clone(),
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Idle => "IDLE",
            Self::Deploying => "DEPLOYING",
            Self::RollingBack => "ROLLING_BACK",
            Self::Deployed => "DEPLOYED",
            Self::RolledBack => "ROLLED_BACK",
            Self::Failed => "FAILED",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::WaitingForDeployment => "WAITING_FOR_DEPLOYMENT",
            Self::Deployed => "DEPLOYED",
            Self::RolledBack => "ROLLED_BACK",
        };
        write!(f, "{status}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn step(name: &str) -> DeploymentStep {
        let op = |location: &str| DeploymentOp {
            stack_name: String::from("root"),
            template_location: location.to_string(),
            parameters: BTreeMap::new(),
            table_names: Vec::new(),
        };
        DeploymentStep {
            deployment: op(&format!("deployments/a/{name}/root.json")),
            rollback: op("deployments/a/live/root.json"),
            bundle_dir: PathBuf::from("/tmp/unused"),
        }
    }

    #[test]
    fn test_new_state_starts_idle_with_waiting_steps() {
        let state = DeploymentState::new("prod", &[step("step-0"), step("step-1")]);

        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.status, DeploymentStatus::Idle);
        assert_eq!(state.current_step_index, 0);
        assert_eq!(state.steps.len(), 2);
        assert!(state
            .steps
            .iter()
            .all(|s| s.status == StepStatus::WaitingForDeployment));
        assert!(!state.is_in_progress());
    }

    #[test]
    fn test_status_wire_format_is_screaming_snake_case() {
        let json = serde_json::to_string(&DeploymentStatus::RollingBack).expect("serialize");
        assert_eq!(json, "\"ROLLING_BACK\"");

        let json = serde_json::to_string(&StepStatus::WaitingForDeployment).expect("serialize");
        assert_eq!(json, "\"WAITING_FOR_DEPLOYMENT\"");
    }

    #[test]
    fn test_stale_in_progress_state_is_stuck() {
        let mut state = DeploymentState::new("dev", &[step("step-0")]);
        state.status = DeploymentStatus::Deploying;
        state.last_updated = Utc::now() - chrono::Duration::seconds(600);

        assert!(state.is_stuck(300));
        assert!(!state.is_stuck(900));

        // Terminal documents are never stuck, however old.
        state.status = DeploymentStatus::Deployed;
        assert!(!state.is_stuck(300));
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = DeploymentState::new("dev", &[step("step-0")]);
        state.status = DeploymentStatus::Deploying;
        state.started_at = Some(Utc::now());

        let json = serde_json::to_string(&state).expect("serialize");
        let loaded: DeploymentState = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(loaded.status, DeploymentStatus::Deploying);
        assert_eq!(loaded.steps.len(), 1);
        assert_eq!(
            loaded.steps[0].deployment.template_location,
            "deployments/a/step-0/root.json"
        );
    }
}
