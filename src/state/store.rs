//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;

use super::types::{DeploymentState, STATE_VERSION};
use crate::error::{Result, StateError, TablestepError};

/// Serializes a state document for storage.
pub(crate) fn encode_state(state: &DeploymentState) -> Result<String> {
    serde_json::to_string_pretty(state).map_err(|e| {
        TablestepError::State(StateError::serialization(format!(
            "Failed to serialize state: {e}"
        )))
    })
}

/// Parses a stored state document, rejecting unknown format versions.
pub(crate) fn decode_state(content: &str) -> Result<DeploymentState> {
    let state: DeploymentState = serde_json::from_str(content).map_err(|e| {
        TablestepError::State(StateError::corrupted(format!(
            "Failed to parse state document: {e}"
        )))
    })?;

    if state.version != STATE_VERSION {
        return Err(TablestepError::State(StateError::VersionMismatch {
            expected: STATE_VERSION.to_string(),
            found: state.version,
        }));
    }

    Ok(state)
}

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the deployment state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<DeploymentState>>;

    /// Saves the deployment state.
    async fn save(&self, state: &DeploymentState) -> Result<()>;

    /// Deletes the deployment state.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<DeploymentState>> {
        (**self).load().await
    }

    async fn save(&self, state: &DeploymentState) -> Result<()> {
        (**self).save(state).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
