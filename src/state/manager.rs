//! Deployment state lifecycle management.
//!
//! The manager owns the in-memory state document and persists every change
//! to the backing store before reporting success. The store copy is
//! authoritative: starting a deployment reloads it first, so two processes
//! sharing a store cannot both begin work.

use tracing::{debug, info, warn};

use crate::error::{Result, StateError, TablestepError};
use crate::planner::DeploymentStep;

use super::store::StateStore;
use super::types::{DeploymentState, DeploymentStatus, StepStatus};

/// Manages the deployment state document against a storage backend.
#[derive(Debug)]
pub struct DeploymentStateManager<S: StateStore> {
    /// Backing store.
    store: S,
    /// Environment this manager tracks.
    environment: String,
    /// Cached state document, present once a deployment has started.
    state: Option<DeploymentState>,
}

impl<S: StateStore> DeploymentStateManager<S> {
    /// Creates a new state manager.
    #[must_use]
    pub const fn new(store: S, environment: String) -> Self {
        Self {
            store,
            environment,
            state: None,
        }
    }

    /// Starts a new deployment over the given steps.
    ///
    /// Reloads the persisted state first; if it records an in-flight
    /// deployment, returns `Ok(false)` without touching anything. Otherwise
    /// resets the document to step zero with every step waiting, marks the
    /// deployment as in progress, and persists it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn start_deployment(&mut self, steps: &[DeploymentStep]) -> Result<bool> {
        if let Some(existing) = self.store.load().await? {
            if existing.is_in_progress() {
                warn!(
                    "Deployment already in progress for {} (status: {})",
                    existing.environment, existing.status
                );
                self.state = Some(existing);
                return Ok(false);
            }
        }

        let mut state = DeploymentState::new(&self.environment, steps);
        state.status = DeploymentStatus::Deploying;
        state.started_at = Some(chrono::Utc::now());
        state.touch();

        self.store.save(&state).await?;
        info!(
            "Started deployment for {} with {} step(s) via {} store",
            self.environment,
            steps.len(),
            self.store.backend_type()
        );

        self.state = Some(state);
        Ok(true)
    }

    /// Sets the status of the current step and persists the document.
    ///
    /// # Errors
    ///
    /// Returns an error if no deployment is in progress or the current step
    /// index is out of range.
    pub async fn update_current_step_status(&mut self, status: StepStatus) -> Result<()> {
        let state = self.in_progress_mut("update step status")?;

        let index = state.current_step_index;
        let count = state.steps.len();
        let step = state.steps.get_mut(index).ok_or_else(|| {
            TablestepError::State(StateError::StepOutOfBounds {
                index,
                direction: 0,
                count,
            })
        })?;

        debug!("Step {index}: {} -> {status}", step.status);
        step.status = status;
        state.touch();

        self.persist().await
    }

    /// Moves the step index one position in the active direction.
    ///
    /// Forward while deploying, backward while rolling back.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::StepOutOfBounds`] if the move would leave the
    /// valid range.
    pub async fn advance_step(&mut self) -> Result<()> {
        let state = self.in_progress_mut("advance step")?;

        let direction: i8 = if state.status == DeploymentStatus::RollingBack {
            -1
        } else {
            1
        };

        let index = state.current_step_index;
        let count = state.steps.len();
        let out_of_bounds = if direction < 0 {
            index == 0
        } else {
            index + 1 >= count
        };
        if out_of_bounds {
            return Err(TablestepError::State(StateError::StepOutOfBounds {
                index,
                direction,
                count,
            }));
        }

        if direction < 0 {
            state.current_step_index -= 1;
        } else {
            state.current_step_index += 1;
        }
        state.touch();

        debug!("Advanced to step {}", state.current_step_index);
        self.persist().await
    }

    /// Switches the deployment into rollback mode.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidTransition`] unless the deployment is
    /// currently applying steps forward.
    pub async fn start_rollback(&mut self) -> Result<()> {
        let state = self.in_progress_mut("start rollback")?;

        if state.status != DeploymentStatus::Deploying {
            return Err(TablestepError::State(StateError::InvalidTransition {
                from: state.status.to_string(),
                to: DeploymentStatus::RollingBack.to_string(),
            }));
        }

        warn!(
            "Rolling back deployment from step {}",
            state.current_step_index
        );
        state.status = DeploymentStatus::RollingBack;
        state.touch();

        self.persist().await
    }

    /// Moves the deployment to a terminal status and persists it.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidTransition`] if the target is not a
    /// terminal status, or an error if no deployment is in progress.
    pub async fn finish_deployment(&mut self, target: DeploymentStatus) -> Result<()> {
        if !matches!(
            target,
            DeploymentStatus::Deployed | DeploymentStatus::RolledBack | DeploymentStatus::Failed
        ) {
            let from = self.status().to_string();
            return Err(TablestepError::State(StateError::InvalidTransition {
                from,
                to: target.to_string(),
            }));
        }

        let state = self.in_progress_mut("finish deployment")?;

        info!("Deployment finished: {} -> {target}", state.status);
        state.status = target;
        state.finished_at = Some(chrono::Utc::now());
        state.touch();

        self.persist().await
    }

    /// Returns whether a deployment is currently in progress.
    #[must_use]
    pub fn is_deployment_in_progress(&self) -> bool {
        self.state.as_ref().is_some_and(DeploymentState::is_in_progress)
    }

    /// Returns the current overall status.
    #[must_use]
    pub fn status(&self) -> DeploymentStatus {
        self.state
            .as_ref()
            .map_or(DeploymentStatus::Idle, |s| s.status)
    }

    /// Returns the current state document, if one is loaded.
    #[must_use]
    pub const fn state(&self) -> Option<&DeploymentState> {
        self.state.as_ref()
    }

    /// Returns the backing store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Reloads the state document from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn reload(&mut self) -> Result<Option<&DeploymentState>> {
        self.state = self.store.load().await?;
        Ok(self.state.as_ref())
    }

    fn in_progress_mut(&mut self, operation: &str) -> Result<&mut DeploymentState> {
        match self.state.as_mut() {
            Some(state) if state.is_in_progress() => Ok(state),
            _ => Err(TablestepError::State(StateError::NotInProgress {
                operation: operation.to_string(),
            })),
        }
    }

    async fn persist(&self) -> Result<()> {
        match self.state.as_ref() {
            Some(state) => self.store.save(state).await,
            None => Err(TablestepError::State(StateError::NotInProgress {
                operation: String::from("persist state"),
            })),
        }
    }
}
