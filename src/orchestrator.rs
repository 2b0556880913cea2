//! Deployment orchestration.
//!
//! Drives planned steps forward one at a time and unwinds completed steps in
//! reverse order when one fails. Every status change is persisted before the
//! next provider call, so an interrupted run leaves an accurate record that
//! a later process can resume or abort from.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::error::{ProviderError, Result, StateError, TablestepError};
use crate::planner::{DeploymentOp, DeploymentStep};
use crate::provider::{IndexReadiness, StackClient, StackEventObserver, TableClient};
use crate::state::{
    DeploymentStateManager, DeploymentStatus, DeploymentStepState, StateStore, StepStatus,
};

/// Where the orchestrator currently is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No run is active.
    Idle,
    /// A forward stack update is in flight.
    Deploying,
    /// Waiting for affected tables to settle after a forward update.
    TableWait,
    /// A rollback stack update is in flight.
    Rollback,
    /// Waiting for the stack and tables to settle after a rollback update.
    RollbackWait,
    /// Every step applied successfully.
    Deployed,
    /// Every applied step was unwound successfully.
    RolledBack,
    /// The rollback itself failed; manual intervention is needed.
    Failed,
}

/// Terminal result of a successful orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentOutcome {
    /// All steps were applied.
    Deployed,
    /// A step failed and all applied steps were unwound.
    RolledBack,
}

/// Drives a set of deployment steps to completion.
pub struct DeploymentOrchestrator<S: StateStore> {
    /// State manager persisting progress.
    manager: DeploymentStateManager<S>,
    /// Stack update client.
    stack_client: Arc<dyn StackClient>,
    /// Table readiness client.
    table_client: Arc<dyn TableClient>,
    /// Interval between readiness polls, in seconds.
    poll_interval_secs: u64,
    /// Time allowed for tables to settle after an update, in seconds.
    readiness_timeout_secs: u64,
    /// Current position in the run.
    state: OrchestratorState,
}

impl<S: StateStore> DeploymentOrchestrator<S> {
    /// Creates a new orchestrator.
    #[must_use]
    pub fn new(
        store: S,
        stack_client: Arc<dyn StackClient>,
        table_client: Arc<dyn TableClient>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            manager: DeploymentStateManager::new(store, config.environment.clone()),
            stack_client,
            table_client,
            poll_interval_secs: config.poll_interval_secs,
            readiness_timeout_secs: config.readiness_timeout_secs,
            state: OrchestratorState::Idle,
        }
    }

    /// Returns the orchestrator's current position.
    #[must_use]
    pub const fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Returns the underlying state manager.
    pub const fn manager(&self) -> &DeploymentStateManager<S> {
        &self.manager
    }

    /// Runs the given steps to a terminal outcome.
    ///
    /// Steps are applied in order; each must settle (stack update complete
    /// and all affected tables active) before the next begins. If any step
    /// fails, every applied step is unwound in reverse order via its
    /// rollback operation.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::AlreadyInProgress`] if the persisted state
    /// records an in-flight deployment, or the rollback error if the
    /// rollback itself fails.
    pub async fn run(&mut self, steps: &[DeploymentStep]) -> Result<DeploymentOutcome> {
        if !self.manager.start_deployment(steps).await? {
            return Err(TablestepError::State(StateError::AlreadyInProgress {
                status: self.manager.status().to_string(),
            }));
        }

        if steps.is_empty() {
            info!("Nothing to deploy");
            self.manager
                .finish_deployment(DeploymentStatus::Deployed)
                .await?;
            self.state = OrchestratorState::Deployed;
            return Ok(DeploymentOutcome::Deployed);
        }

        self.drive_forward().await
    }

    /// Picks up an interrupted run from the persisted state document.
    ///
    /// Reloads the document and continues from its recorded step index: a
    /// deploying run keeps applying forward, a rolling-back run keeps
    /// unwinding. The current step is re-applied; a stack already at the
    /// step's template reports no changes and settles immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotInProgress`] if the store records no
    /// in-flight deployment.
    pub async fn resume(&mut self) -> Result<DeploymentOutcome> {
        match self.reload_in_progress("resume").await? {
            DeploymentStatus::RollingBack => {
                info!("Resuming rollback");
                self.drive_rollback().await
            }
            status => {
                info!("Resuming deployment (status: {status})");
                self.drive_forward().await
            }
        }
    }

    /// Abandons an interrupted run, unwinding every step from the recorded
    /// step index down to the live operation.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotInProgress`] if the store records no
    /// in-flight deployment, or the rollback error if the rollback fails.
    pub async fn abort(&mut self) -> Result<DeploymentOutcome> {
        if self.reload_in_progress("abort").await? == DeploymentStatus::Deploying {
            warn!("Aborting in-flight deployment");
            self.manager.start_rollback().await?;
        }
        self.drive_rollback().await
    }

    /// Reloads the state document, requiring an in-flight deployment.
    async fn reload_in_progress(&mut self, operation: &str) -> Result<DeploymentStatus> {
        match self.manager.reload().await? {
            Some(state) if state.is_in_progress() => Ok(state.status),
            _ => Err(TablestepError::State(StateError::NotInProgress {
                operation: operation.to_string(),
            })),
        }
    }

    /// Returns the persisted step list and current index.
    fn current_plan(&self, operation: &str) -> Result<(Vec<DeploymentStepState>, usize)> {
        self.manager
            .state()
            .map(|s| (s.steps.clone(), s.current_step_index))
            .ok_or_else(|| {
                TablestepError::State(StateError::NotInProgress {
                    operation: operation.to_string(),
                })
            })
    }

    /// Applies steps forward from the persisted step index.
    async fn drive_forward(&mut self) -> Result<DeploymentOutcome> {
        let (steps, mut index) = self.current_plan("deploy")?;
        loop {
            let op = steps[index].deployment.clone();
            info!(
                "Applying step {}/{}: {}",
                index + 1,
                steps.len(),
                op.template_location
            );

            self.state = OrchestratorState::Deploying;
            if let Err(e) = self.apply_op(&op).await {
                warn!("Step {} failed: {e}", index + 1);
                self.manager.start_rollback().await?;
                return self.drive_rollback().await;
            }

            self.manager
                .update_current_step_status(StepStatus::Deployed)
                .await?;

            if index + 1 >= steps.len() {
                break;
            }
            self.manager.advance_step().await?;
            index += 1;
        }

        self.manager
            .finish_deployment(DeploymentStatus::Deployed)
            .await?;
        self.state = OrchestratorState::Deployed;
        info!("Deployment complete: {} step(s) applied", steps.len());
        Ok(DeploymentOutcome::Deployed)
    }

    /// Unwinds steps from the persisted step index down to zero.
    async fn drive_rollback(&mut self) -> Result<DeploymentOutcome> {
        let (steps, mut index) = self.current_plan("roll back")?;
        loop {
            let op = steps[index].rollback.clone();
            info!("Rolling back step {}: {}", index + 1, op.template_location);

            self.state = OrchestratorState::Rollback;
            if let Err(e) = self.apply_rollback(&op).await {
                error!("Rollback of step {} failed: {e}", index + 1);
                self.manager
                    .finish_deployment(DeploymentStatus::Failed)
                    .await?;
                self.state = OrchestratorState::Failed;
                return Err(e);
            }

            self.manager
                .update_current_step_status(StepStatus::RolledBack)
                .await?;

            if index == 0 {
                break;
            }
            self.manager.advance_step().await?;
            index -= 1;
        }

        self.manager
            .finish_deployment(DeploymentStatus::RolledBack)
            .await?;
        self.state = OrchestratorState::RolledBack;
        info!("Rollback complete");
        Ok(DeploymentOutcome::RolledBack)
    }

    /// Applies one rollback operation and waits for it to settle.
    async fn apply_rollback(&mut self, op: &DeploymentOp) -> Result<()> {
        self.state = OrchestratorState::RollbackWait;
        self.apply_op(op).await
    }

    /// Issues a stack update and waits for the stack and tables to settle.
    async fn apply_op(&mut self, op: &DeploymentOp) -> Result<()> {
        let observer = StackEventObserver::attach(
            Arc::clone(&self.stack_client),
            &op.stack_name,
            self.poll_interval_secs,
        );

        self.stack_client
            .update_stack(&op.stack_name, &op.template_location, &op.parameters)
            .await?;
        let waited = self
            .stack_client
            .wait_for_update_complete(&op.stack_name)
            .await;
        observer.stop();
        waited?;

        if self.state == OrchestratorState::Deploying {
            self.state = OrchestratorState::TableWait;
        }
        self.wait_for_tables(&op.table_names).await
    }

    /// Polls every affected table until all its indexes are active.
    async fn wait_for_tables(&self, tables: &[String]) -> Result<()> {
        for table in tables {
            let started = tokio::time::Instant::now();
            loop {
                match self.table_client.index_statuses(table).await {
                    Ok(statuses) if IndexReadiness::all_ready(&statuses) => break,
                    Ok(_) => {}
                    // Transient describe failures count as another wait round.
                    Err(e) if e.is_retryable() => {
                        warn!("Readiness check for {table} failed transiently: {e}");
                    }
                    Err(e) => return Err(e),
                }

                let elapsed = started.elapsed();
                if elapsed.as_secs() > self.readiness_timeout_secs {
                    return Err(TablestepError::Provider(ProviderError::TableNotReady {
                        table_name: table.clone(),
                        elapsed_secs: elapsed.as_secs(),
                    }));
                }

                info!("Waiting for table {table} to settle");
                tokio::time::sleep(std::time::Duration::from_secs(self.poll_interval_secs.max(1)))
                    .await;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            Self::Idle => "idle",
            Self::Deploying => "deploying",
            Self::TableWait => "table-wait",
            Self::Rollback => "rollback",
            Self::RollbackWait => "rollback-wait",
            Self::Deployed => "deployed",
            Self::RolledBack => "rolled-back",
            Self::Failed => "failed",
        };
        write!(f, "{state}")
    }
}

impl std::fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deployed => write!(f, "deployed"),
            Self::RolledBack => write!(f, "rolled-back"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StackEvent;
    use crate::state::{DeploymentState, LocalStateStore, StateStore};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct FakeStackClient {
        /// Template locations in the order they were applied.
        applied: Mutex<Vec<String>>,
        /// Template locations whose update should fail.
        fail_on: Vec<String>,
    }

    #[async_trait]
    impl StackClient for FakeStackClient {
        async fn update_stack(
            &self,
            stack_name: &str,
            template_location: &str,
            _parameters: &BTreeMap<String, String>,
        ) -> Result<()> {
            self.applied
                .lock()
                .expect("lock poisoned")
                .push(template_location.to_string());

            if self.fail_on.iter().any(|l| l == template_location) {
                return Err(TablestepError::Provider(ProviderError::UpdateFailed {
                    stack_name: stack_name.to_string(),
                    reason: String::from("injected failure"),
                }));
            }
            Ok(())
        }

        async fn wait_for_update_complete(&self, _stack_name: &str) -> Result<()> {
            Ok(())
        }

        async fn stack_events(&self, _stack_name: &str) -> Result<Vec<StackEvent>> {
            Ok(Vec::new())
        }
    }

    #[derive(Debug)]
    struct ReadyTableClient;

    #[async_trait]
    impl TableClient for ReadyTableClient {
        async fn index_statuses(&self, _table: &str) -> Result<Vec<IndexReadiness>> {
            Ok(Vec::new())
        }
    }

    fn step(index: usize) -> DeploymentStep {
        let op = |location: String| DeploymentOp {
            stack_name: String::from("app-root"),
            template_location: location,
            parameters: BTreeMap::new(),
            table_names: vec![String::from("Todo")],
        };
        let rollback_target = if index == 0 {
            String::from("deployments/h/live/root.json")
        } else {
            format!("deployments/h/step-{}/root.json", index - 1)
        };
        DeploymentStep {
            deployment: op(format!("deployments/h/step-{index}/root.json")),
            rollback: op(rollback_target),
            bundle_dir: PathBuf::from("/tmp/unused"),
        }
    }

    fn orchestrator(
        temp: &TempDir,
        stack_client: Arc<FakeStackClient>,
    ) -> DeploymentOrchestrator<LocalStateStore> {
        let config = EngineConfig {
            poll_interval_secs: 1,
            ..EngineConfig::new("dev", "deploy-bucket", "app-root")
        };
        DeploymentOrchestrator::new(
            LocalStateStore::with_base_dir(temp.path()),
            stack_client,
            Arc::new(ReadyTableClient),
            &config,
        )
    }

    async fn stored_state(temp: &TempDir) -> DeploymentState {
        LocalStateStore::with_base_dir(temp.path())
            .load()
            .await
            .expect("load")
            .expect("state exists")
    }

    #[tokio::test]
    async fn test_all_steps_deploy_in_order() {
        let temp = TempDir::new().expect("temp dir");
        let stack_client = Arc::new(FakeStackClient::default());
        let mut orch = orchestrator(&temp, Arc::clone(&stack_client));

        let steps = vec![step(0), step(1), step(2)];
        let outcome = orch.run(&steps).await.expect("run");

        assert_eq!(outcome, DeploymentOutcome::Deployed);
        assert_eq!(orch.state(), OrchestratorState::Deployed);

        let applied = stack_client.applied.lock().expect("lock poisoned");
        assert_eq!(
            *applied,
            vec![
                String::from("deployments/h/step-0/root.json"),
                String::from("deployments/h/step-1/root.json"),
                String::from("deployments/h/step-2/root.json"),
            ]
        );

        let state = stored_state(&temp).await;
        assert_eq!(state.status, DeploymentStatus::Deployed);
        assert_eq!(state.current_step_index, 2);
        assert!(state.steps.iter().all(|s| s.status == StepStatus::Deployed));
        assert!(state.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_step_triggers_lifo_rollback() {
        let temp = TempDir::new().expect("temp dir");
        let stack_client = Arc::new(FakeStackClient {
            applied: Mutex::new(Vec::new()),
            fail_on: vec![String::from("deployments/h/step-1/root.json")],
        });
        let mut orch = orchestrator(&temp, Arc::clone(&stack_client));

        let steps = vec![step(0), step(1)];
        let outcome = orch.run(&steps).await.expect("run");

        assert_eq!(outcome, DeploymentOutcome::RolledBack);
        assert_eq!(orch.state(), OrchestratorState::RolledBack);

        // Forward: step 0, step 1 (fails). Rollback: step 1's target (the
        // step 0 deployment), then step 0's target (the live bundle).
        let applied = stack_client.applied.lock().expect("lock poisoned");
        assert_eq!(
            *applied,
            vec![
                String::from("deployments/h/step-0/root.json"),
                String::from("deployments/h/step-1/root.json"),
                String::from("deployments/h/step-0/root.json"),
                String::from("deployments/h/live/root.json"),
            ]
        );

        let state = stored_state(&temp).await;
        assert_eq!(state.status, DeploymentStatus::RolledBack);
        assert_eq!(state.current_step_index, 0);
        assert!(state
            .steps
            .iter()
            .all(|s| s.status == StepStatus::RolledBack));
    }

    #[tokio::test]
    async fn test_failed_rollback_leaves_failed_status() {
        let temp = TempDir::new().expect("temp dir");
        let stack_client = Arc::new(FakeStackClient {
            applied: Mutex::new(Vec::new()),
            fail_on: vec![
                String::from("deployments/h/step-1/root.json"),
                String::from("deployments/h/live/root.json"),
            ],
        });
        let mut orch = orchestrator(&temp, Arc::clone(&stack_client));

        let steps = vec![step(0), step(1)];
        let err = orch.run(&steps).await.expect_err("rollback fails");

        assert!(matches!(
            err,
            TablestepError::Provider(ProviderError::UpdateFailed { .. })
        ));
        assert_eq!(orch.state(), OrchestratorState::Failed);

        let state = stored_state(&temp).await;
        assert_eq!(state.status, DeploymentStatus::Failed);
        // The unwound step is recorded; the step whose rollback failed
        // stays deployed, since its stack update is still live.
        assert_eq!(state.steps[1].status, StepStatus::RolledBack);
        assert_eq!(state.steps[0].status, StepStatus::Deployed);
    }

    #[tokio::test]
    async fn test_in_flight_deployment_is_rejected() {
        let temp = TempDir::new().expect("temp dir");

        let stack_client = Arc::new(FakeStackClient::default());
        let mut first = orchestrator(&temp, Arc::clone(&stack_client));
        let steps = vec![step(0)];
        // Seed the store with an in-flight deployment.
        first
            .manager
            .start_deployment(&steps)
            .await
            .expect("start");

        let mut second = orchestrator(&temp, stack_client);
        let err = second.run(&steps).await.expect_err("should be rejected");
        assert!(matches!(
            err,
            TablestepError::State(StateError::AlreadyInProgress { .. })
        ));
    }

    /// Seeds the store with a deployment interrupted after step 0 settled
    /// but before step 1 was applied.
    async fn seed_interrupted_deployment(temp: &TempDir) {
        let store = LocalStateStore::with_base_dir(temp.path());
        let mut mgr = DeploymentStateManager::new(store, String::from("dev"));
        mgr.start_deployment(&[step(0), step(1)])
            .await
            .expect("start");
        mgr.update_current_step_status(StepStatus::Deployed)
            .await
            .expect("mark step 0");
        mgr.advance_step().await.expect("advance");
    }

    #[tokio::test]
    async fn test_resume_continues_from_recorded_step() {
        let temp = TempDir::new().expect("temp dir");
        seed_interrupted_deployment(&temp).await;

        // A fresh process picks the run up from the persisted document.
        let stack_client = Arc::new(FakeStackClient::default());
        let mut orch = orchestrator(&temp, Arc::clone(&stack_client));
        let outcome = orch.resume().await.expect("resume");

        assert_eq!(outcome, DeploymentOutcome::Deployed);
        assert_eq!(orch.state(), OrchestratorState::Deployed);

        // Only the remaining step is applied.
        let applied = stack_client.applied.lock().expect("lock poisoned");
        assert_eq!(
            *applied,
            vec![String::from("deployments/h/step-1/root.json")]
        );

        let state = stored_state(&temp).await;
        assert_eq!(state.status, DeploymentStatus::Deployed);
        assert!(state.steps.iter().all(|s| s.status == StepStatus::Deployed));
    }

    #[tokio::test]
    async fn test_abort_unwinds_interrupted_deployment() {
        let temp = TempDir::new().expect("temp dir");
        seed_interrupted_deployment(&temp).await;

        let stack_client = Arc::new(FakeStackClient::default());
        let mut orch = orchestrator(&temp, Arc::clone(&stack_client));
        let outcome = orch.abort().await.expect("abort");

        assert_eq!(outcome, DeploymentOutcome::RolledBack);
        assert_eq!(orch.state(), OrchestratorState::RolledBack);

        // Unwinds from the recorded step down to the live bundle.
        let applied = stack_client.applied.lock().expect("lock poisoned");
        assert_eq!(
            *applied,
            vec![
                String::from("deployments/h/step-0/root.json"),
                String::from("deployments/h/live/root.json"),
            ]
        );

        let state = stored_state(&temp).await;
        assert_eq!(state.status, DeploymentStatus::RolledBack);
        assert!(state
            .steps
            .iter()
            .all(|s| s.status == StepStatus::RolledBack));
    }

    #[tokio::test]
    async fn test_resume_requires_in_flight_deployment() {
        let temp = TempDir::new().expect("temp dir");
        let stack_client = Arc::new(FakeStackClient::default());

        // Empty store: nothing to pick up.
        let mut orch = orchestrator(&temp, Arc::clone(&stack_client));
        let err = orch.resume().await.expect_err("nothing in flight");
        assert!(matches!(
            err,
            TablestepError::State(StateError::NotInProgress { .. })
        ));

        // A finished run cannot be picked up either.
        orch.run(&[step(0)]).await.expect("run");
        let err = orch.resume().await.expect_err("already finished");
        assert!(matches!(
            err,
            TablestepError::State(StateError::NotInProgress { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_plan_deploys_immediately() {
        let temp = TempDir::new().expect("temp dir");
        let stack_client = Arc::new(FakeStackClient::default());
        let mut orch = orchestrator(&temp, Arc::clone(&stack_client));

        let outcome = orch.run(&[]).await.expect("run");
        assert_eq!(outcome, DeploymentOutcome::Deployed);
        assert!(stack_client.applied.lock().expect("lock poisoned").is_empty());

        let state = stored_state(&temp).await;
        assert_eq!(state.status, DeploymentStatus::Deployed);
    }

    #[tokio::test]
    async fn test_transient_readiness_failures_are_retried() {
        #[derive(Debug, Default)]
        struct FlakyTableClient {
            calls: Mutex<usize>,
        }

        #[async_trait]
        impl TableClient for FlakyTableClient {
            async fn index_statuses(&self, _table: &str) -> Result<Vec<IndexReadiness>> {
                let mut calls = self.calls.lock().expect("lock poisoned");
                *calls += 1;
                if *calls == 1 {
                    return Err(TablestepError::Provider(ProviderError::api("throttled")));
                }
                Ok(Vec::new())
            }
        }

        let temp = TempDir::new().expect("temp dir");
        let config = EngineConfig {
            poll_interval_secs: 1,
            ..EngineConfig::new("dev", "deploy-bucket", "app-root")
        };
        let table_client = Arc::new(FlakyTableClient::default());
        let mut orch = DeploymentOrchestrator::new(
            LocalStateStore::with_base_dir(temp.path()),
            Arc::new(FakeStackClient::default()),
            Arc::clone(&table_client) as Arc<dyn TableClient>,
            &config,
        );

        let outcome = orch.run(&[step(0)]).await.expect("run");
        assert_eq!(outcome, DeploymentOutcome::Deployed);
        assert!(*table_client.calls.lock().expect("lock poisoned") >= 2);
    }

    #[tokio::test]
    async fn test_failing_step_waits_until_its_rollback_completes() {
        // The step that failed must not be marked deployed; it flips
        // straight from waiting to rolled back.
        let temp = TempDir::new().expect("temp dir");
        let stack_client = Arc::new(FakeStackClient {
            applied: Mutex::new(Vec::new()),
            fail_on: vec![String::from("deployments/h/step-0/root.json")],
        });
        let mut orch = orchestrator(&temp, Arc::clone(&stack_client));

        let outcome = orch.run(&[step(0)]).await.expect("run");
        assert_eq!(outcome, DeploymentOutcome::RolledBack);

        let state = stored_state(&temp).await;
        assert_eq!(state.steps[0].status, StepStatus::RolledBack);
    }
}
