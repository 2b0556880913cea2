// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(missing_docs)]                // All public items should be documented
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Tablestep
//!
//! An iterative schema-migration deployment engine for DynamoDB-style tables.
//!
//! ## Overview
//!
//! The table provider forbids certain mutations from landing in a single stack
//! update: you cannot add and remove a secondary index in the same update, and
//! you cannot retarget an index's key schema in place. Tablestep turns an
//! arbitrary index-schema change into a sequence of provider-legal updates:
//!
//! 1. **Diff**: structurally compare the deployed infrastructure snapshot
//!    against the newly compiled one
//! 2. **Classify**: turn each diff record into a typed index change,
//!    suppressing false positives caused by index-array reordering
//! 3. **Plan**: decompose the change set into an ordered queue of intermediate
//!    table snapshots, one index operation apart
//! 4. **Build**: materialize each snapshot as a full deployable bundle paired
//!    with its rollback target
//! 5. **Orchestrate**: drive the steps against the live provider as a
//!    resumable, rollback-capable deployment with externally persisted state
//!
//! ## Modules
//!
//! - [`snapshot`]: infrastructure snapshot model and structural diff
//! - [`planner`]: change classification, step planning, bundle building
//! - [`state`]: durable deployment-state storage (local, S3)
//! - [`provider`]: thin stack/table/artifact provider clients
//! - [`orchestrator`]: the forward/rollback deployment state machine
//! - [`config`]: engine tuning and target configuration

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod snapshot;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::EngineConfig;
pub use error::{
    BuildError, ConfigError, PlanError, ProviderError, Result, StateError, TablestepError,
};
pub use orchestrator::{DeploymentOrchestrator, DeploymentOutcome, OrchestratorState};
pub use planner::{
    BundleHasher, DeploymentOp, DeploymentStep, GsiChange, GsiChangeKind, StepBuilder,
    StepPlanner, TemplateState,
};
pub use provider::{
    ArtifactStore, BundleUploader, CloudFormationStackClient, DynamoTableClient, IndexReadiness,
    S3ArtifactStore, StackClient, StackEvent, StackEventObserver, TableClient,
};
pub use snapshot::{
    diff_by_key, diff_values, AttributeDefinition, ChangeKind, ChangeRecord,
    GlobalSecondaryIndex, InfrastructureSnapshot, KeySchemaElement, KeyType, PathSegment,
    Projection, Resource, ScalarAttributeType, StackTemplate, TableProperties,
};
pub use state::{
    DeploymentState, DeploymentStateManager, DeploymentStatus, DeploymentStepState,
    LocalStateStore, S3StateStore, StateStore, StepStatus,
};
