//! Deployment state tracking and persistence.
//!
//! The engine records every step's progress in a versioned state document so
//! an interrupted deployment can be resumed from external storage rather than
//! process memory.

pub mod local;
pub mod manager;
pub mod s3;
pub mod store;
pub mod types;

pub use local::LocalStateStore;
pub use manager::DeploymentStateManager;
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{
    DeploymentState, DeploymentStatus, DeploymentStepState, StepStatus, STATE_VERSION,
};
