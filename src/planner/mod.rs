//! Change classification, step planning, and deployment-step building.
//!
//! The planner turns a pair of infrastructure snapshots into an ordered list
//! of provider-legal deployment steps: classify every secondary-index change,
//! queue one intermediate table snapshot per index operation, then materialize
//! each queued snapshot as a full bundle paired with its rollback target.

pub mod bundle;
pub mod classify;
pub mod steps;

pub use bundle::{BundleHasher, DeploymentOp, DeploymentStep, StepBuilder};
pub use classify::{classify_table_changes, ChangeClassifier, GsiChange, GsiChangeKind};
pub use steps::{StepPlanner, TemplateState};
