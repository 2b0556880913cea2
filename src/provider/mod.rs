//! Provider-facing clients: stack updates, table readiness, bundle storage.
//!
//! The orchestrator depends only on the traits defined here; the AWS-backed
//! implementations live alongside them so tests can substitute fakes.

pub mod artifacts;
pub mod observer;
pub mod stack;
pub mod table;

pub use artifacts::{ArtifactStore, BundleUploader, S3ArtifactStore};
pub use observer::StackEventObserver;
pub use stack::{CloudFormationStackClient, StackClient, StackEvent};
pub use table::{DynamoTableClient, IndexReadiness, TableClient};
