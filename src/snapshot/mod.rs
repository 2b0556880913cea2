//! Infrastructure snapshot model and structural diff.
//!
//! A snapshot is the compiler's point-in-time description of every stack in a
//! project. The engine treats snapshots as read-only diff inputs; all
//! intermediate shapes it produces are copies.

pub mod diff;
pub mod model;

pub use diff::{diff_by_key, diff_values, ChangeKind, ChangeRecord, PathSegment};
pub use model::{
    AttributeDefinition, GlobalSecondaryIndex, InfrastructureSnapshot, KeySchemaElement, KeyType,
    Projection, Resource, ScalarAttributeType, StackTemplate, TableProperties, TABLE_RESOURCE_TYPE,
};
