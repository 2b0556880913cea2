//! Typed representation of infrastructure snapshots.
//!
//! Templates follow the provider's JSON wire format with `PascalCase` field
//! names. Unknown fields are preserved through flattened maps so that a
//! template can round-trip through the engine byte-for-byte except for the
//! table fragments it deliberately rewrites.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PlanError, Result, TablestepError};

/// Resource type identifying a DynamoDB-style table.
pub const TABLE_RESOURCE_TYPE: &str = "AWS::DynamoDB::Table";

/// A point-in-time description of all stacks in a project.
///
/// Produced by the schema compiler; read-only to this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureSnapshot {
    /// Nested stacks by name.
    pub stacks: BTreeMap<String, StackTemplate>,
    /// The root stack tying the nested stacks together.
    pub root: StackTemplate,
}

/// A single stack template: logical resource name to resource body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackTemplate {
    /// Logical resources in the stack.
    #[serde(rename = "Resources", default)]
    pub resources: BTreeMap<String, Resource>,
    /// Remaining template sections (Parameters, Outputs, Conditions, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A resource body: type tag plus property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Provider resource type.
    #[serde(rename = "Type")]
    pub resource_type: String,
    /// Resource properties.
    #[serde(rename = "Properties", default)]
    pub properties: Value,
    /// Remaining resource attributes (DependsOn, Condition, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Key type within a key schema element.
///
/// `Hash` denotes the partition key; `Range` denotes the sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// Partition key.
    #[serde(rename = "HASH")]
    Hash,
    /// Sort key.
    #[serde(rename = "RANGE")]
    Range,
}

/// Scalar attribute types allowed in key schemas and attribute definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarAttributeType {
    /// String.
    S,
    /// Number.
    N,
    /// Binary.
    B,
}

/// A single key schema element: the attribute and its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchemaElement {
    /// The name of the key attribute.
    pub attribute_name: String,
    /// The role of the attribute in the key schema.
    pub key_type: KeyType,
}

/// An attribute definition naming an attribute and its scalar type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeDefinition {
    /// The name of the attribute.
    pub attribute_name: String,
    /// The scalar data type of the attribute.
    pub attribute_type: ScalarAttributeType,
}

/// Projection settings for a secondary index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Projection {
    /// Which attributes are projected into the index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_type: Option<String>,
    /// Non-key attributes to project when the type is `INCLUDE`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_key_attributes: Vec<String>,
}

/// A global secondary index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GlobalSecondaryIndex {
    /// The name of the index.
    pub index_name: String,
    /// The key schema for this index.
    pub key_schema: Vec<KeySchemaElement>,
    /// The attributes projected into this index.
    #[serde(default)]
    pub projection: Projection,
    /// Provider-specific extras (throughput, on-demand settings, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed view of a table resource's property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableProperties {
    /// The base table key schema.
    pub key_schema: Vec<KeySchemaElement>,
    /// Attribute definitions for every key attribute on the table or an index.
    #[serde(default)]
    pub attribute_definitions: Vec<AttributeDefinition>,
    /// Secondary indexes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_secondary_indexes: Option<Vec<GlobalSecondaryIndex>>,
    /// Remaining table properties, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StackTemplate {
    /// Returns the logical names of all table resources in this stack.
    #[must_use]
    pub fn table_resource_names(&self) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, r)| r.resource_type == TABLE_RESOURCE_TYPE)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Parses the properties of a table resource into the typed view.
    ///
    /// # Errors
    ///
    /// Returns a [`PlanError`] if the resource is missing or its properties
    /// do not deserialize as a table definition.
    pub fn table_properties(&self, logical_name: &str) -> Result<TableProperties> {
        let resource = self.resources.get(logical_name).ok_or_else(|| {
            TablestepError::Plan(PlanError::NoTableResource {
                stack: logical_name.to_string(),
            })
        })?;

        serde_json::from_value(resource.properties.clone()).map_err(|e| {
            TablestepError::Plan(PlanError::MalformedTemplate {
                stack: logical_name.to_string(),
                message: e.to_string(),
            })
        })
    }

    /// Writes a typed table view back into the resource's property bag.
    ///
    /// # Errors
    ///
    /// Returns a [`PlanError`] if the resource is missing or the view cannot
    /// be serialized.
    pub fn set_table_properties(
        &mut self,
        logical_name: &str,
        properties: &TableProperties,
    ) -> Result<()> {
        let value = serde_json::to_value(properties).map_err(|e| {
            TablestepError::Plan(PlanError::MalformedTemplate {
                stack: logical_name.to_string(),
                message: e.to_string(),
            })
        })?;

        let resource = self.resources.get_mut(logical_name).ok_or_else(|| {
            TablestepError::Plan(PlanError::NoTableResource {
                stack: logical_name.to_string(),
            })
        })?;

        resource.properties = value;
        Ok(())
    }
}

impl TableProperties {
    /// Returns the secondary index list, empty when none are defined.
    #[must_use]
    pub fn indexes(&self) -> &[GlobalSecondaryIndex] {
        self.global_secondary_indexes.as_deref().unwrap_or_default()
    }

    /// Finds a secondary index by name.
    #[must_use]
    pub fn find_index(&self, index_name: &str) -> Option<&GlobalSecondaryIndex> {
        self.indexes().iter().find(|i| i.index_name == index_name)
    }

    /// Returns the attribute names referenced by the base table key schema.
    #[must_use]
    pub fn primary_key_attributes(&self) -> Vec<&str> {
        self.key_schema
            .iter()
            .map(|k| k.attribute_name.as_str())
            .collect()
    }
}

impl GlobalSecondaryIndex {
    /// Returns the attribute names referenced by this index's key schema.
    #[must_use]
    pub fn key_attributes(&self) -> Vec<&str> {
        self.key_schema
            .iter()
            .map(|k| k.attribute_name.as_str())
            .collect()
    }
}

impl InfrastructureSnapshot {
    /// Creates a snapshot from a stack map and root template.
    #[must_use]
    pub const fn new(stacks: BTreeMap<String, StackTemplate>, root: StackTemplate) -> Self {
        Self { stacks, root }
    }

    /// Gets a nested stack by name.
    #[must_use]
    pub fn stack(&self, name: &str) -> Option<&StackTemplate> {
        self.stacks.get(name)
    }
}

impl KeyType {
    /// Returns the wire-format string for this key type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hash => "HASH",
            Self::Range => "RANGE",
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
