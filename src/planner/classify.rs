//! Secondary-index change classification.
//!
//! Turns generic structural-diff records into typed index changes. The
//! provider stores secondary indexes as an unordered array, so a positional
//! tree diff reports spurious changes whenever indexes are merely reordered.
//! Every candidate change is therefore confirmed with a re-diff of the two
//! index lists keyed by index name; a candidate with no keyed difference is an
//! artifact of position and classifies as [`GsiChangeKind::None`].

use serde_json::Value;
use tracing::debug;

use crate::error::{PlanError, Result, TablestepError};
use crate::snapshot::{
    diff_by_key, diff_values, ChangeKind, ChangeRecord, GlobalSecondaryIndex, PathSegment,
    TableProperties,
};

/// Object key of the secondary-index array in a table property bag.
const GSI_ARRAY_KEY: &str = "GlobalSecondaryIndexes";

/// Object key of a key schema inside an index definition.
const KEY_SCHEMA_KEY: &str = "KeySchema";

/// Object key of an index's name.
const INDEX_NAME_KEY: &str = "IndexName";

/// Object key of a key schema element's attribute name.
const ATTRIBUTE_NAME_KEY: &str = "AttributeName";

/// A typed secondary-index change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsiChange {
    /// What kind of operation the change requires.
    pub kind: GsiChangeKind,
    /// Name of the affected index.
    pub index_name: String,
}

/// The operation a classified change requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GsiChangeKind {
    /// A new index must be created.
    Add,
    /// An existing index must be removed.
    Delete,
    /// An index's key schema changed in place; executed as delete then add.
    Edit,
    /// One of several indexes introduced together with a new index array.
    BatchAdd,
    /// One of several indexes removed together with the index array.
    BatchDelete,
    /// A diff artifact with no semantic content (array reordering).
    None,
}

impl GsiChange {
    /// Creates a change of the given kind for the named index.
    #[must_use]
    pub fn new(kind: GsiChangeKind, index_name: impl Into<String>) -> Self {
        Self {
            kind,
            index_name: index_name.into(),
        }
    }
}

impl std::fmt::Display for GsiChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Edit => "edit",
            Self::BatchAdd => "batch add",
            Self::BatchDelete => "batch delete",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

/// Classifier for one table's secondary-index diff records.
#[derive(Debug)]
pub struct ChangeClassifier<'a> {
    /// Deployed index list.
    current: &'a [GlobalSecondaryIndex],
    /// Target index list.
    next: &'a [GlobalSecondaryIndex],
}

impl<'a> ChangeClassifier<'a> {
    /// Creates a classifier over the deployed and target index lists.
    #[must_use]
    pub const fn new(
        current: &'a [GlobalSecondaryIndex],
        next: &'a [GlobalSecondaryIndex],
    ) -> Self {
        Self { current, next }
    }

    /// Classifies one diff record, filtering artifact classifications.
    ///
    /// # Errors
    ///
    /// Returns a [`PlanError`] for change shapes the engine cannot decompose.
    pub fn classify(&self, record: &ChangeRecord) -> Result<Vec<GsiChange>> {
        let changes = self.classify_record(record)?;
        Ok(changes
            .into_iter()
            .filter(|c| c.kind != GsiChangeKind::None)
            .collect())
    }

    /// Classifies one diff record, keeping [`GsiChangeKind::None`] entries.
    fn classify_record(&self, record: &ChangeRecord) -> Result<Vec<GsiChange>> {
        if !record.path_contains_key(GSI_ARRAY_KEY) && record.last_key() != Some(GSI_ARRAY_KEY) {
            return Ok(Vec::new());
        }

        match record.kind {
            ChangeKind::ArrayItemChanged if record.last_key() == Some(GSI_ARRAY_KEY) => {
                self.classify_array_item(record)
            }
            ChangeKind::Added if record.last_key() == Some(GSI_ARRAY_KEY) => {
                Ok(Self::classify_array_introduced(record.rhs.as_ref()))
            }
            ChangeKind::Deleted if record.last_key() == Some(GSI_ARRAY_KEY) => {
                Ok(Self::classify_array_removed(record.lhs.as_ref()))
            }
            ChangeKind::Edited if record.last_key() == Some(INDEX_NAME_KEY) => {
                self.classify_rename(record)
            }
            ChangeKind::Edited
                if record.last_key() == Some(ATTRIBUTE_NAME_KEY)
                    && record.path_contains_key(KEY_SCHEMA_KEY) =>
            {
                self.classify_key_attribute_edit(record)
            }
            _ => self.classify_other(record),
        }
    }

    /// An element was inserted into or removed from the index array.
    fn classify_array_item(&self, record: &ChangeRecord) -> Result<Vec<GsiChange>> {
        let item = record.item.as_deref().ok_or_else(|| {
            TablestepError::Plan(PlanError::unsupported(
                record.path_display(),
                "array change without an element record",
            ))
        })?;

        match item.kind {
            ChangeKind::Deleted => {
                let name = index_name_of(item.lhs.as_ref(), record)?;

                if self.next.iter().all(|i| i.index_name != name) {
                    return Ok(vec![GsiChange::new(GsiChangeKind::Delete, name)]);
                }

                // The index still exists on the target side: the positional
                // removal is the tail of a shift left, not a deletion.
                if self.keyed_records_for(&name).is_empty() {
                    debug!("Index {name} only changed position; suppressing");
                    Ok(vec![GsiChange::new(GsiChangeKind::None, name)])
                } else {
                    Ok(vec![GsiChange::new(GsiChangeKind::Edit, name)])
                }
            }
            ChangeKind::Added => {
                let name = index_name_of(item.rhs.as_ref(), record)?;

                if self.current.iter().all(|i| i.index_name != name) {
                    return Ok(vec![GsiChange::new(GsiChangeKind::Add, name)]);
                }

                // The index already existed: either it only moved inside the
                // array, or it moved and changed at the same time.
                if self.keyed_records_for(&name).is_empty() {
                    debug!("Index {name} only changed position; suppressing");
                    Ok(vec![GsiChange::new(GsiChangeKind::None, name)])
                } else {
                    Ok(vec![GsiChange::new(GsiChangeKind::Edit, name)])
                }
            }
            _ => Err(TablestepError::Plan(PlanError::unsupported(
                record.path_display(),
                format!("unexpected element change kind {:?}", item.kind),
            ))),
        }
    }

    /// The whole index array appeared on the target side.
    fn classify_array_introduced(rhs: Option<&Value>) -> Vec<GsiChange> {
        let entries = rhs.and_then(Value::as_array).cloned().unwrap_or_default();
        let kind = if entries.len() > 1 {
            GsiChangeKind::BatchAdd
        } else {
            GsiChangeKind::Add
        };

        entries
            .iter()
            .filter_map(|entry| entry.get(INDEX_NAME_KEY).and_then(Value::as_str))
            .map(|name| GsiChange::new(kind, name))
            .collect()
    }

    /// The whole index array disappeared from the target side.
    fn classify_array_removed(lhs: Option<&Value>) -> Vec<GsiChange> {
        let entries = lhs.and_then(Value::as_array).cloned().unwrap_or_default();
        let kind = if entries.len() > 1 {
            GsiChangeKind::BatchDelete
        } else {
            GsiChangeKind::Delete
        };

        entries
            .iter()
            .filter_map(|entry| entry.get(INDEX_NAME_KEY).and_then(Value::as_str))
            .map(|name| GsiChange::new(kind, name))
            .collect()
    }

    /// A leaf edit of an `IndexName`: candidate rename.
    ///
    /// A positional name edit also shows up when an index is inserted or
    /// removed ahead of this position, so the keyed re-diff decides what
    /// actually happened: a rename removes the old name and adds the new name,
    /// a deletion only removes, an insertion only adds.
    fn classify_rename(&self, record: &ChangeRecord) -> Result<Vec<GsiChange>> {
        let old_name = string_payload(record.lhs.as_ref(), record)?;
        let new_name = string_payload(record.rhs.as_ref(), record)?;

        let old_removed = self.keyed_entry_is(&old_name, ChangeKind::Deleted);
        let new_added = self.keyed_entry_is(&new_name, ChangeKind::Added);

        match (old_removed, new_added) {
            (true, true) => {
                debug!("Index rename: {old_name} -> {new_name}");
                Ok(vec![
                    GsiChange::new(GsiChangeKind::Delete, old_name),
                    GsiChange::new(GsiChangeKind::Add, new_name),
                ])
            }
            // The old name disappeared while the new one exists on both
            // sides: a deletion shifted the survivors left.
            (true, false) => Ok(vec![GsiChange::new(GsiChangeKind::Delete, old_name)]),
            // The new name appeared while the old one exists on both sides:
            // an insertion shifted the survivors right.
            (false, true) => Ok(vec![GsiChange::new(GsiChangeKind::Add, new_name)]),
            (false, false) => {
                // Both names are unchanged under keyed comparison, so the
                // edit is an artifact of the index moving inside the array.
                debug!("Index name edit {old_name} -> {new_name} is a reorder artifact");
                Ok(vec![GsiChange::new(GsiChangeKind::None, new_name)])
            }
        }
    }

    /// Whether the keyed re-diff records a whole-entry change of the given
    /// kind for the named index.
    fn keyed_entry_is(&self, index_name: &str, kind: ChangeKind) -> bool {
        self.keyed_records_for(index_name)
            .iter()
            .any(|r| r.kind == kind && r.path.len() == 1)
    }

    /// A leaf edit of a key schema `AttributeName`: candidate key retarget.
    fn classify_key_attribute_edit(&self, record: &ChangeRecord) -> Result<Vec<GsiChange>> {
        let position = gsi_position(record).ok_or_else(|| {
            TablestepError::Plan(PlanError::unsupported(
                record.path_display(),
                "key schema edit outside an index element",
            ))
        })?;

        let index = self.next.get(position).ok_or_else(|| {
            TablestepError::Plan(PlanError::unsupported(
                record.path_display(),
                "key schema edit without a target index",
            ))
        })?;
        let name = index.index_name.clone();

        let real_change = self
            .keyed_records_for(&name)
            .iter()
            .any(|r| r.kind == ChangeKind::Edited && r.path_contains_key(KEY_SCHEMA_KEY));

        if real_change {
            Ok(vec![GsiChange::new(GsiChangeKind::Edit, name)])
        } else {
            Ok(vec![GsiChange::new(GsiChangeKind::None, name)])
        }
    }

    /// Any other record under the index subtree.
    ///
    /// Reorder artifacts are suppressed; everything else is a change shape the
    /// engine cannot safely decompose, which is fatal to the planning run.
    fn classify_other(&self, record: &ChangeRecord) -> Result<Vec<GsiChange>> {
        if let Some(position) = gsi_position(record) {
            if let Some(index) = self.next.get(position) {
                // Whole-entry keyed records mean the occupant of this
                // position changed, so the positional edit is an artifact of
                // the shift; only an Edited record marks a real change.
                let artifact = self
                    .keyed_records_for(&index.index_name)
                    .iter()
                    .all(|r| r.path.len() == 1);
                if artifact {
                    return Ok(vec![GsiChange::new(
                        GsiChangeKind::None,
                        index.index_name.clone(),
                    )]);
                }
            }
        }

        Err(TablestepError::Plan(PlanError::unsupported(
            record.path_display(),
            "index change is neither an add, delete, nor key schema edit",
        )))
    }

    /// Keyed re-diff records whose top-level key is the given index name.
    fn keyed_records_for(&self, index_name: &str) -> Vec<ChangeRecord> {
        let old = to_values(self.current);
        let new = to_values(self.next);

        diff_by_key(&old, &new, |v| {
            v.get(INDEX_NAME_KEY)
                .and_then(Value::as_str)
                .map(String::from)
        })
        .into_iter()
        .filter(|r| matches!(r.path.first(), Some(PathSegment::Key(k)) if k == index_name))
        .collect()
    }
}

/// Diffs two table definitions and classifies every index change.
///
/// This is the planning entry point: the structural diff is scoped to the
/// table property bag, and only records touching the index array contribute.
///
/// # Errors
///
/// Returns a [`PlanError`] if any record has an unsupported shape.
pub fn classify_table_changes(
    current: &TableProperties,
    next: &TableProperties,
) -> Result<Vec<GsiChange>> {
    let lhs = serde_json::to_value(current)
        .map_err(|e| TablestepError::internal(format!("table serialization failed: {e}")))?;
    let rhs = serde_json::to_value(next)
        .map_err(|e| TablestepError::internal(format!("table serialization failed: {e}")))?;

    let classifier = ChangeClassifier::new(current.indexes(), next.indexes());

    let mut changes = Vec::new();
    for record in diff_values(&lhs, &rhs) {
        changes.extend(classifier.classify(&record)?);
    }

    // A single semantic change can surface through several positional
    // records; keep the first classification for each (kind, name) pair.
    let mut seen: Vec<(GsiChangeKind, String)> = Vec::new();
    changes.retain(|c| {
        let key = (c.kind, c.index_name.clone());
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });

    debug!("Classified {} index change(s)", changes.len());
    Ok(changes)
}

fn to_values(indexes: &[GlobalSecondaryIndex]) -> Vec<Value> {
    indexes
        .iter()
        .filter_map(|i| serde_json::to_value(i).ok())
        .collect()
}

fn index_name_of(payload: Option<&Value>, record: &ChangeRecord) -> Result<String> {
    payload
        .and_then(|v| v.get(INDEX_NAME_KEY))
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            TablestepError::Plan(PlanError::unsupported(
                record.path_display(),
                "index payload has no name",
            ))
        })
}

fn string_payload(payload: Option<&Value>, record: &ChangeRecord) -> Result<String> {
    payload
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| {
            TablestepError::Plan(PlanError::unsupported(
                record.path_display(),
                "expected a string payload",
            ))
        })
}

/// Returns the array position of the index element a record points into.
fn gsi_position(record: &ChangeRecord) -> Option<usize> {
    let mut segments = record.path.iter();
    segments.find(|s| matches!(s, PathSegment::Key(k) if k == GSI_ARRAY_KEY))?;
    match segments.next() {
        Some(PathSegment::Index(i)) => Some(*i),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{KeySchemaElement, KeyType, Projection};

    fn gsi(name: &str, hash_attr: &str) -> GlobalSecondaryIndex {
        GlobalSecondaryIndex {
            index_name: name.to_string(),
            key_schema: vec![KeySchemaElement {
                attribute_name: hash_attr.to_string(),
                key_type: KeyType::Hash,
            }],
            projection: Projection {
                projection_type: Some(String::from("ALL")),
                non_key_attributes: vec![],
            },
            extra: serde_json::Map::new(),
        }
    }

    fn table(indexes: Vec<GlobalSecondaryIndex>) -> TableProperties {
        let mut attrs = vec![AttributeDefinitionFixture::id()];
        for index in &indexes {
            for key in &index.key_schema {
                attrs.push(crate::snapshot::AttributeDefinition {
                    attribute_name: key.attribute_name.clone(),
                    attribute_type: crate::snapshot::ScalarAttributeType::S,
                });
            }
        }
        attrs.dedup_by(|a, b| a.attribute_name == b.attribute_name);

        TableProperties {
            key_schema: vec![KeySchemaElement {
                attribute_name: String::from("id"),
                key_type: KeyType::Hash,
            }],
            attribute_definitions: attrs,
            global_secondary_indexes: if indexes.is_empty() {
                None
            } else {
                Some(indexes)
            },
            extra: serde_json::Map::new(),
        }
    }

    struct AttributeDefinitionFixture;
    impl AttributeDefinitionFixture {
        fn id() -> crate::snapshot::AttributeDefinition {
            crate::snapshot::AttributeDefinition {
                attribute_name: String::from("id"),
                attribute_type: crate::snapshot::ScalarAttributeType::S,
            }
        }
    }

    #[test]
    fn test_add_first_index() {
        // Scenario: a table with no indexes gains one.
        let current = table(vec![]);
        let next = table(vec![gsi("byName", "name")]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert_eq!(changes, vec![GsiChange::new(GsiChangeKind::Add, "byName")]);
    }

    #[test]
    fn test_add_second_index_is_not_a_batch() {
        let current = table(vec![gsi("firstIndex", "a")]);
        let next = table(vec![gsi("firstIndex", "a"), gsi("secondIndex", "b")]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert_eq!(
            changes,
            vec![GsiChange::new(GsiChangeKind::Add, "secondIndex")]
        );
    }

    #[test]
    fn test_new_array_with_multiple_indexes_is_batch_add() {
        let current = table(vec![]);
        let next = table(vec![gsi("one", "a"), gsi("two", "b"), gsi("three", "c")]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|c| c.kind == GsiChangeKind::BatchAdd));
        let names: Vec<&str> = changes.iter().map(|c| c.index_name.as_str()).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_removing_all_indexes_is_batch_delete() {
        let current = table(vec![gsi("one", "a"), gsi("two", "b"), gsi("three", "c")]);
        let next = table(vec![]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|c| c.kind == GsiChangeKind::BatchDelete));
        let names: Vec<&str> = changes.iter().map(|c| c.index_name.as_str()).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_single_index_removal() {
        let current = table(vec![gsi("one", "a"), gsi("two", "b")]);
        let next = table(vec![gsi("one", "a")]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert_eq!(changes, vec![GsiChange::new(GsiChangeKind::Delete, "two")]);
    }

    #[test]
    fn test_delete_middle_index() {
        // Deleting a middle element shifts the survivors left; only the
        // removed index may come out of classification.
        let current = table(vec![gsi("one", "a"), gsi("two", "b"), gsi("three", "c")]);
        let next = table(vec![gsi("one", "a"), gsi("three", "c")]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert_eq!(changes, vec![GsiChange::new(GsiChangeKind::Delete, "two")]);
    }

    #[test]
    fn test_delete_front_index() {
        let current = table(vec![gsi("one", "a"), gsi("two", "b"), gsi("three", "c")]);
        let next = table(vec![gsi("two", "b"), gsi("three", "c")]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert_eq!(changes, vec![GsiChange::new(GsiChangeKind::Delete, "one")]);
    }

    #[test]
    fn test_insert_index_at_front() {
        // Inserting at the front shifts the survivors right; only the new
        // index may come out of classification.
        let current = table(vec![gsi("one", "a"), gsi("two", "b")]);
        let next = table(vec![gsi("zero", "z"), gsi("one", "a"), gsi("two", "b")]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert_eq!(changes, vec![GsiChange::new(GsiChangeKind::Add, "zero")]);
    }

    #[test]
    fn test_rename_same_key_schema() {
        // Scenario: an index is renamed but keeps its key schema.
        let current = table(vec![gsi("oldName", "a")]);
        let next = table(vec![gsi("newName", "a")]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert_eq!(
            changes,
            vec![
                GsiChange::new(GsiChangeKind::Delete, "oldName"),
                GsiChange::new(GsiChangeKind::Add, "newName"),
            ]
        );
    }

    #[test]
    fn test_reorder_is_invariant() {
        let current = table(vec![gsi("one", "a"), gsi("two", "b"), gsi("three", "c")]);
        let next = table(vec![gsi("three", "c"), gsi("one", "a"), gsi("two", "b")]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert!(changes.is_empty(), "got {changes:?}");
    }

    #[test]
    fn test_key_attribute_retarget_is_edit() {
        let current = table(vec![gsi("byField", "oldAttr")]);
        let next = table(vec![gsi("byField", "newAttr")]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert_eq!(changes, vec![GsiChange::new(GsiChangeKind::Edit, "byField")]);
    }

    #[test]
    fn test_reorder_with_genuine_add() {
        let current = table(vec![gsi("one", "a"), gsi("two", "b")]);
        let next = table(vec![gsi("two", "b"), gsi("one", "a"), gsi("extra", "x")]);

        let changes = classify_table_changes(&current, &next).expect("classification");
        assert_eq!(changes, vec![GsiChange::new(GsiChangeKind::Add, "extra")]);
    }
}
