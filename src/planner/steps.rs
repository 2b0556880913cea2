//! Step planning: decomposing classified index changes into an ordered queue
//! of intermediate table snapshots.
//!
//! The provider tolerates exactly one structural index operation per stack
//! update, so every classified change becomes its own queued snapshot: a copy
//! of the table's latest known shape with one more index operation applied.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{PlanError, Result, TablestepError};
use crate::snapshot::{InfrastructureSnapshot, StackTemplate, TableProperties};

use super::classify::{classify_table_changes, GsiChange, GsiChangeKind};

/// Per-stack queues of intermediate stack templates, one index operation
/// apart.
///
/// Populated by the [`StepPlanner`], drained destructively by the step
/// builder. Replaying a stack's queue against the currently-live bundle
/// reproduces the target snapshot for that stack.
#[derive(Debug, Default)]
pub struct TemplateState {
    queues: BTreeMap<String, VecDeque<StackTemplate>>,
}

impl TemplateState {
    /// Creates an empty template state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an intermediate template to a stack's queue.
    pub fn push(&mut self, stack_name: &str, template: StackTemplate) {
        self.queues
            .entry(stack_name.to_string())
            .or_default()
            .push_back(template);
    }

    /// Removes and returns the oldest queued template for a stack.
    pub fn pop(&mut self, stack_name: &str) -> Option<StackTemplate> {
        self.queues.get_mut(stack_name)?.pop_front()
    }

    /// Returns the most recently queued template for a stack.
    #[must_use]
    pub fn latest(&self, stack_name: &str) -> Option<&StackTemplate> {
        self.queues.get(stack_name)?.back()
    }

    /// Returns true if any stack still has queued templates.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.queues.values().any(|q| !q.is_empty())
    }

    /// Returns the names of stacks that still have queued templates.
    #[must_use]
    pub fn pending_stacks(&self) -> Vec<String> {
        self.queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns the number of queued templates for a stack.
    #[must_use]
    pub fn queued_count(&self, stack_name: &str) -> usize {
        self.queues.get(stack_name).map_or(0, VecDeque::len)
    }

    /// Returns the total number of queued templates across all stacks.
    #[must_use]
    pub fn total_queued(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

/// Planner that turns a snapshot pair into a populated [`TemplateState`].
#[derive(Debug)]
pub struct StepPlanner<'a> {
    /// The deployed snapshot.
    current: &'a InfrastructureSnapshot,
    /// The target snapshot.
    next: &'a InfrastructureSnapshot,
}

impl<'a> StepPlanner<'a> {
    /// Creates a planner over the deployed and target snapshots.
    #[must_use]
    pub const fn new(
        current: &'a InfrastructureSnapshot,
        next: &'a InfrastructureSnapshot,
    ) -> Self {
        Self { current, next }
    }

    /// Plans the full set of intermediate templates.
    ///
    /// Every classified change applies exactly one table-level mutation to a
    /// working copy of the stack's latest known template, which is then
    /// queued. After planning, each stack's final queued template is verified
    /// against the target snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`PlanError`] if a change cannot be classified, references
    /// an unknown index or attribute, or fails round-trip verification.
    pub fn plan(&self) -> Result<TemplateState> {
        let mut state = TemplateState::new();

        for (stack_name, next_template) in &self.next.stacks {
            let Some(current_template) = self.current.stack(stack_name) else {
                // Brand-new stacks deploy in one shot; nothing to decompose.
                continue;
            };

            self.plan_stack(stack_name, current_template, next_template, &mut state)?;
        }

        info!(
            "Planned {} intermediate template(s) across {} stack(s)",
            state.total_queued(),
            state.pending_stacks().len()
        );

        Ok(state)
    }

    /// Plans all index operations for one stack.
    fn plan_stack(
        &self,
        stack_name: &str,
        current_template: &StackTemplate,
        next_template: &StackTemplate,
        state: &mut TemplateState,
    ) -> Result<()> {
        let table_names: Vec<String> = next_template
            .table_resource_names()
            .into_iter()
            .filter(|t| current_template.resources.contains_key(*t))
            .map(String::from)
            .collect();

        let mut working = current_template.clone();

        for table_name in &table_names {
            let current_props = current_template.table_properties(table_name)?;
            let next_props = next_template.table_properties(table_name)?;

            let changes = classify_table_changes(&current_props, &next_props)?;
            if changes.is_empty() {
                continue;
            }

            debug!(
                "Stack {stack_name}, table {table_name}: {} index change(s)",
                changes.len()
            );

            let mut props = working.table_properties(table_name)?;

            for change in &changes {
                Self::apply_change(
                    stack_name,
                    table_name,
                    change,
                    &mut props,
                    &next_props,
                    &mut working,
                    state,
                )?;
            }

            let final_props = working.table_properties(table_name)?;
            if !tables_equivalent(&final_props, &next_props) {
                return Err(TablestepError::Plan(PlanError::RoundTripMismatch {
                    stack: stack_name.to_string(),
                }));
            }
        }

        Ok(())
    }

    /// Applies one classified change, queuing one snapshot per mutation.
    fn apply_change(
        stack_name: &str,
        table_name: &str,
        change: &GsiChange,
        props: &mut TableProperties,
        next_props: &TableProperties,
        working: &mut StackTemplate,
        state: &mut TemplateState,
    ) -> Result<()> {
        let mut queue_mutation =
            |props: &mut TableProperties, working: &mut StackTemplate| -> Result<()> {
                working.set_table_properties(table_name, props)?;
                state.push(stack_name, working.clone());
                Ok(())
            };

        match change.kind {
            GsiChangeKind::Add | GsiChangeKind::BatchAdd => {
                apply_add(stack_name, props, next_props, &change.index_name)?;
                queue_mutation(props, working)?;
            }
            GsiChangeKind::Delete | GsiChangeKind::BatchDelete => {
                apply_delete(stack_name, props, &change.index_name)?;
                queue_mutation(props, working)?;
            }
            GsiChangeKind::Edit => {
                // The provider cannot retarget a key schema in place, so an
                // edit is a delete and a re-add: two queued snapshots.
                apply_delete(stack_name, props, &change.index_name)?;
                queue_mutation(props, working)?;
                apply_add(stack_name, props, next_props, &change.index_name)?;
                queue_mutation(props, working)?;
            }
            GsiChangeKind::None => {}
        }

        Ok(())
    }
}

/// Adds an index definition (and its key attribute definitions) copied from
/// the target snapshot.
fn apply_add(
    stack_name: &str,
    props: &mut TableProperties,
    next_props: &TableProperties,
    index_name: &str,
) -> Result<()> {
    let definition = next_props.find_index(index_name).ok_or_else(|| {
        TablestepError::Plan(PlanError::UnknownIndex {
            index_name: index_name.to_string(),
            stack: stack_name.to_string(),
        })
    })?;

    for attribute_name in definition.key_attributes() {
        let attribute = next_props
            .attribute_definitions
            .iter()
            .find(|a| a.attribute_name == attribute_name)
            .ok_or_else(|| {
                TablestepError::Plan(PlanError::MissingAttributeDefinition {
                    attribute_name: attribute_name.to_string(),
                    stack: stack_name.to_string(),
                })
            })?;

        let already_defined = props
            .attribute_definitions
            .iter()
            .any(|a| a.attribute_name == attribute_name);
        if !already_defined {
            props.attribute_definitions.push(attribute.clone());
        }
    }

    props
        .global_secondary_indexes
        .get_or_insert_with(Vec::new)
        .push(definition.clone());

    Ok(())
}

/// Removes an index and prunes attribute definitions no longer referenced.
///
/// The table's own primary-key attributes are always retained: they are
/// referenced by the base key schema, not the index list, and must never be
/// eligible for pruning.
fn apply_delete(stack_name: &str, props: &mut TableProperties, index_name: &str) -> Result<()> {
    let indexes = props.global_secondary_indexes.as_mut().ok_or_else(|| {
        TablestepError::Plan(PlanError::UnknownIndex {
            index_name: index_name.to_string(),
            stack: stack_name.to_string(),
        })
    })?;

    let before = indexes.len();
    indexes.retain(|i| i.index_name != index_name);
    if indexes.len() == before {
        return Err(TablestepError::Plan(PlanError::UnknownIndex {
            index_name: index_name.to_string(),
            stack: stack_name.to_string(),
        }));
    }

    if indexes.is_empty() {
        props.global_secondary_indexes = None;
    }

    let mut referenced: BTreeSet<String> = props
        .primary_key_attributes()
        .into_iter()
        .map(String::from)
        .collect();
    for index in props.indexes() {
        for attribute in index.key_attributes() {
            referenced.insert(attribute.to_string());
        }
    }

    props
        .attribute_definitions
        .retain(|a| referenced.contains(&a.attribute_name));

    Ok(())
}

/// Order-insensitive equivalence of two table definitions.
fn tables_equivalent(a: &TableProperties, b: &TableProperties) -> bool {
    let keyed_indexes = |props: &TableProperties| -> BTreeMap<String, Value> {
        props
            .indexes()
            .iter()
            .filter_map(|i| {
                serde_json::to_value(i)
                    .ok()
                    .map(|v| (i.index_name.clone(), v))
            })
            .collect()
    };

    let keyed_attributes = |props: &TableProperties| -> BTreeMap<String, Value> {
        props
            .attribute_definitions
            .iter()
            .filter_map(|a| {
                serde_json::to_value(a)
                    .ok()
                    .map(|v| (a.attribute_name.clone(), v))
            })
            .collect()
    };

    keyed_indexes(a) == keyed_indexes(b) && keyed_attributes(a) == keyed_attributes(b)
}
