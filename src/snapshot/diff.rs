//! Structural diff over template JSON.
//!
//! Produces a flat list of [`ChangeRecord`]s describing how one JSON tree was
//! turned into another. Array elements are compared positionally, which is
//! exactly why reordering an unordered index array produces spurious records;
//! [`diff_by_key`] exists so callers can re-diff a list keyed by identity and
//! suppress those artifacts.

use serde_json::{Map, Value};

/// One segment of a change path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// An object key.
    Key(String),
    /// An array index.
    Index(usize),
}

/// The kind of structural change a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A value exists on the right side only.
    Added,
    /// A value exists on the left side only.
    Deleted,
    /// A leaf (or type-mismatched subtree) differs between sides.
    Edited,
    /// An array grew or shrank; the inner record describes the element.
    ArrayItemChanged,
}

/// A single node of the structural diff.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// Kind of change.
    pub kind: ChangeKind,
    /// Path from the root to the changed value.
    pub path: Vec<PathSegment>,
    /// Left-hand payload, when one exists.
    pub lhs: Option<Value>,
    /// Right-hand payload, when one exists.
    pub rhs: Option<Value>,
    /// Array index, for [`ChangeKind::ArrayItemChanged`].
    pub index: Option<usize>,
    /// Element-level record, for [`ChangeKind::ArrayItemChanged`].
    pub item: Option<Box<ChangeRecord>>,
}

impl ChangeRecord {
    /// Returns the final object key on the path, if the path ends in one.
    #[must_use]
    pub fn last_key(&self) -> Option<&str> {
        match self.path.last() {
            Some(PathSegment::Key(k)) => Some(k.as_str()),
            _ => None,
        }
    }

    /// Returns true if any segment of the path is the given object key.
    #[must_use]
    pub fn path_contains_key(&self, key: &str) -> bool {
        self.path
            .iter()
            .any(|segment| matches!(segment, PathSegment::Key(k) if k == key))
    }

    /// Renders the path as a dotted string for diagnostics.
    #[must_use]
    pub fn path_display(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            match segment {
                PathSegment::Key(k) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(k);
                }
                PathSegment::Index(i) => {
                    out.push('[');
                    out.push_str(&i.to_string());
                    out.push(']');
                }
            }
        }
        out
    }
}

/// Computes the structural diff between two JSON values.
#[must_use]
pub fn diff_values(lhs: &Value, rhs: &Value) -> Vec<ChangeRecord> {
    let mut records = Vec::new();
    walk(&mut Vec::new(), lhs, rhs, &mut records);
    records
}

/// Diffs two lists after re-keying them by identity.
///
/// Both lists are converted to maps keyed by `key_fn` and diffed as objects,
/// which makes the comparison insensitive to element order. Elements for
/// which `key_fn` returns `None` are ignored.
#[must_use]
pub fn diff_by_key<F>(old: &[Value], new: &[Value], key_fn: F) -> Vec<ChangeRecord>
where
    F: Fn(&Value) -> Option<String>,
{
    let keyed = |items: &[Value]| -> Value {
        let mut map = Map::new();
        for item in items {
            if let Some(key) = key_fn(item) {
                map.insert(key, item.clone());
            }
        }
        Value::Object(map)
    };

    diff_values(&keyed(old), &keyed(new))
}

fn walk(path: &mut Vec<PathSegment>, lhs: &Value, rhs: &Value, out: &mut Vec<ChangeRecord>) {
    match (lhs, rhs) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, lhs_value) in a {
                path.push(PathSegment::Key(key.clone()));
                match b.get(key) {
                    Some(rhs_value) => walk(path, lhs_value, rhs_value, out),
                    None => out.push(ChangeRecord {
                        kind: ChangeKind::Deleted,
                        path: path.clone(),
                        lhs: Some(lhs_value.clone()),
                        rhs: None,
                        index: None,
                        item: None,
                    }),
                }
                path.pop();
            }

            for (key, rhs_value) in b {
                if a.contains_key(key) {
                    continue;
                }
                path.push(PathSegment::Key(key.clone()));
                out.push(ChangeRecord {
                    kind: ChangeKind::Added,
                    path: path.clone(),
                    lhs: None,
                    rhs: Some(rhs_value.clone()),
                    index: None,
                    item: None,
                });
                path.pop();
            }
        }

        (Value::Array(a), Value::Array(b)) => {
            let shared = a.len().min(b.len());

            for i in 0..shared {
                path.push(PathSegment::Index(i));
                walk(path, &a[i], &b[i], out);
                path.pop();
            }

            for (i, rhs_value) in b.iter().enumerate().skip(shared) {
                out.push(ChangeRecord {
                    kind: ChangeKind::ArrayItemChanged,
                    path: path.clone(),
                    lhs: None,
                    rhs: None,
                    index: Some(i),
                    item: Some(Box::new(ChangeRecord {
                        kind: ChangeKind::Added,
                        path: Vec::new(),
                        lhs: None,
                        rhs: Some(rhs_value.clone()),
                        index: None,
                        item: None,
                    })),
                });
            }

            // Removals are reported from the highest index down so applying
            // them in order never shifts a not-yet-reported element.
            for (i, lhs_value) in a.iter().enumerate().skip(shared).rev() {
                out.push(ChangeRecord {
                    kind: ChangeKind::ArrayItemChanged,
                    path: path.clone(),
                    lhs: None,
                    rhs: None,
                    index: Some(i),
                    item: Some(Box::new(ChangeRecord {
                        kind: ChangeKind::Deleted,
                        path: Vec::new(),
                        lhs: Some(lhs_value.clone()),
                        rhs: None,
                        index: None,
                        item: None,
                    })),
                });
            }
        }

        (a, b) => {
            if a != b {
                out.push(ChangeRecord {
                    kind: ChangeKind::Edited,
                    path: path.clone(),
                    lhs: Some(a.clone()),
                    rhs: Some(b.clone()),
                    index: None,
                    item: None,
                });
            }
        }
    }
}
