//! Authored decision-tree steps and the evaluation mask.
//!
//! A rule tree is a flat list of [`Step`]s. Each step names its parent by id;
//! [`StepId::ROOT`] (`-1`) stands for the implicit root. A step is one of:
//!
//! - **Condition**: compares one mask entry against an expected boolean;
//!   children are considered only when it holds.
//! - **Result**: yields a state id.
//! - **Reference**: defers to another tree in the same library.

use std::collections::HashMap;
use std::fmt;

use cairn_graph::field::{bool_value, Value};
use cairn_graph::names::NameId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// Authored identifier of a step within its tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub i32);

impl StepId {
    /// The implicit root every top-level step hangs from.
    pub const ROOT: StepId = StepId(-1);

    /// Whether this is the implicit root.
    #[inline]
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Debug for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "StepId(ROOT)")
        } else {
            write!(f, "StepId({})", self.0)
        }
    }
}

/// Handle of a tree inside a [`RuleLibrary`](crate::library::RuleLibrary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeId(pub u32);

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Type-specific payload of a [`Step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StepKind {
    /// Holds when `mask[field] == expected`, inverted by `negate`.
    Condition {
        field: NameId,
        expected: bool,
        negate: bool,
    },
    /// Yields `state`.
    Result { state: NameId },
    /// Evaluates another tree with the same mask.
    Reference { tree: TreeId },
}

impl StepKind {
    /// Test a condition against `mask`. Non-condition kinds never match.
    ///
    /// A field missing from the mask never equals a real expected value, so
    /// it only satisfies negated conditions.
    pub fn matches(&self, mask: &Mask) -> bool {
        match *self {
            StepKind::Condition {
                field,
                expected,
                negate,
            } => {
                let equal = mask.get(field) == Some(bool_value(expected));
                equal != negate
            }
            _ => false,
        }
    }
}

/// One authored node of a rule tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub parent: StepId,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    /// A condition `field == expected`.
    pub fn condition(id: i32, parent: i32, field: NameId, expected: bool) -> Self {
        Self {
            id: StepId(id),
            parent: StepId(parent),
            kind: StepKind::Condition {
                field,
                expected,
                negate: false,
            },
        }
    }

    /// A condition `field != expected`.
    pub fn negated(id: i32, parent: i32, field: NameId, expected: bool) -> Self {
        Self {
            id: StepId(id),
            parent: StepId(parent),
            kind: StepKind::Condition {
                field,
                expected,
                negate: true,
            },
        }
    }

    /// A result yielding `state`.
    pub fn result(id: i32, parent: i32, state: NameId) -> Self {
        Self {
            id: StepId(id),
            parent: StepId(parent),
            kind: StepKind::Result { state },
        }
    }

    /// A reference to another tree.
    pub fn reference(id: i32, parent: i32, tree: TreeId) -> Self {
        Self {
            id: StepId(id),
            parent: StepId(parent),
            kind: StepKind::Reference { tree },
        }
    }
}

// ---------------------------------------------------------------------------
// Mask
// ---------------------------------------------------------------------------

/// Field-name -> value snapshot for a single evaluation.
///
/// Built by the caller right before evaluating and dropped right after; the
/// evaluator never keeps it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mask {
    values: HashMap<NameId, Value>,
}

impl Mask {
    /// An empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty mask with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: HashMap::with_capacity(capacity),
        }
    }

    /// Set `field` to `value`. The sentinel name is ignored.
    pub fn set(&mut self, field: NameId, value: Value) {
        if !field.is_empty() {
            self.values.insert(field, value);
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, field: NameId, value: Value) -> Self {
        self.set(field, value);
        self
    }

    /// The value recorded for `field`, if any.
    pub fn get(&self, field: NameId) -> Option<Value> {
        self.values.get(&field).copied()
    }

    /// Remove every entry, keeping the allocation.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the mask is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(NameId, Value)> for Mask {
    fn from_iter<I: IntoIterator<Item = (NameId, Value)>>(iter: I) -> Self {
        let mut mask = Mask::new();
        for (field, value) in iter {
            mask.set(field, value);
        }
        mask
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
