//! Cairn Graph -- name interning and the field dependency graph.
//!
//! This crate is the leaf of the Cairn workspace. It provides:
//!
//! - [`names`]: per-instance registries that intern field and state names into
//!   dense [`NameId`](names::NameId)s, with `-1` reserved as the sentinel.
//! - [`key`]: generational [`FieldKey`](key::FieldKey)s and their allocator.
//! - [`graph`]: the [`FieldGraph`](graph::FieldGraph), which keeps a cached
//!   topological order over externally owned fields, contains cycles, and
//!   propagates values once per tick.
//!
//! # Quick Start
//!
//! ```
//! use cairn_graph::prelude::*;
//! use std::collections::HashMap;
//!
//! // Each field doubles the sum of its upstream fields, plus one.
//! struct Doubler {
//!     upstream: HashMap<FieldKey, Vec<FieldKey>>,
//! }
//!
//! impl FieldSource for Doubler {
//!     fn refresh_upstream(&mut self, field: FieldKey, out: &mut Vec<FieldKey>) -> bool {
//!         out.extend_from_slice(&self.upstream[&field]);
//!         false
//!     }
//!
//!     fn compute(&mut self, field: FieldKey, values: &PassValues<'_>) -> Value {
//!         let sum: Value = self.upstream[&field].iter().map(|&u| values.get_or_zero(u)).sum();
//!         sum * 2 + 1
//!     }
//! }
//!
//! let mut keys = FieldKeyAllocator::new();
//! let (a, b) = (keys.allocate(), keys.allocate());
//! let mut source = Doubler {
//!     upstream: HashMap::from([(a, vec![]), (b, vec![a])]),
//! };
//!
//! let mut graph = FieldGraph::new();
//! graph.add_field(b);
//! graph.add_field(a);
//!
//! let report = graph.refresh(&mut source);
//! assert!(report.is_ok());
//! assert_eq!(graph.order(), &[a, b]);
//! assert_eq!(graph.value(b), Some(3));
//! ```

#![deny(unsafe_code)]

pub mod field;
pub mod graph;
pub mod key;
pub mod names;
pub mod topo;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the name registry and the field graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A blank name was offered for registration.
    #[error("cannot register an empty or whitespace-only name")]
    EmptyName,

    /// The dependency structure contains a cycle.
    #[error("dependency cycle detected at field {at:?}")]
    Cycle {
        at: key::FieldKey,
    },

    /// The field is not tracked by the graph.
    #[error("field {field:?} is not tracked by the graph")]
    UnknownField {
        field: key::FieldKey,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::field::{bool_value, FieldSource, PassValues, Value};
    pub use crate::graph::{FieldGraph, PropagationBudget, RefreshOutcome, RefreshReport};
    pub use crate::key::{FieldKey, FieldKeyAllocator, KeyAllocator, SlotKey};
    pub use crate::names::{NameId, NameRegistry, Names};
    pub use crate::topo::{topological_order, CycleAt};
    pub use crate::GraphError;
}
