//! Field storage and derivations.
//!
//! The [`FieldStore`] owns every field's identity, name, owner and behavior,
//! and is the [`FieldSource`] the graph pulls from each tick. Behavior is a
//! closed [`Derivation`] enum plus a plain-function escape hatch, so the graph
//! reaches field logic without any dynamic lookup by name.

use std::collections::HashMap;

use cairn_graph::field::{bool_value, FieldSource, PassValues, Value};
use cairn_graph::key::{FieldKey, FieldKeyAllocator};
use cairn_graph::names::NameId;

use crate::owner::OwnerId;

/// Signature of a [`Derivation::Custom`] function. Receives the upstream
/// values in declaration order; `None` marks an upstream field that has no
/// value (removed or not yet computed).
pub type DeriveFn = fn(&[Option<Value>]) -> Value;

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// How a field gets its value each pass.
///
/// Booleans follow the `0`/`1` encoding; any non-zero upstream counts as true.
#[derive(Debug, Clone)]
pub enum Derivation {
    /// Holds whatever was last written with `set_input`.
    Input,
    /// Mirrors another field.
    Copy(FieldKey),
    /// `1` when the upstream is zero or missing.
    Not(FieldKey),
    /// `1` when every upstream is non-zero. Empty is true.
    All(Vec<FieldKey>),
    /// `1` when any upstream is non-zero.
    Any(Vec<FieldKey>),
    /// Wrapping sum of the upstream values.
    Sum(Vec<FieldKey>),
    /// `1` when the upstream holds exactly this value.
    Equals(FieldKey, Value),
    Custom {
        upstream: Vec<FieldKey>,
        func: DeriveFn,
    },
}

impl Derivation {
    /// The fields this derivation reads, in declaration order.
    pub fn upstream(&self) -> &[FieldKey] {
        match self {
            Derivation::Input => &[],
            Derivation::Copy(key) | Derivation::Not(key) | Derivation::Equals(key, _) => {
                std::slice::from_ref(key)
            }
            Derivation::All(keys) | Derivation::Any(keys) | Derivation::Sum(keys) => keys,
            Derivation::Custom { upstream, .. } => upstream,
        }
    }

    /// Whether this is [`Derivation::Input`].
    pub fn is_input(&self) -> bool {
        matches!(self, Derivation::Input)
    }

    fn evaluate(&self, input: Value, values: &PassValues<'_>, scratch: &mut Vec<Option<Value>>) -> Value {
        let truthy = |key: &FieldKey| values.get_or_zero(*key) != 0;
        match self {
            Derivation::Input => input,
            Derivation::Copy(key) => values.get_or_zero(*key),
            Derivation::Not(key) => bool_value(!truthy(key)),
            Derivation::All(keys) => bool_value(keys.iter().all(truthy)),
            Derivation::Any(keys) => bool_value(keys.iter().any(truthy)),
            Derivation::Sum(keys) => keys
                .iter()
                .map(|k| values.get_or_zero(*k))
                .fold(0, Value::wrapping_add),
            Derivation::Equals(key, expected) => bool_value(values.get(*key) == Some(*expected)),
            Derivation::Custom { upstream, func } => {
                scratch.clear();
                scratch.extend(upstream.iter().map(|k| values.get(*k)));
                func(scratch)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FieldEntry
// ---------------------------------------------------------------------------

/// One stored field.
#[derive(Debug, Clone)]
pub struct FieldEntry {
    owner: OwnerId,
    name: NameId,
    derivation: Derivation,
    input: Value,
    /// Set when the derivation was replaced; cleared when the graph polls.
    rewired: bool,
}

impl FieldEntry {
    /// The owning entity.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// The field's interned name.
    pub fn name(&self) -> NameId {
        self.name
    }

    pub fn derivation(&self) -> &Derivation {
        &self.derivation
    }

    /// The last written input value. Only read by [`Derivation::Input`].
    pub fn input(&self) -> Value {
        self.input
    }
}

// ---------------------------------------------------------------------------
// FieldStore
// ---------------------------------------------------------------------------

/// Every live field, keyed by generational [`FieldKey`].
#[derive(Debug, Default)]
pub struct FieldStore {
    keys: FieldKeyAllocator,
    entries: HashMap<FieldKey, FieldEntry>,
    scratch: Vec<Option<Value>>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new field and return its key.
    pub fn insert(&mut self, owner: OwnerId, name: NameId, derivation: Derivation, input: Value) -> FieldKey {
        let key = self.keys.allocate();
        self.entries.insert(
            key,
            FieldEntry {
                owner,
                name,
                derivation,
                input,
                // First poll always counts as a structural change.
                rewired: true,
            },
        );
        key
    }

    /// Drop a field. Its key and every copy of it become stale.
    pub fn remove(&mut self, key: FieldKey) -> Option<FieldEntry> {
        let entry = self.entries.remove(&key)?;
        self.keys.release(key);
        Some(entry)
    }

    /// Whether `key` names a live field.
    pub fn is_alive(&self, key: FieldKey) -> bool {
        self.keys.is_alive(key) && self.entries.contains_key(&key)
    }

    pub fn get(&self, key: FieldKey) -> Option<&FieldEntry> {
        self.entries.get(&key)
    }

    /// Overwrite the input value of `key`. Returns `false` for stale keys.
    pub fn set_input(&mut self, key: FieldKey, value: Value) -> bool {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.input = value;
                true
            }
            None => false,
        }
    }

    /// Replace the derivation of `key`. Returns `false` for stale keys.
    pub fn set_derivation(&mut self, key: FieldKey, derivation: Derivation) -> bool {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.derivation = derivation;
                entry.rewired = true;
                true
            }
            None => false,
        }
    }

    /// First upstream of `derivation` that is not a live field.
    pub fn first_dead_upstream(&self, derivation: &Derivation) -> Option<FieldKey> {
        derivation.upstream().iter().copied().find(|&k| !self.is_alive(k))
    }

    /// Number of live fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FieldSource for FieldStore {
    fn refresh_upstream(&mut self, field: FieldKey, upstream: &mut Vec<FieldKey>) -> bool {
        let Some(entry) = self.entries.get_mut(&field) else {
            return false;
        };
        upstream.extend_from_slice(entry.derivation.upstream());
        std::mem::take(&mut entry.rewired)
    }

    fn compute(&mut self, field: FieldKey, values: &PassValues<'_>) -> Value {
        match self.entries.get(&field) {
            Some(entry) => entry.derivation.evaluate(entry.input, values, &mut self.scratch),
            None => {
                tracing::debug!(field = ?field, "computing a field the store no longer holds");
                0
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_graph::graph::FieldGraph;
    use cairn_graph::key::{KeyAllocator, SlotKey};

    fn owner() -> OwnerId {
        KeyAllocator::<OwnerId>::new().allocate()
    }

    fn name(raw: i32) -> NameId {
        NameId::from_raw(raw)
    }

    fn track(graph: &mut FieldGraph, keys: &[FieldKey]) {
        for &k in keys {
            graph.add_field(k);
        }
    }

    #[test]
    fn boolean_derivations() {
        let o = owner();
        let mut store = FieldStore::new();
        let a = store.insert(o, name(0), Derivation::Input, 1);
        let b = store.insert(o, name(1), Derivation::Input, 0);
        let not_b = store.insert(o, name(2), Derivation::Not(b), 0);
        let all = store.insert(o, name(3), Derivation::All(vec![a, not_b]), 0);
        let any = store.insert(o, name(4), Derivation::Any(vec![b]), 0);
        let eq = store.insert(o, name(5), Derivation::Equals(a, 1), 0);

        let mut graph = FieldGraph::new();
        track(&mut graph, &[eq, any, all, not_b, b, a]);
        assert!(graph.refresh(&mut store).is_ok());

        assert_eq!(graph.value(not_b), Some(1));
        assert_eq!(graph.value(all), Some(1));
        assert_eq!(graph.value(any), Some(0));
        assert_eq!(graph.value(eq), Some(1));
    }

    #[test]
    fn custom_sees_missing_upstream_as_none() {
        fn count_missing(values: &[Option<Value>]) -> Value {
            values.iter().filter(|v| v.is_none()).count() as Value
        }
        let o = owner();
        let mut store = FieldStore::new();
        let a = store.insert(o, name(0), Derivation::Input, 4);
        let gone = store.insert(o, name(1), Derivation::Input, 0);
        store.remove(gone);
        let c = store.insert(
            o,
            name(2),
            Derivation::Custom {
                upstream: vec![a, gone],
                func: count_missing,
            },
            0,
        );

        let mut graph = FieldGraph::new();
        track(&mut graph, &[a, c]);
        graph.refresh(&mut store);
        assert_eq!(graph.value(c), Some(1));
    }

    #[test]
    fn sum_wraps_instead_of_overflowing() {
        let o = owner();
        let mut store = FieldStore::new();
        let a = store.insert(o, name(0), Derivation::Input, Value::MAX);
        let b = store.insert(o, name(1), Derivation::Input, 1);
        let s = store.insert(o, name(2), Derivation::Sum(vec![a, b]), 0);
        let mut graph = FieldGraph::new();
        track(&mut graph, &[s, a, b]);
        graph.refresh(&mut store);
        assert_eq!(graph.value(s), Some(Value::MIN));
    }

    #[test]
    fn rewiring_is_reported_once() {
        let o = owner();
        let mut store = FieldStore::new();
        let a = store.insert(o, name(0), Derivation::Input, 0);
        let mut out = Vec::new();
        assert!(store.refresh_upstream(a, &mut out));
        assert!(!store.refresh_upstream(a, &mut out));
        assert!(store.set_derivation(a, Derivation::Input));
        assert!(store.refresh_upstream(a, &mut out));
    }

    #[test]
    fn removed_keys_are_stale() {
        let o = owner();
        let mut store = FieldStore::new();
        let a = store.insert(o, name(0), Derivation::Input, 0);
        assert!(store.remove(a).is_some());
        assert!(!store.is_alive(a));
        assert!(!store.set_input(a, 3));
        let b = store.insert(o, name(0), Derivation::Input, 0);
        assert_eq!(a.index(), b.index());
        assert!(!store.is_alive(a));
        assert_eq!(store.first_dead_upstream(&Derivation::Copy(a)), Some(a));
        assert_eq!(store.first_dead_upstream(&Derivation::Copy(b)), None);
    }
}
