//! The seam between the graph and the owners of field data.
//!
//! The graph never stores field behavior. It asks a [`FieldSource`] for the
//! current upstream list of each field and for the field's value once all of
//! its upstream fields have been computed in the current pass.

use std::collections::HashMap;

use crate::key::FieldKey;

/// A field value. Booleans are `0`/`1`, enumerations small integers.
pub type Value = i64;

/// Encode a boolean the way field values carry it.
#[inline]
pub fn bool_value(b: bool) -> Value {
    b as Value
}

/// Access to externally owned fields.
pub trait FieldSource {
    /// Rewrite `upstream` with the fields `field` currently depends on.
    ///
    /// Returns `true` if the upstream set changed structurally since the
    /// previous call for this field (first call included). `upstream` is
    /// cleared by the caller before each call.
    fn refresh_upstream(&mut self, field: FieldKey, upstream: &mut Vec<FieldKey>) -> bool;

    /// Compute the value of `field`.
    ///
    /// Every field in its upstream list is readable through `values` and was
    /// computed earlier in the same pass.
    fn compute(&mut self, field: FieldKey, values: &PassValues<'_>) -> Value;
}

/// Read view handed to [`FieldSource::compute`].
///
/// Prefers values computed earlier in the running pass, then falls back to
/// the last settled pass.
#[derive(Debug, Clone, Copy)]
pub struct PassValues<'a> {
    pending: &'a HashMap<FieldKey, Value>,
    settled: &'a HashMap<FieldKey, Value>,
}

impl<'a> PassValues<'a> {
    pub(crate) fn new(
        pending: &'a HashMap<FieldKey, Value>,
        settled: &'a HashMap<FieldKey, Value>,
    ) -> Self {
        Self { pending, settled }
    }

    /// Value of `field`, or `None` if it is not tracked by the graph.
    pub fn get(&self, field: FieldKey) -> Option<Value> {
        self.pending
            .get(&field)
            .or_else(|| self.settled.get(&field))
            .copied()
    }

    /// Value of `field`, treating untracked fields as `0`.
    pub fn get_or_zero(&self, field: FieldKey) -> Value {
        self.get(field).unwrap_or(0)
    }
}
