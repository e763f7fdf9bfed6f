//! The field dependency graph.
//!
//! [`FieldGraph`] tracks which fields are active, what each one depends on,
//! and a cached topological order over them. Every tick the caller runs
//! [`FieldGraph::refresh`], which:
//!
//! 1. asks the [`FieldSource`] for every active field's current upstream list;
//! 2. re-sorts if any list changed structurally or the graph was marked dirty;
//! 3. walks the order and computes each field after all of its upstream
//!    fields, publishing the values once the pass completes;
//! 4. on a cycle, keeps the previous order, records where the cycle closed
//!    and skips propagation until the structure changes again.
//!
//! # Budgeted propagation
//!
//! With [`PropagationBudget::PerTick`] a pass may span several ticks. Values
//! computed by an unfinished pass live in a pending buffer and are published
//! to the settled cache only when the pass reaches the end of the order, so
//! [`FieldGraph::value`] never exposes a half-applied pass. A structural
//! change while a pass is unfinished throws the pending values away and
//! restarts from the top of the new order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::field::{FieldSource, PassValues, Value};
use crate::key::FieldKey;
use crate::topo::sort_fields;
use crate::GraphError;

// ---------------------------------------------------------------------------
// PropagationBudget
// ---------------------------------------------------------------------------

/// Upper bound on field evaluations performed by one [`FieldGraph::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationBudget {
    /// Finish the whole pass every tick.
    #[default]
    Unlimited,
    /// Evaluate at most this many fields per tick (at least one).
    PerTick(usize),
}

impl PropagationBudget {
    fn limit(self) -> usize {
        match self {
            PropagationBudget::Unlimited => usize::MAX,
            PropagationBudget::PerTick(n) => n.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// RefreshReport
// ---------------------------------------------------------------------------

/// How a [`FieldGraph::refresh`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshOutcome {
    /// A pass completed and its values were published.
    Settled,
    /// The budget ran out; the pass resumes on the next refresh.
    InProgress,
    /// The structure contains a cycle closing at `at`; nothing propagated.
    Cycle { at: FieldKey },
}

/// Diagnostics returned by [`FieldGraph::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub outcome: RefreshOutcome,
    /// Fields evaluated during this call.
    pub evaluated: usize,
    /// Whether this call recomputed the topological order.
    pub resorted: bool,
}

impl RefreshReport {
    /// `true` unless the refresh hit a cycle.
    pub fn is_ok(&self) -> bool {
        !matches!(self.outcome, RefreshOutcome::Cycle { .. })
    }

    /// The cycle point, if the refresh hit one.
    pub fn cycle_at(&self) -> Option<FieldKey> {
        match self.outcome {
            RefreshOutcome::Cycle { at } => Some(at),
            _ => None,
        }
    }

    /// Convert into a `Result`, mapping a cycle to [`GraphError::Cycle`].
    pub fn into_result(self) -> Result<RefreshReport, GraphError> {
        match self.outcome {
            RefreshOutcome::Cycle { at } => Err(GraphError::Cycle { at }),
            _ => Ok(self),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldGraph
// ---------------------------------------------------------------------------

/// Active fields, their upstream edges, and the cached evaluation order.
#[derive(Debug)]
pub struct FieldGraph {
    /// Active fields in insertion order. Roots of the sort follow this order.
    active: Vec<FieldKey>,
    /// Field -> upstream fields, as last reported by the source.
    edges: HashMap<FieldKey, Vec<FieldKey>>,
    /// Last successful topological order.
    order: Vec<FieldKey>,
    sort_valid: bool,
    dirty: bool,
    cycle_at: Option<FieldKey>,
    /// Values of the last completed pass.
    settled: HashMap<FieldKey, Value>,
    /// Values of the running pass.
    pending: HashMap<FieldKey, Value>,
    /// Index into `order` where an unfinished pass resumes.
    cursor: Option<usize>,
    budget: PropagationBudget,
    passes: u64,
    scratch: Vec<FieldKey>,
}

impl Default for FieldGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldGraph {
    /// Create an empty graph with an unlimited budget.
    pub fn new() -> Self {
        Self {
            active: Vec::new(),
            edges: HashMap::new(),
            order: Vec::new(),
            sort_valid: true,
            dirty: false,
            cycle_at: None,
            settled: HashMap::new(),
            pending: HashMap::new(),
            cursor: None,
            budget: PropagationBudget::default(),
            passes: 0,
            scratch: Vec::new(),
        }
    }

    /// Create an empty graph with the given propagation budget.
    pub fn with_budget(budget: PropagationBudget) -> Self {
        Self {
            budget,
            ..Self::new()
        }
    }

    // -- structure ----------------------------------------------------------

    /// Start tracking `field`. No-op if it is already tracked.
    pub fn add_field(&mut self, field: FieldKey) {
        if self.edges.contains_key(&field) {
            return;
        }
        self.active.push(field);
        self.edges.insert(field, Vec::new());
        self.dirty = true;
    }

    /// Stop tracking `field`.
    ///
    /// The field is dropped from the active set, every edge list, the cached
    /// order and the value caches. Fields that still declare it upstream are
    /// left alone; their owner is expected to sever the edge. Returns `false`
    /// if the field was not tracked.
    pub fn remove_field(&mut self, field: FieldKey) -> bool {
        if self.edges.remove(&field).is_none() {
            return false;
        }
        self.active.retain(|&f| f != field);
        for upstream in self.edges.values_mut() {
            upstream.retain(|&f| f != field);
        }
        self.order.retain(|&f| f != field);
        self.settled.remove(&field);
        self.pending.remove(&field);
        if self.cycle_at == Some(field) {
            self.cycle_at = None;
        }
        self.dirty = true;
        true
    }

    /// Force a re-sort on the next refresh.
    ///
    /// Used when a field's upstream set changed without an add or remove.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownField`] if `field` is not tracked; the
    /// graph is left untouched.
    pub fn mark_dirty(&mut self, field: FieldKey) -> Result<(), GraphError> {
        if !self.edges.contains_key(&field) {
            return Err(GraphError::UnknownField { field });
        }
        self.dirty = true;
        Ok(())
    }

    // -- tick ---------------------------------------------------------------

    /// Refresh structure and propagate values. Call once per tick.
    pub fn refresh<S: FieldSource + ?Sized>(&mut self, source: &mut S) -> RefreshReport {
        let structural = self.refresh_edges(source);

        let mut resorted = false;
        if structural || self.dirty {
            self.dirty = false;
            // Any unfinished pass was computed against the old structure.
            self.pending.clear();
            self.cursor = None;

            match sort_fields(&self.active, &self.edges) {
                Ok(order) => {
                    tracing::debug!(fields = order.len(), "field order recomputed");
                    self.order = order;
                    self.sort_valid = true;
                    self.cycle_at = None;
                    resorted = true;
                }
                Err(GraphError::Cycle { at }) => {
                    tracing::warn!(
                        field = ?at,
                        "dependency cycle detected -- keeping previous order, propagation skipped"
                    );
                    self.sort_valid = false;
                    self.cycle_at = Some(at);
                }
                Err(other) => {
                    tracing::warn!(error = %other, "unexpected sort failure");
                    self.sort_valid = false;
                }
            }
        }

        if !self.sort_valid {
            return RefreshReport {
                outcome: match self.cycle_at {
                    Some(at) => RefreshOutcome::Cycle { at },
                    // The cycle field itself was removed; wait for the re-sort.
                    None => RefreshOutcome::InProgress,
                },
                evaluated: 0,
                resorted,
            };
        }

        let (outcome, evaluated) = self.propagate(source);
        RefreshReport {
            outcome,
            evaluated,
            resorted,
        }
    }

    /// Pull upstream lists from the source. Returns whether any changed.
    fn refresh_edges<S: FieldSource + ?Sized>(&mut self, source: &mut S) -> bool {
        let mut structural = false;
        for &field in &self.active {
            self.scratch.clear();
            let reported = source.refresh_upstream(field, &mut self.scratch);
            let Some(stored) = self.edges.get_mut(&field) else {
                continue;
            };
            if reported || *stored != self.scratch {
                structural = true;
                stored.clear();
                stored.extend_from_slice(&self.scratch);
            }
        }
        structural
    }

    /// Evaluate fields from the cursor on, within the budget.
    fn propagate<S: FieldSource + ?Sized>(&mut self, source: &mut S) -> (RefreshOutcome, usize) {
        let start = self.cursor.take().unwrap_or(0);
        if start == 0 {
            self.pending.clear();
        }
        let limit = self.budget.limit();
        let mut evaluated = 0;

        for idx in start..self.order.len() {
            if evaluated == limit {
                self.cursor = Some(idx);
                return (RefreshOutcome::InProgress, evaluated);
            }
            let field = self.order[idx];
            let value = source.compute(field, &PassValues::new(&self.pending, &self.settled));
            self.pending.insert(field, value);
            evaluated += 1;
        }

        self.settled.extend(self.pending.drain());
        self.passes += 1;
        (RefreshOutcome::Settled, evaluated)
    }

    // -- accessors ----------------------------------------------------------

    /// Whether `field` is tracked.
    pub fn contains(&self, field: FieldKey) -> bool {
        self.edges.contains_key(&field)
    }

    /// Number of tracked fields.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no fields are tracked.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// The last successful order. Stays authoritative while a cycle persists.
    pub fn order(&self) -> &[FieldKey] {
        &self.order
    }

    /// Whether the cached order reflects the current structure.
    pub fn is_sort_valid(&self) -> bool {
        self.sort_valid
    }

    /// Whether a re-sort is pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The field at which the most recent failed sort found a cycle.
    pub fn last_cycle(&self) -> Option<FieldKey> {
        self.cycle_at
    }

    /// Upstream fields of `field` as of the last refresh.
    pub fn upstream_of(&self, field: FieldKey) -> Option<&[FieldKey]> {
        self.edges.get(&field).map(Vec::as_slice)
    }

    /// Settled value of `field` from the last completed pass.
    pub fn value(&self, field: FieldKey) -> Option<Value> {
        self.settled.get(&field).copied()
    }

    /// All settled values.
    pub fn values(&self) -> &HashMap<FieldKey, Value> {
        &self.settled
    }

    /// Number of completed passes.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Whether a budgeted pass is waiting to resume.
    pub fn pass_in_progress(&self) -> bool {
        self.cursor.is_some()
    }

    /// The current propagation budget.
    pub fn budget(&self) -> PropagationBudget {
        self.budget
    }

    /// Change the propagation budget. Takes effect on the next refresh.
    pub fn set_budget(&mut self, budget: PropagationBudget) {
        self.budget = budget;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
