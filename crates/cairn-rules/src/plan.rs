//! Flattened evaluation plans and the short-circuit evaluator.
//!
//! [`Plan::build`] turns an authored step list into a pre-order sequence of
//! `(step, depth)` pairs, depth measured from the implicit root at `-1`.
//! Evaluation is then a single forward scan that tracks how deep along the
//! current branch the conditions have held:
//!
//! - a step at depth `d` is skipped unless every ancestor condition held,
//!   i.e. the tracked depth is at least `d - 1`;
//! - a matching condition at depth `d` raises the tracked depth to `d`;
//! - the first reachable result wins;
//! - a reference evaluates another plan and returns its answer unless that
//!   answer is the sentinel, in which case the scan continues. A reference
//!   back into a tree that is still being evaluated yields the sentinel, and
//!   each tree is evaluated at most once per call.

use std::collections::{BTreeSet, HashMap};

use cairn_graph::names::NameId;

use crate::step::{Mask, Step, StepId, StepKind, TreeId};
use crate::{RuleError, StructuralError};

/// Default bound on nested reference evaluation.
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// PlanResolver
// ---------------------------------------------------------------------------

/// Resolves the target of a reference step.
pub trait PlanResolver {
    /// The plan for `tree`, if it exists.
    fn resolve(&self, tree: TreeId) -> Option<&Plan>;

    /// How many references may be nested before evaluation gives up.
    fn max_reference_depth(&self) -> usize {
        DEFAULT_MAX_REFERENCE_DEPTH
    }
}

/// Resolver with no trees; every reference yields the sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReferences;

impl PlanResolver for NoReferences {
    fn resolve(&self, _tree: TreeId) -> Option<&Plan> {
        None
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// One entry of a flattened plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanEntry {
    pub step: Step,
    /// Distance from the implicit root; top-level steps are at 0.
    pub depth: i32,
}

/// A tree flattened into evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    entries: Vec<PlanEntry>,
}

/// Result of [`Plan::build`]: the usable plan plus whatever was dropped.
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    pub plan: Plan,
    pub errors: Vec<StructuralError>,
}

impl BuildOutcome {
    /// The plan if the build found nothing to drop, else the first error.
    pub fn into_result(self) -> Result<Plan, RuleError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error.into()),
            None => Ok(self.plan),
        }
    }
}

impl Plan {
    /// Validate and flatten `steps`.
    ///
    /// Duplicate ids (including the reserved root id) keep their first
    /// occurrence. A step whose parent does not exist is dropped together
    /// with its subtree; steps caught in a parent loop never reach the root
    /// and are dropped as unreachable. Everything else is kept, children in
    /// authored order.
    pub fn build(steps: &[Step]) -> BuildOutcome {
        let mut errors = Vec::new();

        // Dedup by id, first occurrence wins.
        let mut by_id: HashMap<StepId, usize> = HashMap::with_capacity(steps.len());
        let mut accepted: Vec<Step> = Vec::with_capacity(steps.len());
        for step in steps {
            if step.id.is_root() || by_id.contains_key(&step.id) {
                tracing::warn!(step = ?step.id, "duplicate step id -- dropping later occurrence");
                errors.push(StructuralError::DuplicateStep { step: step.id });
                continue;
            }
            by_id.insert(step.id, accepted.len());
            accepted.push(*step);
        }

        // Parent -> children, authored order.
        let mut children: HashMap<StepId, Vec<usize>> = HashMap::new();
        for (idx, step) in accepted.iter().enumerate() {
            children.entry(step.parent).or_default().push(idx);
        }

        // Pre-order flatten from the root with an explicit stack.
        let mut entries = Vec::with_capacity(accepted.len());
        let mut reached = vec![false; accepted.len()];
        let mut stack: Vec<(usize, i32)> = Vec::new();
        if let Some(top) = children.get(&StepId::ROOT) {
            stack.extend(top.iter().rev().map(|&idx| (idx, 0)));
        }
        while let Some((idx, depth)) = stack.pop() {
            reached[idx] = true;
            let step = accepted[idx];
            entries.push(PlanEntry { step, depth });
            if let Some(kids) = children.get(&step.id) {
                stack.extend(kids.iter().rev().map(|&k| (k, depth + 1)));
            }
        }

        // Explain whatever the root did not reach.
        let looped = loop_marks(&accepted, &by_id);
        for (idx, step) in accepted.iter().enumerate() {
            if reached[idx] {
                continue;
            }
            if !by_id.contains_key(&step.parent) {
                tracing::warn!(
                    step = ?step.id,
                    parent = ?step.parent,
                    "step parent does not resolve -- dropping step and its subtree"
                );
                errors.push(StructuralError::UnresolvedParent {
                    step: step.id,
                    parent: step.parent,
                });
            } else if looped[idx] {
                tracing::warn!(step = ?step.id, "step is caught in a parent loop -- dropping");
                errors.push(StructuralError::Unreachable { step: step.id });
            }
            // Otherwise it sits under a dropped step, which was reported.
        }

        BuildOutcome {
            plan: Plan { entries },
            errors,
        }
    }

    /// Evaluate with no reference resolution.
    pub fn evaluate(&self, mask: &Mask) -> NameId {
        self.evaluate_with(mask, &NoReferences)
    }

    /// Evaluate, resolving references through `resolver`.
    ///
    /// Returns the first reachable result's state, or [`NameId::EMPTY`] if no
    /// rule fired.
    pub fn evaluate_with<R: PlanResolver + ?Sized>(&self, mask: &Mask, resolver: &R) -> NameId {
        let mut walk = Walk::new(resolver);
        self.evaluate_nested(mask, &mut walk, resolver.max_reference_depth())
    }

    /// Like [`evaluate_with`](Self::evaluate_with) for a plan the resolver
    /// knows as `tree`, so a reference back into `tree` is cut immediately.
    pub fn evaluate_as<R: PlanResolver + ?Sized>(&self, tree: TreeId, mask: &Mask, resolver: &R) -> NameId {
        let mut walk = Walk::new(resolver);
        walk.path.push(tree);
        self.evaluate_nested(mask, &mut walk, resolver.max_reference_depth())
    }

    fn evaluate_nested<R: PlanResolver + ?Sized>(
        &self,
        mask: &Mask,
        walk: &mut Walk<'_, R>,
        references_left: usize,
    ) -> NameId {
        let mut condition_met_depth: i32 = -1;

        for entry in &self.entries {
            let depth = entry.depth;
            if condition_met_depth < depth - 1 {
                continue;
            }
            // Forget matches from a sibling branch that already ended.
            condition_met_depth = depth - 1;

            match entry.step.kind {
                StepKind::Condition { .. } => {
                    if entry.step.kind.matches(mask) {
                        condition_met_depth = depth;
                    }
                }
                StepKind::Result { state } => return state,
                StepKind::Reference { tree } => {
                    let state = walk.follow(tree, entry.step.id, mask, references_left);
                    if !state.is_empty() {
                        return state;
                    }
                }
            }
        }

        NameId::EMPTY
    }

    // -- introspection ------------------------------------------------------

    /// The flattened `(step, depth)` sequence.
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Number of reachable steps.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Field names read by conditions in this plan (references not followed).
    pub fn referenced_fields(&self) -> BTreeSet<NameId> {
        self.entries
            .iter()
            .filter_map(|e| match e.step.kind {
                StepKind::Condition { field, .. } => Some(field),
                _ => None,
            })
            .collect()
    }

    /// States produced by results in this plan (references not followed).
    pub fn produced_states(&self) -> BTreeSet<NameId> {
        self.entries
            .iter()
            .filter_map(|e| match e.step.kind {
                StepKind::Result { state } => Some(state),
                _ => None,
            })
            .collect()
    }

    /// Trees this plan references directly.
    pub fn references(&self) -> BTreeSet<TreeId> {
        self.entries
            .iter()
            .filter_map(|e| match e.step.kind {
                StepKind::Reference { tree } => Some(tree),
                _ => None,
            })
            .collect()
    }

    /// Whether a top-level result guarantees a decision.
    pub fn has_root_fallback(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.depth == 0 && matches!(e.step.kind, StepKind::Result { .. }))
    }
}

/// Reference bookkeeping for one evaluation.
///
/// Each tree is evaluated at most once per mask: its answer is kept in
/// `settled` and reused by later references. A reference into a tree that is
/// still on `path` yields the sentinel.
struct Walk<'r, R: ?Sized> {
    resolver: &'r R,
    /// Trees being evaluated, outermost first.
    path: Vec<TreeId>,
    settled: HashMap<TreeId, NameId>,
}

impl<'r, R: PlanResolver + ?Sized> Walk<'r, R> {
    fn new(resolver: &'r R) -> Self {
        Self {
            resolver,
            path: Vec::new(),
            settled: HashMap::new(),
        }
    }

    fn follow(&mut self, tree: TreeId, step: StepId, mask: &Mask, references_left: usize) -> NameId {
        if let Some(&state) = self.settled.get(&tree) {
            return state;
        }
        if self.path.contains(&tree) {
            tracing::debug!(step = ?step, tree = ?tree, "reference loops back into its own path -- treating as no decision");
            return NameId::EMPTY;
        }
        if references_left == 0 {
            tracing::debug!(step = ?step, tree = ?tree, "reference depth exhausted -- treating as no decision");
            return NameId::EMPTY;
        }
        let resolver = self.resolver;
        let Some(sub) = resolver.resolve(tree) else {
            tracing::debug!(tree = ?tree, "unresolved tree reference");
            return NameId::EMPTY;
        };
        self.path.push(tree);
        let state = sub.evaluate_nested(mask, self, references_left - 1);
        self.path.pop();
        self.settled.insert(tree, state);
        state
    }
}

/// Which accepted steps sit in (or hang below) a parent loop.
///
/// Every parent chain is walked once; steps already classified end the walk
/// early and lend their answer to the whole chain.
fn loop_marks(accepted: &[Step], by_id: &HashMap<StepId, usize>) -> Vec<bool> {
    const UNKNOWN: u8 = 0;
    const ON_CHAIN: u8 = 1;
    const CLEAR: u8 = 2;
    const LOOPED: u8 = 3;

    let mut mark = vec![UNKNOWN; accepted.len()];
    let mut chain = Vec::new();
    for start in 0..accepted.len() {
        if mark[start] != UNKNOWN {
            continue;
        }
        let mut idx = start;
        let looped = loop {
            match mark[idx] {
                ON_CHAIN | LOOPED => break true,
                CLEAR => break false,
                _ => {}
            }
            mark[idx] = ON_CHAIN;
            chain.push(idx);
            match by_id.get(&accepted[idx].parent) {
                Some(&parent) => idx = parent,
                None => break false,
            }
        };
        let verdict = if looped { LOOPED } else { CLEAR };
        for idx in chain.drain(..) {
            mark[idx] = verdict;
        }
    }
    mark.into_iter().map(|m| m == LOOPED).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const PRESSED: NameId = NameId::from_raw(0);
    const HOVER: NameId = NameId::from_raw(1);
    const S_PRESSED: NameId = NameId::from_raw(10);
    const S_HOVER: NameId = NameId::from_raw(11);
    const S_IDLE: NameId = NameId::from_raw(12);

    fn button_steps() -> Vec<Step> {
        vec![
            Step::condition(0, -1, PRESSED, true),
            Step::result(1, 0, S_PRESSED),
            Step::condition(2, -1, PRESSED, false),
            Step::condition(3, 2, HOVER, true),
            Step::result(4, 3, S_HOVER),
            Step::result(5, -1, S_IDLE),
        ]
    }

    fn button_plan() -> Plan {
        let outcome = Plan::build(&button_steps());
        assert!(outcome.errors.is_empty());
        outcome.plan
    }

    #[test]
    fn flattening_is_preorder_with_depths() {
        let plan = button_plan();
        let shape: Vec<(i32, i32)> = plan.entries().iter().map(|e| (e.step.id.0, e.depth)).collect();
        assert_eq!(shape, vec![(0, 0), (1, 1), (2, 0), (3, 1), (4, 2), (5, 0)]);
    }

    #[test]
    fn children_keep_authored_order_when_listed_before_parent() {
        let steps = vec![
            Step::result(2, 0, S_HOVER),
            Step::result(1, 0, S_PRESSED),
            Step::condition(0, -1, PRESSED, true),
        ];
        let plan = Plan::build(&steps).plan;
        let ids: Vec<i32> = plan.entries().iter().map(|e| e.step.id.0).collect();
        assert_eq!(ids, vec![0, 2, 1]);
    }

    #[test]
    fn button_scenario() {
        let plan = button_plan();
        assert_eq!(plan.evaluate(&Mask::new().with(PRESSED, 1)), S_PRESSED);
        assert_eq!(
            plan.evaluate(&Mask::new().with(PRESSED, 0).with(HOVER, 1)),
            S_HOVER
        );
        assert_eq!(
            plan.evaluate(&Mask::new().with(PRESSED, 0).with(HOVER, 0)),
            S_IDLE
        );
    }

    #[test]
    fn missing_fields_fall_through_to_fallback() {
        assert_eq!(button_plan().evaluate(&Mask::new()), S_IDLE);
    }

    #[test]
    fn no_rule_fired_returns_sentinel() {
        let plan = Plan::build(&[
            Step::condition(0, -1, PRESSED, true),
            Step::result(1, 0, S_PRESSED),
        ])
        .plan;
        assert_eq!(plan.evaluate(&Mask::new().with(PRESSED, 0)), NameId::EMPTY);
        assert!(!plan.has_root_fallback());
    }

    #[test]
    fn first_result_in_authored_order_wins() {
        let plan = Plan::build(&[
            Step::result(0, -1, S_HOVER),
            Step::result(1, -1, S_IDLE),
        ])
        .plan;
        assert_eq!(plan.evaluate(&Mask::new()), S_HOVER);
    }

    #[test]
    fn match_in_finished_branch_does_not_leak() {
        // A(true) > B(true) > [nothing]; then C(false) at top level fails,
        // so C's child result must not fire even though B matched earlier.
        let plan = Plan::build(&[
            Step::condition(0, -1, PRESSED, true),
            Step::condition(1, 0, HOVER, true),
            Step::condition(2, -1, HOVER, false),
            Step::result(3, 2, S_IDLE),
        ])
        .plan;
        let mask = Mask::new().with(PRESSED, 1).with(HOVER, 1);
        assert_eq!(plan.evaluate(&mask), NameId::EMPTY);
    }

    #[test]
    fn unresolved_parent_drops_subtree_only() {
        let mut steps = button_steps();
        steps.push(Step::condition(10, 99, HOVER, true));
        steps.push(Step::result(11, 10, S_HOVER));
        let outcome = Plan::build(&steps);
        assert_eq!(
            outcome.errors,
            vec![StructuralError::UnresolvedParent {
                step: StepId(10),
                parent: StepId(99)
            }]
        );
        assert_eq!(outcome.plan.len(), 6);
        assert_eq!(outcome.plan.evaluate(&Mask::new().with(PRESSED, 1)), S_PRESSED);
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let outcome = Plan::build(&[
            Step::result(0, -1, S_IDLE),
            Step::result(0, -1, S_HOVER),
            Step::result(-1, -1, S_HOVER),
        ]);
        assert_eq!(
            outcome.errors,
            vec![
                StructuralError::DuplicateStep { step: StepId(0) },
                StructuralError::DuplicateStep { step: StepId::ROOT },
            ]
        );
        assert_eq!(outcome.plan.evaluate(&Mask::new()), S_IDLE);
    }

    #[test]
    fn parent_loop_is_unreachable() {
        let outcome = Plan::build(&[
            Step::condition(0, 1, PRESSED, true),
            Step::condition(1, 0, PRESSED, true),
            Step::result(2, -1, S_IDLE),
        ]);
        assert_eq!(outcome.plan.len(), 1);
        assert_eq!(
            outcome.errors,
            vec![
                StructuralError::Unreachable { step: StepId(0) },
                StructuralError::Unreachable { step: StepId(1) },
            ]
        );
    }

    #[test]
    fn long_chain_under_a_parent_loop_is_unreachable() {
        // 0 <-> 1 loop, then 2..5000 each hanging from the previous step.
        let mut steps = vec![
            Step::condition(0, 1, PRESSED, true),
            Step::condition(1, 0, PRESSED, true),
        ];
        steps.extend((2..5000).map(|id| Step::condition(id, id - 1, HOVER, true)));
        steps.push(Step::result(5000, -1, S_IDLE));
        let outcome = Plan::build(&steps);
        assert_eq!(outcome.plan.len(), 1);
        assert_eq!(outcome.errors.len(), 5000);
        assert!(outcome
            .errors
            .iter()
            .all(|e| matches!(e, StructuralError::Unreachable { .. })));
    }

    #[test]
    fn strict_build_surfaces_first_error() {
        assert!(Plan::build(&button_steps()).into_result().is_ok());
        let err = Plan::build(&[Step::result(0, 5, S_IDLE)])
            .into_result()
            .unwrap_err();
        assert!(matches!(
            err,
            RuleError::Structural(StructuralError::UnresolvedParent { .. })
        ));
    }

    #[test]
    fn reference_without_resolver_yields_nothing() {
        let plan = Plan::build(&[
            Step::reference(0, -1, TreeId(7)),
            Step::result(1, -1, S_IDLE),
        ])
        .plan;
        assert_eq!(plan.evaluate(&Mask::new()), S_IDLE);
    }

    #[test]
    fn introspection_lists_fields_and_states() {
        let plan = button_plan();
        assert_eq!(plan.referenced_fields(), BTreeSet::from([PRESSED, HOVER]));
        assert_eq!(
            plan.produced_states(),
            BTreeSet::from([S_PRESSED, S_HOVER, S_IDLE])
        );
        assert!(plan.has_root_fallback());
        assert!(plan.references().is_empty());
    }

    #[test]
    fn empty_steps_build_empty_plan() {
        let outcome = Plan::build(&[]);
        assert!(outcome.plan.is_empty());
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.plan.evaluate(&Mask::new()), NameId::EMPTY);
    }
}
