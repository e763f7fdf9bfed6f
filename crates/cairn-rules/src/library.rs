//! A named collection of rule trees with cached plans.
//!
//! The [`RuleLibrary`] owns every tree that references may point at. Each
//! tree keeps its authored steps, the plan built from them, the structural
//! errors found while building, and a BLAKE3 fingerprint of the authored
//! steps. Replacing a tree's steps with identical content is a no-op; any
//! other change rebuilds the plan.

use std::collections::{BTreeSet, HashMap, HashSet};

use cairn_graph::names::{NameId, Names};

use crate::plan::{Plan, PlanResolver, DEFAULT_MAX_REFERENCE_DEPTH};
use crate::record::{RuleDocument, StepRecord, TreeRecord};
use crate::step::{Mask, Step, TreeId};
use crate::{RuleError, StructuralError};

// ---------------------------------------------------------------------------
// TreeSlot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TreeSlot {
    name: String,
    steps: Vec<Step>,
    fingerprint: blake3::Hash,
    plan: Plan,
    errors: Vec<StructuralError>,
}

/// BLAKE3 over the JSON encoding of the authored steps.
fn fingerprint(steps: &[Step]) -> Result<blake3::Hash, RuleError> {
    let bytes = serde_json::to_vec(steps)?;
    Ok(blake3::hash(&bytes))
}

// ---------------------------------------------------------------------------
// RuleLibrary
// ---------------------------------------------------------------------------

/// Rule trees addressable by [`TreeId`] and by name.
#[derive(Debug, Clone)]
pub struct RuleLibrary {
    trees: Vec<TreeSlot>,
    by_name: HashMap<String, TreeId>,
    max_reference_depth: usize,
}

impl Default for RuleLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleLibrary {
    /// An empty library with the default reference depth bound.
    pub fn new() -> Self {
        Self::with_max_reference_depth(DEFAULT_MAX_REFERENCE_DEPTH)
    }

    /// An empty library that stops following references after `depth`
    /// nested levels.
    pub fn with_max_reference_depth(depth: usize) -> Self {
        Self {
            trees: Vec::new(),
            by_name: HashMap::new(),
            max_reference_depth: depth,
        }
    }

    /// Get the id for `name`, creating an empty tree if it does not exist.
    ///
    /// Lets references point at trees that are defined later.
    pub fn reserve(&mut self, name: &str) -> TreeId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = TreeId(self.trees.len() as u32);
        self.trees.push(TreeSlot {
            name: name.to_owned(),
            steps: Vec::new(),
            // Hash of no steps; always matches an empty replacement.
            fingerprint: blake3::hash(b"[]"),
            plan: Plan::default(),
            errors: Vec::new(),
        });
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Add or replace the tree called `name`.
    ///
    /// # Errors
    ///
    /// Only if the steps cannot be fingerprinted.
    pub fn insert(&mut self, name: &str, steps: Vec<Step>) -> Result<TreeId, RuleError> {
        let id = self.reserve(name);
        self.replace_steps(id, steps)?;
        Ok(id)
    }

    /// Swap in new authored steps for `tree`.
    ///
    /// Returns `true` if the plan was rebuilt and `false` if the steps were
    /// identical to the current ones.
    ///
    /// # Errors
    ///
    /// [`RuleError::UnknownTree`] if `tree` is not in this library.
    pub fn replace_steps(&mut self, tree: TreeId, steps: Vec<Step>) -> Result<bool, RuleError> {
        let print = fingerprint(&steps)?;
        let slot = self
            .trees
            .get_mut(tree.0 as usize)
            .ok_or(RuleError::UnknownTree { tree })?;
        if slot.fingerprint == print {
            return Ok(false);
        }

        let outcome = Plan::build(&steps);
        tracing::debug!(
            tree = %slot.name,
            steps = steps.len(),
            planned = outcome.plan.len(),
            errors = outcome.errors.len(),
            "rule plan rebuilt"
        );
        slot.steps = steps;
        slot.fingerprint = print;
        slot.plan = outcome.plan;
        slot.errors = outcome.errors;
        Ok(true)
    }

    // -- evaluation ---------------------------------------------------------

    /// Evaluate `tree` against `mask`.
    ///
    /// Unknown trees evaluate to [`NameId::EMPTY`] like any tree where no
    /// rule fired.
    pub fn evaluate(&self, tree: TreeId, mask: &Mask) -> NameId {
        match self.plan(tree) {
            Some(plan) => plan.evaluate_as(tree, mask, self),
            None => {
                tracing::debug!(tree = ?tree, "evaluating unknown tree");
                NameId::EMPTY
            }
        }
    }

    // -- lookup -------------------------------------------------------------

    /// The cached plan of `tree`.
    pub fn plan(&self, tree: TreeId) -> Option<&Plan> {
        self.trees.get(tree.0 as usize).map(|slot| &slot.plan)
    }

    /// The authored steps of `tree`.
    pub fn steps(&self, tree: TreeId) -> Option<&[Step]> {
        self.trees.get(tree.0 as usize).map(|slot| slot.steps.as_slice())
    }

    /// Structural errors found when `tree` was last built.
    pub fn build_errors(&self, tree: TreeId) -> &[StructuralError] {
        self.trees
            .get(tree.0 as usize)
            .map(|slot| slot.errors.as_slice())
            .unwrap_or(&[])
    }

    /// Id of the tree called `name`.
    pub fn tree_id(&self, name: &str) -> Option<TreeId> {
        self.by_name.get(name).copied()
    }

    /// Name of `tree`.
    pub fn name_of(&self, tree: TreeId) -> Option<&str> {
        self.trees.get(tree.0 as usize).map(|slot| slot.name.as_str())
    }

    /// Number of trees, reserved ones included.
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    /// Whether the library holds no trees.
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    // -- introspection ------------------------------------------------------

    /// `tree` followed by every tree reachable through references.
    pub fn reachable_trees(&self, tree: TreeId) -> Vec<TreeId> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut stack = vec![tree];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(plan) = self.plan(id) else {
                continue;
            };
            out.push(id);
            stack.extend(plan.references().into_iter().rev());
        }
        out
    }

    /// Field names read anywhere in `tree`, references included.
    pub fn referenced_fields(&self, tree: TreeId) -> BTreeSet<NameId> {
        self.reachable_trees(tree)
            .into_iter()
            .filter_map(|id| self.plan(id))
            .flat_map(|plan| plan.referenced_fields())
            .collect()
    }

    /// States `tree` can produce, references included.
    pub fn produced_states(&self, tree: TreeId) -> BTreeSet<NameId> {
        self.reachable_trees(tree)
            .into_iter()
            .filter_map(|id| self.plan(id))
            .flat_map(|plan| plan.produced_states())
            .collect()
    }

    /// Whether `tree` has a top-level result.
    pub fn has_root_fallback(&self, tree: TreeId) -> bool {
        self.plan(tree).is_some_and(Plan::has_root_fallback)
    }

    /// `(tree, target)` pairs where `target` is reserved but has no steps.
    pub fn empty_references(&self) -> Vec<(TreeId, TreeId)> {
        let mut out = Vec::new();
        for (idx, slot) in self.trees.iter().enumerate() {
            for target in slot.plan.references() {
                if self.steps(target).map_or(true, |s| s.is_empty()) {
                    out.push((TreeId(idx as u32), target));
                }
            }
        }
        out
    }

    // -- persisted form -----------------------------------------------------

    /// Load every tree in `document`, resolving names through `names`.
    ///
    /// Records that cannot be resolved (missing payload, unknown name in a
    /// strict registry, unparseable reference) are dropped with a warning;
    /// their children then surface as unresolved parents in
    /// [`build_errors`](Self::build_errors). A tree whose name already
    /// appeared earlier in the same document is skipped with a warning.
    /// Returns the loaded trees in document order.
    pub fn load_document(
        &mut self,
        document: &RuleDocument,
        names: &mut Names,
    ) -> Result<Vec<TreeId>, RuleError> {
        // Reserve first so references between trees resolve in any order.
        for tree in &document.trees {
            self.reserve(&tree.name);
        }

        let mut loaded = Vec::with_capacity(document.trees.len());
        let mut seen = HashSet::with_capacity(document.trees.len());
        for tree in &document.trees {
            if !seen.insert(tree.name.as_str()) {
                tracing::warn!(tree = %tree.name, "tree name repeats in document -- keeping the first definition");
                continue;
            }
            let mut steps = Vec::with_capacity(tree.steps.len());
            for record in &tree.steps {
                match record.resolve(names, self) {
                    Ok(step) => steps.push(step),
                    Err(e) => {
                        tracing::warn!(tree = %tree.name, step = record.id, error = %e, "dropping step record");
                    }
                }
            }
            loaded.push(self.insert(&tree.name, steps)?);
        }
        Ok(loaded)
    }

    /// Export every tree back to the persisted form.
    pub fn export_document(&self, names: &Names) -> RuleDocument {
        let trees = self
            .trees
            .iter()
            .map(|slot| TreeRecord {
                name: slot.name.clone(),
                steps: slot
                    .steps
                    .iter()
                    .map(|step| StepRecord::from_step(step, names, self))
                    .collect(),
            })
            .collect();
        RuleDocument { trees }
    }
}

impl PlanResolver for RuleLibrary {
    fn resolve(&self, tree: TreeId) -> Option<&Plan> {
        self.plan(tree)
    }

    fn max_reference_depth(&self) -> usize {
        self.max_reference_depth
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
