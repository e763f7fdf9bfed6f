//! The per-tick driver.
//!
//! The [`Engine`] owns the name registries, the field store, the dependency
//! graph, the rule library and the owners. Each [`Engine::tick`]:
//!
//! 1. refreshes the graph against the store (re-sorting on structural change,
//!    containing cycles, propagating within the budget);
//! 2. for every enabled owner with an assigned tree, snapshots its settled
//!    fields into a mask, evaluates the tree, substitutes the owner's default
//!    when no rule fires, and records a [`StateTransition`] on change;
//! 3. advances the tick counter.
//!
//! Owners are visited in spawn order and fields in declaration order, so the
//! same setup and the same inputs always produce the same transitions.
//!
//! # Example
//!
//! ```
//! use cairn_engine::prelude::*;
//! use cairn_rules::step::Step;
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! let lamp = engine.spawn_owner("lamp");
//! let on = engine.add_input(lamp, "on", 0).unwrap();
//!
//! let on_name = engine.names_mut().fields.lookup("on");
//! let lit = engine.names_mut().states.lookup("Lit");
//! let tree = engine
//!     .rules_mut()
//!     .insert("lamp", vec![Step::condition(0, -1, on_name, true), Step::result(1, 0, lit)])
//!     .unwrap();
//! engine.assign_rules(lamp, tree, "Dark").unwrap();
//!
//! engine.tick();
//! assert_eq!(engine.state_name_of(lamp), Some("Dark"));
//!
//! engine.set_input(on, 1).unwrap();
//! let report = engine.tick();
//! assert_eq!(report.transitions.len(), 1);
//! assert_eq!(engine.state_name_of(lamp), Some("Lit"));
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Context;
use cairn_graph::field::Value;
use cairn_graph::graph::{FieldGraph, RefreshReport};
use cairn_graph::key::FieldKey;
use cairn_graph::names::{NameId, NameRegistry, Names};
use cairn_rules::library::RuleLibrary;
use cairn_rules::record::RuleDocument;
use cairn_rules::step::TreeId;
use cairn_rules::RuleError;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::owner::{Owner, OwnerAllocator, OwnerId};
use crate::store::{Derivation, FieldStore};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// An owner's state changed during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub owner: OwnerId,
    pub from: NameId,
    pub to: NameId,
}

/// What one [`Engine::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number after this tick (the first tick reports `1`).
    pub tick: u64,
    /// Outcome of the graph refresh.
    pub refresh: RefreshReport,
    /// State changes, in owner spawn order.
    pub transitions: Vec<StateTransition>,
}

/// Timing diagnostics for the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    /// Time spent refreshing and propagating the graph.
    pub refresh_time: Duration,
    /// Time spent building masks and evaluating rule trees.
    pub evaluate_time: Duration,
    /// Total time for the tick.
    pub total_time: Duration,
    pub fields_evaluated: usize,
    pub owners_evaluated: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Fields, graph, rules and owners, driven one tick at a time.
pub struct Engine {
    config: EngineConfig,
    names: Names,
    store: FieldStore,
    graph: FieldGraph,
    rules: RuleLibrary,
    owner_keys: OwnerAllocator,
    owners: HashMap<OwnerId, Owner>,
    /// Live owners in spawn order.
    owner_order: Vec<OwnerId>,
    tick_counter: u64,
    fixed_dt: f64,
    last_diagnostics: TickDiagnostics,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Create an engine with no owners, fields or rules.
    ///
    /// # Panics
    ///
    /// Panics if `config.fixed_dt` is not positive and finite.
    pub fn new(config: EngineConfig) -> Self {
        assert!(
            config.fixed_dt > 0.0 && config.fixed_dt.is_finite(),
            "fixed_dt must be positive and finite, got {}",
            config.fixed_dt
        );
        let names = if config.strict_names {
            Names::strict()
        } else {
            Names::new()
        };
        Self {
            names,
            store: FieldStore::new(),
            graph: FieldGraph::with_budget(config.propagation_budget),
            rules: RuleLibrary::with_max_reference_depth(config.max_reference_depth),
            owner_keys: OwnerAllocator::new(),
            owners: HashMap::new(),
            owner_order: Vec::new(),
            tick_counter: 0,
            fixed_dt: config.fixed_dt,
            last_diagnostics: TickDiagnostics::default(),
            config,
        }
    }

    // -- owners -------------------------------------------------------------

    /// Create an owner. It starts enabled, with no fields and no rules.
    pub fn spawn_owner(&mut self, name: &str) -> OwnerId {
        let id = self.owner_keys.allocate();
        self.owners.insert(id, Owner::new(name));
        self.owner_order.push(id);
        tracing::debug!(owner = %id, name, "owner spawned");
        id
    }

    /// Destroy an owner together with all of its fields.
    pub fn despawn_owner(&mut self, owner: OwnerId) -> Result<(), EngineError> {
        let removed = self.owners.remove(&owner).ok_or(EngineError::StaleOwner { owner })?;
        for key in removed.fields {
            self.store.remove(key);
            self.graph.remove_field(key);
        }
        self.owner_keys.release(owner);
        self.owner_order.retain(|&id| id != owner);
        tracing::debug!(owner = %owner, "owner despawned");
        Ok(())
    }

    /// Attach a rule tree and the state used when it yields no decision.
    ///
    /// The owner's current state is reset to `default_state`, which must be
    /// a non-blank name (and already registered under strict names).
    pub fn assign_rules(&mut self, owner: OwnerId, tree: TreeId, default_state: &str) -> Result<(), EngineError> {
        if self.rules.plan(tree).is_none() {
            return Err(RuleError::UnknownTree { tree }.into());
        }
        let default_state = intern(&mut self.names.states, default_state).map_err(|reason| {
            EngineError::UnknownState {
                state: default_state.to_owned(),
                reason,
            }
        })?;
        let entry = self.owners.get_mut(&owner).ok_or(EngineError::StaleOwner { owner })?;
        entry.rules = Some(tree);
        entry.default_state = default_state;
        entry.state = default_state;
        Ok(())
    }

    /// Let a disabled owner take part in ticks again and clear its fault.
    pub fn enable_owner(&mut self, owner: OwnerId) -> Result<(), EngineError> {
        let entry = self.owner_mut(owner)?;
        entry.enabled = true;
        entry.fault = None;
        Ok(())
    }

    /// Keep an owner out of ticks. Its fields still propagate.
    pub fn disable_owner(&mut self, owner: OwnerId) -> Result<(), EngineError> {
        self.owner_mut(owner)?.enabled = false;
        Ok(())
    }

    fn owner_mut(&mut self, owner: OwnerId) -> Result<&mut Owner, EngineError> {
        self.owners.get_mut(&owner).ok_or(EngineError::StaleOwner { owner })
    }

    // -- fields -------------------------------------------------------------

    /// Declare an input field holding `value` until the next `set_input`.
    pub fn add_input(&mut self, owner: OwnerId, name: &str, value: Value) -> Result<FieldKey, EngineError> {
        self.declare_field(owner, name, Derivation::Input, value)
    }

    /// Declare a derived field.
    ///
    /// # Errors
    ///
    /// [`EngineError::FieldInitialization`] if the name is blank (or unknown
    /// under strict names), already used by this owner, or an upstream field
    /// is not alive. The owner is disabled; other owners are unaffected.
    pub fn add_field(&mut self, owner: OwnerId, name: &str, derivation: Derivation) -> Result<FieldKey, EngineError> {
        self.declare_field(owner, name, derivation, 0)
    }

    fn declare_field(
        &mut self,
        owner: OwnerId,
        name: &str,
        derivation: Derivation,
        input: Value,
    ) -> Result<FieldKey, EngineError> {
        if !self.owners.contains_key(&owner) {
            return Err(EngineError::StaleOwner { owner });
        }

        let checked = intern(&mut self.names.fields, name).and_then(|id| {
            let taken = self.owners[&owner]
                .fields
                .iter()
                .any(|&k| self.store.get(k).is_some_and(|e| e.name() == id));
            if taken {
                return Err(format!("owner already declares a field named {name:?}"));
            }
            match self.store.first_dead_upstream(&derivation) {
                Some(dead) => Err(format!("upstream field {dead} is not alive")),
                None => Ok(id),
            }
        });

        let id = match checked {
            Ok(id) => id,
            Err(reason) => {
                tracing::warn!(owner = %owner, field = name, %reason, "field initialization failed -- disabling owner");
                if let Some(entry) = self.owners.get_mut(&owner) {
                    entry.disable(reason.clone());
                }
                return Err(EngineError::FieldInitialization {
                    owner,
                    field: name.to_owned(),
                    reason,
                });
            }
        };

        let key = self.store.insert(owner, id, derivation, input);
        self.graph.add_field(key);
        if let Some(entry) = self.owners.get_mut(&owner) {
            entry.fields.push(key);
        }
        Ok(key)
    }

    /// Write an input field. Takes effect on the next tick.
    pub fn set_input(&mut self, key: FieldKey, value: Value) -> Result<(), EngineError> {
        let entry = self.store.get(key).ok_or(EngineError::StaleField { field: key })?;
        if !entry.derivation().is_input() {
            return Err(EngineError::NotAnInput { field: key });
        }
        self.store.set_input(key, value);
        Ok(())
    }

    /// Replace what a field is derived from. The graph re-sorts on the next
    /// tick; if the new wiring closes a cycle the previous order stays in
    /// force until it is fixed.
    ///
    /// # Errors
    ///
    /// [`EngineError::FieldInitialization`] if an upstream field is not
    /// alive. The field keeps its previous derivation.
    pub fn set_derivation(&mut self, key: FieldKey, derivation: Derivation) -> Result<(), EngineError> {
        let owner = self.store.get(key).ok_or(EngineError::StaleField { field: key })?.owner();
        if let Some(dead) = self.store.first_dead_upstream(&derivation) {
            let name = self.field_name_of(key).unwrap_or_default().to_owned();
            return Err(EngineError::FieldInitialization {
                owner,
                field: name,
                reason: format!("upstream field {dead} is not alive"),
            });
        }
        self.store.set_derivation(key, derivation);
        Ok(())
    }

    /// Remove one field. Fields that read it see it as missing from then on.
    pub fn remove_field(&mut self, key: FieldKey) -> Result<(), EngineError> {
        let entry = self.store.remove(key).ok_or(EngineError::StaleField { field: key })?;
        self.graph.remove_field(key);
        if let Some(owner) = self.owners.get_mut(&entry.owner()) {
            owner.fields.retain(|&k| k != key);
        }
        Ok(())
    }

    // -- rules --------------------------------------------------------------

    /// Load a JSON rule document into the library.
    pub fn load_rules_json(&mut self, json: &str) -> anyhow::Result<Vec<TreeId>> {
        let document = RuleDocument::from_json(json).context("failed to parse rule document")?;
        let trees = self
            .rules
            .load_document(&document, &mut self.names)
            .context("failed to load rule document")?;
        for &tree in &trees {
            for error in self.rules.build_errors(tree) {
                tracing::warn!(tree = ?self.rules.name_of(tree), %error, "rule tree built with errors");
            }
        }
        Ok(trees)
    }

    /// Export the library as a JSON rule document.
    pub fn export_rules_json(&self) -> anyhow::Result<String> {
        self.rules
            .export_document(&self.names)
            .to_json()
            .context("failed to serialize rule document")
    }

    // -- tick ---------------------------------------------------------------

    /// Run one tick.
    pub fn tick(&mut self) -> TickReport {
        let tick_start = Instant::now();

        let refresh = self.graph.refresh(&mut self.store);
        let refresh_time = tick_start.elapsed();

        let eval_start = Instant::now();
        let mut transitions = Vec::new();
        let mut owners_evaluated = 0;
        for &id in &self.owner_order {
            let Some(owner) = self.owners.get_mut(&id) else {
                continue;
            };
            let Some(tree) = owner.rules.filter(|_| owner.enabled) else {
                continue;
            };
            let mask = owner.mask(&self.store, &self.graph);
            let mut state = self.rules.evaluate(tree, &mask);
            if state.is_empty() {
                state = owner.default_state;
            }
            owners_evaluated += 1;
            if state != owner.state {
                tracing::trace!(owner = %id, from = ?owner.state, to = ?state, "state transition");
                transitions.push(StateTransition {
                    owner: id,
                    from: owner.state,
                    to: state,
                });
                owner.state = state;
            }
        }
        let evaluate_time = eval_start.elapsed();

        self.tick_counter += 1;
        self.last_diagnostics = TickDiagnostics {
            refresh_time,
            evaluate_time,
            total_time: tick_start.elapsed(),
            fields_evaluated: refresh.evaluated,
            owners_evaluated,
        };

        TickReport {
            tick: self.tick_counter,
            refresh,
            transitions,
        }
    }

    /// Run `count` ticks. Returns the total number of state transitions.
    pub fn run_ticks(&mut self, count: u64) -> usize {
        (0..count).map(|_| self.tick().transitions.len()).sum()
    }

    // -- accessors ----------------------------------------------------------

    /// The number of ticks executed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// Simulation time in seconds, computed as `tick_count * fixed_dt`.
    pub fn sim_time(&self) -> f64 {
        self.tick_counter as f64 * self.fixed_dt
    }

    pub fn fixed_dt(&self) -> f64 {
        self.fixed_dt
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current state of `owner`.
    pub fn state_of(&self, owner: OwnerId) -> Option<NameId> {
        self.owners.get(&owner).map(Owner::state)
    }

    /// Current state of `owner`, by name. `None` also when the state is the
    /// sentinel.
    pub fn state_name_of(&self, owner: OwnerId) -> Option<&str> {
        self.names.states.name_of(self.state_of(owner)?)
    }

    /// Settled value of a field.
    pub fn value_of(&self, key: FieldKey) -> Option<Value> {
        self.graph.value(key)
    }

    /// Name of a field.
    pub fn field_name_of(&self, key: FieldKey) -> Option<&str> {
        self.names.fields.name_of(self.store.get(key)?.name())
    }

    pub fn owner(&self, owner: OwnerId) -> Option<&Owner> {
        self.owners.get(&owner)
    }

    /// Live owners in spawn order.
    pub fn owners(&self) -> impl Iterator<Item = (OwnerId, &Owner)> {
        self.owner_order
            .iter()
            .filter_map(|id| self.owners.get(id).map(|o| (*id, o)))
    }

    pub fn names(&self) -> &Names {
        &self.names
    }

    pub fn names_mut(&mut self) -> &mut Names {
        &mut self.names
    }

    pub fn rules(&self) -> &RuleLibrary {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut RuleLibrary {
        &mut self.rules
    }

    pub fn graph(&self) -> &FieldGraph {
        &self.graph
    }

    pub fn store(&self) -> &FieldStore {
        &self.store
    }

    /// Diagnostics from the last tick.
    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }
}

/// Resolve a declared name, interning it unless the registry is strict.
fn intern(registry: &mut NameRegistry, name: &str) -> Result<NameId, String> {
    if registry.is_strict() {
        return registry
            .find(name)
            .ok_or_else(|| format!("name {name:?} is not registered"));
    }
    registry.register(name).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_graph::graph::{PropagationBudget, RefreshOutcome};
    use cairn_rules::step::Step;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default())
    }

    #[test]
    fn new_engine_starts_at_zero() {
        let engine = engine();
        assert_eq!(engine.tick_count(), 0);
        assert_eq!(engine.sim_time(), 0.0);
        assert_eq!(engine.owners().count(), 0);
    }

    #[test]
    #[should_panic(expected = "fixed_dt must be positive")]
    fn zero_dt_panics() {
        let _ = Engine::new(EngineConfig {
            fixed_dt: 0.0,
            ..Default::default()
        });
    }

    #[test]
    fn sim_time_computed_not_accumulated() {
        let mut engine = Engine::new(EngineConfig {
            fixed_dt: 0.1,
            ..Default::default()
        });
        engine.run_ticks(1000);
        assert_eq!(engine.sim_time(), 1000.0 * 0.1);
    }

    #[test]
    fn derived_field_follows_input() {
        let mut engine = engine();
        let o = engine.spawn_owner("o");
        let a = engine.add_input(o, "a", 2).unwrap();
        let b = engine.add_input(o, "b", 3).unwrap();
        let sum = engine.add_field(o, "sum", Derivation::Sum(vec![a, b])).unwrap();

        engine.tick();
        assert_eq!(engine.value_of(sum), Some(5));
        engine.set_input(a, 10).unwrap();
        engine.tick();
        assert_eq!(engine.value_of(sum), Some(13));
        assert_eq!(engine.field_name_of(sum), Some("sum"));
    }

    #[test]
    fn set_input_rejects_derived_and_stale_fields() {
        let mut engine = engine();
        let o = engine.spawn_owner("o");
        let a = engine.add_input(o, "a", 0).unwrap();
        let not_a = engine.add_field(o, "not_a", Derivation::Not(a)).unwrap();
        assert!(matches!(engine.set_input(not_a, 1), Err(EngineError::NotAnInput { .. })));
        engine.remove_field(a).unwrap();
        assert!(matches!(engine.set_input(a, 1), Err(EngineError::StaleField { .. })));
        assert_eq!(engine.owner(o).unwrap().fields(), &[not_a]);
    }

    #[test]
    fn bad_upstream_disables_only_that_owner() {
        let mut engine = engine();
        let good = engine.spawn_owner("good");
        let bad = engine.spawn_owner("bad");
        let x = engine.add_input(good, "x", 1).unwrap();
        engine.remove_field(x).unwrap();

        let err = engine.add_field(bad, "y", Derivation::Copy(x)).unwrap_err();
        assert!(matches!(err, EngineError::FieldInitialization { owner, .. } if owner == bad));
        assert!(!engine.owner(bad).unwrap().is_enabled());
        assert!(engine.owner(bad).unwrap().fault().is_some());
        assert!(engine.owner(good).unwrap().is_enabled());

        engine.enable_owner(bad).unwrap();
        assert!(engine.owner(bad).unwrap().fault().is_none());
    }

    #[test]
    fn duplicate_and_blank_names_fail_initialization() {
        let mut engine = engine();
        let o = engine.spawn_owner("o");
        engine.add_input(o, "a", 0).unwrap();
        assert!(engine.add_input(o, "a", 1).is_err());
        assert!(engine.add_input(o, "  ", 1).is_err());
        // A second owner may reuse the name.
        let p = engine.spawn_owner("p");
        assert!(engine.add_input(p, "a", 0).is_ok());
    }

    #[test]
    fn strict_names_refuse_unregistered_fields() {
        let mut engine = Engine::new(EngineConfig {
            strict_names: true,
            ..Default::default()
        });
        engine.names_mut().fields.register("known").unwrap();
        let o = engine.spawn_owner("o");
        assert!(engine.add_input(o, "known", 0).is_ok());
        assert!(engine.add_input(o, "unknown", 0).is_err());
    }

    #[test]
    fn despawn_removes_fields_and_invalidates_handle() {
        let mut engine = engine();
        let o = engine.spawn_owner("o");
        let a = engine.add_input(o, "a", 1).unwrap();
        engine.tick();
        engine.despawn_owner(o).unwrap();
        assert!(engine.store().is_empty());
        assert!(!engine.graph().contains(a));
        assert!(matches!(engine.despawn_owner(o), Err(EngineError::StaleOwner { .. })));
        assert!(engine.state_of(o).is_none());
    }

    #[test]
    fn rewiring_into_a_cycle_keeps_values_until_fixed() {
        let mut engine = engine();
        let o = engine.spawn_owner("o");
        let a = engine.add_input(o, "a", 1).unwrap();
        let b = engine.add_field(o, "b", Derivation::Copy(a)).unwrap();
        let c = engine.add_field(o, "c", Derivation::Copy(b)).unwrap();
        engine.tick();
        let order = engine.graph().order().to_vec();

        engine.set_derivation(b, Derivation::Copy(c)).unwrap();
        let report = engine.tick();
        assert!(matches!(report.refresh.outcome, RefreshOutcome::Cycle { .. }));
        assert_eq!(engine.graph().order(), order.as_slice());
        assert_eq!(engine.value_of(c), Some(1));

        engine.set_derivation(b, Derivation::Not(a)).unwrap();
        let report = engine.tick();
        assert_eq!(report.refresh.outcome, RefreshOutcome::Settled);
        assert_eq!(engine.value_of(c), Some(0));
    }

    #[test]
    fn default_state_must_resolve() {
        let mut engine = Engine::new(EngineConfig {
            strict_names: true,
            ..Default::default()
        });
        let o = engine.spawn_owner("o");
        let tree = engine.rules_mut().insert("t", Vec::new()).unwrap();

        let err = engine.assign_rules(o, tree, "Idle").unwrap_err();
        assert!(matches!(err, EngineError::UnknownState { ref state, .. } if state == "Idle"));
        assert!(engine.owner(o).unwrap().rules().is_none());

        engine.names_mut().states.register("Idle").unwrap();
        engine.assign_rules(o, tree, "Idle").unwrap();
        assert_eq!(engine.state_name_of(o), Some("Idle"));

        let mut lazy = self::engine();
        let p = lazy.spawn_owner("p");
        let tree = lazy.rules_mut().insert("t", Vec::new()).unwrap();
        assert!(matches!(
            lazy.assign_rules(p, tree, "  "),
            Err(EngineError::UnknownState { .. })
        ));
    }

    #[test]
    fn unknown_tree_cannot_be_assigned() {
        let mut engine = engine();
        let o = engine.spawn_owner("o");
        let err = engine.assign_rules(o, TreeId(9), "Idle").unwrap_err();
        assert!(matches!(err, EngineError::Rules(RuleError::UnknownTree { .. })));
    }

    #[test]
    fn disabled_owner_keeps_its_state() {
        let mut engine = engine();
        let o = engine.spawn_owner("o");
        let on = engine.add_input(o, "on", 0).unwrap();
        let on_name = engine.names_mut().fields.lookup("on");
        let lit = engine.names_mut().states.lookup("Lit");
        let tree = engine
            .rules_mut()
            .insert("t", vec![Step::condition(0, -1, on_name, true), Step::result(1, 0, lit)])
            .unwrap();
        engine.assign_rules(o, tree, "Dark").unwrap();

        engine.disable_owner(o).unwrap();
        engine.set_input(on, 1).unwrap();
        assert!(engine.tick().transitions.is_empty());
        assert_eq!(engine.state_name_of(o), Some("Dark"));
        assert_eq!(engine.last_diagnostics().owners_evaluated, 0);

        engine.enable_owner(o).unwrap();
        assert_eq!(engine.tick().transitions.len(), 1);
        assert_eq!(engine.state_name_of(o), Some("Lit"));
    }

    #[test]
    fn budgeted_engine_publishes_whole_passes() {
        let mut engine = Engine::new(EngineConfig {
            propagation_budget: PropagationBudget::PerTick(2),
            ..Default::default()
        });
        let o = engine.spawn_owner("o");
        let a = engine.add_input(o, "a", 7).unwrap();
        let b = engine.add_field(o, "b", Derivation::Copy(a)).unwrap();
        let c = engine.add_field(o, "c", Derivation::Copy(b)).unwrap();

        let first = engine.tick();
        assert_eq!(first.refresh.outcome, RefreshOutcome::InProgress);
        assert_eq!(engine.value_of(a), None);
        let second = engine.tick();
        assert_eq!(second.refresh.outcome, RefreshOutcome::Settled);
        assert_eq!(engine.value_of(c), Some(7));
    }
}
