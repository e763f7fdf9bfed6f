//! Cairn Engine -- the per-tick driver for fields and rule-owning entities.
//!
//! This crate ties [`cairn_graph`] and [`cairn_rules`] together: owners
//! declare fields in a [`FieldStore`](store::FieldStore), the
//! [`FieldGraph`](cairn_graph::graph::FieldGraph) orders and propagates them,
//! and each owner's rule tree maps its settled field values to a state.
//!
//! # Quick Start
//!
//! ```
//! use cairn_engine::prelude::*;
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! engine
//!     .load_rules_json(r#"{ "trees": [ { "name": "door", "steps": [
//!         { "id": 0, "parent_id": -1, "type": "condition",
//!           "condition_field": "open", "condition_expected": true },
//!         { "id": 1, "parent_id": 0, "type": "result", "result_state": "Open" }
//!     ] } ] }"#)
//!     .unwrap();
//!
//! let door = engine.spawn_owner("front door");
//! let open = engine.add_input(door, "open", 1).unwrap();
//! let tree = engine.rules().tree_id("door").unwrap();
//! engine.assign_rules(door, tree, "Closed").unwrap();
//!
//! engine.tick();
//! assert_eq!(engine.state_name_of(door), Some("Open"));
//!
//! engine.set_input(open, 0).unwrap();
//! engine.tick();
//! assert_eq!(engine.state_name_of(door), Some("Closed"));
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod digest;
pub mod logging;
pub mod owner;
pub mod store;
pub mod tick;

use cairn_graph::key::FieldKey;
use cairn_rules::RuleError;
use owner::OwnerId;

/// Re-export the graph crate for convenience.
pub use cairn_graph;

/// Re-export the rules crate for convenience.
pub use cairn_rules;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A field could not be declared or rewired.
    #[error("owner {owner}: cannot initialize field {field:?}: {reason}")]
    FieldInitialization {
        owner: OwnerId,
        field: String,
        reason: String,
    },

    #[error("owner {owner} does not exist or was despawned")]
    StaleOwner { owner: OwnerId },

    #[error("field {field} does not exist or was removed")]
    StaleField { field: FieldKey },

    /// Only input fields accept written values.
    #[error("field {field} is derived and cannot be written")]
    NotAnInput { field: FieldKey },

    /// A default state name that is blank or, under strict names, unknown.
    #[error("cannot use {state:?} as a default state: {reason}")]
    UnknownState { state: String, reason: String },

    #[error(transparent)]
    Rules(#[from] RuleError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use cairn_graph::prelude::*;
    pub use cairn_rules::prelude::*;

    pub use crate::config::EngineConfig;
    pub use crate::logging::init_logging;
    pub use crate::owner::{Owner, OwnerId};
    pub use crate::store::{DeriveFn, Derivation, FieldEntry, FieldStore};
    pub use crate::tick::{Engine, StateTransition, TickDiagnostics, TickReport};
    pub use crate::EngineError;
}
