//! Cairn Rules -- decision-tree rule evaluation.
//!
//! A rule tree maps a snapshot of named field values (a [`Mask`](step::Mask))
//! to a state name. Trees are authored as flat lists of steps that name their
//! parent, validated and flattened once into a [`Plan`](plan::Plan), and then
//! evaluated with a single short-circuit scan.
//!
//! - [`step`]: steps, ids, and the mask.
//! - [`plan`]: plan building, structural validation, and evaluation.
//! - [`library`]: named trees with cached plans and cross-tree references.
//! - [`record`]: the persisted JSON form.
//!
//! # Quick Start
//!
//! ```
//! use cairn_graph::names::Names;
//! use cairn_rules::prelude::*;
//!
//! let mut names = Names::new();
//! let pressed = names.fields.lookup("pressed");
//! let down = names.states.lookup("Down");
//! let up = names.states.lookup("Up");
//!
//! let outcome = Plan::build(&[
//!     Step::condition(0, -1, pressed, true),
//!     Step::result(1, 0, down),
//!     Step::result(2, -1, up),
//! ]);
//! assert!(outcome.errors.is_empty());
//!
//! let plan = outcome.plan;
//! assert_eq!(plan.evaluate(&Mask::new().with(pressed, 1)), down);
//! assert_eq!(plan.evaluate(&Mask::new()), up);
//! ```

#![deny(unsafe_code)]

pub mod library;
pub mod plan;
pub mod record;
pub mod step;

use step::{StepId, TreeId};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A problem found while flattening an authored tree.
///
/// These never abort a build; the offending steps are dropped and the rest of
/// the tree stays usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralError {
    /// The step's parent id names no step in the tree.
    #[error("step {step:?} names missing parent {parent:?}")]
    UnresolvedParent { step: StepId, parent: StepId },

    /// A second step reused an id (or used the reserved root id).
    #[error("duplicate step id {step:?}")]
    DuplicateStep { step: StepId },

    /// The step's parent chain loops and never reaches the root.
    #[error("step {step:?} cannot be reached from the root")]
    Unreachable { step: StepId },
}

/// Errors produced by the rules layer.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("unknown rule tree {tree:?}")]
    UnknownTree { tree: TreeId },

    /// A record lacks the field, state or reference its type requires.
    #[error("step {step} is missing its {what}")]
    MissingPayload { step: i32, what: &'static str },

    /// A strict registry does not know the name.
    #[error("step {step} uses unregistered name {name:?}")]
    UnknownName { step: i32, name: String },

    #[error("rule document serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::library::RuleLibrary;
    pub use crate::plan::{
        BuildOutcome, NoReferences, Plan, PlanEntry, PlanResolver, DEFAULT_MAX_REFERENCE_DEPTH,
    };
    pub use crate::record::{RuleDocument, StepRecord, StepType, TreeRecord};
    pub use crate::step::{Mask, Step, StepId, StepKind, TreeId};
    pub use crate::{RuleError, StructuralError};
}
