//! The persisted step-record form.
//!
//! Authored trees are stored as ordered lists of flat records:
//!
//! ```json
//! {
//!   "trees": [
//!     {
//!       "name": "button",
//!       "steps": [
//!         { "id": 0, "parent_id": -1, "type": "condition",
//!           "condition_field": "pressed", "condition_expected": true, "condition_negate": false },
//!         { "id": 1, "parent_id": 0, "type": "result", "result_state": "Pressed" },
//!         { "id": 2, "parent_id": -1, "type": "reference", "reference": "hover_rules" }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Field and state names are strings here and are interned through the
//! caller's [`Names`] on load; references name another tree.

use cairn_graph::names::{NameId, Names};
use serde::{Deserialize, Serialize};

use crate::library::RuleLibrary;
use crate::step::{Step, StepId, StepKind};
use crate::RuleError;

/// Discriminant of a [`StepRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Condition,
    Result,
    Reference,
}

/// One persisted step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: i32,
    pub parent_id: i32,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition_field: String,
    #[serde(default)]
    pub condition_expected: bool,
    #[serde(default)]
    pub condition_negate: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// One persisted tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

/// A set of persisted trees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub trees: Vec<TreeRecord>,
}

impl RuleDocument {
    /// Parse a document from JSON.
    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, RuleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl StepRecord {
    /// Convert to a [`Step`], interning names and reserving referenced trees.
    ///
    /// # Errors
    ///
    /// - [`RuleError::MissingPayload`] when the field, state or reference
    ///   the record's type needs is blank.
    /// - [`RuleError::UnknownName`] when a strict registry does not know the
    ///   name.
    pub fn resolve(&self, names: &mut Names, library: &mut RuleLibrary) -> Result<Step, RuleError> {
        let kind = match self.step_type {
            StepType::Condition => StepKind::Condition {
                field: intern(&mut names.fields, &self.condition_field, self.id, "condition_field")?,
                expected: self.condition_expected,
                negate: self.condition_negate,
            },
            StepType::Result => StepKind::Result {
                state: intern(&mut names.states, &self.result_state, self.id, "result_state")?,
            },
            StepType::Reference => {
                let target = self
                    .reference
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(RuleError::MissingPayload {
                        step: self.id,
                        what: "reference",
                    })?;
                StepKind::Reference {
                    tree: library.reserve(target),
                }
            }
        };
        Ok(Step {
            id: StepId(self.id),
            parent: StepId(self.parent_id),
            kind,
        })
    }

    /// Convert a [`Step`] back to its persisted form.
    ///
    /// Names that no longer resolve are written as empty strings.
    pub fn from_step(step: &Step, names: &Names, library: &RuleLibrary) -> Self {
        let mut record = StepRecord {
            id: step.id.0,
            parent_id: step.parent.0,
            step_type: StepType::Result,
            condition_field: String::new(),
            condition_expected: false,
            condition_negate: false,
            result_state: String::new(),
            reference: None,
        };
        match step.kind {
            StepKind::Condition {
                field,
                expected,
                negate,
            } => {
                record.step_type = StepType::Condition;
                record.condition_field = names.fields.name_of(field).unwrap_or_default().to_owned();
                record.condition_expected = expected;
                record.condition_negate = negate;
            }
            StepKind::Result { state } => {
                record.result_state = names.states.name_of(state).unwrap_or_default().to_owned();
            }
            StepKind::Reference { tree } => {
                record.step_type = StepType::Reference;
                record.reference = library.name_of(tree).map(str::to_owned);
            }
        }
        record
    }
}

fn intern(
    registry: &mut cairn_graph::names::NameRegistry,
    name: &str,
    step: i32,
    what: &'static str,
) -> Result<NameId, RuleError> {
    if name.trim().is_empty() {
        return Err(RuleError::MissingPayload { step, what });
    }
    let id = registry.lookup(name);
    if id.is_empty() {
        return Err(RuleError::UnknownName {
            step,
            name: name.to_owned(),
        });
    }
    Ok(id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
