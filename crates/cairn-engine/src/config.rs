//! Engine configuration.
//!
//! ```
//! use cairn_engine::config::EngineConfig;
//! use cairn_graph::graph::PropagationBudget;
//!
//! let config = EngineConfig::from_json_str(r#"{ "propagation_budget": { "per_tick": 64 } }"#).unwrap();
//! assert_eq!(config.propagation_budget, PropagationBudget::PerTick(64));
//! assert_eq!(config.max_reference_depth, 32);
//! ```

use anyhow::{ensure, Context};
use cairn_graph::graph::PropagationBudget;
use cairn_rules::plan::DEFAULT_MAX_REFERENCE_DEPTH;
use serde::{Deserialize, Serialize};

/// Configuration for an [`Engine`](crate::tick::Engine).
///
/// Every key is optional in the JSON form; absent keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Field evaluations allowed per tick.
    pub propagation_budget: PropagationBudget,
    /// How many rule-tree references may nest before evaluation gives up.
    pub max_reference_depth: usize,
    /// When set, names are never interned implicitly: owners may only declare
    /// fields and rules may only mention names that were pre-registered.
    pub strict_names: bool,
    /// Fixed time step in seconds per tick. Must be positive and finite.
    pub fixed_dt: f64,
}

impl Default for EngineConfig {
    /// Unlimited propagation, lazy interning, 60 Hz.
    fn default() -> Self {
        Self {
            propagation_budget: PropagationBudget::Unlimited,
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
            strict_names: false,
            fixed_dt: 1.0 / 60.0,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or a `fixed_dt` that is not positive and
    /// finite.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values a running engine depends on.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.fixed_dt > 0.0 && self.fixed_dt.is_finite(),
            "fixed_dt must be positive and finite, got {}",
            self.fixed_dt
        );
        Ok(())
    }
}
