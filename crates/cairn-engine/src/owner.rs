//! Rule-owning entities.
//!
//! An [`Owner`] groups the fields one entity declares, the rule tree that
//! decides its state, the fallback state used when no rule fires, and the
//! state it is currently in. Owners are addressed by generational
//! [`OwnerId`]s so a handle kept past `despawn_owner` is detected as stale.

use std::fmt;

use cairn_graph::graph::FieldGraph;
use cairn_graph::key::{FieldKey, KeyAllocator, SlotKey};
use cairn_graph::names::NameId;
use cairn_rules::step::{Mask, TreeId};
use serde::{Deserialize, Serialize};

use crate::store::FieldStore;

// ---------------------------------------------------------------------------
// OwnerId
// ---------------------------------------------------------------------------

/// Handle of an [`Owner`]. Layout: `[generation: u32 | index: u32]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Raw `u64` representation.
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl SlotKey for OwnerId {
    #[inline]
    fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    #[inline]
    fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// Allocator for [`OwnerId`]s.
pub type OwnerAllocator = KeyAllocator<OwnerId>;

// ---------------------------------------------------------------------------
// Owner
// ---------------------------------------------------------------------------

/// One rule-owning entity.
#[derive(Debug, Clone)]
pub struct Owner {
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldKey>,
    pub(crate) rules: Option<TreeId>,
    pub(crate) default_state: NameId,
    pub(crate) state: NameId,
    pub(crate) enabled: bool,
    pub(crate) fault: Option<String>,
}

impl Owner {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            fields: Vec::new(),
            rules: None,
            default_state: NameId::EMPTY,
            state: NameId::EMPTY,
            enabled: true,
            fault: None,
        }
    }

    /// Human-readable name given at spawn.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> &[FieldKey] {
        &self.fields
    }

    /// The assigned rule tree.
    pub fn rules(&self) -> Option<TreeId> {
        self.rules
    }

    /// State used when the rule tree yields no decision.
    pub fn default_state(&self) -> NameId {
        self.default_state
    }

    /// Current state.
    pub fn state(&self) -> NameId {
        self.state
    }

    /// Whether the owner takes part in ticks.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Why the owner was disabled, if a failure disabled it.
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    pub(crate) fn disable(&mut self, reason: String) {
        self.enabled = false;
        self.fault = Some(reason);
    }

    /// Snapshot this owner's settled field values, keyed by field name.
    ///
    /// Fields without a settled value yet are left out.
    pub fn mask(&self, store: &FieldStore, graph: &FieldGraph) -> Mask {
        let mut mask = Mask::with_capacity(self.fields.len());
        for &key in &self.fields {
            let (Some(entry), Some(value)) = (store.get(key), graph.value(key)) else {
                continue;
            };
            mask.set(entry.name(), value);
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_ids_go_stale_on_release() {
        let mut alloc = OwnerAllocator::new();
        let a = alloc.allocate();
        assert!(alloc.release(a));
        let b = alloc.allocate();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(!alloc.is_alive(a));
        assert_eq!(format!("{b:?}"), "OwnerId(0v1)");
    }

    #[test]
    fn disable_records_fault() {
        let mut owner = Owner::new("door");
        assert!(owner.is_enabled());
        owner.disable("broken".to_owned());
        assert!(!owner.is_enabled());
        assert_eq!(owner.fault(), Some("broken"));
    }
}
