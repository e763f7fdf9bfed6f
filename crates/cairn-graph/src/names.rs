//! Name interning for field and state names.
//!
//! A [`NameRegistry`] hands out dense integer [`NameId`]s in first-registration
//! order, starting at 0. The id `-1` ([`NameId::EMPTY`]) is reserved as the
//! universal "empty/unset" sentinel and is never assigned to a real name.
//!
//! Registries are plain values. Each [`Names`] instance owns one registry per
//! namespace (fields and states), and callers pass it explicitly to whatever
//! needs to resolve names, so independent instances never share ids.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::GraphError;

// ---------------------------------------------------------------------------
// NameId
// ---------------------------------------------------------------------------

/// Interned identifier for a field or state name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameId(i32);

impl NameId {
    /// The "empty/unset" sentinel. Never assigned to a registered name.
    pub const EMPTY: NameId = NameId(-1);

    /// Wrap a raw id. Used when ids come from persisted data.
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw integer value.
    #[inline]
    pub const fn to_raw(self) -> i32 {
        self.0
    }

    /// `true` for [`NameId::EMPTY`].
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 < 0
    }
}

impl Default for NameId {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "NameId(EMPTY)")
        } else {
            write!(f, "NameId({})", self.0)
        }
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// NameRegistry
// ---------------------------------------------------------------------------

/// Bidirectional map between names and [`NameId`]s.
///
/// In the default (lazy) mode, [`lookup`](Self::lookup) interns unknown names
/// on first sight. A registry created with [`strict`](Self::strict) only
/// assigns ids through [`register`](Self::register), so id assignment does
/// not depend on the order in which names happen to be queried.
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    /// Name -> id.
    by_name: HashMap<String, NameId>,
    /// Indexed by `NameId.0`.
    names: Vec<String>,
    strict: bool,
}

impl NameRegistry {
    /// Create an empty, lazily interning registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry whose `lookup` never interns.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Create a registry with `names` pre-registered in iteration order.
    ///
    /// Blank names and duplicates are skipped (the former with a warning).
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new();
        for name in names {
            let _ = registry.register(name.as_ref());
        }
        registry
    }

    /// Register `name`, returning its id.
    ///
    /// Re-registering an existing name returns the existing id.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::EmptyName`] for an empty or whitespace-only name.
    pub fn register(&mut self, name: &str) -> Result<NameId, GraphError> {
        if name.trim().is_empty() {
            tracing::warn!(name = ?name, "refusing to register a blank name");
            return Err(GraphError::EmptyName);
        }
        if let Some(&existing) = self.by_name.get(name) {
            return Ok(existing);
        }
        let id = NameId(self.names.len() as i32);
        self.names.push(name.to_owned());
        self.by_name.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Resolve `name`, interning it first if this registry is lazy.
    ///
    /// Blank names resolve to [`NameId::EMPTY`]. In strict mode an unknown
    /// name also resolves to [`NameId::EMPTY`] and is logged.
    pub fn lookup(&mut self, name: &str) -> NameId {
        if name.trim().is_empty() {
            return NameId::EMPTY;
        }
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        if self.strict {
            tracing::warn!(name = %name, "unregistered name in strict registry");
            return NameId::EMPTY;
        }
        self.register(name).unwrap_or(NameId::EMPTY)
    }

    /// Resolve `name` without interning it.
    pub fn find(&self, name: &str) -> Option<NameId> {
        self.by_name.get(name).copied()
    }

    /// The name registered under `id`, or `None` for the sentinel and
    /// unassigned ids.
    pub fn name_of(&self, id: NameId) -> Option<&str> {
        if id.is_empty() {
            return None;
        }
        self.names.get(id.0 as usize).map(String::as_str)
    }

    /// Whether this registry refuses to intern on lookup.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Switch between lazy and strict lookup. Existing ids are kept.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no names have been registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Registered names in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NameId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| (NameId(i as i32), name.as_str()))
    }
}

// Serialized as the ordered name list so ids survive a round trip.
impl Serialize for NameRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.names.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NameRegistry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        Ok(Self::from_names(names))
    }
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// The pair of registries a graph/rules/engine instance shares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Names {
    /// Field names (condition targets, mask keys).
    pub fields: NameRegistry,
    /// State names (rule results).
    pub states: NameRegistry,
}

impl Names {
    /// Two empty lazy registries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Two empty strict registries.
    pub fn strict() -> Self {
        Self {
            fields: NameRegistry::strict(),
            states: NameRegistry::strict(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
