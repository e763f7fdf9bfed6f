//! BLAKE3 digest of the observable engine state.
//!
//! Two engines built the same way and fed the same inputs must report the
//! same digest after the same number of ticks. The digest covers the tick
//! counter and, for each owner in spawn order, its name, its current state
//! name and the settled value of each field (by name, in declaration order).
//! Keys and ids are left out because they depend on allocation history
//! rather than on what the engine computed.

use blake3::Hasher;

use crate::tick::Engine;

impl Engine {
    /// BLAKE3 hex digest (64 lowercase hex chars) of the observable state.
    pub fn digest(&self) -> String {
        let mut hasher = Hasher::new();
        hasher.update(&self.tick_count().to_le_bytes());
        for (_, owner) in self.owners() {
            write_str(&mut hasher, owner.name());
            write_str(&mut hasher, self.names().states.name_of(owner.state()).unwrap_or(""));
            hasher.update(&(owner.fields().len() as u64).to_le_bytes());
            for &key in owner.fields() {
                write_str(&mut hasher, self.field_name_of(key).unwrap_or(""));
                match self.value_of(key) {
                    Some(value) => {
                        hasher.update(&[1]);
                        hasher.update(&value.to_le_bytes());
                    }
                    None => {
                        hasher.update(&[0]);
                    }
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Length-prefixed so adjacent strings cannot run together.
fn write_str(hasher: &mut Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}
