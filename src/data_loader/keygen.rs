//! Surrogate key generation.
//!
//! Every row gets a generated key at load time, independent of any external
//! identifying field. The generator is pluggable so callers can substitute
//! deterministic keys; the default produces random hyphenated UUIDs, which
//! fit the NVARCHAR(36) key columns of the compiled model.

use uuid::Uuid;

/// Produces surrogate key values for new rows. One instance serves a single
/// load call; implementations may keep internal state.
pub trait KeyGenerator {
    /// Key value for a new row of `table_name` at nesting `level`.
    fn next_key(&mut self, table_name: &str, level: usize) -> String;
}

/// Default generator: random UUID v4, hyphenated (36 characters).
#[derive(Debug, Default)]
pub struct UuidKeys;

impl KeyGenerator for UuidKeys {
    fn next_key(&mut self, _table_name: &str, _level: usize) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic counter-based generator (`k0`, `k1`, ...). Meant for tests
/// and reproducible fixtures.
#[derive(Debug, Default)]
pub struct SequentialKeys {
    next: usize,
}

impl KeyGenerator for SequentialKeys {
    fn next_key(&mut self, _table_name: &str, _level: usize) -> String {
        let id = self.next;
        self.next += 1;
        format!("k{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_keys_are_unique_and_sized() {
        let mut keys = UuidKeys;
        let a = keys.next_key("T", 0);
        let b = keys.next_key("T", 0);
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_sequential_keys() {
        let mut keys = SequentialKeys::default();
        assert_eq!(keys.next_key("T", 0), "k0");
        assert_eq!(keys.next_key("U", 1), "k1");
    }
}
