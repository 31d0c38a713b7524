//! Batch-local identity map for deferred reference resolution.
//!
//! Objects may reference each other through `source` keys anywhere in one
//! batch, in any order. The first sighting of a source key reserves a
//! surrogate key: when the sighting comes from the object itself the entry
//! is resolved immediately; when it comes from an association the entry
//! stays unresolved until the object shows up. Whatever survives the batch
//! unresolved is a dangling reference.
//!
//! Keys are canonical encodings of the source value: compact JSON with
//! object fields kept in document order, so the same value always encodes
//! to the same string and differently-ordered fields stay distinct.

use indexmap::IndexMap;
use serde_json::Value;

use super::errors::DataError;

#[derive(Debug)]
struct IdentityEntry {
    id: String,
    resolved: bool,
}

#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: IndexMap<String, IdentityEntry>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical encoding of one source value.
    pub fn encode(source: &Value) -> String {
        serde_json::to_string(source).expect("JSON values always serialize")
    }

    /// Surrogate key reserved for `encoding`, if any sighting happened yet.
    pub fn lookup(&self, encoding: &str) -> Option<&str> {
        self.entries.get(encoding).map(|e| e.id.as_str())
    }

    /// Record an association sighting: reserve `id` for `encoding`, to be
    /// resolved by an object later in the batch.
    pub fn reserve(&mut self, encoding: String, id: String) {
        self.entries.insert(
            encoding,
            IdentityEntry {
                id,
                resolved: false,
            },
        );
    }

    /// Record the object carrying these source keys. Returns the key the
    /// object must use for its row: a key already reserved by an
    /// association wins over the freshly `generated` one, so references
    /// written earlier stay valid. Distinct reservations for the same
    /// object cannot be reconciled and fail the batch.
    pub fn claim(
        &mut self,
        encodings: Vec<String>,
        generated: String,
    ) -> Result<String, DataError> {
        let mut adopted: Option<String> = None;
        for encoding in &encodings {
            if let Some(entry) = self.entries.get(encoding) {
                match &adopted {
                    None => adopted = Some(entry.id.clone()),
                    Some(id) if *id != entry.id => {
                        return Err(DataError::ConflictingReservations {
                            sources: encodings.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        let id = adopted.unwrap_or(generated);
        for encoding in encodings {
            match self.entries.get_mut(&encoding) {
                Some(entry) => entry.resolved = true,
                None => {
                    self.entries.insert(
                        encoding,
                        IdentityEntry {
                            id: id.clone(),
                            resolved: true,
                        },
                    );
                }
            }
        }
        Ok(id)
    }

    /// Encodings still unresolved after the batch, in first-sighting order.
    pub fn dangling(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.resolved)
            .map(|(k, _)| k.clone())
            .collect()
    }
}
