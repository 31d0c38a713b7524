//! Identifier allocation.
//!
//! Turns external paths (entity, element, nested element names) into
//! database identifiers that are unique within one namespace, fit the
//! target's length limit, and use a safe character set. One allocator
//! instance holds the table namespace of a single compilation; each table
//! additionally owns one allocator for its column namespace. Allocators are
//! never shared across compilations: registration order determines the
//! generated names, so a fresh instance per call keeps compilations
//! deterministic and independent.
//!
//! Registration is idempotent: the same path (with the same prefix) always
//! returns the name it was first given, which is what lets associations
//! name their target entity's table before that entity has been compiled.

use std::collections::{HashMap, HashSet};

/// Prefix for entity root tables, e.g. `ENTITY/DOCUMENT`.
pub const ENTITY_PREFIX: &str = "ENTITY/";

/// Longest identifier the target database accepts.
pub const MAX_IDENTIFIER_LENGTH: usize = 127;

/// Path separator inside generated names.
const SEGMENT_SEPARATOR: char = '.';

#[derive(Debug, Default)]
pub struct IdentifierAllocator {
    /// Canonical path key to the name it was assigned.
    assigned: HashMap<String, String>,
    /// Every name handed out, for sibling-collision detection.
    taken: HashSet<String>,
}

impl IdentifierAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` under `prefix` and return its internal name.
    /// Re-registering the same path returns the same name; distinct paths
    /// never share a name.
    pub fn register(&mut self, path: &[String], prefix: &str) -> String {
        let key = canonical_key(path, prefix);
        if let Some(name) = self.assigned.get(&key) {
            return name.clone();
        }

        let joined = path
            .iter()
            .map(|s| sanitize(s))
            .collect::<Vec<_>>()
            .join(&SEGMENT_SEPARATOR.to_string());
        let base = truncate(&format!("{prefix}{joined}"), MAX_IDENTIFIER_LENGTH);

        let mut candidate = base.clone();
        let mut attempt = 2usize;
        while self.taken.contains(&candidate) {
            let suffix = format!("_{attempt}");
            candidate = format!(
                "{}{}",
                truncate(&base, MAX_IDENTIFIER_LENGTH - suffix.len()),
                suffix
            );
            attempt += 1;
        }

        self.taken.insert(candidate.clone());
        self.assigned.insert(key, candidate.clone());
        candidate
    }
}

fn canonical_key(path: &[String], prefix: &str) -> String {
    // \u{1} cannot occur in element names coming from YAML/JSON documents
    // that survive sanitization, so it is a safe join character.
    let mut key = String::from(prefix);
    for segment in path {
        key.push('\u{1}');
        key.push_str(segment);
    }
    key
}

fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

fn truncate(name: &str, max: usize) -> String {
    name.chars().take(max).collect()
}
