//! In-memory dedup ledger.
//!
//! The ledger is the single authority for novelty decisions within one
//! channel run. Identifiers are never evicted; a fresh ledger is built for
//! every channel.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: HashSet<String>,
}

impl DedupLedger {
    /// Pre-sizes the set for a run expected to accept `expected` identifiers.
    pub fn with_capacity(expected: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(expected),
        }
    }

    /// Seeds the ledger from identifiers persisted by an earlier run.
    pub fn seeded<I>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            seen: identifiers.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Records `id`; returns `false` if it was already present.
    pub fn add(&mut self, id: String) -> bool {
        self.seen.insert(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }
}
