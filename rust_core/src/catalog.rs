//! Canonical item name resolution.
//!
//! Marketplace feeds report free-text item names with inconsistent casing
//! and the occasional typo. Resolution maps those onto the canonical
//! catalog with a bounded edit-distance tolerance. "No match" is a signal
//! (retry later or discard the quote), never an error.

use parking_lot::RwLock;
use strsim::levenshtein;

/// Maximum edit distance accepted by default.
pub const DEFAULT_MAX_DISTANCE: usize = 3;

/// Normalize a name for comparison: lowercase, collapse whitespace.
fn normalize(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find the candidate closest to `name` within `max_distance` edits.
///
/// Exact matches (after normalization) always win over fuzzy ones. Ties are
/// broken by shortest edit distance, then by first-encountered order.
/// Deterministic: the same inputs always produce the same match.
pub fn closest_match<'a, I>(name: &str, candidates: I, max_distance: usize) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let target = normalize(name);
    if target.is_empty() {
        return None;
    }

    let mut best: Option<(usize, &'a str)> = None;
    for candidate in candidates {
        let distance = levenshtein(&target, &normalize(candidate));
        if distance == 0 {
            return Some(candidate);
        }
        if distance <= max_distance {
            // Strict < keeps the first-encountered candidate on ties.
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, candidate));
            }
        }
    }
    best.map(|(_, c)| c)
}

/// Live view of the canonical name set, shared across workers.
///
/// Reads (resolution during aggregation) proceed concurrently; inserts from
/// newly-discovered items take the write lock briefly. No whole-catalog
/// lock is ever held across a resolution batch.
#[derive(Default)]
pub struct CatalogIndex {
    names: RwLock<Vec<String>>,
}

impl CatalogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_names(names: Vec<String>) -> Self {
        Self {
            names: RwLock::new(names),
        }
    }

    /// Register a canonical name if it is not already present.
    pub fn insert(&self, name: &str) {
        let mut names = self.names.write();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }

    /// Resolve a free-text name to its canonical form.
    pub fn resolve(&self, name: &str, max_distance: usize) -> Option<String> {
        let names = self.names.read();
        closest_match(name, names.iter().map(|n| n.as_str()), max_distance)
            .map(|n| n.to_string())
    }
}
