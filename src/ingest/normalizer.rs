//! Line normalization and re-delivery suppression.

use std::collections::{HashSet, VecDeque};

use sha2::{Digest, Sha256};

/// Default number of content hashes remembered per match.
pub const DEFAULT_DEDUP_CAPACITY: usize = 4096;

/// Collapse runs of whitespace to a single space and trim.
#[must_use]
pub fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn content_hash(line: &str) -> [u8; 32] {
    Sha256::digest(line.as_bytes()).into()
}

/// Hex SHA-256 of a cleaned line, as used for duplicate detection.
#[must_use]
pub fn line_digest(line: &str) -> String {
    hex::encode(content_hash(line))
}

/// Bounded set of recently seen line hashes.
///
/// Holds at most `capacity` digests; inserting past capacity evicts the
/// oldest entry first.
#[derive(Debug, Clone)]
pub struct DedupCache {
    capacity: usize,
    seen: HashSet<[u8; 32]>,
    order: VecDeque<[u8; 32]>,
}

impl DedupCache {
    /// Create a cache remembering up to `capacity` lines. A capacity of 0 is treated as 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn contains(&self, line: &str) -> bool {
        self.seen.contains(&content_hash(line))
    }

    /// Record a line. Returns `false` if it was already present.
    pub fn insert(&mut self, line: &str) -> bool {
        let digest = content_hash(line);
        if !self.seen.insert(digest) {
            return false;
        }
        self.order.push_back(digest);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

/// Per-match normalizer: whitespace cleanup plus duplicate suppression.
#[derive(Debug, Clone, Default)]
pub struct LineNormalizer {
    dedup: DedupCache,
}

impl LineNormalizer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            dedup: DedupCache::new(capacity),
        }
    }

    /// Clean a line and drop it if blank or already seen in this match.
    pub fn normalize(&mut self, line: &str) -> Option<String> {
        let cleaned = collapse_whitespace(line);
        if cleaned.is_empty() || !self.dedup.insert(&cleaned) {
            return None;
        }
        Some(cleaned)
    }

    /// Whether a cleaned line has already been accepted.
    #[must_use]
    pub fn has_seen(&self, cleaned: &str) -> bool {
        self.dedup.contains(cleaned)
    }

    /// Mark lines as seen without emitting them (used when resuming a match).
    pub fn seed<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            self.dedup.insert(&collapse_whitespace(line));
        }
    }

    #[must_use]
    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  Foo \t used\n\nTackle!  "), "Foo used Tackle!");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[test]
    fn test_normalize_drops_blank() {
        let mut normalizer = LineNormalizer::default();
        assert_eq!(normalizer.normalize(" \t "), None);
    }

    #[test]
    fn test_normalize_drops_redelivery() {
        let mut normalizer = LineNormalizer::default();
        assert_eq!(
            normalizer.normalize("Turn 1").as_deref(),
            Some("Turn 1")
        );
        // Same content with different spacing is the same line
        assert_eq!(normalizer.normalize("  Turn   1 "), None);
        assert!(normalizer.has_seen("Turn 1"));
    }

    #[test]
    fn test_dedup_evicts_oldest() {
        let mut cache = DedupCache::new(2);
        assert!(cache.insert("a"));
        assert!(cache.insert("b"));
        assert!(cache.insert("c"));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));

        // "a" was evicted, so it is accepted again
        assert!(cache.insert("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn test_dedup_never_exceeds_capacity() {
        let mut cache = DedupCache::new(16);
        for i in 0..1000 {
            cache.insert(&format!("line {i}"));
        }
        assert_eq!(cache.len(), 16);
    }

    #[test]
    fn test_line_digest() {
        assert_eq!(
            line_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(line_digest("Turn 1").len(), 64);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = DedupCache::new(0);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn test_seed_marks_seen() {
        let mut normalizer = LineNormalizer::new(8);
        normalizer.seed(["Turn 1", "Foo used Tackle!"]);
        assert_eq!(normalizer.normalize("Foo used Tackle!"), None);
        assert_eq!(normalizer.dedup().len(), 2);
    }
}
