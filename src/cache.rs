//! Per-run memo of resolved digests
//!
//! Keys are the reference strings exactly as they appear in the template, not
//! parsed references, so `nginx:1.25` and `index.docker.io/library/nginx:1.25`
//! are cached independently. Entries are never replaced or evicted: once a
//! string resolves, every later occurrence in the run resolves identically.

use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
pub struct DigestCache {
    entries: HashMap<String, String>,
}

impl DigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache with pre-resolved overrides (e.g. freshly published images)
    pub fn with_overrides<I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut cache = Self::new();
        for (reference, digest) in overrides {
            cache.insert(reference, digest);
        }
        cache
    }

    pub fn get(&self, reference: &str) -> Option<&str> {
        self.entries.get(reference).map(String::as_str)
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }

    /// Record a resolution. The first value stored for a key wins; the
    /// value actually held for `reference` is returned.
    pub fn insert(&mut self, reference: String, digest: String) -> &str {
        self.entries.entry(reference).or_insert(digest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_insert_wins() {
        let mut cache = DigestCache::new();
        assert_eq!(cache.insert("a:1".into(), "a@sha256:1".into()), "a@sha256:1");
        assert_eq!(cache.insert("a:1".into(), "a@sha256:2".into()), "a@sha256:1");
        assert_eq!(cache.get("a:1"), Some("a@sha256:1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_overrides_seed_cache() {
        let cache = DigestCache::with_overrides(vec![(
            "gcr.io/foo/bar:baz".to_string(),
            "foo@sha256:deadbeef".to_string(),
        )]);
        assert!(cache.contains("gcr.io/foo/bar:baz"));
        assert!(!cache.contains("gcr.io/foo/bar:other"));
    }
}
