//! Memoisation for single-record lookups.
//!
//! `Orm::get_one` consults a caller-owned `GetOneCache` keyed by class,
//! filters and sort. Entries are evicted least-recently-used once the cache
//! is full, and must be invalidated by the caller after writes.

use crate::filter::FilterValue;
use crate::record::Record;
use sqlentity_core::{EngineConfig, Result, SchemaCatalog};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct CachedRecord {
    class: String,
    record: Option<Record>,
    /// Tick of the last access.
    last_used: u64,
    hit_count: u64,
}

/// LRU cache of `get_one` results.
///
/// A miss is cached too: a lookup that found nothing returns `Some(None)`
/// until invalidated.
#[derive(Debug)]
pub struct GetOneCache {
    cache: HashMap<String, CachedRecord>,
    max_size: usize,
    tick: u64,
}

impl GetOneCache {
    /// Create a cache holding at most `max_size` lookups.
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(max_size.min(256)),
            max_size,
            tick: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.get_one_cache_size)
    }

    /// Cache key for a lookup.
    pub fn key(class: &str, filters: &[(String, FilterValue)], sort: Option<&str>) -> String {
        let filters: Vec<String> = filters
            .iter()
            .map(|(key, value)| format!("{}={:?}", key, value))
            .collect();
        format!("{}|{}|{}", class, filters.join("&"), sort.unwrap_or_default())
    }

    /// Cached result for `key`.
    pub fn get(&mut self, key: &str) -> Option<Option<Record>> {
        self.tick += 1;
        let entry = self.cache.get_mut(key)?;
        entry.last_used = self.tick;
        entry.hit_count += 1;
        Some(entry.record.clone())
    }

    pub fn insert(&mut self, key: String, class: &str, record: Option<Record>) {
        if self.max_size == 0 {
            return;
        }
        if !self.cache.contains_key(&key) && self.cache.len() >= self.max_size {
            self.evict_lru();
        }
        self.tick += 1;
        self.cache.insert(
            key,
            CachedRecord {
                class: class.to_string(),
                record,
                last_used: self.tick,
                hit_count: 0,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Times `key` was served from the cache.
    pub fn hits(&self, key: &str) -> u64 {
        self.cache.get(key).map_or(0, |e| e.hit_count)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop lookups made against `class`, its ancestors or its subclasses.
    /// Returns the number of entries removed.
    pub fn invalidate(&mut self, catalog: &SchemaCatalog, class: &str) -> Result<usize> {
        let mut related = catalog.ancestry(class)?;
        related.extend(catalog.subclasses_for(class)?);
        let before = self.cache.len();
        self.cache.retain(|_, entry| !related.contains(&entry.class));
        let removed = before - self.cache.len();
        tracing::debug!(class = %class, removed, "Invalidated get_one cache");
        Ok(removed)
    }

    /// Drop everything.
    pub fn flush(&mut self) {
        self.cache.clear();
    }

    fn evict_lru(&mut self) {
        if let Some(lru_key) = self
            .cache
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
        {
            self.cache.remove(&lru_key);
        }
    }
}

impl Default for GetOneCache {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlentity_core::{ClassDeclaration, SchemaDeclaration};

    fn record(id: i64) -> Option<Record> {
        let mut record = Record::new("Player");
        record.set("ID", id);
        Some(record)
    }

    #[test]
    fn test_cache_hit_and_miss() {
        let mut cache = GetOneCache::new(10);
        let key = GetOneCache::key("Player", &[("Name".into(), "Ann".into())], None);
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), "Player", record(1));
        assert_eq!(cache.get(&key), Some(record(1)));
        assert_eq!(cache.hits(&key), 1);

        let empty = GetOneCache::key("Player", &[("Name".into(), "Nobody".into())], None);
        cache.insert(empty.clone(), "Player", None);
        assert_eq!(cache.get(&empty), Some(None));
    }

    #[test]
    fn test_keys_distinguish_sort() {
        let a = GetOneCache::key("Player", &[], Some("Name"));
        let b = GetOneCache::key("Player", &[], Some("Name DESC"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_lru_ordering() {
        let mut cache = GetOneCache::new(2);
        cache.insert("a".into(), "Player", record(1));
        cache.insert("b".into(), "Player", record(2));
        cache.get("a");
        cache.insert("c".into(), "Player", record(3));

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let mut cache = GetOneCache::new(0);
        cache.insert("a".into(), "Player", record(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_follows_the_hierarchy() {
        let catalog = SchemaCatalog::new(
            SchemaDeclaration::new()
                .class(ClassDeclaration::new("Player").field("Name", "Varchar"))
                .class(ClassDeclaration::new("Captain").parent("Player"))
                .class(ClassDeclaration::new("Team").field("Title", "Varchar")),
        )
        .unwrap();
        let mut cache = GetOneCache::new(10);
        cache.insert("p".into(), "Player", record(1));
        cache.insert("c".into(), "Captain", record(2));
        cache.insert("t".into(), "Team", None);

        assert_eq!(cache.invalidate(&catalog, "Captain").unwrap(), 2);
        assert!(cache.contains("t"));

        cache.flush();
        assert!(cache.is_empty());
    }
}
