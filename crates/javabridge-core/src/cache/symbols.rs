//! Resolved-symbol caches.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use super::keys::{CacheKey, ConstructorKey, MethodKey};
use crate::registry::{ConstructorDescriptor, MethodDescriptor};

/// Counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub bypassed: u64,
}

/// Map from call shape to the symbol resolved for it.
#[derive(Debug)]
pub struct SymbolCache<K, V> {
    map: HashMap<K, V>,
    hits: u64,
    misses: u64,
    bypassed: u64,
}

impl<K, V> Default for SymbolCache<K, V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            hits: 0,
            misses: 0,
            bypassed: 0,
        }
    }
}

impl<K: Eq + Hash, V: Clone> SymbolCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &CacheKey<K>) -> Option<V> {
        match key {
            CacheKey::Bypass => {
                self.bypassed += 1;
                None
            }
            CacheKey::Key(k) => {
                let found = self.map.get(k).cloned();
                if found.is_some() {
                    self.hits += 1;
                } else {
                    self.misses += 1;
                }
                found
            }
        }
    }

    pub fn put(&mut self, key: CacheKey<K>, value: V) {
        if let CacheKey::Key(k) = key {
            self.map.insert(k, value);
        }
    }

    /// Drop every entry by replacing the backing map.
    pub fn clear(&mut self) {
        self.map = HashMap::new();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.map.len(),
            hits: self.hits,
            misses: self.misses,
            bypassed: self.bypassed,
        }
    }
}

pub type MethodCache = SymbolCache<MethodKey, Arc<MethodDescriptor>>;
pub type ConstructorCache = SymbolCache<ConstructorKey, Arc<ConstructorDescriptor>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss_counters() {
        let mut cache: SymbolCache<String, u32> = SymbolCache::new();
        let key = CacheKey::Key("a".to_string());
        assert_eq!(cache.get(&key), None);
        cache.put(key.clone(), 7);
        assert_eq!(cache.get(&key), Some(7));

        let stats = cache.stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (1, 1, 1));
    }

    #[test]
    fn test_bypass_never_stores() {
        let mut cache: SymbolCache<String, u32> = SymbolCache::new();
        cache.put(CacheKey::Bypass, 1);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&CacheKey::Bypass), None);
        assert_eq!(cache.stats().bypassed, 1);
    }

    #[test]
    fn test_clear() {
        let mut cache: SymbolCache<String, u32> = SymbolCache::new();
        cache.put(CacheKey::Key("a".into()), 1);
        cache.clear();
        assert_eq!(cache.get(&CacheKey::Key("a".into())), None);
    }
}
