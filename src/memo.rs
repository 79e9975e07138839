use std::collections::HashMap;
use std::sync::Mutex;

/// Injectable key/value cache layered in front of external lookups.
///
/// Callers own the key function; implementations only store and return
/// clones, so a process-local map can be swapped for a shared cache without
/// touching call sites.
pub trait MemoCache<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn put(&self, key: String, value: V);
}

#[derive(Debug)]
pub struct MemoryCache<V> {
    entries: Mutex<HashMap<String, V>>,
}

impl<V> MemoryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send> MemoCache<V> for MemoryCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let guard = self.entries.lock().ok()?;
        guard.get(key).cloned()
    }

    fn put(&self, key: String, value: V) {
        // A poisoned lock only costs us a cache entry.
        if let Ok(mut guard) = self.entries.lock() {
            guard.insert(key, value);
        }
    }
}

/// Cache that never remembers anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl<V> MemoCache<V> for NoCache {
    fn get(&self, _key: &str) -> Option<V> {
        None
    }

    fn put(&self, _key: String, _value: V) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cache_round_trip() {
        let cache = MemoryCache::<String>::new();
        assert!(cache.get("9606:symbol:TP53").is_none());
        cache.put("9606:symbol:TP53".to_string(), "9606.ENSP00000269305".to_string());
        assert_eq!(
            cache.get("9606:symbol:TP53").as_deref(),
            Some("9606.ENSP00000269305")
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn no_cache_forgets() {
        let cache = NoCache;
        MemoCache::<u32>::put(&cache, "k".to_string(), 1);
        assert_eq!(MemoCache::<u32>::get(&cache, "k"), None);
    }
}
