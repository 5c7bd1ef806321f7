//! Content-addressed translation cache: key
//! `H("{src}:{tgt}:{text}")`, 1h TTL, LRU eviction.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_CAPACITY: usize = 1024;

struct Entry {
    value: String,
    inserted_at: Instant,
    last_used_at: Instant,
}

pub struct TranslationCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<String, Entry>,
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

impl TranslationCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self { ttl, capacity, entries: HashMap::new() }
    }

    pub fn key(src: &str, tgt: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{src}:{tgt}:{text}").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        let expired = self.entries.get(key).is_some_and(|e| e.inserted_at.elapsed() > self.ttl);
        if expired {
            self.entries.remove(key);
            return None;
        }
        let entry = self.entries.get_mut(key)?;
        entry.last_used_at = Instant::now();
        Some(entry.value.clone())
    }

    pub fn insert(&mut self, key: String, value: String) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_lru();
        }
        let now = Instant::now();
        self.entries.insert(key, Entry { value, inserted_at: now, last_used_at: now });
    }

    fn evict_lru(&mut self) {
        if let Some(lru_key) = self.entries.iter().min_by_key(|(_, e)| e.last_used_at).map(|(k, _)| k.clone()) {
            self.entries.remove(&lru_key);
        }
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
    fn hit_after_insert_avoids_recompute() {
        let mut cache = TranslationCache::default();
        let key = TranslationCache::key("en", "pt", "hello world");
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), "olá mundo".to_string());
        assert_eq!(cache.get(&key), Some("olá mundo".to_string()));
    }

    #[test]
    fn expired_entry_is_evicted_on_read() {
        let mut cache = TranslationCache::new(Duration::from_millis(1), DEFAULT_CAPACITY);
        let key = TranslationCache::key("en", "pt", "hi");
        cache.insert(key.clone(), "oi".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn overflow_evicts_least_recently_used() {
        let mut cache = TranslationCache::new(DEFAULT_TTL, 2);
        let a = TranslationCache::key("en", "pt", "a");
        let b = TranslationCache::key("en", "pt", "b");
        let c = TranslationCache::key("en", "pt", "c");
        cache.insert(a.clone(), "A".to_string());
        cache.insert(b.clone(), "B".to_string());
        cache.get(&a); // touch `a` so `b` becomes LRU
        cache.insert(c.clone(), "C".to_string());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn key_is_deterministic_and_scoped_by_language_pair() {
        let k1 = TranslationCache::key("en", "pt", "hello");
        let k2 = TranslationCache::key("en", "pt", "hello");
        let k3 = TranslationCache::key("en", "es", "hello");
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }
}
