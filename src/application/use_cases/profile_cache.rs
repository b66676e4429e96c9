use crate::domain::profile::SchemaProfile;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// LRU cache of schema profiles keyed by dataset fingerprint
pub struct ProfileCache {
    cache: HashMap<String, Arc<SchemaProfile>>,
    max_size: usize,
    access_order: Vec<String>,
    /// Cache statistics
    hits: usize,
    misses: usize,
}

impl ProfileCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::new(),
            max_size: max_size.max(1),
            access_order: Vec::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Get the profile computed for a dataset fingerprint
    pub fn get(&mut self, fingerprint: &str) -> Option<Arc<SchemaProfile>> {
        let result = self.cache.get(fingerprint).cloned();
        if result.is_some() {
            self.hits += 1;
            self.touch(fingerprint);
        } else {
            self.misses += 1;
        }
        result
    }

    /// Store a profile under its own fingerprint
    pub fn put(&mut self, profile: Arc<SchemaProfile>) {
        let key = profile.fingerprint.clone();
        if self.cache.contains_key(&key) {
            self.cache.insert(key.clone(), profile);
            self.touch(&key);
            return;
        }

        // Evict least recently used entries if at capacity
        while self.cache.len() >= self.max_size && !self.access_order.is_empty() {
            let oldest = self.access_order.remove(0);
            self.cache.remove(&oldest);
        }

        self.cache.insert(key.clone(), profile);
        self.access_order.push(key);
    }

    /// Update access order for LRU
    fn touch(&mut self, key: &str) {
        self.access_order.retain(|k| k != key);
        self.access_order.push(key.to_string());
    }

    pub fn stats(&self) -> ProfileCacheStats {
        let total_requests = self.hits + self.misses;
        let hit_rate = if total_requests > 0 {
            self.hits as f32 / total_requests as f32
        } else {
            0.0
        };

        ProfileCacheStats {
            total_entries: self.cache.len(),
            max_size: self.max_size,
            hits: self.hits,
            misses: self.misses,
            hit_rate,
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.access_order.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileCacheStats {
    pub total_entries: usize,
    pub max_size: usize,
    pub hits: usize,
    pub misses: usize,
    pub hit_rate: f32,
}
