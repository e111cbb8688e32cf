//! Response and model-list caches.
//!
//! [`ResponseCache`] is a content-addressed LRU with TTL: the key is a
//! SHA-256 digest over `(model, prompt, canonical options)`, hits promote
//! to most-recent, stale entries are deleted on read, and inserts at
//! capacity evict exactly the least-recently-used entry.
//!
//! [`ModelListCache`] is a single-slot short-TTL cache for the merged
//! catalog; the orchestrator re-filters open circuits on every read, so a
//! stale catalog never advertises a broken model.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::backend::{ModelInfo, QueryOptions, QueryResponse};

pub const DEFAULT_RESPONSE_TTL: Duration = Duration::from_millis(900_000);
pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const DEFAULT_MODEL_LIST_TTL: Duration = Duration::from_millis(30_000);

/// Content-addressed cache key over the full query identity.
pub fn cache_key(model: &str, prompt: &str, options: &QueryOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0x1f]);
    hasher.update(prompt.as_bytes());
    hasher.update([0x1f]);
    hasher.update(options.canonical().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

struct CacheEntry {
    response: QueryResponse,
    inserted: Instant,
}

struct CacheInner {
    map: HashMap<String, CacheEntry>,
    /// Recency order, least-recently-used at the front.
    order: VecDeque<String>,
}

/// Memoization of completed queries, LRU with TTL.
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    inner: RwLock<CacheInner>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            inner: RwLock::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Look up a key. A hit promotes the entry to most-recent; a stale
    /// entry is deleted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<QueryResponse> {
        let mut inner = self.inner.write().unwrap();

        let stale = match inner.map.get(key) {
            None => return None,
            Some(entry) => entry.inserted.elapsed() > self.ttl,
        };
        if stale {
            inner.map.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }

        // Promote to most-recent
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.to_string());
        Some(inner.map[key].response.clone())
    }

    /// Insert a response, evicting the least-recently-used entry first when
    /// at capacity.
    pub fn set(&self, key: &str, response: QueryResponse) {
        let mut inner = self.inner.write().unwrap();

        if inner.map.contains_key(key) {
            inner.order.retain(|k| k != key);
        } else if inner.map.len() >= self.max_entries {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            }
        }

        inner.map.insert(
            key.to_string(),
            CacheEntry {
                response,
                inserted: Instant::now(),
            },
        );
        inner.order.push_back(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_TTL, DEFAULT_MAX_ENTRIES)
    }
}

/// Single-slot cache of the merged model catalog.
pub struct ModelListCache {
    ttl: Duration,
    slot: RwLock<Option<(Vec<ModelInfo>, Instant)>>,
}

impl ModelListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// The cached catalog, or `None` when absent or stale.
    pub fn get(&self) -> Option<Vec<ModelInfo>> {
        let slot = self.slot.read().unwrap();
        slot.as_ref()
            .filter(|(_, at)| at.elapsed() <= self.ttl)
            .map(|(models, _)| models.clone())
    }

    pub fn set(&self, models: Vec<ModelInfo>) {
        *self.slot.write().unwrap() = Some((models, Instant::now()));
    }
}

impl Default for ModelListCache {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_LIST_TTL)
    }
}
