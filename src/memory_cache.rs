use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cache::CacheBackend;
use crate::error::CacheError;

/// In-memory cache backend.
///
/// This is a simple LRU cache honoring the TTL passed on each write. It is
/// intended for tests and single-process deployments where a distributed
/// cache is unnecessary.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    inner: Arc<Mutex<CacheState>>,
    capacity: usize,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryCache {
    /// Creates a new cache with the given capacity.
    ///
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            })),
            capacity,
        }
    }

    /// Number of live and not-yet-pruned entries.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("poisoned lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails with [`CacheError::Unavailable`] once a writer panicked holding the lock.
    fn state(&self) -> Result<MutexGuard<'_, CacheState>, CacheError> {
        self.inner
            .lock()
            .map_err(|_| CacheError::Unavailable("poisoned lock".to_string()))
    }

    fn remove_key(state: &mut CacheState, key: &str) {
        if state.entries.remove(key).is_some() {
            state.order.retain(|existing| existing != key);
        }
    }

    fn touch(state: &mut CacheState, key: &str) {
        state.order.retain(|existing| existing != key);
        state.order.push_back(key.to_string());
    }

    fn prune_expired(state: &mut CacheState, now: Instant) {
        state.entries.retain(|_, entry| entry.expires_at > now);
        state.order.retain(|key| state.entries.contains_key(key));
    }

    fn evict_if_needed(state: &mut CacheState, capacity: usize) {
        while state.entries.len() > capacity {
            if let Some(key) = state.order.pop_front() {
                state.entries.remove(&key);
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if self.capacity == 0 {
            return Ok(None);
        }

        let now = Instant::now();
        let mut guard = self.state()?;

        if let Some(entry) = guard.entries.get(key)
            && entry.expires_at <= now
        {
            Self::remove_key(&mut guard, key);
            return Ok(None);
        }

        let value = guard.entries.get(key).map(|entry| entry.value.clone());
        if value.is_some() {
            Self::touch(&mut guard, key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        if self.capacity == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let mut guard = self.state()?;
        Self::prune_expired(&mut guard, now);

        guard.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Self::touch(&mut guard, key);
        Self::evict_if_needed(&mut guard, self.capacity);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut guard = self.state()?;
        Self::remove_key(&mut guard, key);
        Ok(())
    }
}
