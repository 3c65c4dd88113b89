//! Thread-safe TTL cache
//!
//! Entries expire a fixed duration after they are written. Expired entries are
//! removed lazily, when observed by a read or when the cache is enumerated;
//! nothing sweeps them in the background.
//!
//! [`TtlCache::fetch`] runs its loader without holding the internal lock. Two
//! threads missing on the same key at the same time may therefore both run
//! the loader, and the last write wins. Loaders passed here should be safe to
//! run more than once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

/// Default time-to-live for cache entries (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A cached value and the instant it stops being valid
///
/// `expires_at` is `None` when the TTL reaches past what `Instant` can
/// represent; such entries live until deleted or cleared.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// String-keyed cache with per-entry expiry
#[derive(Debug)]
pub struct TtlCache<V> {
    ttl: Duration,
    store: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache whose entries live for `ttl` unless overridden per write
    pub fn new(ttl: Duration) -> Self {
        debug!(?ttl, "TtlCache::new: called");
        Self {
            ttl,
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Default time-to-live applied by [`set`](Self::set) and [`fetch`](Self::fetch)
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a value if present and not expired
    pub fn get(&self, key: &str) -> Option<V> {
        let mut store = self.lock();
        match store.get(key) {
            None => None,
            Some(entry) if entry.is_expired() => {
                debug!(%key, "TtlCache::get: expired");
                store.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
        }
    }

    /// Store a value, replacing any existing entry
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let ttl = ttl.unwrap_or(self.ttl);
        debug!(%key, ?ttl, "TtlCache::set: called");
        self.lock().insert(key, CacheEntry::new(value, ttl));
    }

    /// Return the cached value, or run `loader` and cache what it returns
    ///
    /// Loader errors are returned unchanged and nothing is cached.
    pub fn fetch<F, E>(&self, key: &str, ttl: Option<Duration>, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(key) {
            debug!(%key, "TtlCache::fetch: hit");
            return Ok(value);
        }

        debug!(%key, "TtlCache::fetch: miss, running loader");
        let value = loader()?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Remove a key; returns whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        debug!("TtlCache::clear: called");
        self.lock().clear();
    }

    /// Number of live entries; purges expired ones first
    pub fn size(&self) -> usize {
        let mut store = self.lock();
        let now = Instant::now();
        store.retain(|_, entry| !entry.is_expired_at(now));
        store.len()
    }

    /// Keys of live entries, in no particular order
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.lock()
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
