//! Bounded LRU with per-entry expiry, and the user-profile cache built on it.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

use super::types::{Platform, User};

pub const DEFAULT_CACHE_SIZE: usize = 1000;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Version stamped on cache entries written by this build.
pub const USER_CACHE_VERSION: u32 = 1;

/// `LruCache` whose values carry their own expiry instant.
/// Not internally synchronized; callers wrap it in a `Mutex`.
pub struct ExpiringLru<K: Hash + Eq, V> {
    inner: LruCache<K, (V, Instant)>,
    default_ttl: Duration,
}

impl<K: Hash + Eq, V> ExpiringLru<K, V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(capacity),
            default_ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    /// Live value for `key`, refreshing its recency. Expired entries are dropped.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.get_with_expiry(key).map(|(value, _)| value)
    }

    pub fn get_with_expiry(&mut self, key: &K) -> Option<(&V, Instant)> {
        let expired = self.inner.peek(key).map(|(_, expires_at)| *expires_at <= Instant::now())?;
        if expired {
            self.inner.pop(key);
            return None;
        }
        self.inner
            .get(key)
            .map(|(value, expires_at)| (value, *expires_at))
    }

    /// Insert with the default TTL. Returns how many entries were evicted for room.
    pub fn insert(&mut self, key: K, value: V) -> usize {
        let ttl = self.default_ttl;
        self.insert_with_ttl(key, value, ttl)
    }

    pub fn insert_with_ttl(&mut self, key: K, value: V, ttl: Duration) -> usize {
        // Replacing a live key is not an eviction.
        self.inner.pop(&key);
        match self.inner.push(key, (value, Instant::now() + ttl)) {
            Some(_) => 1,
            None => 0,
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.pop(key).map(|(value, _)| value)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&mut self) -> usize
    where
        K: Clone,
    {
        let now = Instant::now();
        let stale: Vec<K> = self
            .inner
            .iter()
            .filter(|(_, (_, expires_at))| *expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.inner.pop(key);
        }
        stale.len()
    }
}

#[derive(Debug, Clone)]
struct CachedUser {
    user: User,
    version: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

/// (platform, platform id) → user profile, safe for concurrent use.
///
/// Entries carry the version they were written under. Bumping the expected
/// version turns every older entry into a miss that is purged on read.
pub struct UserCache {
    entries: Mutex<ExpiringLru<(Platform, String), CachedUser>>,
    expected_version: AtomicU32,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for UserCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE, DEFAULT_CACHE_TTL)
    }
}

impl UserCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(ExpiringLru::new(capacity, ttl)),
            expected_version: AtomicU32::new(USER_CACHE_VERSION),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExpiringLru<(Platform, String), CachedUser>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self, platform: Platform, platform_id: &str) -> Option<User> {
        let key = (platform, platform_id.to_string());
        let expected = self.expected_version.load(Ordering::Acquire);
        let mut entries = self.lock();
        let found = entries
            .get(&key)
            .map(|cached| (cached.version == expected, cached.user.clone()));
        match found {
            Some((true, user)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(user)
            }
            Some((false, _)) => {
                entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, platform: Platform, platform_id: &str, user: User) {
        let cached = CachedUser {
            user,
            version: self.expected_version.load(Ordering::Acquire),
        };
        let evicted = self.lock().insert((platform, platform_id.to_string()), cached);
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Remove one mapping. Absent keys are a no-op.
    pub fn invalidate(&self, platform: Platform, platform_id: &str) {
        self.lock().remove(&(platform, platform_id.to_string()));
    }

    /// Remove every mapping that points at `user`'s linked identities.
    pub fn invalidate_user(&self, user: &User) {
        let mut entries = self.lock();
        for (platform, platform_id) in &user.platform_ids {
            entries.remove(&(*platform, platform_id.clone()));
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn expected_version(&self) -> u32 {
        self.expected_version.load(Ordering::Acquire)
    }

    pub fn set_expected_version(&self, version: u32) {
        self.expected_version.store(version, Ordering::Release);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.lock().len(),
        }
    }
}
