//! In-memory chat timeouts and shield charges.
//!
//! Both live in [`ExpiringLru`] maps keyed per platform, so expiry is a
//! property of the entry and no timer threads are ever spawned. Expired
//! entries vanish on read or on `purge_expired`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::info;

use super::cache::ExpiringLru;
use super::types::{Platform, UserId};
use crate::logutil::escape_log;

pub const SHIELD_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const REGISTRY_CAPACITY: usize = 10_000;
// Effectively unbounded; real expiry comes from insert_with_ttl.
const NO_DEFAULT_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

type TimeoutKey = (Platform, String);

fn timeout_key(platform: Platform, username: &str) -> TimeoutKey {
    (platform, username.trim().to_lowercase())
}

pub struct TimeoutRegistry {
    timeouts: Mutex<ExpiringLru<TimeoutKey, ()>>,
    shields: Mutex<ExpiringLru<(Platform, UserId), u32>>,
    shield_ttl: Duration,
}

impl Default for TimeoutRegistry {
    fn default() -> Self {
        Self::new(SHIELD_TTL)
    }
}

impl TimeoutRegistry {
    pub fn new(shield_ttl: Duration) -> Self {
        Self {
            timeouts: Mutex::new(ExpiringLru::new(REGISTRY_CAPACITY, NO_DEFAULT_TTL)),
            shields: Mutex::new(ExpiringLru::new(REGISTRY_CAPACITY, shield_ttl)),
            shield_ttl,
        }
    }

    /// Apply a timeout, adding to whatever is left of an existing one.
    /// Returns the new total remaining.
    pub fn add_timeout(&self, platform: Platform, username: &str, duration: Duration) -> Duration {
        let key = timeout_key(platform, username);
        let mut timeouts = self.timeouts.lock().unwrap_or_else(|p| p.into_inner());
        let existing = timeouts
            .get_with_expiry(&key)
            .map(|(_, expires_at)| expires_at.saturating_duration_since(Instant::now()))
            .unwrap_or_default();
        let total = existing + duration;
        timeouts.insert_with_ttl(key, (), total);
        info!(
            "timeout for {} on {}: +{}s, {}s total",
            escape_log(username),
            platform,
            duration.as_secs(),
            total.as_secs()
        );
        total
    }

    pub fn remaining(&self, platform: Platform, username: &str) -> Option<Duration> {
        let key = timeout_key(platform, username);
        let mut timeouts = self.timeouts.lock().unwrap_or_else(|p| p.into_inner());
        timeouts
            .get_with_expiry(&key)
            .map(|(_, expires_at)| expires_at.saturating_duration_since(Instant::now()))
    }

    pub fn is_timed_out(&self, platform: Platform, username: &str) -> bool {
        self.remaining(platform, username).is_some()
    }

    /// Returns whether a timeout was present.
    pub fn clear_timeout(&self, platform: Platform, username: &str) -> bool {
        let key = timeout_key(platform, username);
        self.timeouts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&key)
            .is_some()
    }

    /// Shorten an active timeout. Returns what is left, or `None` if it ended.
    pub fn reduce_timeout(
        &self,
        platform: Platform,
        username: &str,
        reduction: Duration,
    ) -> Option<Duration> {
        let key = timeout_key(platform, username);
        let mut timeouts = self.timeouts.lock().unwrap_or_else(|p| p.into_inner());
        let left = timeouts
            .get_with_expiry(&key)
            .map(|(_, expires_at)| expires_at.saturating_duration_since(Instant::now()))?;
        let reduced = left.saturating_sub(reduction);
        if reduced.is_zero() {
            timeouts.remove(&key);
            return None;
        }
        timeouts.insert_with_ttl(key, (), reduced);
        Some(reduced)
    }

    pub fn grant_shield(&self, platform: Platform, user: UserId, charges: u32) -> u32 {
        let key = (platform, user);
        let mut shields = self.shields.lock().unwrap_or_else(|p| p.into_inner());
        let total = shields.get(&key).copied().unwrap_or(0).saturating_add(charges);
        shields.insert_with_ttl(key, total, self.shield_ttl);
        total
    }

    pub fn shield_charges(&self, platform: Platform, user: UserId) -> u32 {
        self.shields
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(platform, user))
            .copied()
            .unwrap_or(0)
    }

    /// Spend one shield charge if the user has any. Returns whether the hit was blocked.
    pub fn absorb_hit(&self, platform: Platform, user: UserId) -> bool {
        let key = (platform, user);
        let mut shields = self.shields.lock().unwrap_or_else(|p| p.into_inner());
        let Some((charges, expires_at)) = shields
            .get_with_expiry(&key)
            .map(|(charges, expires_at)| (*charges, expires_at))
        else {
            return false;
        };
        if charges <= 1 {
            shields.remove(&key);
        } else {
            let ttl = expires_at.saturating_duration_since(Instant::now());
            shields.insert_with_ttl(key, charges - 1, ttl);
        }
        true
    }

    /// Drop expired timeouts and shields; returns how many entries were removed.
    pub fn purge_expired(&self) -> usize {
        let timeouts = self
            .timeouts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .purge_expired();
        let shields = self
            .shields
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .purge_expired();
        timeouts + shields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn timeouts_accumulate() {
        let registry = TimeoutRegistry::default();
        registry.add_timeout(Platform::Twitch, "Alice", Duration::from_secs(60));
        let total = registry.add_timeout(Platform::Twitch, "alice", Duration::from_secs(60));
        assert!(total > Duration::from_secs(118) && total <= Duration::from_secs(120));
        assert!(!registry.is_timed_out(Platform::Discord, "alice"));
    }

    #[test]
    fn reduce_and_clear() {
        let registry = TimeoutRegistry::default();
        registry.add_timeout(Platform::Twitch, "bob", Duration::from_secs(30));
        let left = registry
            .reduce_timeout(Platform::Twitch, "bob", Duration::from_secs(10))
            .expect("still timed out");
        assert!(left <= Duration::from_secs(20));
        assert_eq!(
            registry.reduce_timeout(Platform::Twitch, "bob", Duration::from_secs(60)),
            None
        );
        assert!(!registry.clear_timeout(Platform::Twitch, "bob"));
    }

    #[test]
    fn timeouts_expire_without_timers() {
        let registry = TimeoutRegistry::default();
        registry.add_timeout(Platform::Youtube, "carol", Duration::from_millis(10));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(registry.remaining(Platform::Youtube, "carol"), None);
    }

    #[test]
    fn shields_absorb_one_hit_per_charge() {
        let registry = TimeoutRegistry::default();
        let user = UserId::new();
        assert_eq!(registry.grant_shield(Platform::Twitch, user, 2), 2);
        assert!(registry.absorb_hit(Platform::Twitch, user));
        assert_eq!(registry.shield_charges(Platform::Twitch, user), 1);
        assert!(registry.absorb_hit(Platform::Twitch, user));
        assert!(!registry.absorb_hit(Platform::Twitch, user));
    }
}
