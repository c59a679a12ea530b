//! Time-windowed registry of recently active chatters.
//!
//! Entries are targeting hints only; a target may be gone by the time a caller
//! acts on it. A background sweeper purges expired entries so the map does not
//! grow with every user ever seen.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use rand::Rng;

use super::errors::EconomyError;
use super::types::{Platform, UserId};

pub const CHATTER_EXPIRY: Duration = Duration::from_secs(30 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatterTarget {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone)]
struct ChatterEntry {
    username: String,
    last_message_at: Instant,
}

#[derive(Debug)]
pub struct ActiveChatterTracker {
    chatters: RwLock<HashMap<(Platform, UserId), ChatterEntry>>,
    expiry: Duration,
}

impl Default for ActiveChatterTracker {
    fn default() -> Self {
        Self::new(CHATTER_EXPIRY)
    }
}

impl ActiveChatterTracker {
    pub fn new(expiry: Duration) -> Self {
        Self {
            chatters: RwLock::new(HashMap::new()),
            expiry,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Upsert the chatter's last-seen time. Re-tracking never duplicates.
    pub fn track(&self, platform: Platform, user_id: UserId, username: &str) {
        let Ok(mut chatters) = self.chatters.write() else {
            warn!("chatter map poisoned; dropping track for {}", user_id);
            return;
        };
        chatters.insert(
            (platform, user_id),
            ChatterEntry {
                username: username.to_string(),
                last_message_at: Instant::now(),
            },
        );
    }

    /// Returns whether a live entry was removed.
    pub fn remove(&self, platform: Platform, user_id: UserId) -> bool {
        let Ok(mut chatters) = self.chatters.write() else {
            return false;
        };
        let now = Instant::now();
        match chatters.remove(&(platform, user_id)) {
            Some(entry) => self.is_live(&entry, now),
            None => false,
        }
    }

    /// Snapshot of non-expired chatters on `platform`, in no particular order.
    pub fn active_chatters(&self, platform: Platform) -> Vec<ChatterTarget> {
        let Ok(chatters) = self.chatters.read() else {
            return Vec::new();
        };
        let now = Instant::now();
        chatters
            .iter()
            .filter(|((p, _), entry)| *p == platform && self.is_live(entry, now))
            .map(|((_, user_id), entry)| ChatterTarget {
                user_id: *user_id,
                username: entry.username.clone(),
            })
            .collect()
    }

    pub fn active_count(&self, platform: Platform) -> usize {
        let Ok(chatters) = self.chatters.read() else {
            return 0;
        };
        let now = Instant::now();
        chatters
            .iter()
            .filter(|((p, _), entry)| *p == platform && self.is_live(entry, now))
            .count()
    }

    pub fn random_target(&self, platform: Platform) -> Result<ChatterTarget, EconomyError> {
        self.random_targets(platform, 1)?
            .pop()
            .ok_or(EconomyError::NoActiveTargets)
    }

    /// Up to `count` distinct live chatters. Never pads and never repeats.
    pub fn random_targets(
        &self,
        platform: Platform,
        count: usize,
    ) -> Result<Vec<ChatterTarget>, EconomyError> {
        self.random_targets_with(platform, count, &mut rand::thread_rng())
    }

    pub fn random_targets_with<R: Rng + ?Sized>(
        &self,
        platform: Platform,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<ChatterTarget>, EconomyError> {
        let mut live = self.active_chatters(platform);
        if live.is_empty() {
            return Err(EconomyError::NoActiveTargets);
        }
        let take = count.min(live.len());
        // Partial Fisher-Yates over the first `take` positions.
        for i in 0..take {
            let j = rng.gen_range(i..live.len());
            live.swap(i, j);
        }
        live.truncate(take);
        Ok(live)
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let Ok(mut chatters) = self.chatters.write() else {
            return 0;
        };
        let now = Instant::now();
        let before = chatters.len();
        chatters.retain(|_, entry| now.duration_since(entry.last_message_at) < self.expiry);
        before - chatters.len()
    }

    fn is_live(&self, entry: &ChatterEntry, now: Instant) -> bool {
        now.duration_since(entry.last_message_at) < self.expiry
    }

    /// Start the periodic sweep on its own thread. The thread holds only a weak
    /// reference and exits once the tracker is dropped or the handle is stopped.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        self.start_sweeper_with(interval, || 0)
    }

    /// Like `start_sweeper`, also running `also` on every tick so other
    /// TTL-indexed state shares the one background thread.
    pub fn start_sweeper_with<F>(self: &Arc<Self>, interval: Duration, also: F) -> SweeperHandle
    where
        F: Fn() -> usize + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let tracker: Weak<Self> = Arc::downgrade(self);
        let spawned = thread::Builder::new()
            .name("chatter-sweeper".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(tracker) = tracker.upgrade() else {
                            break;
                        };
                        let removed = tracker.sweep() + also();
                        if removed > 0 {
                            debug!("sweep removed {} expired entries", removed);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });
        let join = match spawned {
            Ok(join) => Some(join),
            Err(e) => {
                warn!("failed to start chatter sweeper: {}", e);
                None
            }
        };
        SweeperHandle {
            inner: Mutex::new(Some(SweeperInner {
                stop: stop_tx,
                join,
            })),
        }
    }
}

struct SweeperInner {
    stop: Sender<()>,
    join: Option<JoinHandle<()>>,
}

/// Stops the sweeper thread on `stop()` or drop. Stopping twice is a no-op.
pub struct SweeperHandle {
    inner: Mutex<Option<SweeperInner>>,
}

impl SweeperHandle {
    pub fn stop(&self) {
        let taken = match self.inner.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(inner) = taken {
            let _ = inner.stop.send(());
            if let Some(join) = inner.join {
                if join.join().is_err() {
                    warn!("chatter sweeper thread panicked");
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
