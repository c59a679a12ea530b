//! Per-row lock table used by the sled store to serialize writers.
//!
//! A transaction takes a row lock on its first locking read of that row and
//! keeps it until commit, rollback or drop. Locks are re-entrant per owner.
//! Waiting is bounded; a timed-out wait surfaces as a transaction failure.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::errors::EconomyError;
use super::types::{ActionKind, Platform, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Cooldown(UserId, ActionKind),
    Trap(UserId),
    /// A hashed (platform, platform id) pair; collisions only over-serialize.
    Identity(Platform, u64),
    /// A hashed (platform, lowercased username) pair guarding the name index.
    Username(Platform, u64),
    User(UserId),
    Inventory(UserId),
}

impl RowKey {
    pub fn identity(platform: Platform, platform_id: &str) -> Self {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        platform_id.hash(&mut hasher);
        RowKey::Identity(platform, hasher.finish())
    }

    pub fn username(platform: Platform, username: &str) -> Self {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        username.trim().to_lowercase().hash(&mut hasher);
        RowKey::Username(platform, hasher.finish())
    }
}

pub type OwnerId = u64;

#[derive(Debug)]
pub struct RowLockTable {
    held: Mutex<HashMap<RowKey, OwnerId>>,
    released: Condvar,
    wait_limit: Duration,
}

impl RowLockTable {
    pub fn new(wait_limit: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            wait_limit,
        }
    }

    /// Block until `key` is free (or already ours) and claim it.
    /// Returns `true` when the lock was newly taken by this call.
    pub fn acquire(&self, key: RowKey, owner: OwnerId) -> Result<bool, EconomyError> {
        let deadline = Instant::now() + self.wait_limit;
        let mut held = self
            .held
            .lock()
            .map_err(|_| EconomyError::TransactionFailure("lock table poisoned".into()))?;
        loop {
            match held.get(&key) {
                None => {
                    held.insert(key, owner);
                    return Ok(true);
                }
                Some(current) if *current == owner => return Ok(false),
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(EconomyError::TransactionFailure(format!(
                            "timed out waiting for row lock {:?}",
                            key
                        )));
                    }
                    let (guard, _) = self
                        .released
                        .wait_timeout(held, deadline - now)
                        .map_err(|_| {
                            EconomyError::TransactionFailure("lock table poisoned".into())
                        })?;
                    held = guard;
                }
            }
        }
    }

    /// Release every lock in `keys` owned by `owner`.
    pub fn release_all(&self, keys: &[RowKey], owner: OwnerId) {
        if keys.is_empty() {
            return;
        }
        // A poisoned table still has to hand its locks back.
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for key in keys {
            if held.get(key) == Some(&owner) {
                held.remove(key);
            }
        }
        drop(held);
        self.released.notify_all();
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().map(|h| h.len()).unwrap_or(0)
    }
}
