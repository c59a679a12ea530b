//! Persistence contract consumed by the engines.
//!
//! The engines never lock anything themselves. Correctness of concurrent
//! read-modify-write sequences on one user's rows depends entirely on the
//! store serializing writers per row for the lifetime of a transaction; a
//! store advertises that through [`StoreCapabilities`] and engines refuse to
//! start on top of one that does not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::error;

use super::errors::EconomyError;
use super::types::{ActionKind, Inventory, Platform, Trap, User, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// Locking reads inside a transaction block other transactions on the same
    /// row until commit or rollback.
    pub serializes_writers: bool,
}

/// One unit of work. Locking reads take the row lock for the rest of the
/// transaction; writes are invisible to others until `commit`.
/// Dropping a transaction without committing rolls it back.
pub trait StoreTx {
    fn get_inventory(&mut self, user: UserId) -> Result<Inventory, EconomyError>;
    fn update_inventory(&mut self, user: UserId, inventory: &Inventory)
        -> Result<(), EconomyError>;
    fn delete_inventory(&mut self, user: UserId) -> Result<(), EconomyError>;

    fn last_used_for_update(
        &mut self,
        user: UserId,
        action: ActionKind,
    ) -> Result<Option<DateTime<Utc>>, EconomyError>;
    fn set_last_used(
        &mut self,
        user: UserId,
        action: ActionKind,
        at: DateTime<Utc>,
    ) -> Result<(), EconomyError>;

    fn active_trap_for_update(&mut self, target: UserId) -> Result<Option<Trap>, EconomyError>;
    fn put_trap(&mut self, trap: &Trap) -> Result<(), EconomyError>;

    fn get_user_for_update(&mut self, id: UserId) -> Result<Option<User>, EconomyError>;
    /// Locks the (platform, platform id) pair even when nobody holds it yet,
    /// so concurrent registrations of one identity serialize.
    fn find_user_by_platform_id_for_update(
        &mut self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<User>, EconomyError>;
    /// Insert or replace a user, keeping platform and username indexes in step.
    fn put_user(&mut self, user: &User) -> Result<(), EconomyError>;
    fn delete_user(&mut self, id: UserId) -> Result<(), EconomyError>;

    fn commit(self: Box<Self>) -> Result<(), EconomyError>;
    fn rollback(self: Box<Self>) -> Result<(), EconomyError>;
}

pub trait Store: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;
    fn begin(&self) -> Result<Box<dyn StoreTx>, EconomyError>;

    // Unlocked snapshot reads.
    fn get_inventory(&self, user: UserId) -> Result<Inventory, EconomyError>;
    fn last_used(
        &self,
        user: UserId,
        action: ActionKind,
    ) -> Result<Option<DateTime<Utc>>, EconomyError>;
    fn get_user(&self, id: UserId) -> Result<Option<User>, EconomyError>;
    fn find_user_by_platform_id(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<User>, EconomyError>;
    fn find_user_by_username(
        &self,
        platform: Platform,
        username: &str,
    ) -> Result<Option<User>, EconomyError>;
    fn active_trap(&self, target: UserId) -> Result<Option<Trap>, EconomyError>;
}

/// Fail fast when a store cannot serialize concurrent writers.
pub fn require_serialized_writers(store: &dyn Store) -> Result<(), EconomyError> {
    if store.capabilities().serializes_writers {
        Ok(())
    } else {
        Err(EconomyError::UnsupportedStore(
            "concurrent inventory and cooldown updates would race to lost updates".to_string(),
        ))
    }
}

/// Caller-owned cancellation signal. Checked before the first store call of
/// an operation, never after a commit.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), EconomyError> {
        if self.is_cancelled() {
            Err(EconomyError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Run `body` inside one transaction: commit on success, roll back on any error.
/// Business errors abort the transaction too and are handed back untouched.
pub fn with_tx<T>(
    store: &dyn Store,
    cancel: &CancelFlag,
    op: &str,
    body: impl FnOnce(&mut dyn StoreTx) -> Result<T, EconomyError>,
) -> Result<T, EconomyError> {
    cancel.check()?;
    let mut tx = store.begin().map_err(|e| {
        error!("{}: failed to begin transaction: {}", op, e);
        crate::metrics::inc_tx_failures();
        as_tx_failure(e)
    })?;
    match body(tx.as_mut()) {
        Ok(value) => {
            tx.commit().map_err(|e| {
                error!("{}: commit failed: {}", op, e);
                crate::metrics::inc_tx_failures();
                as_tx_failure(e)
            })?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback() {
                error!("{}: rollback failed after '{}': {}", op, e, rb);
            }
            if e.is_transaction_failure() {
                error!("{}: {}", op, e);
                crate::metrics::inc_tx_failures();
            }
            Err(e)
        }
    }
}

fn as_tx_failure(e: EconomyError) -> EconomyError {
    match e {
        EconomyError::TransactionFailure(_) => e,
        other => EconomyError::TransactionFailure(other.to_string()),
    }
}
