//! Check-then-act gate around (user, action) pairs.
//!
//! An unlocked read rejects obvious repeats cheaply. Callers that pass it
//! re-read the stamp with a locking read inside a transaction, so two
//! concurrent callers for one key are serialized and only the first runs its
//! operation. The stamp is written only when the operation succeeds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;

use super::errors::EconomyError;
use super::store::{require_serialized_writers, with_tx, CancelFlag, Store, StoreTx};
use super::types::{ActionKind, UserId};
use crate::metrics;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);
pub const TRAP_COOLDOWN: Duration = Duration::from_secs(10 * 60);
/// Longest window a configuration may ask for.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CooldownSettings {
    /// Skip every cooldown check and never stamp; for local testing of chat flows.
    pub dev_mode: bool,
    pub default_window: Duration,
    pub windows: HashMap<ActionKind, Duration>,
}

impl Default for CooldownSettings {
    fn default() -> Self {
        let mut windows = HashMap::new();
        windows.insert(ActionKind::PlaceTrap, TRAP_COOLDOWN);
        Self {
            dev_mode: false,
            default_window: DEFAULT_COOLDOWN,
            windows,
        }
    }
}

#[derive(Clone)]
pub struct CooldownGate {
    store: Arc<dyn Store>,
    settings: CooldownSettings,
    clock: Clock,
}

impl CooldownGate {
    pub fn new(store: Arc<dyn Store>, settings: CooldownSettings) -> Result<Self, EconomyError> {
        require_serialized_writers(store.as_ref())?;
        Ok(Self {
            store,
            settings,
            clock: Arc::new(Utc::now),
        })
    }

    /// Replace the wall clock, mainly so tests can step over a window.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn window(&self, action: ActionKind) -> Duration {
        self.settings
            .windows
            .get(&action)
            .copied()
            .unwrap_or(self.settings.default_window)
    }

    pub fn dev_mode(&self) -> bool {
        self.settings.dev_mode
    }

    /// Run `operation` at most once per window for (user, action).
    ///
    /// The operation receives the gate's open transaction; its writes commit
    /// together with the new stamp. A failed operation rolls everything back
    /// and leaves the previous stamp in place.
    pub fn enforce<T>(
        &self,
        cancel: &CancelFlag,
        user: UserId,
        action: ActionKind,
        operation: impl FnOnce(&mut dyn StoreTx) -> Result<T, EconomyError>,
    ) -> Result<T, EconomyError> {
        if self.settings.dev_mode {
            return with_tx(self.store.as_ref(), cancel, action.as_str(), operation);
        }

        cancel.check()?;
        let window = self.window(action);
        let last = self.store.last_used(user, action)?;
        if let Some(remaining) = remaining_after(last, (self.clock)(), window) {
            return Err(self.rejected(user, action, remaining));
        }

        with_tx(self.store.as_ref(), cancel, action.as_str(), |tx| {
            let last = tx.last_used_for_update(user, action)?;
            let now = (self.clock)();
            if let Some(remaining) = remaining_after(last, now, window) {
                return Err(self.rejected(user, action, remaining));
            }
            let value = operation(tx)?;
            tx.set_last_used(user, action, now)?;
            Ok(value)
        })
    }

    /// Remaining cooldown for (user, action), if any. Unlocked.
    pub fn check(&self, user: UserId, action: ActionKind) -> Result<Option<Duration>, EconomyError> {
        if self.settings.dev_mode {
            return Ok(None);
        }
        let last = self.store.last_used(user, action)?;
        Ok(remaining_after(last, (self.clock)(), self.window(action)))
    }

    /// Forget the last use so the action is immediately available again.
    pub fn reset(
        &self,
        cancel: &CancelFlag,
        user: UserId,
        action: ActionKind,
    ) -> Result<(), EconomyError> {
        with_tx(self.store.as_ref(), cancel, "reset_cooldown", |tx| {
            tx.set_last_used(user, action, DateTime::<Utc>::from(std::time::UNIX_EPOCH))
        })
    }

    fn rejected(&self, user: UserId, action: ActionKind, remaining: Duration) -> EconomyError {
        metrics::inc_cooldown_rejections();
        debug!(
            "{} on cooldown for {} ({}s left)",
            action,
            user,
            remaining.as_secs()
        );
        EconomyError::OnCooldown { action, remaining }
    }
}

/// Time left in `window` since `last`, or `None` when the window has passed.
/// A window too large to represent never lapses.
pub fn remaining_after(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> Option<Duration> {
    let last = last?;
    let Some(ends_at) = chrono::Duration::from_std(window)
        .ok()
        .and_then(|span| last.checked_add_signed(span))
    else {
        return Some(window);
    };
    let left = ends_at - now;
    if left <= chrono::Duration::zero() {
        return None;
    }
    Some(left.to_std().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_is_measured_from_last_use() {
        let now = Utc::now();
        let window = Duration::from_secs(300);
        assert_eq!(remaining_after(None, now, window), None);
        let last = now - chrono::Duration::seconds(120);
        assert_eq!(
            remaining_after(Some(last), now, window),
            Some(Duration::from_secs(180))
        );
        let old = now - chrono::Duration::seconds(300);
        assert_eq!(remaining_after(Some(old), now, window), None);
    }

    #[test]
    fn unrepresentable_window_stays_closed() {
        let now = Utc::now();
        let last = now - chrono::Duration::days(3650);
        let huge = Duration::from_secs(u64::MAX);
        assert_eq!(remaining_after(Some(last), now, huge), Some(huge));
    }

    #[test]
    fn window_falls_back_to_default() {
        let settings = CooldownSettings::default();
        assert_eq!(settings.windows.get(&ActionKind::PlaceTrap), Some(&TRAP_COOLDOWN));
        assert_eq!(settings.windows.get(&ActionKind::Search), None);
        assert_eq!(settings.default_window, DEFAULT_COOLDOWN);
    }
}
