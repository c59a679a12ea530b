//! Optional services the engines consult but never depend on for correctness.
//!
//! Failures from these collaborators are logged and swallowed by callers; an
//! absent collaborator behaves like one that reports zero.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ActionKind, UserId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SearchSuccess,
    SearchCriticalSuccess,
    SearchNearMiss,
    SearchFail,
    SearchCriticalFail,
    ItemGiven,
    LootboxOpened,
    TrapPlaced,
    TrapTriggered,
    WeaponHit,
    ShieldBlocked,
}

impl EventKind {
    /// The gated action this event counts towards, if any.
    pub fn action(self) -> Option<ActionKind> {
        match self {
            EventKind::SearchSuccess
            | EventKind::SearchCriticalSuccess
            | EventKind::SearchNearMiss
            | EventKind::SearchFail
            | EventKind::SearchCriticalFail => Some(ActionKind::Search),
            EventKind::ItemGiven => Some(ActionKind::Give),
            EventKind::LootboxOpened => Some(ActionKind::OpenLootbox),
            EventKind::TrapPlaced => Some(ActionKind::PlaceTrap),
            EventKind::WeaponHit => Some(ActionKind::UseWeapon),
            EventKind::TrapTriggered | EventKind::ShieldBlocked => None,
        }
    }
}

pub trait StatsRecorder: Send + Sync {
    fn record_user_event(
        &self,
        user: UserId,
        kind: EventKind,
        metadata: serde_json::Value,
    ) -> anyhow::Result<()>;

    /// How many times `user` performed `action` since midnight UTC.
    fn daily_action_count(&self, user: UserId, action: ActionKind) -> anyhow::Result<u32>;

    /// Consecutive days, ending today or yesterday, with at least one search.
    fn current_streak(&self, user: UserId) -> anyhow::Result<u32>;
}

pub trait ProgressionService: Send + Sync {
    fn job_level(&self, user: UserId, job_key: &str) -> anyhow::Result<u32>;
}

#[derive(Debug, Clone, Copy)]
struct Recorded {
    day: NaiveDate,
    kind: EventKind,
}

/// Process-local stats recorder used by the CLI and tests.
#[derive(Debug, Default)]
pub struct MemoryStats {
    events: RwLock<HashMap<UserId, Vec<Recorded>>>,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event on an explicit day; used to seed history.
    pub fn record_on(&self, user: UserId, kind: EventKind, day: NaiveDate) {
        if let Ok(mut events) = self.events.write() {
            events.entry(user).or_default().push(Recorded { day, kind });
        }
    }

    pub fn events_for(&self, user: UserId) -> Vec<EventKind> {
        self.events
            .read()
            .map(|events| {
                events
                    .get(&user)
                    .map(|list| list.iter().map(|r| r.kind).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

impl StatsRecorder for MemoryStats {
    fn record_user_event(
        &self,
        user: UserId,
        kind: EventKind,
        _metadata: serde_json::Value,
    ) -> anyhow::Result<()> {
        let mut events = self
            .events
            .write()
            .map_err(|_| anyhow::anyhow!("stats lock poisoned"))?;
        events.entry(user).or_default().push(Recorded {
            day: Utc::now().date_naive(),
            kind,
        });
        Ok(())
    }

    fn daily_action_count(&self, user: UserId, action: ActionKind) -> anyhow::Result<u32> {
        let today = Utc::now().date_naive();
        let events = self
            .events
            .read()
            .map_err(|_| anyhow::anyhow!("stats lock poisoned"))?;
        let count = events
            .get(&user)
            .map(|list| {
                list.iter()
                    .filter(|r| r.day == today && r.kind.action() == Some(action))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u32)
    }

    fn current_streak(&self, user: UserId) -> anyhow::Result<u32> {
        let events = self
            .events
            .read()
            .map_err(|_| anyhow::anyhow!("stats lock poisoned"))?;
        let days: BTreeSet<NaiveDate> = events
            .get(&user)
            .map(|list| {
                list.iter()
                    .filter(|r| r.kind.action() == Some(ActionKind::Search))
                    .map(|r| r.day)
                    .collect()
            })
            .unwrap_or_default();

        let today = Utc::now().date_naive();
        let mut cursor = if days.contains(&today) {
            today
        } else {
            match today.checked_sub_days(Days::new(1)) {
                Some(yesterday) if days.contains(&yesterday) => yesterday,
                _ => return Ok(0),
            }
        };
        let mut streak = 0;
        while days.contains(&cursor) {
            streak += 1;
            match cursor.checked_sub_days(Days::new(1)) {
                Some(previous) => cursor = previous,
                None => break,
            }
        }
        Ok(streak)
    }
}

/// Progression collaborator with a fixed level per user, for tests and the CLI.
#[derive(Debug, Default)]
pub struct StaticProgression {
    levels: HashMap<UserId, u32>,
}

impl StaticProgression {
    pub fn with_level(mut self, user: UserId, level: u32) -> Self {
        self.levels.insert(user, level);
        self
    }
}

impl ProgressionService for StaticProgression {
    fn job_level(&self, user: UserId, _job_key: &str) -> anyhow::Result<u32> {
        Ok(self.levels.get(&user).copied().unwrap_or(0))
    }
}
