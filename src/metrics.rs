//! Process-wide economy counters.
//! Relaxed atomics only; a `Snapshot` is a best-effort view, not a consistent cut.
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::economy::SearchOutcomeKind;

static GRANTS: AtomicU64 = AtomicU64::new(0);
static CONSUMES: AtomicU64 = AtomicU64::new(0);
static TRANSFERS: AtomicU64 = AtomicU64::new(0);
static BATCH_GRANTS: AtomicU64 = AtomicU64::new(0);
static COOLDOWN_REJECTIONS: AtomicU64 = AtomicU64::new(0);
static TX_FAILURES: AtomicU64 = AtomicU64::new(0);
static LOOTBOXES_OPENED: AtomicU64 = AtomicU64::new(0);
static TRAPS_PLACED: AtomicU64 = AtomicU64::new(0);
static TRAPS_TRIGGERED: AtomicU64 = AtomicU64::new(0);
static WEAPON_HITS: AtomicU64 = AtomicU64::new(0);
static SHIELD_BLOCKS: AtomicU64 = AtomicU64::new(0);

static SEARCH_CRITICAL_SUCCESS: AtomicU64 = AtomicU64::new(0);
static SEARCH_SUCCESS: AtomicU64 = AtomicU64::new(0);
static SEARCH_NEAR_MISS: AtomicU64 = AtomicU64::new(0);
static SEARCH_CRITICAL_FAIL: AtomicU64 = AtomicU64::new(0);
static SEARCH_FAIL: AtomicU64 = AtomicU64::new(0);

pub fn inc_grants() {
    GRANTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_consumes() {
    CONSUMES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_transfers() {
    TRANSFERS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_batch_grants() {
    BATCH_GRANTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_cooldown_rejections() {
    COOLDOWN_REJECTIONS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_tx_failures() {
    TX_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_lootboxes_opened(count: u64) {
    LOOTBOXES_OPENED.fetch_add(count, Ordering::Relaxed);
}
pub fn inc_traps_placed() {
    TRAPS_PLACED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_traps_triggered() {
    TRAPS_TRIGGERED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_weapon_hits() {
    WEAPON_HITS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_shield_blocks() {
    SHIELD_BLOCKS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_search(kind: SearchOutcomeKind) {
    let counter = match kind {
        SearchOutcomeKind::CriticalSuccess => &SEARCH_CRITICAL_SUCCESS,
        SearchOutcomeKind::Success => &SEARCH_SUCCESS,
        SearchOutcomeKind::NearMiss => &SEARCH_NEAR_MISS,
        SearchOutcomeKind::CriticalFail => &SEARCH_CRITICAL_FAIL,
        SearchOutcomeKind::NormalFail => &SEARCH_FAIL,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchCounts {
    pub critical_success: u64,
    pub success: u64,
    pub near_miss: u64,
    pub critical_fail: u64,
    pub fail: u64,
}

impl SearchCounts {
    pub fn total(&self) -> u64 {
        self.critical_success + self.success + self.near_miss + self.critical_fail + self.fail
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub grants: u64,
    pub consumes: u64,
    pub transfers: u64,
    pub batch_grants: u64,
    pub cooldown_rejections: u64,
    pub tx_failures: u64,
    pub lootboxes_opened: u64,
    pub traps_placed: u64,
    pub traps_triggered: u64,
    pub weapon_hits: u64,
    pub shield_blocks: u64,
    pub searches: SearchCounts,
}

pub fn snapshot() -> Snapshot {
    let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
    Snapshot {
        grants: load(&GRANTS),
        consumes: load(&CONSUMES),
        transfers: load(&TRANSFERS),
        batch_grants: load(&BATCH_GRANTS),
        cooldown_rejections: load(&COOLDOWN_REJECTIONS),
        tx_failures: load(&TX_FAILURES),
        lootboxes_opened: load(&LOOTBOXES_OPENED),
        traps_placed: load(&TRAPS_PLACED),
        traps_triggered: load(&TRAPS_TRIGGERED),
        weapon_hits: load(&WEAPON_HITS),
        shield_blocks: load(&SHIELD_BLOCKS),
        searches: SearchCounts {
            critical_success: load(&SEARCH_CRITICAL_SUCCESS),
            success: load(&SEARCH_SUCCESS),
            near_miss: load(&SEARCH_NEAR_MISS),
            critical_fail: load(&SEARCH_CRITICAL_FAIL),
            fail: load(&SEARCH_FAIL),
        },
    }
}
