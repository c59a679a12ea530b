//! Chat-game economy: inventories keyed by (item, quality tier), cooldown
//! gated rewards, traps and weapons, and cross-platform identities.
//!
//! All persistent state goes through the [`Store`] trait. Engines require a
//! store that serializes concurrent writers per row and refuse to start on
//! one that does not.

pub mod cache;
pub mod catalog;
pub mod chatter;
pub mod collaborators;
pub mod cooldown;
pub mod errors;
pub mod identity;
pub mod inventory;
pub mod locks;
pub mod lootbox;
pub mod search;
pub mod service;
pub mod storage;
pub mod store;
pub mod targeting;
pub mod timeouts;
pub mod types;

pub use cache::{CacheStats, ExpiringLru, UserCache, DEFAULT_CACHE_SIZE, DEFAULT_CACHE_TTL};
pub use catalog::{ItemCatalog, SeedCatalog};
pub use chatter::{ActiveChatterTracker, ChatterTarget, SweeperHandle, CHATTER_EXPIRY, SWEEP_INTERVAL};
pub use collaborators::{EventKind, MemoryStats, ProgressionService, StaticProgression, StatsRecorder};
pub use cooldown::{CooldownGate, CooldownSettings, DEFAULT_COOLDOWN, MAX_COOLDOWN, TRAP_COOLDOWN};
pub use errors::EconomyError;
pub use identity::{plan_merge, IdentityService, MergePlan};
pub use inventory::{Consumed, InventoryEngine, InventoryLimits};
pub use lootbox::{LootDrop, LootTable, LootboxOpener, LootboxOpening, SeedLootTable};
pub use search::{
    RollSource, SearchOutcome, SearchOutcomeKind, SearchParams, SearchRewardEngine,
    SearchSettings,
};
pub use service::{EconomyService, InventoryLine, ItemUse, MessageOutcome, ServiceOptions};
pub use storage::{SledStore, SledStoreBuilder, StoreStats};
pub use store::{with_tx, CancelFlag, Store, StoreCapabilities, StoreTx};
pub use targeting::{Hit, HitOutcome, StrikeReport, TrapAndTargetingEngine, TrapPlacement, TrapTrigger};
pub use timeouts::{TimeoutRegistry, SHIELD_TTL};
pub use types::*;
