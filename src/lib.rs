//! # Chatecon - economy engine for multi-platform chat games
//!
//! Chatecon keeps the persistent economy behind a chat-game bot: viewers on
//! Twitch, Discord and YouTube collect items by searching, open lootboxes,
//! give things away, and spend weapons, traps and shields on each other.
//!
//! ## Features
//!
//! - **Slot inventories**: items stack per (item, quality tier); every mutation is one store transaction.
//! - **Cooldown gate**: check-then-act per (user, action), exactly one winner per window.
//! - **Search rewards**: probabilistic rewards with daily diminishing returns and streak bonuses.
//! - **Targeting**: traps, single and multi-target weapons, shields and revives over a time-windowed chatter registry.
//! - **Identity**: auto-registration, platform linking and two-phase account merges.
//! - **Sled storage**: per-row locks and atomic batched commits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatecon::economy::{
//!     CancelFlag, EconomyService, Platform, SeedCatalog, SeedLootTable, ServiceOptions,
//!     SledStoreBuilder,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SledStoreBuilder::new("./data/economy").open()?);
//!     let catalog = Arc::new(SeedCatalog::load("data/seeds/items.json")?);
//!     let loot = Arc::new(SeedLootTable::load("data/seeds/loot_tables.json", catalog.as_ref())?);
//!     let service = EconomyService::new(store, catalog, loot, ServiceOptions::default())?;
//!
//!     let cancel = CancelFlag::new();
//!     let outcome = service.handle_search(&cancel, Platform::Twitch, "1234", "alice")?;
//!     println!("{}", outcome.summary());
//!     service.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`economy`] - engines, store contract, sled store and the service facade
//! - [`config`] - TOML configuration and validation
//! - [`validation`] - username and platform id checks
//! - [`metrics`] - process-wide counters
//! - [`logutil`] - single-line log escaping

pub mod config;
pub mod economy;
pub mod logutil;
pub mod metrics;
pub mod validation;
