//! Facade wiring the engines together for chat adapters and the CLI.
//!
//! Inbound flow: resolve (or auto-register) the speaker, track them as an
//! active chatter, spring any trap waiting on them, then dispatch the action.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use serde_json::json;

use super::cache::{CacheStats, UserCache, DEFAULT_CACHE_SIZE, DEFAULT_CACHE_TTL};
use super::catalog::ItemCatalog;
use super::chatter::{ActiveChatterTracker, ChatterTarget, SweeperHandle, CHATTER_EXPIRY, SWEEP_INTERVAL};
use super::collaborators::{EventKind, ProgressionService, StatsRecorder};
use super::cooldown::{CooldownGate, CooldownSettings};
use super::errors::EconomyError;
use super::identity::IdentityService;
use super::inventory::{Consumed, InventoryEngine, InventoryLimits};
use super::lootbox::{LootTable, LootboxOpener, LootboxOpening};
use super::search::{RollSource, SearchOutcome, SearchRewardEngine, SearchSettings};
use super::store::{CancelFlag, Store};
use super::targeting::{StrikeReport, TrapAndTargetingEngine, TrapPlacement, TrapTrigger};
use super::timeouts::{TimeoutRegistry, SHIELD_TTL};
use super::types::{ItemCategory, Platform, QualityTier, User, UserId};
use crate::logutil::escape_log;

/// Construction knobs. Collaborators are optional; absent ones report zero.
#[derive(Clone)]
pub struct ServiceOptions {
    pub limits: InventoryLimits,
    pub cooldowns: CooldownSettings,
    pub search: SearchSettings,
    pub cache_size: usize,
    pub cache_ttl: Duration,
    pub chatter_expiry: Duration,
    /// `None` runs without a background sweeper; expired chatters are still ignored.
    pub sweep_interval: Option<Duration>,
    pub shield_ttl: Duration,
    pub stats: Option<Arc<dyn StatsRecorder>>,
    pub progression: Option<Arc<dyn ProgressionService>>,
    pub search_rolls: Option<RollSource>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            limits: InventoryLimits::default(),
            cooldowns: CooldownSettings::default(),
            search: SearchSettings::default(),
            cache_size: DEFAULT_CACHE_SIZE,
            cache_ttl: DEFAULT_CACHE_TTL,
            chatter_expiry: CHATTER_EXPIRY,
            sweep_interval: Some(SWEEP_INTERVAL),
            shield_ttl: SHIELD_TTL,
            stats: None,
            progression: None,
            search_rolls: None,
        }
    }
}

/// Result of an inbound chat message.
#[derive(Debug, Clone)]
pub struct MessageOutcome {
    pub user: User,
    pub trap: Option<TrapTrigger>,
}

/// What using an item did, by item family.
#[derive(Debug, Clone)]
pub enum ItemUse {
    Lootbox(LootboxOpening),
    Strike(StrikeReport),
    Trap(TrapPlacement),
    Shield { charges: u32 },
    Revive { remaining: Option<Duration> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryLine {
    pub item_id: u32,
    pub internal_name: String,
    pub public_name: String,
    pub tier: QualityTier,
    pub quantity: u32,
}

pub struct EconomyService {
    store: Arc<dyn Store>,
    catalog: Arc<dyn ItemCatalog>,
    cache: Arc<UserCache>,
    chatters: Arc<ActiveChatterTracker>,
    inventory: InventoryEngine,
    cooldowns: CooldownGate,
    identity: IdentityService,
    search: SearchRewardEngine,
    lootboxes: LootboxOpener,
    targeting: TrapAndTargetingEngine,
    stats: Option<Arc<dyn StatsRecorder>>,
    sweeper: Option<SweeperHandle>,
}

impl EconomyService {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<dyn ItemCatalog>,
        loot: Arc<dyn LootTable>,
        options: ServiceOptions,
    ) -> Result<Self, EconomyError> {
        let inventory = InventoryEngine::new(store.clone(), options.limits)?;
        let cooldowns = CooldownGate::new(store.clone(), options.cooldowns.clone())?;
        let cache = Arc::new(UserCache::new(options.cache_size, options.cache_ttl));
        let identity =
            IdentityService::new(store.clone(), cache.clone(), options.limits.max_stack_size)?;
        let chatters = Arc::new(ActiveChatterTracker::new(options.chatter_expiry));
        let timeouts = Arc::new(TimeoutRegistry::new(options.shield_ttl));

        let mut search = SearchRewardEngine::new(
            inventory.clone(),
            cooldowns.clone(),
            catalog.clone(),
            options.search.clone(),
        );
        let mut lootboxes = LootboxOpener::new(inventory.clone(), catalog.clone(), loot);
        let mut targeting = TrapAndTargetingEngine::new(
            inventory.clone(),
            cooldowns.clone(),
            catalog.clone(),
            chatters.clone(),
            timeouts.clone(),
        );
        if let Some(stats) = &options.stats {
            search = search.with_stats(stats.clone());
            lootboxes = lootboxes.with_stats(stats.clone());
            targeting = targeting.with_stats(stats.clone());
        }
        if let Some(progression) = &options.progression {
            search = search.with_progression(progression.clone());
        }
        if let Some(rolls) = &options.search_rolls {
            search = search.with_roll_source(rolls.clone());
        }

        let sweeper = options.sweep_interval.map(|interval| {
            chatters.start_sweeper_with(interval, move || timeouts.purge_expired())
        });

        Ok(Self {
            store,
            catalog,
            cache,
            chatters,
            inventory,
            cooldowns,
            identity,
            search,
            lootboxes,
            targeting,
            stats: options.stats,
            sweeper,
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<dyn ItemCatalog> {
        &self.catalog
    }

    pub fn inventory(&self) -> &InventoryEngine {
        &self.inventory
    }

    pub fn cooldowns(&self) -> &CooldownGate {
        &self.cooldowns
    }

    pub fn identity(&self) -> &IdentityService {
        &self.identity
    }

    pub fn targeting(&self) -> &TrapAndTargetingEngine {
        &self.targeting
    }

    pub fn chatters(&self) -> &Arc<ActiveChatterTracker> {
        &self.chatters
    }

    /// Every inbound chat message passes through here first.
    pub fn handle_message(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        platform_id: &str,
        username: &str,
    ) -> Result<MessageOutcome, EconomyError> {
        let user = self
            .identity
            .get_or_register(cancel, platform, platform_id, username)?;
        self.chatters.track(platform, user.id, &user.username);
        let trap = match self.targeting.trigger_trap_for(cancel, platform, &user) {
            Ok(trap) => trap,
            Err(EconomyError::Cancelled) => return Err(EconomyError::Cancelled),
            Err(e) => {
                warn!(
                    "trap check failed for {}: {}",
                    escape_log(&user.username),
                    e
                );
                None
            }
        };
        Ok(MessageOutcome { user, trap })
    }

    pub fn handle_search(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        platform_id: &str,
        username: &str,
    ) -> Result<SearchOutcome, EconomyError> {
        let user = self
            .identity
            .get_or_register(cancel, platform, platform_id, username)?;
        self.search.search(cancel, &user)
    }

    /// Admin grant by item name.
    pub fn grant(
        &self,
        cancel: &CancelFlag,
        user: UserId,
        item_name: &str,
        quantity: u32,
        tier: QualityTier,
    ) -> Result<u32, EconomyError> {
        let item_id = self.item_id(item_name)?;
        self.inventory.grant(cancel, user, item_id, quantity, tier)
    }

    /// Hand items from `owner` to a user known on the same platform by name.
    pub fn give_item(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        owner: &User,
        receiver_username: &str,
        item_name: &str,
        quantity: u32,
    ) -> Result<Consumed, EconomyError> {
        let item_id = self.item_id(item_name)?;
        let receiver = self
            .identity
            .find_by_username(platform, receiver_username.trim())?
            .ok_or_else(|| {
                EconomyError::NotFound(format!("user '{}' on {}", receiver_username, platform))
            })?;
        let moved = self
            .inventory
            .transfer(cancel, owner.id, receiver.id, item_id, quantity)?;
        info!(
            "{} gave {}x {} to {}",
            escape_log(&owner.username),
            moved.quantity,
            item_name,
            escape_log(&receiver.username)
        );
        if let Some(stats) = &self.stats {
            let metadata = json!({
                "item": item_name,
                "quantity": moved.quantity,
                "tier": moved.tier.as_str(),
                "receiver": receiver.id.to_string(),
            });
            if let Err(e) = stats.record_user_event(owner.id, EventKind::ItemGiven, metadata) {
                warn!("failed to record give event for {}: {}", owner.id, e);
            }
        }
        Ok(moved)
    }

    /// Use an item; behaviour follows the item's catalog category.
    pub fn use_item(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        user: &User,
        item_name: &str,
        quantity: u32,
        target: Option<&str>,
    ) -> Result<ItemUse, EconomyError> {
        let item = self
            .catalog
            .get_item_by_name(item_name)
            .ok_or_else(|| EconomyError::NotFound(format!("item '{}'", item_name)))?;
        let name = item.internal_name.as_str();
        let required_target = || {
            target
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    EconomyError::InvalidInput(format!("{} needs a target", item.public_name))
                })
        };
        let single = || {
            if quantity == 1 {
                Ok(())
            } else {
                Err(EconomyError::InvalidInput(format!(
                    "{} can only be used one at a time",
                    item.public_name
                )))
            }
        };

        match item.category {
            ItemCategory::Lootbox => self
                .lootboxes
                .open(cancel, user.id, name, quantity)
                .map(ItemUse::Lootbox),
            ItemCategory::Weapon { .. } => {
                single()?;
                let target = required_target()?;
                self.targeting
                    .strike(cancel, platform, user, name, target)
                    .map(ItemUse::Strike)
            }
            ItemCategory::RandomWeapon { .. } => {
                single()?;
                self.targeting
                    .strike_random(cancel, platform, user, name)
                    .map(ItemUse::Strike)
            }
            ItemCategory::Trap { .. } => {
                single()?;
                let target_name = required_target()?;
                let target = self
                    .identity
                    .find_by_username(platform, target_name)?
                    .ok_or_else(|| {
                        EconomyError::NotFound(format!("user '{}' on {}", target_name, platform))
                    })?;
                self.targeting
                    .place_trap(cancel, platform, user, &target, name)
                    .map(ItemUse::Trap)
            }
            ItemCategory::Shield => self
                .targeting
                .raise_shield(cancel, platform, user, name, quantity)
                .map(|charges| ItemUse::Shield { charges }),
            ItemCategory::Revive { .. } => {
                let target = required_target()?;
                self.targeting
                    .revive(cancel, platform, user, name, quantity, target)
                    .map(|remaining| ItemUse::Revive { remaining })
            }
            ItemCategory::Currency | ItemCategory::Material => Err(EconomyError::InvalidInput(
                format!("{} cannot be used", item.public_name),
            )),
        }
    }

    /// Display-ready inventory; unknown item ids are listed by number.
    pub fn inventory_view(&self, user: UserId) -> Result<Vec<InventoryLine>, EconomyError> {
        let slots = self.inventory.view(user)?;
        Ok(slots
            .into_iter()
            .map(|slot| {
                let (internal_name, public_name) = match self.catalog.get_item_by_id(slot.item_id) {
                    Some(item) => (item.internal_name.clone(), item.public_name.clone()),
                    None => (format!("item_{}", slot.item_id), format!("Item #{}", slot.item_id)),
                };
                InventoryLine {
                    item_id: slot.item_id,
                    internal_name,
                    public_name,
                    tier: slot.tier,
                    quantity: slot.quantity,
                }
            })
            .collect())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn active_chatters(&self, platform: Platform) -> Vec<ChatterTarget> {
        self.chatters.active_chatters(platform)
    }

    /// Stop background work. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(sweeper) = &self.sweeper {
            if sweeper.is_running() {
                sweeper.stop();
                info!("economy service stopped");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.as_ref().is_some_and(SweeperHandle::is_running)
    }

    fn item_id(&self, item_name: &str) -> Result<u32, EconomyError> {
        self.catalog
            .get_item_by_name(item_name)
            .map(|item| item.id)
            .ok_or_else(|| EconomyError::NotFound(format!("item '{}'", item_name)))
    }
}

impl Drop for EconomyService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
