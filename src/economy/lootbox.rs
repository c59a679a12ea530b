//! Lootbox drop tables and opening.
//!
//! A box open runs three weighted stages: a gatekeeper roll (miss pays a
//! consolation amount of currency), a pool pick, then an item pick. Drop
//! quality is rolled against a threshold ladder shifted by the box's own tier.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use serde::Deserialize;
use serde_json::json;

use super::catalog::ItemCatalog;
use super::collaborators::{EventKind, StatsRecorder};
use super::errors::EconomyError;
use super::inventory::InventoryEngine;
use super::search::RollSource;
use super::store::{with_tx, CancelFlag};
use super::types::{ItemCategory, ItemId, QualityTier, Slot, UserId};
use crate::metrics;

pub const CRITICAL_UPGRADE_CHANCE: f64 = 0.01;
const TIER_SHIFT_PER_STEP: f64 = 0.03;

/// Rarest first; a roll at or below `threshold + shift` lands in that tier.
const QUALITY_LADDER: [(f64, QualityTier); 7] = [
    (0.01, QualityTier::Legendary),
    (0.05, QualityTier::Epic),
    (0.15, QualityTier::Rare),
    (0.30, QualityTier::Uncommon),
    (0.70, QualityTier::Common),
    (0.85, QualityTier::Poor),
    (0.95, QualityTier::Junk),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LootDrop {
    pub item_id: ItemId,
    pub name: String,
    pub quantity: u32,
    pub value: u64,
    pub tier: QualityTier,
}

pub trait LootTable: Send + Sync {
    fn open_lootbox(
        &self,
        lootbox: &str,
        quantity: u32,
        tier: QualityTier,
    ) -> anyhow::Result<Vec<LootDrop>>;
}

/// Quality for a drop from a box of `box_tier`; `upgrade_roll` below the
/// critical chance bumps it one tier.
pub fn drop_quality(roll: f64, box_tier: QualityTier, upgrade_roll: f64) -> QualityTier {
    let shift = TIER_SHIFT_PER_STEP * box_tier.distance_from_common() as f64;
    let tier = QUALITY_LADDER
        .iter()
        .find(|(threshold, _)| roll <= threshold + shift)
        .map(|(_, tier)| *tier)
        .unwrap_or(QualityTier::Cursed);
    if upgrade_roll < CRITICAL_UPGRADE_CHANCE {
        tier.next()
    } else {
        tier
    }
}

#[derive(Debug, Deserialize)]
struct LootFile {
    #[serde(default = "default_currency")]
    currency_item: String,
    pools: HashMap<String, PoolDef>,
    lootboxes: HashMap<String, LootboxDef>,
}

fn default_currency() -> String {
    "money".to_string()
}

#[derive(Debug, Deserialize)]
struct PoolDef {
    items: Vec<PoolEntryDef>,
}

#[derive(Debug, Deserialize)]
struct PoolEntryDef {
    item: String,
    weight: u32,
}

#[derive(Debug, Deserialize)]
struct LootboxDef {
    item_drop_rate: f64,
    #[serde(default)]
    money: MoneyRange,
    pools: Vec<PoolRefDef>,
}

#[derive(Debug, Default, Deserialize)]
struct MoneyRange {
    min: u32,
    max: u32,
}

#[derive(Debug, Deserialize)]
struct PoolRefDef {
    pool: String,
    weight: u32,
}

#[derive(Debug, Clone)]
struct Weighted<T> {
    entries: Vec<(u32, T)>,
    total: u32,
}

impl<T> Weighted<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            total: 0,
        }
    }

    fn push(&mut self, owner: &str, weight: u32, value: T) -> Result<(), EconomyError> {
        self.total = self.total.checked_add(weight).ok_or_else(|| {
            EconomyError::InvalidInput(format!("weights in '{}' overflow u32", owner))
        })?;
        self.entries.push((self.total, value));
        Ok(())
    }

    /// Entry for a uniform roll in [0, 1), by cumulative weight.
    fn pick(&self, roll: f64) -> Option<&T> {
        let target = (roll * self.total as f64) as u32;
        let index = self.entries.partition_point(|(cumulative, _)| *cumulative <= target);
        self.entries
            .get(index.min(self.entries.len().saturating_sub(1)))
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone)]
struct DropItem {
    id: ItemId,
    name: String,
    base_value: u32,
}

#[derive(Debug, Clone)]
struct FlatLootbox {
    item_drop_rate: f64,
    money_min: u32,
    money_max: u32,
    pools: Weighted<Arc<Weighted<DropItem>>>,
}

/// Loot tables resolved against the catalog once at load.
pub struct SeedLootTable {
    boxes: HashMap<String, FlatLootbox>,
    currency: DropItem,
    roll: RollSource,
}

impl SeedLootTable {
    pub fn from_json_str(contents: &str, catalog: &dyn ItemCatalog) -> Result<Self, EconomyError> {
        let file: LootFile = serde_json::from_str(contents)?;
        let resolve = |name: &str| -> Result<DropItem, EconomyError> {
            let item = catalog
                .get_item_by_name(name)
                .ok_or_else(|| EconomyError::NotFound(format!("loot item '{}'", name)))?;
            Ok(DropItem {
                id: item.id,
                name: item.public_name.clone(),
                base_value: item.base_value,
            })
        };
        let currency = resolve(&file.currency_item)?;

        let mut pools = HashMap::with_capacity(file.pools.len());
        for (name, def) in &file.pools {
            let mut pool = Weighted::new();
            for entry in &def.items {
                pool.push(name, entry.weight, resolve(&entry.item)?)?;
            }
            if pool.total == 0 {
                return Err(EconomyError::InvalidInput(format!(
                    "pool '{}' is empty",
                    name
                )));
            }
            pools.insert(name.clone(), Arc::new(pool));
        }

        let mut boxes = HashMap::with_capacity(file.lootboxes.len());
        for (name, def) in file.lootboxes {
            if catalog.get_item_by_name(&name).is_none() {
                warn!("lootbox '{}' has no catalog item", name);
            }
            let mut refs = Weighted::new();
            for r in &def.pools {
                let pool = pools.get(&r.pool).ok_or_else(|| {
                    EconomyError::InvalidInput(format!(
                        "lootbox '{}' references undefined pool '{}'",
                        name, r.pool
                    ))
                })?;
                refs.push(&name, r.weight, pool.clone())?;
            }
            if refs.total == 0 {
                return Err(EconomyError::InvalidInput(format!(
                    "lootbox '{}' has no pool references",
                    name
                )));
            }
            boxes.insert(
                name.to_ascii_lowercase(),
                FlatLootbox {
                    item_drop_rate: def.item_drop_rate,
                    money_min: def.money.min,
                    money_max: def.money.max.max(def.money.min),
                    pools: refs,
                },
            );
        }

        Ok(Self {
            boxes,
            currency,
            roll: Arc::new(|| rand::random::<f64>()),
        })
    }

    /// Load loot tables from data/seeds/loot_tables.json
    pub fn load<P: AsRef<Path>>(path: P, catalog: &dyn ItemCatalog) -> Result<Self, EconomyError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let table = Self::from_json_str(&contents, catalog)?;
        info!("loaded {} lootboxes from {}", table.boxes.len(), path.display());
        Ok(table)
    }

    pub fn with_roll_source(mut self, roll: RollSource) -> Self {
        self.roll = roll;
        self
    }

    pub fn lootbox_names(&self) -> Vec<&str> {
        self.boxes.keys().map(String::as_str).collect()
    }
}

impl LootTable for SeedLootTable {
    fn open_lootbox(
        &self,
        lootbox: &str,
        quantity: u32,
        tier: QualityTier,
    ) -> anyhow::Result<Vec<LootDrop>> {
        let flat = self
            .boxes
            .get(&lootbox.to_ascii_lowercase())
            .ok_or_else(|| anyhow::anyhow!("unknown lootbox '{}'", lootbox))?;
        let rnd = || (self.roll)();

        let mut counts: BTreeMap<(ItemId, QualityTier), (u32, &DropItem)> = BTreeMap::new();
        let mut money = 0u64;
        for _ in 0..quantity {
            if rnd() >= flat.item_drop_rate {
                let spread = (flat.money_max - flat.money_min) as f64;
                let base = rnd() * spread + flat.money_min as f64;
                let jitter = 1.0 + (rnd() - 0.5) * (1.0 - flat.item_drop_rate);
                money += ((base * jitter).round() as u64).max(1);
                continue;
            }
            let Some(pool) = flat.pools.pick(rnd()) else {
                continue;
            };
            let Some(item) = pool.pick(rnd()) else {
                continue;
            };
            let quality = drop_quality(rnd(), tier, rnd());
            counts
                .entry((item.id, quality))
                .and_modify(|(n, _)| *n += 1)
                .or_insert((1, item));
        }

        let mut drops: Vec<LootDrop> = counts
            .into_iter()
            .map(|((id, quality), (n, item))| LootDrop {
                item_id: id,
                name: item.name.clone(),
                quantity: n,
                value: (item.base_value as f64 * quality.multiplier()).round() as u64 * n as u64,
                tier: quality,
            })
            .collect();
        if money > 0 {
            drops.push(LootDrop {
                item_id: self.currency.id,
                name: self.currency.name.clone(),
                quantity: money.min(u32::MAX as u64) as u32,
                value: money,
                tier: QualityTier::Common,
            });
        }
        Ok(drops)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LootboxOpening {
    pub lootbox: ItemId,
    pub opened: u32,
    pub box_tier: QualityTier,
    pub drops: Vec<LootDrop>,
}

impl LootboxOpening {
    pub fn total_value(&self) -> u64 {
        self.drops.iter().map(|d| d.value).sum()
    }
}

/// Consumes boxes and grants their drops in one transaction.
pub struct LootboxOpener {
    inventory: InventoryEngine,
    catalog: Arc<dyn ItemCatalog>,
    table: Arc<dyn LootTable>,
    stats: Option<Arc<dyn StatsRecorder>>,
}

impl LootboxOpener {
    pub fn new(
        inventory: InventoryEngine,
        catalog: Arc<dyn ItemCatalog>,
        table: Arc<dyn LootTable>,
    ) -> Self {
        Self {
            inventory,
            catalog,
            table,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsRecorder>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn open(
        &self,
        cancel: &CancelFlag,
        user: UserId,
        lootbox: &str,
        quantity: u32,
    ) -> Result<LootboxOpening, EconomyError> {
        self.inventory.check_quantity(quantity)?;
        let item = self
            .catalog
            .get_item_by_name(lootbox)
            .ok_or_else(|| EconomyError::NotFound(format!("item '{}'", lootbox)))?;
        if item.category != ItemCategory::Lootbox {
            return Err(EconomyError::InvalidInput(format!(
                "{} is not a lootbox",
                item.public_name
            )));
        }
        let (box_id, box_name) = (item.id, item.internal_name.clone());

        let opening = with_tx(self.inventory.store().as_ref(), cancel, "open_lootbox", |tx| {
            let consumed = self.inventory.consume_in(tx, user, box_id, quantity)?;
            let drops = self
                .table
                .open_lootbox(&box_name, quantity, consumed.tier)
                .map_err(|e| EconomyError::Collaborator(e.to_string()))?;
            let grants: Vec<Slot> = drops
                .iter()
                .filter(|d| d.quantity > 0)
                .map(|d| Slot::new(d.item_id, d.quantity, d.tier))
                .collect();
            self.inventory.batch_grant_in(tx, user, &grants)?;
            Ok(LootboxOpening {
                lootbox: box_id,
                opened: quantity,
                box_tier: consumed.tier,
                drops,
            })
        })?;

        metrics::inc_lootboxes_opened(quantity as u64);
        if let Some(stats) = &self.stats {
            let metadata = json!({
                "lootbox": box_name,
                "quantity": quantity,
                "value": opening.total_value(),
            });
            if let Err(e) = stats.record_user_event(user, EventKind::LootboxOpened, metadata) {
                warn!("failed to record lootbox event for {}: {}", user, e);
            }
        }
        Ok(opening)
    }
}
