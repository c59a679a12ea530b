use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub const USER_SCHEMA_VERSION: u8 = 1;
pub const INVENTORY_SCHEMA_VERSION: u8 = 1;
pub const TRAP_SCHEMA_VERSION: u8 = 1;

/// Hard cap applied to any single (item, tier) slot.
pub const MAX_STACK_SIZE: u32 = 999_999;

pub type ItemId = u32;

// ============================================================================
// Identity
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Twitch,
    Discord,
    Youtube,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Twitch, Platform::Discord, Platform::Youtube];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitch => "twitch",
            Platform::Discord => "discord",
            Platform::Youtube => "youtube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitch" => Ok(Platform::Twitch),
            "discord" => Ok(Platform::Discord),
            "youtube" => Ok(Platform::Youtube),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// A person known to the bot, possibly reachable on several platforms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Platform-specific foreign identifiers (at most one per platform).
    #[serde(default)]
    pub platform_ids: BTreeMap<Platform, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl User {
    pub fn new(username: &str, platform: Platform, platform_id: &str) -> Self {
        let now = Utc::now();
        let mut platform_ids = BTreeMap::new();
        platform_ids.insert(platform, platform_id.to_string());
        Self {
            id: UserId::new(),
            username: username.to_string(),
            platform_ids,
            created_at: now,
            updated_at: now,
            schema_version: USER_SCHEMA_VERSION,
        }
    }

    pub fn platform_id(&self, platform: Platform) -> Option<&str> {
        self.platform_ids.get(&platform).map(String::as_str)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Quality tiers
// ============================================================================

/// Ordered rarity classification; `Cursed` is lowest, `Legendary` highest.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Cursed,
    Junk,
    Poor,
    #[default]
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl QualityTier {
    pub const ALL: [QualityTier; 8] = [
        QualityTier::Cursed,
        QualityTier::Junk,
        QualityTier::Poor,
        QualityTier::Common,
        QualityTier::Uncommon,
        QualityTier::Rare,
        QualityTier::Epic,
        QualityTier::Legendary,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Tier at `index`, clamped to the valid range.
    pub fn from_index_clamped(index: i64) -> Self {
        let max = (Self::ALL.len() - 1) as i64;
        Self::ALL[index.clamp(0, max) as usize]
    }

    pub fn next(self) -> Self {
        Self::from_index_clamped(self.index() as i64 + 1)
    }

    /// Signed distance from `Common`, used to shift drop odds.
    pub fn distance_from_common(self) -> i64 {
        self.index() as i64 - QualityTier::Common.index() as i64
    }

    /// Value / effect multiplier associated with the tier.
    pub fn multiplier(self) -> f64 {
        match self {
            QualityTier::Cursed => 0.5,
            QualityTier::Junk => 0.7,
            QualityTier::Poor => 0.85,
            QualityTier::Common => 1.0,
            QualityTier::Uncommon => 1.2,
            QualityTier::Rare => 1.5,
            QualityTier::Epic => 2.0,
            QualityTier::Legendary => 3.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Cursed => "cursed",
            QualityTier::Junk => "junk",
            QualityTier::Poor => "poor",
            QualityTier::Common => "common",
            QualityTier::Uncommon => "uncommon",
            QualityTier::Rare => "rare",
            QualityTier::Epic => "epic",
            QualityTier::Legendary => "legendary",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        QualityTier::ALL
            .iter()
            .copied()
            .find(|tier| tier.as_str() == wanted)
            .ok_or_else(|| format!("unknown quality tier: {}", s))
    }
}

// ============================================================================
// Inventory
// ============================================================================

/// A (item, tier) keyed quantity bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slot {
    pub item_id: ItemId,
    pub quantity: u32,
    pub tier: QualityTier,
}

impl Slot {
    pub fn new(item_id: ItemId, quantity: u32, tier: QualityTier) -> Self {
        Self {
            item_id,
            quantity,
            tier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inventory {
    pub slots: Vec<Slot>,
    pub schema_version: u8,
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            schema_version: INVENTORY_SCHEMA_VERSION,
        }
    }
}

impl Inventory {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total quantity of `item_id` across every tier.
    pub fn total_of(&self, item_id: ItemId) -> u64 {
        self.slots
            .iter()
            .filter(|s| s.item_id == item_id)
            .map(|s| s.quantity as u64)
            .sum()
    }

    /// Quantity held in the exact (item, tier) slot.
    pub fn quantity_of(&self, item_id: ItemId, tier: QualityTier) -> u32 {
        self.slots
            .iter()
            .find(|s| s.item_id == item_id && s.tier == tier)
            .map(|s| s.quantity)
            .unwrap_or(0)
    }
}

// ============================================================================
// Items
// ============================================================================

/// Behaviour family of an item, resolved once when the catalog is loaded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemCategory {
    Currency,
    Lootbox,
    Weapon {
        timeout_secs: u64,
    },
    RandomWeapon {
        min_targets: usize,
        max_targets: usize,
        timeout_secs: u64,
    },
    Trap {
        timeout_secs: u64,
    },
    Shield,
    Revive {
        recovery_secs: u64,
    },
    Material,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub internal_name: String,
    pub public_name: String,
    pub category: ItemCategory,
    #[serde(default)]
    pub base_value: u32,
}

// ============================================================================
// Cooldowns
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Search,
    Give,
    UseWeapon,
    PlaceTrap,
    OpenLootbox,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Search,
        ActionKind::Give,
        ActionKind::UseWeapon,
        ActionKind::PlaceTrap,
        ActionKind::OpenLootbox,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Search => "search",
            ActionKind::Give => "give",
            ActionKind::UseWeapon => "use_weapon",
            ActionKind::PlaceTrap => "place_trap",
            ActionKind::OpenLootbox => "open_lootbox",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ActionKind::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == wanted)
            .ok_or_else(|| format!("unknown action: {}", s))
    }
}

// ============================================================================
// Traps
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trap {
    pub id: Uuid,
    pub setter: UserId,
    pub target: UserId,
    pub tier: QualityTier,
    pub base_timeout_secs: u64,
    pub placed_at: DateTime<Utc>,
    #[serde(default)]
    pub triggered_at: Option<DateTime<Utc>>,
    pub schema_version: u8,
}

impl Trap {
    pub fn new(setter: UserId, target: UserId, tier: QualityTier, base_timeout_secs: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            setter,
            target,
            tier,
            base_timeout_secs,
            placed_at: Utc::now(),
            triggered_at: None,
            schema_version: TRAP_SCHEMA_VERSION,
        }
    }

    pub fn is_active(&self) -> bool {
        self.triggered_at.is_none()
    }

    /// Timeout dealt to whoever steps on the trap, scaled by its tier.
    pub fn timeout(&self) -> Duration {
        let secs = (self.base_timeout_secs as f64 * self.tier.multiplier()).round();
        Duration::from_secs(secs.max(1.0) as u64)
    }
}
