//! # Configuration
//!
//! Runtime settings for the economy engine, read from a TOML file. Every
//! section is optional in the file and falls back to its `Default`.
//!
//! ```rust,no_run
//! use chatecon::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("data dir: {}", config.storage.data_dir);
//!     Ok(())
//! }
//! ```
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//! lock_wait_ms = 5000
//!
//! [cooldowns]
//! dev_mode = false
//! default_secs = 300
//! [cooldowns.overrides]
//! place_trap = 600
//!
//! [search]
//! success_rate = 0.8
//! reward_item = "lootbox_tier0"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::economy::{
    ActionKind, CooldownSettings, InventoryLimits, SearchSettings, DEFAULT_CACHE_SIZE,
    DEFAULT_CACHE_TTL, DEFAULT_COOLDOWN, MAX_COOLDOWN, MAX_STACK_SIZE, TRAP_COOLDOWN,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub cooldowns: CooldownConfig,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub chatter: ChatterConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    /// How long a transaction waits for a row held by another one before failing.
    pub lock_wait_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            lock_wait_ms: 5000,
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("economy")
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub max_stack_size: u32,
    pub max_transaction_quantity: u32,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            max_stack_size: MAX_STACK_SIZE,
            max_transaction_quantity: 10_000,
        }
    }
}

impl InventoryConfig {
    pub fn limits(&self) -> InventoryLimits {
        InventoryLimits {
            max_stack_size: self.max_stack_size,
            max_transaction_quantity: self.max_transaction_quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub dev_mode: bool,
    pub default_secs: u64,
    /// Per-action windows in seconds, keyed by action name (e.g. `place_trap`).
    pub overrides: BTreeMap<String, u64>,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            ActionKind::PlaceTrap.as_str().to_string(),
            TRAP_COOLDOWN.as_secs(),
        );
        Self {
            dev_mode: false,
            default_secs: DEFAULT_COOLDOWN.as_secs(),
            overrides,
        }
    }
}

impl CooldownConfig {
    pub fn settings(&self) -> Result<CooldownSettings> {
        let mut windows = std::collections::HashMap::new();
        for (name, secs) in &self.overrides {
            let action: ActionKind = name.parse().map_err(|e: String| anyhow!(e))?;
            let field = format!("cooldowns.overrides.{}", name);
            windows.insert(action, window_from_secs(&field, *secs)?);
        }
        Ok(CooldownSettings {
            dev_mode: self.dev_mode,
            default_window: window_from_secs("cooldowns.default_secs", self.default_secs)?,
            windows,
        })
    }
}

fn window_from_secs(field: &str, secs: u64) -> Result<Duration> {
    let window = Duration::from_secs(secs);
    if window > MAX_COOLDOWN {
        return Err(anyhow!(
            "{} = {} exceeds the maximum of {} seconds",
            field,
            secs,
            MAX_COOLDOWN.as_secs()
        ));
    }
    Ok(window)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub size: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CACHE_SIZE,
            ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatterConfig {
    pub expiry_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ChatterConfig {
    fn default() -> Self {
        Self {
            expiry_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub items_path: String,
    pub loot_tables_path: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            items_path: "data/seeds/items.json".to_string(),
            loot_tables_path: "data/seeds/loot_tables.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("chatecon.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.search;
        for (name, rate) in [
            ("success_rate", s.success_rate),
            ("critical_success_rate", s.critical_success_rate),
            ("near_miss_rate", s.near_miss_rate),
            ("critical_fail_rate", s.critical_fail_rate),
            ("diminished_success_rate", s.diminished_success_rate),
            ("diminished_xp_multiplier", s.diminished_xp_multiplier),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(anyhow!("search.{} must be within [0, 1], got {}", name, rate));
            }
        }
        if s.critical_success_rate > s.success_rate {
            return Err(anyhow!(
                "search.critical_success_rate cannot exceed search.success_rate"
            ));
        }
        if s.success_rate + s.near_miss_rate > 1.0 - s.critical_fail_rate {
            return Err(anyhow!(
                "search near-miss band overlaps the critical-fail band"
            ));
        }
        if s.reward_item.trim().is_empty() {
            return Err(anyhow!("search.reward_item cannot be empty"));
        }
        if self.inventory.max_stack_size == 0 {
            return Err(anyhow!("inventory.max_stack_size must be positive"));
        }
        if self.inventory.max_transaction_quantity == 0 {
            return Err(anyhow!("inventory.max_transaction_quantity must be positive"));
        }
        if self.cache.size == 0 {
            return Err(anyhow!("cache.size must be positive"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(anyhow!("cache.ttl_secs must be positive"));
        }
        if self.chatter.expiry_secs == 0 {
            return Err(anyhow!("chatter.expiry_secs must be positive"));
        }
        if self.chatter.sweep_interval_secs == 0 {
            return Err(anyhow!("chatter.sweep_interval_secs must be positive"));
        }
        if self.storage.lock_wait_ms == 0 {
            return Err(anyhow!("storage.lock_wait_ms must be positive"));
        }
        self.cooldowns.settings()?;
        Ok(())
    }
}
