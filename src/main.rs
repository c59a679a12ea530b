//! Binary entrypoint for the chatecon operator CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and create the data directory
//! - `status` - print store, catalog and cache summaries
//! - `grant` - add items to a user's inventory
//! - `inventory` - list a user's slots
//! - `search` - run one search for a user
//! - `give` - move items between two users on the same platform
//! - `merge` - fold one user into another
//!
//! See the library crate docs for module‑level details: `chatecon::`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;

use chatecon::config::Config;
use chatecon::economy::{
    CancelFlag, EconomyService, Platform, QualityTier, SeedCatalog, SeedLootTable,
    ServiceOptions, SledStore, SledStoreBuilder, User,
};

#[derive(Parser)]
#[command(name = "chatecon")]
#[command(about = "Economy engine for multi-platform chat games")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the data directory
    Init,
    /// Show store, catalog and cache statistics
    Status,
    /// Grant items to a user
    Grant {
        #[arg(short, long, default_value = "twitch")]
        platform: Platform,
        /// Platform user id
        #[arg(long)]
        id: String,
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        item: String,
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
        #[arg(short, long, default_value = "common")]
        tier: QualityTier,
    },
    /// List a user's inventory
    Inventory {
        #[arg(short, long, default_value = "twitch")]
        platform: Platform,
        #[arg(long)]
        id: String,
    },
    /// Run a search for a user
    Search {
        #[arg(short, long, default_value = "twitch")]
        platform: Platform,
        #[arg(long)]
        id: String,
        #[arg(short, long)]
        username: String,
    },
    /// Give items to another user
    Give {
        #[arg(short, long, default_value = "twitch")]
        platform: Platform,
        /// Giver's platform user id
        #[arg(long)]
        id: String,
        #[arg(short, long)]
        username: String,
        /// Receiver's username
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        item: String,
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Merge the second user into the first
    Merge {
        #[arg(short, long, default_value = "twitch")]
        platform: Platform,
        /// Surviving user's platform id
        #[arg(long)]
        keep: String,
        /// Retired user's platform id
        #[arg(long)]
        retire: String,
        /// Platform of the retired user's id (defaults to --platform)
        #[arg(long)]
        retire_platform: Option<Platform>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            let config = Config::load(&cli.config).await?;
            tokio::fs::create_dir_all(&config.storage.data_dir).await?;
            let store = open_store(&config)?;
            let stats = store.stats()?;
            println!("Wrote {}", cli.config);
            println!(
                "Initialized store at {} ({} users)",
                config.storage.db_path().display(),
                stats.users
            );
            println!("Seed data is read from {} and {}", config.catalog.items_path, config.catalog.loot_tables_path);
        }
        Commands::Status => {
            let config = require_config(pre_config, &cli.config)?;
            let store = Arc::new(open_store(&config)?);
            let stats = store.stats()?;
            let catalog = SeedCatalog::load(&config.catalog.items_path)?;
            let loot = SeedLootTable::load(&config.catalog.loot_tables_path, &catalog)?;
            println!("chatecon v{}", env!("CARGO_PKG_VERSION"));
            println!("Data dir: {}", config.storage.data_dir);
            println!(
                "Users: {}  Inventories: {}  Cooldowns: {}  Traps: {}",
                stats.users, stats.inventories, stats.cooldowns, stats.traps
            );
            println!(
                "Catalog: {} items, {} lootboxes",
                catalog.len(),
                loot.lootbox_names().len()
            );
            println!(
                "Cooldowns: {} (default {}s)",
                if config.cooldowns.dev_mode { "dev mode" } else { "enforced" },
                config.cooldowns.default_secs
            );
            let metrics = chatecon::metrics::snapshot();
            println!("Metrics: {}", serde_json::to_string(&metrics)?);
        }
        Commands::Grant {
            platform,
            id,
            username,
            item,
            quantity,
            tier,
        } => {
            let config = require_config(pre_config, &cli.config)?;
            let service = open_service(&config)?;
            let cancel = CancelFlag::new();
            let user = resolve(&service, &cancel, platform, &id, &username)?;
            let held = service.grant(&cancel, user.id, &item, quantity, tier)?;
            println!(
                "Granted {}x {} ({}) to {}; now holds {}",
                quantity, item, tier, user.username, held
            );
            service.shutdown();
        }
        Commands::Inventory { platform, id } => {
            let config = require_config(pre_config, &cli.config)?;
            let service = open_service(&config)?;
            let user = service
                .identity()
                .find_by_platform_id(platform, &id)?
                .ok_or_else(|| anyhow!("no user with {} id {}", platform, id))?;
            let lines = service.inventory_view(user.id)?;
            println!("Inventory of {} ({})", user.username, user.id);
            if lines.is_empty() {
                println!("  (empty)");
            }
            for line in lines {
                println!("  {:>7}x {} [{}]", line.quantity, line.public_name, line.tier);
            }
            service.shutdown();
        }
        Commands::Search {
            platform,
            id,
            username,
        } => {
            let config = require_config(pre_config, &cli.config)?;
            let service = open_service(&config)?;
            let outcome = service.handle_search(&CancelFlag::new(), platform, &id, &username)?;
            println!("{}", outcome.summary());
            service.shutdown();
        }
        Commands::Give {
            platform,
            id,
            username,
            to,
            item,
            quantity,
        } => {
            let config = require_config(pre_config, &cli.config)?;
            let service = open_service(&config)?;
            let cancel = CancelFlag::new();
            let owner = resolve(&service, &cancel, platform, &id, &username)?;
            let moved = service.give_item(&cancel, platform, &owner, &to, &item, quantity)?;
            println!(
                "{} gave {}x {} ({}) to {}",
                owner.username, moved.quantity, item, moved.tier, to
            );
            service.shutdown();
        }
        Commands::Merge {
            platform,
            keep,
            retire,
            retire_platform,
        } => {
            let config = require_config(pre_config, &cli.config)?;
            let service = open_service(&config)?;
            let identity = service.identity();
            let survivor = identity
                .find_by_platform_id(platform, &keep)?
                .ok_or_else(|| anyhow!("no user with {} id {}", platform, keep))?;
            let retire_platform = retire_platform.unwrap_or(platform);
            let loser = identity
                .find_by_platform_id(retire_platform, &retire)?
                .ok_or_else(|| anyhow!("no user with {} id {}", retire_platform, retire))?;
            let merged = identity.merge_users(&CancelFlag::new(), survivor.id, loser.id)?;
            println!(
                "Merged {} into {}; linked platforms: {}",
                loser.username,
                merged.username,
                merged
                    .platform_ids
                    .keys()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            service.shutdown();
        }
    }

    Ok(())
}

fn require_config(pre_config: Option<Config>, path: &str) -> Result<Config> {
    let config = pre_config.ok_or_else(|| {
        anyhow!(
            "could not load {}; run `chatecon init` first or pass --config",
            path
        )
    })?;
    config.validate()?;
    Ok(config)
}

fn open_store(config: &Config) -> Result<SledStore> {
    let store = SledStoreBuilder::new(config.storage.db_path())
        .lock_wait(config.storage.lock_wait())
        .open()?;
    Ok(store)
}

fn open_service(config: &Config) -> Result<EconomyService> {
    let store = Arc::new(open_store(config)?);
    let catalog = Arc::new(SeedCatalog::load(&config.catalog.items_path)?);
    let loot = Arc::new(SeedLootTable::load(
        &config.catalog.loot_tables_path,
        catalog.as_ref(),
    )?);
    let options = ServiceOptions {
        limits: config.inventory.limits(),
        cooldowns: config.cooldowns.settings()?,
        search: config.search.clone(),
        cache_size: config.cache.size,
        cache_ttl: Duration::from_secs(config.cache.ttl_secs),
        chatter_expiry: Duration::from_secs(config.chatter.expiry_secs),
        // One-shot commands have no use for a background sweep.
        sweep_interval: None,
        ..ServiceOptions::default()
    };
    let service = EconomyService::new(store, catalog, loot, options)?;
    info!("economy service ready ({})", config.storage.db_path().display());
    Ok(service)
}

fn resolve(
    service: &EconomyService,
    cancel: &CancelFlag,
    platform: Platform,
    id: &str,
    username: &str,
) -> Result<User> {
    Ok(service
        .identity()
        .get_or_register(cancel, platform, id, username)?)
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|cfg| cfg.logging.file.clone()).and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Mirror to the console only when someone is watching it.
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
