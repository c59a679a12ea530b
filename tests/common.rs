//! Test utilities & fixtures.
//! Stores live in throwaway temp dirs; catalog and loot tables come from the
//! checked-in seeds under `data/seeds`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chatecon::economy::{
    CancelFlag, EconomyService, Platform, SeedCatalog, SeedLootTable, ServiceOptions,
    SledStore, SledStoreBuilder, User,
};
use tempfile::TempDir;

pub fn seeds_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("data").join("seeds")
}

#[allow(dead_code)]
pub fn temp_store() -> (TempDir, Arc<SledStore>) {
    let dir = TempDir::new().expect("tempdir");
    let store = SledStoreBuilder::new(dir.path().join("economy"))
        .open()
        .expect("store");
    (dir, Arc::new(store))
}

#[allow(dead_code)]
pub fn seed_catalog() -> Arc<SeedCatalog> {
    Arc::new(SeedCatalog::load(seeds_root().join("items.json")).expect("items seed"))
}

#[allow(dead_code)]
pub fn seed_loot(catalog: &SeedCatalog) -> Arc<SeedLootTable> {
    Arc::new(
        SeedLootTable::load(seeds_root().join("loot_tables.json"), catalog).expect("loot seed"),
    )
}

/// Service without a background sweeper; tests drive expiry themselves.
#[allow(dead_code)]
pub fn service_with(options: ServiceOptions) -> (TempDir, EconomyService) {
    let (dir, store) = temp_store();
    let catalog = seed_catalog();
    let loot = seed_loot(&catalog);
    let service = EconomyService::new(
        store,
        catalog,
        loot,
        ServiceOptions {
            sweep_interval: None,
            ..options
        },
    )
    .expect("service");
    (dir, service)
}

#[allow(dead_code)]
pub fn service() -> (TempDir, EconomyService) {
    service_with(ServiceOptions::default())
}

#[allow(dead_code)]
pub fn register(service: &EconomyService, platform: Platform, id: &str, name: &str) -> User {
    service
        .identity()
        .get_or_register(&CancelFlag::new(), platform, id, name)
        .expect("register")
}
