use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chatecon::economy::{
    CancelFlag, EconomyError, EconomyService, ItemUse, LootDrop, LootTable, LootboxOpener,
    Platform, QualityTier, SeedLootTable, ServiceOptions,
};

mod common;

const MONEY: u32 = 1;
const LOOTBOX_TIER1: u32 = 3;

struct OfflineTable;

impl LootTable for OfflineTable {
    fn open_lootbox(
        &self,
        lootbox: &str,
        _quantity: u32,
        _tier: QualityTier,
    ) -> anyhow::Result<Vec<LootDrop>> {
        anyhow::bail!("loot service unavailable for {}", lootbox)
    }
}

fn cycling(rolls: &'static [f64]) -> chatecon::economy::RollSource {
    let next = AtomicUsize::new(0);
    Arc::new(move || rolls[next.fetch_add(1, Ordering::SeqCst) % rolls.len()])
}

#[test]
fn opening_consumes_boxes_and_grants_drops() {
    let (_dir, service) = common::service();
    let cancel = CancelFlag::new();
    let alice = common::register(&service, Platform::Twitch, "1", "alice");
    service
        .grant(&cancel, alice.id, "lootbox_tier1", 3, QualityTier::Rare)
        .unwrap();

    let ItemUse::Lootbox(opening) = service
        .use_item(&cancel, Platform::Twitch, &alice, "lootbox_tier1", 2, None)
        .unwrap()
    else {
        panic!("expected a lootbox opening");
    };
    assert_eq!(opening.opened, 2);
    assert_eq!(opening.box_tier, QualityTier::Rare);
    assert!(!opening.drops.is_empty(), "every box pays out items or money");

    let inv = service.store().get_inventory(alice.id).unwrap();
    // Rare pools can drop another box of the same kind.
    let reboxed: u32 = opening
        .drops
        .iter()
        .filter(|d| d.item_id == LOOTBOX_TIER1 && d.tier == QualityTier::Rare)
        .map(|d| d.quantity)
        .sum();
    assert_eq!(inv.quantity_of(LOOTBOX_TIER1, QualityTier::Rare), 1 + reboxed);
    for drop in &opening.drops {
        assert!(inv.quantity_of(drop.item_id, drop.tier) >= drop.quantity);
    }
}

#[test]
fn scripted_misses_pay_out_currency() {
    let catalog = common::seed_catalog();
    let table = SeedLootTable::load(common::seeds_root().join("loot_tables.json"), catalog.as_ref())
        .unwrap()
        .with_roll_source(cycling(&[0.999]));
    let drops = table
        .open_lootbox("lootbox_tier0", 3, QualityTier::Common)
        .unwrap();
    assert_eq!(drops.len(), 1);
    assert_eq!(drops[0].item_id, MONEY);
    assert!(drops[0].quantity >= 3);
}

#[test]
fn wrong_kind_and_missing_boxes_are_rejected() {
    let (_dir, service) = common::service();
    let cancel = CancelFlag::new();
    let alice = common::register(&service, Platform::Twitch, "1", "alice");
    let catalog = common::seed_catalog();
    let opener = LootboxOpener::new(
        service.inventory().clone(),
        catalog.clone(),
        common::seed_loot(&catalog),
    );

    let err = opener.open(&cancel, alice.id, "shield", 1).unwrap_err();
    assert!(matches!(err, EconomyError::InvalidInput(_)));

    let err = opener.open(&cancel, alice.id, "lootbox_tier0", 1).unwrap_err();
    assert!(matches!(err, EconomyError::NotInInventory { .. }));

    service
        .grant(&cancel, alice.id, "lootbox_tier0", 1, QualityTier::Common)
        .unwrap();
    let err = opener.open(&cancel, alice.id, "lootbox_tier0", 2).unwrap_err();
    assert!(matches!(
        err,
        EconomyError::InsufficientQuantity {
            requested: 2,
            available: 1,
            ..
        }
    ));
    let err = opener.open(&cancel, alice.id, "lootbox_tier0", 0).unwrap_err();
    assert!(matches!(err, EconomyError::InvalidInput(_)));
}

#[test]
fn failing_loot_table_keeps_the_box() {
    let (_dir, store) = common::temp_store();
    let service = EconomyService::new(
        store,
        common::seed_catalog(),
        Arc::new(OfflineTable),
        ServiceOptions {
            sweep_interval: None,
            ..ServiceOptions::default()
        },
    )
    .unwrap();
    let cancel = CancelFlag::new();
    let alice = common::register(&service, Platform::Twitch, "1", "alice");
    service
        .grant(&cancel, alice.id, "lootbox_tier1", 1, QualityTier::Common)
        .unwrap();

    let err = service
        .use_item(&cancel, Platform::Twitch, &alice, "lootbox_tier1", 1, None)
        .unwrap_err();
    assert!(matches!(err, EconomyError::Collaborator(_)));
    let inv = service.store().get_inventory(alice.id).unwrap();
    assert_eq!(inv.total_of(LOOTBOX_TIER1), 1);
    assert_eq!(inv.slots.len(), 1);
}

#[test]
fn seed_files_with_overflowing_weights_fail_to_load() {
    let catalog = common::seed_catalog();
    let contents = r#"{
        "currency_item": "money",
        "pools": {
            "heavy": {
                "items": [
                    { "item": "material_scrap", "weight": 4294967295 },
                    { "item": "material_gem", "weight": 1 }
                ]
            }
        },
        "lootboxes": {}
    }"#;
    let err = SeedLootTable::from_json_str(contents, catalog.as_ref())
        .err()
        .expect("weights overflow");
    assert!(matches!(err, EconomyError::InvalidInput(_)));
}
