use std::collections::HashSet;
use std::thread;

use chatecon::economy::{CancelFlag, EconomyError, Platform, QualityTier};

mod common;

const GEM: u32 = 41;
const SCRAP: u32 = 40;

#[test]
fn explicit_registration_rejects_duplicates() {
    let (_dir, service) = common::service();
    let cancel = CancelFlag::new();
    let identity = service.identity();

    let user = identity
        .register_user(&cancel, Platform::Twitch, "100", "alice")
        .unwrap();
    let err = identity
        .register_user(&cancel, Platform::Twitch, "100", "alice2")
        .unwrap_err();
    assert!(matches!(err, EconomyError::InvalidInput(_)));

    let found = identity
        .find_by_username(Platform::Twitch, "ALICE")
        .unwrap()
        .expect("usernames are case-insensitive");
    assert_eq!(found.id, user.id);
}

#[test]
fn malformed_identities_are_rejected() {
    let (_dir, service) = common::service();
    let cancel = CancelFlag::new();
    let identity = service.identity();
    for (id, name) in [("", "alice"), ("1 2", "alice"), ("1", ""), ("1", "has space")] {
        let err = identity
            .get_or_register(&cancel, Platform::Twitch, id, name)
            .unwrap_err();
        assert!(matches!(err, EconomyError::InvalidInput(_)), "{id:?}/{name:?}");
    }
}

#[test]
fn link_and_unlink_follow_ownership_rules() {
    let (_dir, service) = common::service();
    let cancel = CancelFlag::new();
    let identity = service.identity();
    let alice = common::register(&service, Platform::Twitch, "1", "alice");
    common::register(&service, Platform::Discord, "d-2", "bob");

    let err = identity
        .link_platform(&cancel, alice.id, Platform::Discord, "d-2")
        .unwrap_err();
    assert!(matches!(err, EconomyError::InvalidInput(_)), "owned by bob");

    identity
        .link_platform(&cancel, alice.id, Platform::Discord, "d-1")
        .unwrap();
    // Relinking the same id is a no-op; a different id for the platform is a conflict.
    identity
        .link_platform(&cancel, alice.id, Platform::Discord, "d-1")
        .unwrap();
    let err = identity
        .link_platform(&cancel, alice.id, Platform::Discord, "d-9")
        .unwrap_err();
    assert!(matches!(
        err,
        EconomyError::PlatformConflict {
            platform: Platform::Discord
        }
    ));

    let linked = identity.linked_platforms(alice.id).unwrap();
    assert_eq!(linked.len(), 2);

    identity
        .unlink_platform(&cancel, alice.id, Platform::Twitch)
        .unwrap();
    assert!(identity
        .find_by_platform_id(Platform::Twitch, "1")
        .unwrap()
        .is_none());
    let err = identity
        .unlink_platform(&cancel, alice.id, Platform::Discord)
        .unwrap_err();
    assert!(matches!(err, EconomyError::InvalidInput(_)), "last platform");
    let err = identity
        .unlink_platform(&cancel, alice.id, Platform::Youtube)
        .unwrap_err();
    assert!(matches!(err, EconomyError::NotFound(_)));
}

#[test]
fn merge_moves_platforms_and_sums_inventories() {
    let (_dir, service) = common::service();
    let cancel = CancelFlag::new();
    let keep = common::register(&service, Platform::Twitch, "tw-1", "alice");
    let retire = common::register(&service, Platform::Discord, "d-1", "alice_d");
    let inventory = service.inventory();
    inventory.grant(&cancel, keep.id, GEM, 3, QualityTier::Rare).unwrap();
    inventory.grant(&cancel, retire.id, GEM, 4, QualityTier::Rare).unwrap();
    inventory.grant(&cancel, retire.id, GEM, 1, QualityTier::Poor).unwrap();
    inventory.grant(&cancel, retire.id, SCRAP, 7, QualityTier::Common).unwrap();

    let merged = service
        .identity()
        .merge_users(&cancel, keep.id, retire.id)
        .unwrap();
    assert_eq!(merged.id, keep.id);
    assert_eq!(merged.platform_id(Platform::Discord), Some("d-1"));

    let inv = service.store().get_inventory(keep.id).unwrap();
    assert_eq!(inv.quantity_of(GEM, QualityTier::Rare), 7);
    assert_eq!(inv.quantity_of(GEM, QualityTier::Poor), 1);
    assert_eq!(inv.quantity_of(SCRAP, QualityTier::Common), 7);

    assert!(service.store().get_user(retire.id).unwrap().is_none());
    assert!(service.store().get_inventory(retire.id).unwrap().is_empty());
    let via_discord = service
        .identity()
        .find_by_platform_id(Platform::Discord, "d-1")
        .unwrap()
        .expect("discord id now points at the survivor");
    assert_eq!(via_discord.id, keep.id);
}

#[test]
fn conflicting_merge_changes_nothing() {
    let (_dir, service) = common::service();
    let cancel = CancelFlag::new();
    let identity = service.identity();
    let keep = common::register(&service, Platform::Twitch, "tw-1", "alice");
    let retire = common::register(&service, Platform::Twitch, "tw-2", "alice_alt");
    service
        .inventory()
        .grant(&cancel, retire.id, GEM, 2, QualityTier::Common)
        .unwrap();

    let err = identity.merge_users(&cancel, keep.id, retire.id).unwrap_err();
    assert!(matches!(
        err,
        EconomyError::PlatformConflict {
            platform: Platform::Twitch
        }
    ));
    assert!(service.store().get_user(retire.id).unwrap().is_some());
    assert_eq!(service.store().get_inventory(retire.id).unwrap().total_of(GEM), 2);
    assert!(service.store().get_inventory(keep.id).unwrap().is_empty());

    let err = identity.merge_users(&cancel, keep.id, keep.id).unwrap_err();
    assert!(matches!(err, EconomyError::InvalidInput(_)));
}

#[test]
fn concurrent_first_messages_create_one_user() {
    let (_dir, service) = common::service();
    let ids: HashSet<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    service
                        .identity()
                        .get_or_register(&CancelFlag::new(), Platform::Youtube, "yt-1", "Zed")
                        .expect("register")
                        .id
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect()
    });
    assert_eq!(ids.len(), 1);
}

#[test]
fn shared_display_names_resolve_to_the_newest_holder() {
    let (_dir, service) = common::service();
    let cancel = CancelFlag::new();
    let identity = service.identity();
    let older = common::register(&service, Platform::Twitch, "tw-1", "sam");
    let newer = common::register(&service, Platform::Twitch, "tw-2", "Sam");
    let dora = common::register(&service, Platform::Discord, "d-1", "dora");
    service
        .grant(&cancel, dora.id, "material_gem", 2, QualityTier::Common)
        .unwrap();

    let found = identity.find_by_username(Platform::Twitch, "sam").unwrap();
    assert_eq!(found.map(|u| u.id), Some(newer.id));

    // Retiring the newer holder must not orphan the older one.
    identity.merge_users(&cancel, dora.id, newer.id).unwrap();
    let found = identity.find_by_username(Platform::Twitch, "sam").unwrap();
    assert_eq!(found.map(|u| u.id), Some(older.id));

    let given = service
        .give_item(&cancel, Platform::Discord, &dora, "sam", "material_gem", 1)
        .unwrap_err();
    assert!(matches!(given, EconomyError::NotFound(_)), "sam is not on discord");
    service
        .give_item(&cancel, Platform::Twitch, &dora, "sam", "material_gem", 1)
        .unwrap();
    assert_eq!(service.store().get_inventory(older.id).unwrap().total_of(GEM), 1);
}
