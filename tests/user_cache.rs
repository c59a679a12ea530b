use chatecon::economy::{CancelFlag, Platform};

mod common;

#[test]
fn repeat_messages_are_served_from_the_cache() {
    let (_dir, service) = common::service();
    let cancel = CancelFlag::new();

    let first = service
        .handle_message(&cancel, Platform::Twitch, "42", "alice")
        .unwrap();
    let before = service.cache_stats();
    let second = service
        .handle_message(&cancel, Platform::Twitch, "42", "alice")
        .unwrap();
    let after = service.cache_stats();

    assert_eq!(first.user, second.user);
    assert_eq!(after.hits, before.hits + 1);
    assert_eq!(after.misses, before.misses);
    assert_eq!(after.size, 1);
}

#[test]
fn linking_invalidates_stale_profiles() {
    let (_dir, service) = common::service();
    let cancel = CancelFlag::new();
    let user = common::register(&service, Platform::Twitch, "42", "alice");
    assert!(service
        .identity()
        .cache()
        .get(Platform::Twitch, "42")
        .is_some());

    let linked = service
        .identity()
        .link_platform(&cancel, user.id, Platform::Discord, "d-42")
        .unwrap();
    assert!(service
        .identity()
        .cache()
        .get(Platform::Twitch, "42")
        .is_none());

    // Both identities now resolve to the updated profile.
    let via_twitch = service
        .identity()
        .find_by_platform_id(Platform::Twitch, "42")
        .unwrap()
        .expect("twitch identity");
    let via_discord = service
        .identity()
        .find_by_platform_id(Platform::Discord, "d-42")
        .unwrap()
        .expect("discord identity");
    assert_eq!(via_twitch, linked);
    assert_eq!(via_discord, linked);
    assert_eq!(linked.platform_ids.len(), 2);
}

#[test]
fn invalidating_absent_keys_is_a_no_op() {
    let (_dir, service) = common::service();
    common::register(&service, Platform::Discord, "7", "gus");
    let cache = service.identity().cache();
    cache.invalidate(Platform::Discord, "missing");
    cache.invalidate(Platform::Discord, "missing");
    assert_eq!(cache.stats().size, 1);

    cache.invalidate(Platform::Discord, "7");
    cache.invalidate(Platform::Discord, "7");
    assert_eq!(cache.stats().size, 0);
    cache.clear();
    assert_eq!(cache.stats().size, 0);
}

#[test]
fn capacity_bounds_the_cache() {
    let (_dir, service) = common::service_with(chatecon::economy::ServiceOptions {
        cache_size: 2,
        ..Default::default()
    });
    let cancel = CancelFlag::new();
    for (id, name) in [("1", "a1"), ("2", "b2"), ("3", "c3")] {
        service
            .handle_message(&cancel, Platform::Youtube, id, name)
            .unwrap();
    }
    let stats = service.cache_stats();
    assert_eq!(stats.size, 2);
    assert_eq!(stats.evictions, 1);
}
