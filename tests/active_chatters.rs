use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chatecon::economy::{
    ActiveChatterTracker, CancelFlag, EconomyError, Platform, ServiceOptions, UserId,
};

mod common;

#[test]
fn messages_make_users_targetable_per_platform() {
    let (_dir, service) = common::service();
    let cancel = CancelFlag::new();
    for (id, name) in [("1", "alice"), ("2", "bob"), ("3", "carol")] {
        service
            .handle_message(&cancel, Platform::Twitch, id, name)
            .unwrap();
    }
    service
        .handle_message(&cancel, Platform::Discord, "9", "dora")
        .unwrap();
    // A second message from the same user refreshes, never duplicates.
    service
        .handle_message(&cancel, Platform::Twitch, "1", "alice")
        .unwrap();

    assert_eq!(service.active_chatters(Platform::Twitch).len(), 3);
    assert_eq!(service.active_chatters(Platform::Discord).len(), 1);
    assert!(service.active_chatters(Platform::Youtube).is_empty());

    let picked = service
        .chatters()
        .random_targets(Platform::Twitch, 5)
        .unwrap();
    assert_eq!(picked.len(), 3, "never padded beyond the live population");
    let names: HashSet<_> = picked.iter().map(|t| t.username.as_str()).collect();
    assert_eq!(names, HashSet::from(["alice", "bob", "carol"]));
}

#[test]
fn empty_platform_has_no_targets() {
    let tracker = ActiveChatterTracker::default();
    assert!(matches!(
        tracker.random_targets(Platform::Youtube, 3),
        Err(EconomyError::NoActiveTargets)
    ));
}

#[test]
fn removal_reports_whether_the_chatter_was_live() {
    let tracker = ActiveChatterTracker::new(Duration::from_millis(30));
    let (fresh, stale) = (UserId::new(), UserId::new());
    tracker.track(Platform::Twitch, stale, "stale");
    thread::sleep(Duration::from_millis(50));
    tracker.track(Platform::Twitch, fresh, "fresh");

    assert!(tracker.remove(Platform::Twitch, fresh));
    assert!(!tracker.remove(Platform::Twitch, fresh));
    assert!(!tracker.remove(Platform::Twitch, stale));
}

#[test]
fn tracking_from_many_threads_is_consistent() {
    let tracker = Arc::new(ActiveChatterTracker::default());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let tracker = tracker.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    tracker.track(Platform::Discord, UserId::new(), &format!("u{}-{}", t, i));
                    let _ = tracker.random_targets(Platform::Discord, 3);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }
    assert_eq!(tracker.active_count(Platform::Discord), 400);
}

#[test]
fn service_sweeper_runs_until_shutdown() {
    let (_dir, store) = common::temp_store();
    let catalog = common::seed_catalog();
    let loot = common::seed_loot(&catalog);
    let service = chatecon::economy::EconomyService::new(
        store,
        catalog,
        loot,
        ServiceOptions {
            chatter_expiry: Duration::from_millis(10),
            sweep_interval: Some(Duration::from_millis(10)),
            ..ServiceOptions::default()
        },
    )
    .unwrap();
    assert!(service.is_running());

    service
        .handle_message(&CancelFlag::new(), Platform::Twitch, "1", "alice")
        .unwrap();
    thread::sleep(Duration::from_millis(80));
    assert_eq!(service.chatters().sweep(), 0, "sweeper already purged it");

    service.shutdown();
    service.shutdown();
    assert!(!service.is_running());
}
