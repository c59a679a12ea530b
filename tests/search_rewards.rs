use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use chatecon::economy::{
    ActionKind, CancelFlag, CooldownSettings, EconomyError, EconomyService, EventKind, MemoryStats, Platform,
    QualityTier, RollSource, SearchOutcomeKind, ServiceOptions, StaticProgression, StatsRecorder,
    UserId,
};
use chrono::Utc;

mod common;

const LOOTBOX_TIER0: u32 = 2;

fn scripted(rolls: &[f64]) -> RollSource {
    let rolls = rolls.to_vec();
    let next = AtomicUsize::new(0);
    Arc::new(move || {
        let i = next.fetch_add(1, Ordering::SeqCst);
        rolls[i % rolls.len()]
    })
}

fn dev_cooldowns() -> CooldownSettings {
    CooldownSettings {
        dev_mode: true,
        ..CooldownSettings::default()
    }
}

struct BrokenStats;

impl StatsRecorder for BrokenStats {
    fn record_user_event(
        &self,
        _user: UserId,
        _kind: EventKind,
        _metadata: serde_json::Value,
    ) -> anyhow::Result<()> {
        anyhow::bail!("stats backend offline")
    }

    fn daily_action_count(&self, _user: UserId, _action: ActionKind) -> anyhow::Result<u32> {
        anyhow::bail!("stats backend offline")
    }

    fn current_streak(&self, _user: UserId) -> anyhow::Result<u32> {
        anyhow::bail!("stats backend offline")
    }
}

#[test]
fn first_search_of_the_day_grants_an_uncommon_box() {
    let (_dir, service) = common::service_with(ServiceOptions {
        search_rolls: Some(scripted(&[0.5])),
        ..ServiceOptions::default()
    });
    let cancel = CancelFlag::new();

    let outcome = service
        .handle_search(&cancel, Platform::Twitch, "tw-1", "alice")
        .unwrap();
    assert_eq!(outcome.kind, SearchOutcomeKind::Success);
    assert_eq!(outcome.quantity, 1);
    assert_eq!(outcome.tier, Some(QualityTier::Uncommon));
    assert!(outcome.params.first_of_day);
    assert!(outcome.summary().starts_with("You have found 1x Junkbox"));

    let user = common::register(&service, Platform::Twitch, "tw-1", "alice");
    let inv = service.store().get_inventory(user.id).unwrap();
    assert_eq!(inv.quantity_of(LOOTBOX_TIER0, QualityTier::Uncommon), 1);
}

#[test]
fn critical_success_doubles_the_reward_and_raises_the_tier() {
    let (_dir, service) = common::service_with(ServiceOptions {
        search_rolls: Some(scripted(&[0.01])),
        ..ServiceOptions::default()
    });
    let outcome = service
        .handle_search(&CancelFlag::new(), Platform::Discord, "d-1", "Bob Builder")
        .unwrap();
    assert_eq!(outcome.kind, SearchOutcomeKind::CriticalSuccess);
    assert_eq!(outcome.quantity, 2);
    assert_eq!(outcome.tier, Some(QualityTier::Epic));
    assert!(outcome.summary().starts_with("CRITICAL SUCCESS!"));
}

#[test]
fn misses_grant_nothing_but_still_start_the_cooldown() {
    let (_dir, service) = common::service_with(ServiceOptions {
        search_rolls: Some(scripted(&[0.83, 0.9])),
        ..ServiceOptions::default()
    });
    let cancel = CancelFlag::new();
    let outcome = service
        .handle_search(&cancel, Platform::Twitch, "tw-2", "carol")
        .unwrap();
    assert_eq!(outcome.kind, SearchOutcomeKind::NearMiss);
    assert_eq!(outcome.item_id, None);

    let err = service
        .handle_search(&cancel, Platform::Twitch, "tw-2", "carol")
        .unwrap_err();
    assert!(matches!(
        err,
        EconomyError::OnCooldown {
            action: ActionKind::Search,
            ..
        }
    ));
    let user = common::register(&service, Platform::Twitch, "tw-2", "carol");
    assert!(service.store().get_inventory(user.id).unwrap().is_empty());
}

#[test]
fn heavy_searchers_get_diminished_odds_and_junk() {
    let stats = Arc::new(MemoryStats::new());
    let (_dir, service) = common::service_with(ServiceOptions {
        cooldowns: dev_cooldowns(),
        stats: Some(stats.clone()),
        search_rolls: Some(scripted(&[0.08, 0.5])),
        ..ServiceOptions::default()
    });
    let cancel = CancelFlag::new();
    let user = common::register(&service, Platform::Twitch, "tw-3", "dave");
    let today = Utc::now().date_naive();
    for _ in 0..6 {
        stats.record_on(user.id, EventKind::SearchFail, today);
    }

    let lucky = service
        .handle_search(&cancel, Platform::Twitch, "tw-3", "dave")
        .unwrap();
    assert!(lucky.params.diminished);
    assert_eq!(lucky.kind, SearchOutcomeKind::Success);
    assert_eq!(lucky.tier, Some(QualityTier::Junk));
    assert_eq!(lucky.xp, 1);

    let unlucky = service
        .handle_search(&cancel, Platform::Twitch, "tw-3", "dave")
        .unwrap();
    assert_eq!(unlucky.kind, SearchOutcomeKind::NormalFail);
    assert!(unlucky.summary().ends_with("(Exhausted)"));

    // Both searches were recorded on top of the seeded history.
    assert_eq!(stats.daily_action_count(user.id, ActionKind::Search).unwrap(), 8);
}

#[test]
fn job_level_and_streak_raise_the_tier() {
    let stats = Arc::new(MemoryStats::new());
    // Register first so the progression collaborator can be keyed by id.
    let (_dir, setup) = common::service();
    let user = common::register(&setup, Platform::Twitch, "tw-4", "erin");
    let today = Utc::now().date_naive();
    for back in 1..=5u64 {
        let day = today
            .checked_sub_days(chrono::Days::new(back))
            .expect("date in range");
        stats.record_on(user.id, EventKind::SearchSuccess, day);
    }
    let progression = Arc::new(StaticProgression::default().with_level(user.id, 5));

    // Rebuild over the same store so the collaborators see this user.
    let catalog = common::seed_catalog();
    let service = EconomyService::new(
        setup.store().clone(),
        catalog.clone(),
        common::seed_loot(&catalog),
        ServiceOptions {
            stats: Some(stats.clone()),
            progression: Some(progression),
            search_rolls: Some(scripted(&[0.5])),
            sweep_interval: None,
            ..ServiceOptions::default()
        },
    )
    .unwrap();

    let outcome = service
        .handle_search(&CancelFlag::new(), Platform::Twitch, "tw-4", "erin")
        .unwrap();
    // Uncommon base, +1 for a five-day streak, +1 for job level 5.
    assert_eq!(outcome.params.streak, 5);
    assert_eq!(outcome.tier, Some(QualityTier::Epic));
    assert!(outcome.summary().contains("5 day streak!"));
}

#[test]
fn failing_stats_backend_does_not_fail_the_search() {
    let (_dir, service) = common::service_with(ServiceOptions {
        stats: Some(Arc::new(BrokenStats)),
        search_rolls: Some(scripted(&[0.5])),
        ..ServiceOptions::default()
    });
    let outcome = service
        .handle_search(&CancelFlag::new(), Platform::Youtube, "yt-1", "Frank")
        .unwrap();
    assert_eq!(outcome.kind, SearchOutcomeKind::Success);
    assert_eq!(outcome.params.daily_count, 0);
}

#[test]
fn concurrent_searches_reward_once() {
    let (_dir, service) = common::service_with(ServiceOptions {
        search_rolls: Some(scripted(&[0.5])),
        ..ServiceOptions::default()
    });
    let user = common::register(&service, Platform::Twitch, "tw-5", "grace");

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    service.handle_search(&CancelFlag::new(), Platform::Twitch, "tw-5", "grace")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, EconomyError::OnCooldown { .. })));
    let inv = service.store().get_inventory(user.id).unwrap();
    assert_eq!(inv.total_of(LOOTBOX_TIER0), 1);
}
