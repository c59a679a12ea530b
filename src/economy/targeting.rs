//! Traps, weapons, shields and revives.
//!
//! Store effects (item consumption, trap rows, cooldown stamps) commit in a
//! single transaction per call. Chat side effects (timeouts, shield charges,
//! tracker removals) are applied only after that commit succeeds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;
use serde_json::json;

use super::catalog::ItemCatalog;
use super::chatter::{ActiveChatterTracker, ChatterTarget};
use super::collaborators::{EventKind, StatsRecorder};
use super::cooldown::CooldownGate;
use super::errors::EconomyError;
use super::inventory::{Consumed, InventoryEngine};
use super::store::{with_tx, CancelFlag};
use super::timeouts::TimeoutRegistry;
use super::types::{ActionKind, Item, ItemCategory, Platform, Trap, User, UserId};
use crate::logutil::escape_log;
use crate::metrics;

/// What happened to one victim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitOutcome {
    /// Timed out; carries the accumulated total.
    TimedOut(Duration),
    /// A shield charge took the hit.
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub username: String,
    pub user_id: Option<UserId>,
    pub outcome: HitOutcome,
}

#[derive(Debug, Clone)]
pub struct TrapPlacement {
    pub trap: Trap,
    /// The trap that was already waiting on the target, now sprung on the setter.
    pub sprung: Option<(Trap, Hit)>,
}

#[derive(Debug, Clone)]
pub struct TrapTrigger {
    pub trap: Trap,
    pub hit: Hit,
}

#[derive(Debug, Clone)]
pub struct StrikeReport {
    pub weapon: Consumed,
    pub timeout: Duration,
    pub hits: Vec<Hit>,
    /// Selected targets that were already gone when the hits landed.
    pub skipped: Vec<ChatterTarget>,
}

impl StrikeReport {
    pub fn summary(&self, attacker: &str, weapon: &str) -> String {
        let names: Vec<&str> = self.hits.iter().map(|h| h.username.as_str()).collect();
        if names.is_empty() {
            return format!("{} used {} but every target had already fled.", attacker, weapon);
        }
        format!(
            "{} used {}! Hit {}: {}! Timed out for {}s.",
            attacker,
            weapon,
            if names.len() == 1 { "1 target".to_string() } else { format!("{} targets", names.len()) },
            join_names(&names),
            self.timeout.as_secs()
        )
    }
}

/// "a", "a and b", "a, b, and c".
pub fn join_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [one] => one.to_string(),
        [a, b] => format!("{} and {}", a, b),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}

#[derive(Clone)]
pub struct TrapAndTargetingEngine {
    inventory: InventoryEngine,
    cooldowns: CooldownGate,
    catalog: Arc<dyn ItemCatalog>,
    chatters: Arc<ActiveChatterTracker>,
    timeouts: Arc<TimeoutRegistry>,
    stats: Option<Arc<dyn StatsRecorder>>,
}

impl TrapAndTargetingEngine {
    pub fn new(
        inventory: InventoryEngine,
        cooldowns: CooldownGate,
        catalog: Arc<dyn ItemCatalog>,
        chatters: Arc<ActiveChatterTracker>,
        timeouts: Arc<TimeoutRegistry>,
    ) -> Self {
        Self {
            inventory,
            cooldowns,
            catalog,
            chatters,
            timeouts,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsRecorder>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn timeouts(&self) -> &Arc<TimeoutRegistry> {
        &self.timeouts
    }

    /// Arm a trap on `target`. If one is already waiting there, the setter
    /// springs it and the new trap is placed anyway.
    pub fn place_trap(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        setter: &User,
        target: &User,
        item_name: &str,
    ) -> Result<TrapPlacement, EconomyError> {
        let item = self.lookup(item_name)?;
        let ItemCategory::Trap { timeout_secs } = item.category else {
            return Err(not_a(&item, "trap"));
        };
        if setter.id == target.id {
            return Err(EconomyError::InvalidInput(
                "cannot place a trap on yourself".to_string(),
            ));
        }

        let (trap, existing) =
            self.cooldowns
                .enforce(cancel, setter.id, ActionKind::PlaceTrap, |tx| {
                    // Target's trap row is locked before the setter's inventory.
                    let existing = tx.active_trap_for_update(target.id)?.map(|mut t| {
                        t.triggered_at = Some(Utc::now());
                        t
                    });
                    let consumed = self.inventory.consume_in(tx, setter.id, item.id, 1)?;
                    let trap = Trap::new(setter.id, target.id, consumed.tier, timeout_secs);
                    // Replaces the sprung trap; one row per target.
                    tx.put_trap(&trap)?;
                    Ok((trap, existing))
                })?;

        metrics::inc_traps_placed();
        info!(
            "{} placed a {} trap on {}",
            escape_log(&setter.username),
            trap.tier,
            escape_log(&target.username)
        );
        self.record(
            setter.id,
            EventKind::TrapPlaced,
            json!({ "trap_id": trap.id.to_string(), "target": target.id.to_string(), "tier": trap.tier.as_str() }),
        );

        let sprung = existing.map(|old| {
            metrics::inc_traps_triggered();
            let hit = self.land_hit(platform, Some(setter.id), &setter.username, old.timeout());
            info!(
                "{} stepped on an existing trap while placing one",
                escape_log(&setter.username)
            );
            self.record(
                setter.id,
                EventKind::TrapTriggered,
                json!({ "trap_id": old.id.to_string(), "self_triggered": true, "blocked": hit.outcome == HitOutcome::Blocked }),
            );
            (old, hit)
        });

        Ok(TrapPlacement { trap, sprung })
    }

    /// Spring the trap waiting on `victim`, if any. Called for every message,
    /// so the common no-trap case is a single unlocked read.
    pub fn trigger_trap_for(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        victim: &User,
    ) -> Result<Option<TrapTrigger>, EconomyError> {
        cancel.check()?;
        if self.inventory.store().active_trap(victim.id)?.is_none() {
            return Ok(None);
        }
        let sprung = with_tx(self.inventory.store().as_ref(), cancel, "trigger_trap", |tx| {
            let Some(mut trap) = tx.active_trap_for_update(victim.id)? else {
                return Ok(None);
            };
            trap.triggered_at = Some(Utc::now());
            tx.put_trap(&trap)?;
            Ok(Some(trap))
        })?;
        let Some(trap) = sprung else {
            debug!("trap on {} already sprung", victim.id);
            return Ok(None);
        };

        metrics::inc_traps_triggered();
        let hit = self.land_hit(platform, Some(victim.id), &victim.username, trap.timeout());
        info!(
            "{} stepped on a {} trap",
            escape_log(&victim.username),
            trap.tier
        );
        self.record(
            victim.id,
            EventKind::TrapTriggered,
            json!({ "trap_id": trap.id.to_string(), "setter": trap.setter.to_string(), "blocked": hit.outcome == HitOutcome::Blocked }),
        );
        Ok(Some(TrapTrigger { trap, hit }))
    }

    /// Fire a targeted weapon at a named user.
    pub fn strike(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        attacker: &User,
        item_name: &str,
        target_username: &str,
    ) -> Result<StrikeReport, EconomyError> {
        let item = self.lookup(item_name)?;
        let ItemCategory::Weapon { timeout_secs } = item.category else {
            return Err(not_a(&item, "targeted weapon"));
        };
        let target_username = target_username.trim();
        if target_username.is_empty() {
            return Err(EconomyError::InvalidInput(
                "a target username is required".to_string(),
            ));
        }
        let target_id = self
            .inventory
            .store()
            .find_user_by_username(platform, target_username)?
            .map(|u| u.id);

        let weapon = self
            .cooldowns
            .enforce(cancel, attacker.id, ActionKind::UseWeapon, |tx| {
                self.inventory.consume_in(tx, attacker.id, item.id, 1)
            })?;

        let timeout = Duration::from_secs(timeout_secs);
        if let Some(id) = target_id {
            self.chatters.remove(platform, id);
        }
        let hit = self.land_hit(platform, target_id, target_username, timeout);
        self.report_hit(attacker, &item, &hit);
        Ok(StrikeReport {
            weapon,
            timeout,
            hits: vec![hit],
            skipped: Vec::new(),
        })
    }

    /// Fire a random-target weapon at `min..=max` live chatters.
    pub fn strike_random(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        attacker: &User,
        item_name: &str,
    ) -> Result<StrikeReport, EconomyError> {
        let item = self.lookup(item_name)?;
        let ItemCategory::RandomWeapon {
            min_targets,
            max_targets,
            timeout_secs,
        } = item.category
        else {
            return Err(not_a(&item, "random-target weapon"));
        };
        if min_targets == 0 || min_targets > max_targets {
            return Err(EconomyError::InvalidInput(format!(
                "{} has an invalid target range {}..={}",
                item.internal_name, min_targets, max_targets
            )));
        }

        // Targets first: with nobody around nothing is consumed.
        let count = rand::thread_rng().gen_range(min_targets..=max_targets);
        let targets = self.chatters.random_targets(platform, count)?;

        let weapon = self
            .cooldowns
            .enforce(cancel, attacker.id, ActionKind::UseWeapon, |tx| {
                self.inventory.consume_in(tx, attacker.id, item.id, 1)
            })?;

        let timeout = Duration::from_secs(timeout_secs);
        let mut hits = Vec::with_capacity(targets.len());
        let mut skipped = Vec::new();
        for target in targets {
            if !self.chatters.remove(platform, target.user_id) {
                debug!("target {} vanished before the hit", target.user_id);
                skipped.push(target);
                continue;
            }
            let hit = self.land_hit(platform, Some(target.user_id), &target.username, timeout);
            self.report_hit(attacker, &item, &hit);
            hits.push(hit);
        }
        info!(
            "{} used {}: {} hit, {} skipped",
            escape_log(&attacker.username),
            item.internal_name,
            hits.len(),
            skipped.len()
        );
        Ok(StrikeReport {
            weapon,
            timeout,
            hits,
            skipped,
        })
    }

    /// Consume shields and add one charge per item.
    pub fn raise_shield(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        user: &User,
        item_name: &str,
        quantity: u32,
    ) -> Result<u32, EconomyError> {
        let item = self.lookup(item_name)?;
        if item.category != ItemCategory::Shield {
            return Err(not_a(&item, "shield"));
        }
        self.inventory.consume(cancel, user.id, item.id, quantity)?;
        let charges = self.timeouts.grant_shield(platform, user.id, quantity);
        info!(
            "{} raised {} shield(s), {} charge(s) active",
            escape_log(&user.username),
            quantity,
            charges
        );
        Ok(charges)
    }

    /// Consume revives to shorten someone's timeout. Returns what is left of it.
    pub fn revive(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        user: &User,
        item_name: &str,
        quantity: u32,
        target_username: &str,
    ) -> Result<Option<Duration>, EconomyError> {
        let item = self.lookup(item_name)?;
        let ItemCategory::Revive { recovery_secs } = item.category else {
            return Err(not_a(&item, "revive"));
        };
        let target_username = target_username.trim();
        if target_username.is_empty() {
            return Err(EconomyError::InvalidInput(
                "a target username is required".to_string(),
            ));
        }
        self.inventory.consume(cancel, user.id, item.id, quantity)?;
        let recovery = Duration::from_secs(recovery_secs.saturating_mul(quantity as u64));
        let left = self
            .timeouts
            .reduce_timeout(platform, target_username, recovery);
        info!(
            "{} revived {} by {}s",
            escape_log(&user.username),
            escape_log(target_username),
            recovery.as_secs()
        );
        Ok(left)
    }

    fn lookup(&self, item_name: &str) -> Result<Item, EconomyError> {
        self.catalog
            .get_item_by_name(item_name)
            .cloned()
            .ok_or_else(|| EconomyError::NotFound(format!("item '{}'", item_name)))
    }

    fn land_hit(
        &self,
        platform: Platform,
        user_id: Option<UserId>,
        username: &str,
        timeout: Duration,
    ) -> Hit {
        let blocked = user_id.is_some_and(|id| self.timeouts.absorb_hit(platform, id));
        let outcome = if blocked {
            metrics::inc_shield_blocks();
            if let Some(id) = user_id {
                self.record(id, EventKind::ShieldBlocked, json!({ "timeout_secs": timeout.as_secs() }));
            }
            HitOutcome::Blocked
        } else {
            HitOutcome::TimedOut(self.timeouts.add_timeout(platform, username, timeout))
        };
        Hit {
            username: username.to_string(),
            user_id,
            outcome,
        }
    }

    fn report_hit(&self, attacker: &User, item: &Item, hit: &Hit) {
        metrics::inc_weapon_hits();
        info!(
            "{} hit {} with {}{}",
            escape_log(&attacker.username),
            escape_log(&hit.username),
            item.internal_name,
            if hit.outcome == HitOutcome::Blocked { " (blocked)" } else { "" }
        );
        self.record(
            attacker.id,
            EventKind::WeaponHit,
            json!({
                "item": item.internal_name,
                "target": hit.username,
                "blocked": hit.outcome == HitOutcome::Blocked,
            }),
        );
    }

    fn record(&self, user: UserId, kind: EventKind, metadata: serde_json::Value) {
        let Some(stats) = &self.stats else {
            return;
        };
        if let Err(e) = stats.record_user_event(user, kind, metadata) {
            warn!("failed to record {:?} for {}: {}", kind, user, e);
        }
    }
}

fn not_a(item: &Item, what: &str) -> EconomyError {
    EconomyError::InvalidInput(format!("{} is not a {}", item.public_name, what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_join_like_prose() {
        assert_eq!(join_names(&[]), "");
        assert_eq!(join_names(&["a"]), "a");
        assert_eq!(join_names(&["a", "b"]), "a and b");
        assert_eq!(join_names(&["a", "b", "c"]), "a, b, and c");
    }

    #[test]
    fn summary_counts_hits() {
        let report = StrikeReport {
            weapon: Consumed {
                item_id: 1,
                quantity: 1,
                tier: crate::economy::types::QualityTier::Common,
            },
            timeout: Duration::from_secs(60),
            hits: vec![Hit {
                username: "bob".into(),
                user_id: None,
                outcome: HitOutcome::TimedOut(Duration::from_secs(60)),
            }],
            skipped: Vec::new(),
        };
        assert_eq!(
            report.summary("alice", "Blaster"),
            "alice used Blaster! Hit 1 target: bob! Timed out for 60s."
        );
    }
}
