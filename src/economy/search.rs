//! Cooldown-gated search with diminishing returns.

use std::fmt;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::catalog::ItemCatalog;
use super::collaborators::{EventKind, ProgressionService, StatsRecorder};
use super::cooldown::CooldownGate;
use super::errors::EconomyError;
use super::inventory::InventoryEngine;
use super::store::CancelFlag;
use super::types::{ActionKind, ItemId, QualityTier, User};
use crate::logutil::escape_log;
use crate::metrics;

pub type RollSource = Arc<dyn Fn() -> f64 + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    pub success_rate: f64,
    pub critical_success_rate: f64,
    pub near_miss_rate: f64,
    pub critical_fail_rate: f64,
    /// Same-day search count at which diminished odds kick in.
    pub diminishment_threshold: u32,
    pub diminished_success_rate: f64,
    pub diminished_xp_multiplier: f64,
    pub reward_item: String,
    pub base_xp: u32,
    pub job_key: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            success_rate: 0.8,
            critical_success_rate: 0.05,
            near_miss_rate: 0.05,
            critical_fail_rate: 0.05,
            diminishment_threshold: 6,
            diminished_success_rate: 0.1,
            diminished_xp_multiplier: 0.1,
            reward_item: "lootbox_tier0".to_string(),
            base_xp: 10,
            job_key: "explorer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcomeKind {
    CriticalSuccess,
    Success,
    NearMiss,
    CriticalFail,
    NormalFail,
}

impl SearchOutcomeKind {
    pub fn reward_quantity(self) -> u32 {
        match self {
            SearchOutcomeKind::CriticalSuccess => 2,
            SearchOutcomeKind::Success => 1,
            _ => 0,
        }
    }

    pub fn is_reward(self) -> bool {
        self.reward_quantity() > 0
    }

    fn event_kind(self) -> EventKind {
        match self {
            SearchOutcomeKind::CriticalSuccess => EventKind::SearchCriticalSuccess,
            SearchOutcomeKind::Success => EventKind::SearchSuccess,
            SearchOutcomeKind::NearMiss => EventKind::SearchNearMiss,
            SearchOutcomeKind::CriticalFail => EventKind::SearchCriticalFail,
            SearchOutcomeKind::NormalFail => EventKind::SearchFail,
        }
    }
}

impl fmt::Display for SearchOutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SearchOutcomeKind::CriticalSuccess => "critical success",
            SearchOutcomeKind::Success => "success",
            SearchOutcomeKind::NearMiss => "near miss",
            SearchOutcomeKind::CriticalFail => "critical fail",
            SearchOutcomeKind::NormalFail => "nothing found",
        };
        f.write_str(label)
    }
}

/// Per-call parameters derived from the user's history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub daily_count: u32,
    pub first_of_day: bool,
    pub diminished: bool,
    pub success_threshold: f64,
    pub xp_multiplier: f64,
    pub streak: u32,
}

impl SearchParams {
    pub fn derive(settings: &SearchSettings, daily_count: u32, streak: u32) -> Self {
        let diminished = daily_count >= settings.diminishment_threshold;
        let (success_threshold, xp_multiplier) = if diminished {
            (
                settings.diminished_success_rate,
                settings.diminished_xp_multiplier,
            )
        } else {
            (settings.success_rate, 1.0)
        };
        Self {
            daily_count,
            first_of_day: daily_count == 0,
            diminished,
            success_threshold,
            xp_multiplier,
            streak,
        }
    }
}

pub fn classify_roll(roll: f64, params: &SearchParams, settings: &SearchSettings) -> SearchOutcomeKind {
    if roll <= params.success_threshold {
        if roll <= settings.critical_success_rate {
            SearchOutcomeKind::CriticalSuccess
        } else {
            SearchOutcomeKind::Success
        }
    } else if roll <= params.success_threshold + settings.near_miss_rate {
        SearchOutcomeKind::NearMiss
    } else if roll > 1.0 - settings.critical_fail_rate {
        SearchOutcomeKind::CriticalFail
    } else {
        SearchOutcomeKind::NormalFail
    }
}

/// Starting tier for the reward; drops a bracket as the day's searches pile up.
pub fn base_tier(daily_count: u32, diminishment_threshold: u32) -> QualityTier {
    match daily_count {
        0 => QualityTier::Uncommon,
        1..=2 => QualityTier::Common,
        n if n < diminishment_threshold => QualityTier::Poor,
        _ => QualityTier::Junk,
    }
}

pub fn reward_tier(
    params: &SearchParams,
    critical: bool,
    job_level: u32,
    diminishment_threshold: u32,
) -> QualityTier {
    let mut index = base_tier(params.daily_count, diminishment_threshold).index() as i64;
    if critical {
        index += 2;
    }
    if params.streak > 0 && params.streak % 5 == 0 {
        index += 1;
    }
    index += (job_level / 5) as i64;
    QualityTier::from_index_clamped(index)
}

pub fn xp_for(base_xp: u32, multiplier: f64) -> u32 {
    ((base_xp as f64 * multiplier) as u32).max(1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub kind: SearchOutcomeKind,
    pub roll: f64,
    pub quantity: u32,
    pub item_id: Option<ItemId>,
    pub item_name: String,
    pub tier: Option<QualityTier>,
    pub xp: u32,
    pub params: SearchParams,
}

impl SearchOutcome {
    /// Chat-ready one-liner.
    pub fn summary(&self) -> String {
        let mut text = match self.kind {
            SearchOutcomeKind::CriticalSuccess => format!(
                "CRITICAL SUCCESS! You found {}x {}",
                self.quantity, self.item_name
            ),
            SearchOutcomeKind::Success => {
                format!("You have found {}x {}", self.quantity, self.item_name)
            }
            SearchOutcomeKind::NearMiss => "So close! You almost found something.".to_string(),
            SearchOutcomeKind::CriticalFail => {
                "CRITICAL FAIL! You tripped and came back empty-handed.".to_string()
            }
            SearchOutcomeKind::NormalFail => "You found nothing.".to_string(),
        };
        if self.params.first_of_day {
            text.push_str(" (First search of the day!)");
            if self.params.streak > 1 {
                text.push_str(&format!(" {} day streak!", self.params.streak));
            }
        } else if self.params.diminished {
            text.push_str(" (Exhausted)");
        }
        text
    }
}

pub struct SearchRewardEngine {
    inventory: InventoryEngine,
    cooldowns: CooldownGate,
    catalog: Arc<dyn ItemCatalog>,
    stats: Option<Arc<dyn StatsRecorder>>,
    progression: Option<Arc<dyn ProgressionService>>,
    settings: SearchSettings,
    roll: RollSource,
}

impl SearchRewardEngine {
    pub fn new(
        inventory: InventoryEngine,
        cooldowns: CooldownGate,
        catalog: Arc<dyn ItemCatalog>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            inventory,
            cooldowns,
            catalog,
            stats: None,
            progression: None,
            settings,
            roll: Arc::new(|| rand::random::<f64>()),
        }
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsRecorder>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_progression(mut self, progression: Arc<dyn ProgressionService>) -> Self {
        self.progression = Some(progression);
        self
    }

    /// Replace the uniform [0, 1) roll, e.g. with a scripted sequence in tests.
    pub fn with_roll_source(mut self, roll: RollSource) -> Self {
        self.roll = roll;
        self
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn search(&self, cancel: &CancelFlag, user: &User) -> Result<SearchOutcome, EconomyError> {
        let reward = self
            .catalog
            .get_item_by_name(&self.settings.reward_item)
            .ok_or_else(|| {
                EconomyError::NotFound(format!("reward item '{}'", self.settings.reward_item))
            })?;
        let (reward_id, reward_name) = (reward.id, reward.public_name.clone());

        let outcome = self
            .cooldowns
            .enforce(cancel, user.id, ActionKind::Search, |tx| {
                let params = self.params_for(user);
                let roll = (self.roll)();
                let kind = classify_roll(roll, &params, &self.settings);
                let mut outcome = SearchOutcome {
                    kind,
                    roll,
                    quantity: kind.reward_quantity(),
                    item_id: None,
                    item_name: reward_name.clone(),
                    tier: None,
                    xp: xp_for(self.settings.base_xp, params.xp_multiplier),
                    params,
                };
                if kind.is_reward() {
                    let tier = reward_tier(
                        &params,
                        kind == SearchOutcomeKind::CriticalSuccess,
                        self.job_level(user),
                        self.settings.diminishment_threshold,
                    );
                    self.inventory
                        .grant_in(tx, user.id, reward_id, outcome.quantity, tier)?;
                    outcome.item_id = Some(reward_id);
                    outcome.tier = Some(tier);
                }
                Ok(outcome)
            })?;

        metrics::record_search(outcome.kind);
        if outcome.params.diminished {
            info!(
                "diminished returns applied for {} (daily count {})",
                escape_log(&user.username),
                outcome.params.daily_count
            );
        }
        info!(
            "search by {}: {} (roll {:.3})",
            escape_log(&user.username),
            outcome.kind,
            outcome.roll
        );
        self.report(user, &outcome);
        Ok(outcome)
    }

    fn params_for(&self, user: &User) -> SearchParams {
        let Some(stats) = &self.stats else {
            return SearchParams::derive(&self.settings, 0, 0);
        };
        let daily_count = stats
            .daily_action_count(user.id, ActionKind::Search)
            .unwrap_or_else(|e| {
                warn!("failed to get search counts for {}: {}", user.id, e);
                0
            });
        let streak = if daily_count == 0 {
            stats.current_streak(user.id).unwrap_or_else(|e| {
                warn!("failed to get streak for {}: {}", user.id, e);
                0
            })
        } else {
            0
        };
        SearchParams::derive(&self.settings, daily_count, streak)
    }

    fn job_level(&self, user: &User) -> u32 {
        let Some(progression) = &self.progression else {
            return 0;
        };
        progression
            .job_level(user.id, &self.settings.job_key)
            .unwrap_or_else(|e| {
                warn!("failed to get job level for {}: {}", user.id, e);
                0
            })
    }

    fn report(&self, user: &User, outcome: &SearchOutcome) {
        let Some(stats) = &self.stats else {
            return;
        };
        let metadata = json!({
            "roll": outcome.roll,
            "threshold": outcome.params.success_threshold,
            "tier": outcome.tier.map(|t| t.as_str()),
            "quantity": outcome.quantity,
            "xp": outcome.xp,
        });
        if let Err(e) = stats.record_user_event(user.id, outcome.kind.event_kind(), metadata) {
            warn!("failed to record search event for {}: {}", user.id, e);
        }
    }
}
