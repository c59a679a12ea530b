//! Cross-platform user identity: registration, linking and merging.
//!
//! A merge is computed as a pure plan first and then swapped in with one
//! transaction, so an interrupted merge leaves both users untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use super::cache::UserCache;
use super::errors::EconomyError;
use super::inventory::{add_to_slots, normalize_slots};
use super::store::{require_serialized_writers, with_tx, CancelFlag, Store, StoreTx};
use super::types::{Inventory, Platform, User, UserId};
use crate::logutil::escape_log;
use crate::validation::{validate_platform_id, validate_username};

/// Survivor profile and inventory after absorbing the loser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub survivor: User,
    pub inventory: Inventory,
    pub retired: UserId,
}

/// Combine two users without touching the store.
///
/// Platform ids move to the survivor; the same id on both sides is kept once,
/// different ids for one platform reject the merge. Slots keep their
/// (item, tier) key and clamp at `max_stack`.
pub fn plan_merge(
    survivor: &User,
    survivor_inv: &Inventory,
    loser: &User,
    loser_inv: &Inventory,
    max_stack: u32,
) -> Result<MergePlan, EconomyError> {
    if survivor.id == loser.id {
        return Err(EconomyError::InvalidInput(
            "cannot merge a user into itself".to_string(),
        ));
    }
    let mut merged = survivor.clone();
    for (platform, platform_id) in &loser.platform_ids {
        match merged.platform_ids.get(platform) {
            Some(existing) if existing == platform_id => {}
            Some(_) => return Err(EconomyError::PlatformConflict { platform: *platform }),
            None => {
                merged.platform_ids.insert(*platform, platform_id.clone());
            }
        }
    }
    merged.touch();

    let mut inventory = survivor_inv.clone();
    normalize_slots(&mut inventory, max_stack);
    for slot in &loser_inv.slots {
        add_to_slots(&mut inventory, slot.item_id, slot.quantity, slot.tier, max_stack);
    }

    Ok(MergePlan {
        survivor: merged,
        inventory,
        retired: loser.id,
    })
}

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn Store>,
    cache: Arc<UserCache>,
    max_stack: u32,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<UserCache>,
        max_stack: u32,
    ) -> Result<Self, EconomyError> {
        require_serialized_writers(store.as_ref())?;
        Ok(Self {
            store,
            cache,
            max_stack,
        })
    }

    pub fn cache(&self) -> &Arc<UserCache> {
        &self.cache
    }

    /// Explicit registration; fails if the identity already belongs to someone.
    pub fn register_user(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        platform_id: &str,
        username: &str,
    ) -> Result<User, EconomyError> {
        let username = validate_username(platform, username)?;
        let platform_id = validate_platform_id(platform_id)?;
        let user = with_tx(self.store.as_ref(), cancel, "register_user", |tx| {
            if tx
                .find_user_by_platform_id_for_update(platform, &platform_id)?
                .is_some()
            {
                return Err(EconomyError::InvalidInput(format!(
                    "{} id {} is already registered",
                    platform, platform_id
                )));
            }
            let user = User::new(&username, platform, &platform_id);
            tx.put_user(&user)?;
            Ok(user)
        })?;
        info!("registered {} on {} as {}", escape_log(&username), platform, user.id);
        self.cache.set(platform, &platform_id, user.clone());
        Ok(user)
    }

    /// Resolve a chat identity, creating the user on first sight.
    pub fn get_or_register(
        &self,
        cancel: &CancelFlag,
        platform: Platform,
        platform_id: &str,
        username: &str,
    ) -> Result<User, EconomyError> {
        let username = validate_username(platform, username)?;
        let platform_id = validate_platform_id(platform_id)?;
        if let Some(user) = self.cache.get(platform, &platform_id) {
            return Ok(user);
        }
        cancel.check()?;
        if let Some(user) = self.store.find_user_by_platform_id(platform, &platform_id)? {
            self.cache.set(platform, &platform_id, user.clone());
            return Ok(user);
        }

        let (user, created) = with_tx(self.store.as_ref(), cancel, "auto_register", |tx| {
            // Someone may have registered this identity since the unlocked read.
            if let Some(user) = tx.find_user_by_platform_id_for_update(platform, &platform_id)? {
                return Ok((user, false));
            }
            let user = User::new(&username, platform, &platform_id);
            tx.put_user(&user)?;
            Ok((user, true))
        })?;
        if created {
            info!(
                "auto-registered {} on {} as {}",
                escape_log(&username),
                platform,
                user.id
            );
        }
        self.cache.set(platform, &platform_id, user.clone());
        Ok(user)
    }

    pub fn find_by_platform_id(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> Result<Option<User>, EconomyError> {
        if let Some(user) = self.cache.get(platform, platform_id) {
            return Ok(Some(user));
        }
        let found = self.store.find_user_by_platform_id(platform, platform_id)?;
        if let Some(user) = &found {
            self.cache.set(platform, platform_id, user.clone());
        }
        Ok(found)
    }

    pub fn find_by_username(
        &self,
        platform: Platform,
        username: &str,
    ) -> Result<Option<User>, EconomyError> {
        self.store.find_user_by_username(platform, username)
    }

    pub fn linked_platforms(&self, user: UserId) -> Result<BTreeMap<Platform, String>, EconomyError> {
        let user = self
            .store
            .get_user(user)?
            .ok_or_else(|| EconomyError::NotFound(format!("user {}", user)))?;
        Ok(user.platform_ids)
    }

    /// Attach a platform identity to an existing user.
    pub fn link_platform(
        &self,
        cancel: &CancelFlag,
        user_id: UserId,
        platform: Platform,
        platform_id: &str,
    ) -> Result<User, EconomyError> {
        let platform_id = validate_platform_id(platform_id)?;
        let (before, after) = with_tx(self.store.as_ref(), cancel, "link_platform", |tx| {
            if let Some(owner) = tx.find_user_by_platform_id_for_update(platform, &platform_id)? {
                if owner.id != user_id {
                    return Err(EconomyError::InvalidInput(format!(
                        "{} id {} belongs to another user; merge instead",
                        platform, platform_id
                    )));
                }
            }
            let before = load_user(tx, user_id)?;
            match before.platform_id(platform) {
                Some(existing) if existing == platform_id => return Ok((before.clone(), before)),
                Some(_) => return Err(EconomyError::PlatformConflict { platform }),
                None => {}
            }
            let mut after = before.clone();
            after.platform_ids.insert(platform, platform_id.clone());
            after.touch();
            tx.put_user(&after)?;
            Ok((before, after))
        })?;
        self.cache.invalidate_user(&before);
        self.cache.invalidate_user(&after);
        debug!("linked {} id to {}", platform, user_id);
        Ok(after)
    }

    /// Detach a platform identity. The last remaining identity cannot be removed.
    pub fn unlink_platform(
        &self,
        cancel: &CancelFlag,
        user_id: UserId,
        platform: Platform,
    ) -> Result<User, EconomyError> {
        let (before, after) = with_tx(self.store.as_ref(), cancel, "unlink_platform", |tx| {
            let before = load_user(tx, user_id)?;
            if before.platform_id(platform).is_none() {
                return Err(EconomyError::NotFound(format!(
                    "{} identity for user {}",
                    platform, user_id
                )));
            }
            if before.platform_ids.len() == 1 {
                return Err(EconomyError::InvalidInput(
                    "cannot unlink the only linked platform".to_string(),
                ));
            }
            let mut after = before.clone();
            after.platform_ids.remove(&platform);
            after.touch();
            tx.put_user(&after)?;
            Ok((before, after))
        })?;
        self.cache.invalidate_user(&before);
        debug!("unlinked {} from {}", platform, user_id);
        Ok(after)
    }

    /// Fold `loser` into `survivor` and retire the loser.
    pub fn merge_users(
        &self,
        cancel: &CancelFlag,
        survivor_id: UserId,
        loser_id: UserId,
    ) -> Result<User, EconomyError> {
        if survivor_id == loser_id {
            return Err(EconomyError::InvalidInput(
                "cannot merge a user into itself".to_string(),
            ));
        }
        let (survivor, loser, plan) = with_tx(self.store.as_ref(), cancel, "merge_users", |tx| {
            // Id order for both row kinds keeps opposite merges from deadlocking.
            let (first, second) = if survivor_id < loser_id {
                (survivor_id, loser_id)
            } else {
                (loser_id, survivor_id)
            };
            let first_user = load_user(tx, first)?;
            let second_user = load_user(tx, second)?;
            let first_inv = tx.get_inventory(first)?;
            let second_inv = tx.get_inventory(second)?;
            let (survivor, survivor_inv, loser, loser_inv) = if first == survivor_id {
                (first_user, first_inv, second_user, second_inv)
            } else {
                (second_user, second_inv, first_user, first_inv)
            };

            let plan = plan_merge(&survivor, &survivor_inv, &loser, &loser_inv, self.max_stack)?;

            tx.delete_user(loser.id)?;
            tx.delete_inventory(loser.id)?;
            tx.put_user(&plan.survivor)?;
            tx.update_inventory(plan.survivor.id, &plan.inventory)?;
            Ok((survivor, loser, plan))
        })?;

        self.cache.invalidate_user(&survivor);
        self.cache.invalidate_user(&loser);
        self.cache.invalidate_user(&plan.survivor);
        info!(
            "merged {} into {} ({} platforms, {} slots)",
            loser.id,
            survivor.id,
            plan.survivor.platform_ids.len(),
            plan.inventory.slots.len()
        );
        Ok(plan.survivor)
    }
}

fn load_user(tx: &mut dyn StoreTx, id: UserId) -> Result<User, EconomyError> {
    tx.get_user_for_update(id)?
        .ok_or_else(|| EconomyError::NotFound(format!("user {}", id)))
}
