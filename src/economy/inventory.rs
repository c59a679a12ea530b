//! Slot-level inventory mutations.
//!
//! Every mutating call runs in exactly one store transaction and relies on the
//! store's row lock for the user's inventory; nothing here adds a mutex of its
//! own. The `*_in` variants operate on a caller's open transaction so cooldown
//! gated and trap operations can compose them into a single commit.

use std::sync::Arc;

use log::{debug, info};
use rand::Rng;

use super::errors::EconomyError;
use super::store::{require_serialized_writers, with_tx, CancelFlag, Store, StoreTx};
use super::types::{Inventory, ItemId, QualityTier, Slot, UserId, MAX_STACK_SIZE};
use crate::metrics;

/// What a strict consume actually took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumed {
    pub item_id: ItemId,
    pub quantity: u32,
    pub tier: QualityTier,
}

#[derive(Debug, Clone, Copy)]
pub struct InventoryLimits {
    pub max_stack_size: u32,
    pub max_transaction_quantity: u32,
}

impl Default for InventoryLimits {
    fn default() -> Self {
        Self {
            max_stack_size: MAX_STACK_SIZE,
            max_transaction_quantity: 10_000,
        }
    }
}

#[derive(Clone)]
pub struct InventoryEngine {
    store: Arc<dyn Store>,
    limits: InventoryLimits,
}

impl InventoryEngine {
    pub fn new(store: Arc<dyn Store>, limits: InventoryLimits) -> Result<Self, EconomyError> {
        require_serialized_writers(store.as_ref())?;
        Ok(Self { store, limits })
    }

    pub fn limits(&self) -> InventoryLimits {
        self.limits
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Add `quantity` to the exact (item, tier) slot. Returns the slot's new quantity.
    pub fn grant(
        &self,
        cancel: &CancelFlag,
        user: UserId,
        item_id: ItemId,
        quantity: u32,
        tier: QualityTier,
    ) -> Result<u32, EconomyError> {
        self.check_quantity(quantity)?;
        let held = with_tx(self.store.as_ref(), cancel, "grant", |tx| {
            self.grant_in(tx, user, item_id, quantity, tier)
        })?;
        metrics::inc_grants();
        debug!("granted {}x item {} ({}) to {}", quantity, item_id, tier, user);
        Ok(held)
    }

    pub fn grant_in(
        &self,
        tx: &mut dyn StoreTx,
        user: UserId,
        item_id: ItemId,
        quantity: u32,
        tier: QualityTier,
    ) -> Result<u32, EconomyError> {
        let mut inv = tx.get_inventory(user)?;
        normalize_slots(&mut inv, self.limits.max_stack_size);
        add_to_slots(&mut inv, item_id, quantity, tier, self.limits.max_stack_size);
        tx.update_inventory(user, &inv)?;
        Ok(inv.quantity_of(item_id, tier))
    }

    /// Remove `quantity` from one slot of `item_id`, chosen at random weighted
    /// by slot quantity. Fails if that slot holds less than requested.
    pub fn consume(
        &self,
        cancel: &CancelFlag,
        user: UserId,
        item_id: ItemId,
        quantity: u32,
    ) -> Result<Consumed, EconomyError> {
        self.check_quantity(quantity)?;
        let consumed = with_tx(self.store.as_ref(), cancel, "consume", |tx| {
            self.consume_in(tx, user, item_id, quantity)
        })?;
        metrics::inc_consumes();
        Ok(consumed)
    }

    pub fn consume_in(
        &self,
        tx: &mut dyn StoreTx,
        user: UserId,
        item_id: ItemId,
        quantity: u32,
    ) -> Result<Consumed, EconomyError> {
        let mut inv = tx.get_inventory(user)?;
        normalize_slots(&mut inv, self.limits.max_stack_size);
        let consumed = take_from_random_slot(&mut inv, item_id, quantity, &mut rand::thread_rng())?;
        tx.update_inventory(user, &inv)?;
        Ok(consumed)
    }

    /// Remove up to `quantity` of `item_id` across tiers; returns the amount removed.
    pub fn consume_lenient(
        &self,
        cancel: &CancelFlag,
        user: UserId,
        item_id: ItemId,
        quantity: u32,
    ) -> Result<u32, EconomyError> {
        self.check_quantity(quantity)?;
        let removed = with_tx(self.store.as_ref(), cancel, "consume_lenient", |tx| {
            let mut inv = tx.get_inventory(user)?;
            normalize_slots(&mut inv, self.limits.max_stack_size);
            let removed = drain_up_to(&mut inv, item_id, quantity, &mut rand::thread_rng())?;
            tx.update_inventory(user, &inv)?;
            Ok(removed)
        })?;
        metrics::inc_consumes();
        Ok(removed)
    }

    /// Move `quantity` of `item_id` from `owner` to `receiver`, keeping the
    /// consumed slot's tier on the receiving side.
    pub fn transfer(
        &self,
        cancel: &CancelFlag,
        owner: UserId,
        receiver: UserId,
        item_id: ItemId,
        quantity: u32,
    ) -> Result<Consumed, EconomyError> {
        self.check_transfer_quantity(quantity)?;
        if owner == receiver {
            return Err(EconomyError::InvalidInput(
                "cannot transfer items to yourself".to_string(),
            ));
        }
        let moved = with_tx(self.store.as_ref(), cancel, "transfer", |tx| {
            self.transfer_in(tx, owner, receiver, item_id, quantity)
        })?;
        metrics::inc_transfers();
        info!(
            "transferred {}x item {} ({}) from {} to {}",
            moved.quantity, item_id, moved.tier, owner, receiver
        );
        Ok(moved)
    }

    pub fn transfer_in(
        &self,
        tx: &mut dyn StoreTx,
        owner: UserId,
        receiver: UserId,
        item_id: ItemId,
        quantity: u32,
    ) -> Result<Consumed, EconomyError> {
        // Rows are locked in id order so two opposite transfers cannot deadlock.
        let (first, second) = if owner < receiver {
            (owner, receiver)
        } else {
            (receiver, owner)
        };
        let first_inv = tx.get_inventory(first)?;
        let second_inv = tx.get_inventory(second)?;
        let (mut owner_inv, mut receiver_inv) = if first == owner {
            (first_inv, second_inv)
        } else {
            (second_inv, first_inv)
        };
        normalize_slots(&mut owner_inv, self.limits.max_stack_size);
        normalize_slots(&mut receiver_inv, self.limits.max_stack_size);

        let moved = take_from_random_slot(&mut owner_inv, item_id, quantity, &mut rand::thread_rng())?;
        add_to_slots(
            &mut receiver_inv,
            item_id,
            moved.quantity,
            moved.tier,
            self.limits.max_stack_size,
        );
        tx.update_inventory(owner, &owner_inv)?;
        tx.update_inventory(receiver, &receiver_inv)?;
        Ok(moved)
    }

    /// Apply many grants against one snapshot with a single write-back.
    pub fn batch_grant(
        &self,
        cancel: &CancelFlag,
        user: UserId,
        grants: &[Slot],
    ) -> Result<u64, EconomyError> {
        for grant in grants {
            self.check_quantity(grant.quantity)?;
        }
        let added = with_tx(self.store.as_ref(), cancel, "batch_grant", |tx| {
            self.batch_grant_in(tx, user, grants)
        })?;
        metrics::inc_batch_grants();
        Ok(added)
    }

    pub fn batch_grant_in(
        &self,
        tx: &mut dyn StoreTx,
        user: UserId,
        grants: &[Slot],
    ) -> Result<u64, EconomyError> {
        if grants.is_empty() {
            return Ok(0);
        }
        let mut inv = tx.get_inventory(user)?;
        normalize_slots(&mut inv, self.limits.max_stack_size);
        let added = grants
            .iter()
            .map(|g| {
                add_to_slots(&mut inv, g.item_id, g.quantity, g.tier, self.limits.max_stack_size)
                    as u64
            })
            .sum();
        tx.update_inventory(user, &inv)?;
        Ok(added)
    }

    /// Unlocked snapshot of a user's slots with equal keys merged.
    pub fn view(&self, user: UserId) -> Result<Vec<Slot>, EconomyError> {
        let mut inv = self.store.get_inventory(user)?;
        normalize_slots(&mut inv, self.limits.max_stack_size);
        Ok(inv.slots)
    }

    pub fn check_quantity(&self, quantity: u32) -> Result<(), EconomyError> {
        if quantity == 0 {
            return Err(EconomyError::InvalidInput(
                "quantity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Player-to-player moves are also capped by the per-transaction limit.
    /// Grants and consumes only clamp at the stack size.
    pub fn check_transfer_quantity(&self, quantity: u32) -> Result<(), EconomyError> {
        self.check_quantity(quantity)?;
        if quantity > self.limits.max_transaction_quantity {
            return Err(EconomyError::InvalidInput(format!(
                "quantity {} exceeds the per-transaction limit of {}",
                quantity, self.limits.max_transaction_quantity
            )));
        }
        Ok(())
    }
}

/// Add to the exact (item, tier) slot or append one, clamping at `max_stack`.
/// Returns the amount actually added; the excess is dropped.
pub fn add_to_slots(
    inv: &mut Inventory,
    item_id: ItemId,
    quantity: u32,
    tier: QualityTier,
    max_stack: u32,
) -> u32 {
    if quantity == 0 {
        return 0;
    }
    if let Some(slot) = inv
        .slots
        .iter_mut()
        .find(|s| s.item_id == item_id && s.tier == tier)
    {
        let before = slot.quantity;
        slot.quantity = before.saturating_add(quantity).min(max_stack);
        return slot.quantity.saturating_sub(before);
    }
    let added = quantity.min(max_stack);
    inv.slots.push(Slot::new(item_id, added, tier));
    added
}

/// Merge duplicate (item, tier) slots and drop empty ones, preserving first-seen order.
pub fn normalize_slots(inv: &mut Inventory, max_stack: u32) {
    let mut merged: Vec<Slot> = Vec::with_capacity(inv.slots.len());
    for slot in inv.slots.drain(..) {
        if slot.quantity == 0 {
            continue;
        }
        match merged
            .iter_mut()
            .find(|m| m.item_id == slot.item_id && m.tier == slot.tier)
        {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(slot.quantity).min(max_stack)
            }
            None => merged.push(slot),
        }
    }
    inv.slots = merged;
}

/// Index of a slot holding `item_id`, drawn with probability proportional to quantity.
pub fn pick_weighted_slot<R: Rng + ?Sized>(
    inv: &Inventory,
    item_id: ItemId,
    rng: &mut R,
) -> Option<usize> {
    let total = inv.total_of(item_id);
    if total == 0 {
        return None;
    }
    let mut ticket = rng.gen_range(0..total);
    for (index, slot) in inv.slots.iter().enumerate() {
        if slot.item_id != item_id {
            continue;
        }
        let weight = slot.quantity as u64;
        if ticket < weight {
            return Some(index);
        }
        ticket -= weight;
    }
    None
}

fn take_from_random_slot<R: Rng + ?Sized>(
    inv: &mut Inventory,
    item_id: ItemId,
    quantity: u32,
    rng: &mut R,
) -> Result<Consumed, EconomyError> {
    let index =
        pick_weighted_slot(inv, item_id, rng).ok_or(EconomyError::NotInInventory { item_id })?;
    let slot = inv.slots[index];
    if slot.quantity < quantity {
        return Err(EconomyError::InsufficientQuantity {
            item_id,
            requested: quantity,
            available: slot.quantity,
        });
    }
    remove_from_slot(inv, index, quantity);
    Ok(Consumed {
        item_id,
        quantity,
        tier: slot.tier,
    })
}

fn drain_up_to<R: Rng + ?Sized>(
    inv: &mut Inventory,
    item_id: ItemId,
    quantity: u32,
    rng: &mut R,
) -> Result<u32, EconomyError> {
    let mut removed = 0u32;
    while removed < quantity {
        let Some(index) = pick_weighted_slot(inv, item_id, rng) else {
            break;
        };
        let take = inv.slots[index].quantity.min(quantity - removed);
        remove_from_slot(inv, index, take);
        removed += take;
    }
    if removed == 0 {
        return Err(EconomyError::NotInInventory { item_id });
    }
    Ok(removed)
}

fn remove_from_slot(inv: &mut Inventory, index: usize, quantity: u32) {
    let slot = &mut inv.slots[index];
    slot.quantity -= quantity;
    if slot.quantity == 0 {
        inv.slots.remove(index);
    }
}
