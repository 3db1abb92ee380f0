use crate::id::ItemTypeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stack of fungible items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item_type: ItemTypeId,
    pub quantity: u32,
}

impl ItemStack {
    pub fn new(item_type: ItemTypeId, quantity: u32) -> Self {
        Self { item_type, quantity }
    }
}

/// A slotted inventory. Each slot holds at most one stack of at most
/// `stack_limit` items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    slots: Vec<Option<ItemStack>>,
    stack_limit: u32,
}

impl Inventory {
    pub fn new(slot_count: usize, stack_limit: u32) -> Self {
        Self {
            slots: vec![None; slot_count],
            stack_limit,
        }
    }

    pub fn slots(&self) -> &[Option<ItemStack>] {
        &self.slots
    }

    pub fn stack_limit(&self) -> u32 {
        self.stack_limit
    }

    /// Add items, topping up existing stacks of the same type before using
    /// empty slots. Returns the amount that didn't fit.
    #[must_use = "overflow count indicates items that did not fit"]
    pub fn add(&mut self, item_type: ItemTypeId, quantity: u32) -> u32 {
        let mut remaining = quantity;

        for stack in self.slots.iter_mut().flatten() {
            if remaining == 0 {
                break;
            }
            if stack.item_type == item_type {
                let to_add = remaining.min(self.stack_limit.saturating_sub(stack.quantity));
                stack.quantity += to_add;
                remaining -= to_add;
            }
        }

        for slot in self.slots.iter_mut() {
            if remaining == 0 {
                break;
            }
            if slot.is_none() {
                let to_add = remaining.min(self.stack_limit);
                *slot = Some(ItemStack::new(item_type, to_add));
                remaining -= to_add;
            }
        }

        remaining
    }

    /// Remove items, draining the last matching slot first. Returns the
    /// amount actually removed.
    #[must_use = "returns the quantity actually removed, which may be less than requested"]
    pub fn remove(&mut self, item_type: ItemTypeId, quantity: u32) -> u32 {
        let mut remaining = quantity;

        for slot in self.slots.iter_mut().rev() {
            if remaining == 0 {
                break;
            }
            let emptied = match slot.as_mut() {
                Some(stack) if stack.item_type == item_type => {
                    let to_remove = remaining.min(stack.quantity);
                    stack.quantity -= to_remove;
                    remaining -= to_remove;
                    stack.quantity == 0
                }
                _ => false,
            };
            if emptied {
                *slot = None;
            }
        }

        quantity - remaining
    }

    /// How many more of `item_type` would fit.
    pub fn space_for(&self, item_type: ItemTypeId) -> u32 {
        self.slots
            .iter()
            .map(|slot| match slot {
                None => self.stack_limit,
                Some(stack) if stack.item_type == item_type => {
                    self.stack_limit.saturating_sub(stack.quantity)
                }
                Some(_) => 0,
            })
            .fold(0u32, |acc, v| acc.saturating_add(v))
    }

    /// Get quantity of a specific item type.
    pub fn quantity(&self, item_type: ItemTypeId) -> u32 {
        self.slots
            .iter()
            .flatten()
            .filter(|s| s.item_type == item_type)
            .map(|s| s.quantity)
            .sum()
    }

    /// Total items across all types.
    pub fn total(&self) -> u32 {
        self.slots.iter().flatten().map(|s| s.quantity).sum()
    }

    /// Item counts keyed by type.
    pub fn contents(&self) -> BTreeMap<ItemTypeId, u32> {
        let mut contents = BTreeMap::new();
        for stack in self.slots.iter().flatten() {
            *contents.entry(stack.item_type).or_insert(0) += stack.quantity;
        }
        contents
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}
