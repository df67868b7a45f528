//! Bounded per-machine item buffers.
//!
//! Every slot (item id) is capped. Adding beyond the cap accepts what fits and
//! reports the accepted amount; nothing is ever dropped silently.

use std::collections::{BTreeMap, HashMap};

use bevy_ecs::prelude::*;

use crate::registry::ItemStack;

/// Item id → count, each slot capped at `slot_cap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemBuffer {
    slot_cap: u32,
    items: BTreeMap<String, u32>,
}

impl ItemBuffer {
    pub fn new(slot_cap: u32) -> Self {
        Self {
            slot_cap,
            items: BTreeMap::new(),
        }
    }

    pub fn slot_cap(&self) -> u32 {
        self.slot_cap
    }

    pub fn count(&self, item: &str) -> u32 {
        self.items.get(item).copied().unwrap_or(0)
    }

    /// Free room in one slot.
    pub fn room_for(&self, item: &str) -> u32 {
        self.slot_cap.saturating_sub(self.count(item))
    }

    /// Add up to `amount`; returns how many were accepted.
    pub fn add(&mut self, item: &str, amount: u32) -> u32 {
        let accepted = amount.min(self.room_for(item));
        if accepted > 0 {
            *self.items.entry(item.to_string()).or_insert(0) += accepted;
        }
        accepted
    }

    /// Remove up to `amount`; returns how many were removed.
    pub fn take(&mut self, item: &str, amount: u32) -> u32 {
        let Some(count) = self.items.get_mut(item) else {
            return 0;
        };
        let taken = amount.min(*count);
        *count -= taken;
        if *count == 0 {
            self.items.remove(item);
        }
        taken
    }

    /// Every stack fits without exceeding any slot cap.
    pub fn can_accept_all(&self, stacks: &[ItemStack]) -> bool {
        let mut needed: BTreeMap<&str, u32> = BTreeMap::new();
        for stack in stacks {
            *needed.entry(stack.item.as_str()).or_insert(0) += stack.amount;
        }
        needed
            .into_iter()
            .all(|(item, amount)| amount <= self.room_for(item))
    }

    /// Every stack is fully present.
    pub fn has_all(&self, stacks: &[ItemStack]) -> bool {
        let mut needed: BTreeMap<&str, u32> = BTreeMap::new();
        for stack in stacks {
            *needed.entry(stack.item.as_str()).or_insert(0) += stack.amount;
        }
        needed
            .into_iter()
            .all(|(item, amount)| self.count(item) >= amount)
    }

    /// Remove every stack, or nothing if any is short.
    pub fn consume_all(&mut self, stacks: &[ItemStack]) -> bool {
        if !self.has_all(stacks) {
            return false;
        }
        for stack in stacks {
            self.take(&stack.item, stack.amount);
        }
        true
    }

    /// Add every stack, or nothing if any would overflow.
    pub fn add_all(&mut self, stacks: &[ItemStack]) -> bool {
        if !self.can_accept_all(stacks) {
            return false;
        }
        for stack in stacks {
            self.add(&stack.item, stack.amount);
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy of the contents, ordered by item id.
    pub fn to_map(&self) -> BTreeMap<String, u32> {
        self.items.clone()
    }

    /// Empty the buffer, returning what it held.
    pub fn drain(&mut self) -> BTreeMap<String, u32> {
        std::mem::take(&mut self.items)
    }

    /// Rebuild from a saved map, clamping each slot to the cap.
    pub fn from_map(slot_cap: u32, items: &BTreeMap<String, u32>) -> Self {
        let mut buffer = Self::new(slot_cap);
        for (item, &amount) in items {
            buffer.add(item, amount);
        }
        buffer
    }
}

/// Input and output side of one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineBuffer {
    pub input: ItemBuffer,
    pub output: ItemBuffer,
}

impl MachineBuffer {
    pub fn new(slot_cap: u32) -> Self {
        Self {
            input: ItemBuffer::new(slot_cap),
            output: ItemBuffer::new(slot_cap),
        }
    }
}

/// Buffers of every producer, created on first access.
#[derive(Resource, Debug)]
pub struct MachineBuffers {
    slot_cap: u32,
    buffers: HashMap<Entity, MachineBuffer>,
}

impl Default for MachineBuffers {
    fn default() -> Self {
        Self::new(200)
    }
}

impl MachineBuffers {
    pub fn new(slot_cap: u32) -> Self {
        Self {
            slot_cap,
            buffers: HashMap::new(),
        }
    }

    pub fn slot_cap(&self) -> u32 {
        self.slot_cap
    }

    pub fn get(&self, entity: Entity) -> Option<&MachineBuffer> {
        self.buffers.get(&entity)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut MachineBuffer> {
        self.buffers.get_mut(&entity)
    }

    /// Buffer for `entity`, allocated lazily.
    pub fn get_or_create(&mut self, entity: Entity) -> &mut MachineBuffer {
        let slot_cap = self.slot_cap;
        self.buffers
            .entry(entity)
            .or_insert_with(|| MachineBuffer::new(slot_cap))
    }

    pub fn insert(&mut self, entity: Entity, buffer: MachineBuffer) {
        self.buffers.insert(entity, buffer);
    }

    pub fn remove(&mut self, entity: Entity) -> Option<MachineBuffer> {
        self.buffers.remove(&entity)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
