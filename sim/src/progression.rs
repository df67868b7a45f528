//! Player inventory, milestone deliveries and recipe unlocks.
//!
//! Deliveries are partial: whatever the inventory holds toward a milestone's
//! cost is handed in and remembered, and the milestone completes once every
//! cost line is covered.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::Milestone;

/// Result of one delivery attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Items moved from the inventory this call.
    pub delivered: BTreeMap<String, u32>,
    /// The milestone is complete (now or already).
    pub completed: bool,
    /// Recipes unlocked by this call.
    pub unlocked_recipes: Vec<String>,
}

/// Progression state owned by the player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progression {
    pub inventory: BTreeMap<String, u32>,
    pub unlocked_milestones: BTreeSet<String>,
    pub unlocked_recipes: BTreeSet<String>,
    /// Milestone id → item → amount handed in so far.
    pub milestone_progress: BTreeMap<String, BTreeMap<String, u32>>,
}

impl Progression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, item: &str) -> u32 {
        self.inventory.get(item).copied().unwrap_or(0)
    }

    pub fn add_items(&mut self, item: &str, amount: u32) {
        if amount == 0 {
            return;
        }
        let count = self.inventory.entry(item.to_string()).or_insert(0);
        *count = count.saturating_add(amount);
    }

    /// Remove up to `amount`; returns how many were removed.
    pub fn take_items(&mut self, item: &str, amount: u32) -> u32 {
        let Some(count) = self.inventory.get_mut(item) else {
            return 0;
        };
        let taken = amount.min(*count);
        *count -= taken;
        if *count == 0 {
            self.inventory.remove(item);
        }
        taken
    }

    pub fn is_completed(&self, milestone_id: &str) -> bool {
        self.unlocked_milestones.contains(milestone_id)
    }

    pub fn is_recipe_unlocked(&self, recipe_id: &str) -> bool {
        self.unlocked_recipes.contains(recipe_id)
    }

    pub fn unlock_recipe(&mut self, recipe_id: impl Into<String>) -> bool {
        self.unlocked_recipes.insert(recipe_id.into())
    }

    /// Amount of `item` handed in toward a milestone.
    pub fn delivered(&self, milestone_id: &str, item: &str) -> u32 {
        self.milestone_progress
            .get(milestone_id)
            .and_then(|items| items.get(item))
            .copied()
            .unwrap_or(0)
    }

    /// Outstanding cost per item, omitting covered lines.
    pub fn remaining(&self, milestone: &Milestone) -> BTreeMap<String, u32> {
        if self.is_completed(&milestone.id) {
            return BTreeMap::new();
        }
        total_cost(milestone)
            .into_iter()
            .filter_map(|(item, amount)| {
                let left = amount.saturating_sub(self.delivered(&milestone.id, item));
                (left > 0).then(|| (item.to_string(), left))
            })
            .collect()
    }

    /// Hand in what the inventory holds toward `milestone`.
    pub fn deliver(&mut self, milestone: &Milestone) -> DeliveryOutcome {
        if self.is_completed(&milestone.id) {
            return DeliveryOutcome {
                completed: true,
                ..Default::default()
            };
        }

        let mut outcome = DeliveryOutcome::default();
        for (item, amount) in total_cost(milestone) {
            let needed = amount.saturating_sub(self.delivered(&milestone.id, item));
            let given = self.take_items(item, needed);
            if given == 0 {
                continue;
            }
            *self
                .milestone_progress
                .entry(milestone.id.clone())
                .or_default()
                .entry(item.to_string())
                .or_insert(0) += given;
            outcome.delivered.insert(item.to_string(), given);
        }

        if self.remaining(milestone).is_empty() {
            self.milestone_progress.remove(&milestone.id);
            self.unlocked_milestones.insert(milestone.id.clone());
            for recipe in &milestone.unlocks {
                if self.unlock_recipe(recipe.clone()) {
                    outcome.unlocked_recipes.push(recipe.clone());
                }
            }
            info!(
                milestone = %milestone.id,
                tier = milestone.tier,
                unlocked = outcome.unlocked_recipes.len(),
                "Milestone completed"
            );
            outcome.completed = true;
        }

        outcome
    }
}

/// Cost per item, with repeated lines for the same item summed.
fn total_cost(milestone: &Milestone) -> BTreeMap<&str, u32> {
    let mut total: BTreeMap<&str, u32> = BTreeMap::new();
    for stack in &milestone.cost {
        let amount = total.entry(stack.item.as_str()).or_insert(0);
        *amount = amount.saturating_add(stack.amount);
    }
    total
}
