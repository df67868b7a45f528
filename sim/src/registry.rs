//! Recipe and milestone registries.
//!
//! The host parses its game-data files and hands the results to the core as
//! plain registry values at startup. Both registries are inserted into the ECS
//! world as resources; nothing here is process-global.

use std::collections::HashMap;

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// A quantity of one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStack {
    pub item: String,
    pub amount: u32,
}

impl ItemStack {
    pub fn new(item: impl Into<String>, amount: u32) -> Self {
        Self {
            item: item.into(),
            amount,
        }
    }
}

/// One production cycle: ordered ingredients in, ordered products out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    /// Cycle duration in seconds at speed 1.0.
    pub duration: f32,
    pub ingredients: Vec<ItemStack>,
    pub products: Vec<ItemStack>,
}

impl Recipe {
    pub fn new(
        id: impl Into<String>,
        duration: f32,
        ingredients: Vec<ItemStack>,
        products: Vec<ItemStack>,
    ) -> Self {
        Self {
            id: id.into(),
            duration,
            ingredients,
            products,
        }
    }
}

/// Recipes addressable by index (what producers store) and by id.
#[derive(Resource, Debug, Clone, Default)]
pub struct RecipeRegistry {
    recipes: Vec<Recipe>,
    by_id: HashMap<String, usize>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list, validating every entry.
    pub fn from_recipes(recipes: impl IntoIterator<Item = Recipe>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for recipe in recipes {
            registry.register(recipe)?;
        }
        Ok(registry)
    }

    /// Add a recipe and return its index.
    pub fn register(&mut self, recipe: Recipe) -> Result<usize, RegistryError> {
        if self.by_id.contains_key(&recipe.id) {
            return Err(RegistryError::DuplicateRecipe(recipe.id));
        }
        if !(recipe.duration.is_finite() && recipe.duration > 0.0) {
            return Err(RegistryError::InvalidDuration(recipe.id));
        }
        if recipe.products.is_empty() {
            return Err(RegistryError::NoProducts(recipe.id));
        }
        let index = self.recipes.len();
        self.by_id.insert(recipe.id.clone(), index);
        self.recipes.push(recipe);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&Recipe> {
        self.recipes.get(index)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn by_id(&self, id: &str) -> Option<&Recipe> {
        self.index_of(id).and_then(|index| self.get(index))
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.iter()
    }
}

/// A progression step: deliver `cost`, receive `unlocks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub tier: u32,
    pub name: String,
    pub cost: Vec<ItemStack>,
    /// Recipe ids unlocked on completion.
    pub unlocks: Vec<String>,
}

/// Milestones in tier order.
#[derive(Resource, Debug, Clone, Default)]
pub struct MilestoneRegistry {
    milestones: Vec<Milestone>,
}

impl MilestoneRegistry {
    /// Build a registry; milestones are kept sorted by tier, stable within a tier.
    pub fn from_milestones(milestones: impl IntoIterator<Item = Milestone>) -> Result<Self, RegistryError> {
        let mut list: Vec<Milestone> = Vec::new();
        for milestone in milestones {
            if list.iter().any(|m| m.id == milestone.id) {
                return Err(RegistryError::DuplicateMilestone(milestone.id));
            }
            list.push(milestone);
        }
        list.sort_by_key(|m| m.tier);
        Ok(Self { milestones: list })
    }

    pub fn get(&self, id: &str) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Milestone> {
        self.milestones.iter()
    }

    pub fn len(&self) -> usize {
        self.milestones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.milestones.is_empty()
    }
}
