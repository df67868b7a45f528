//! Entity store - the ECS world plus the resources every system shares.
//!
//! Entity ids are `bevy_ecs` entities: the index is recycled through the ECS
//! free-list and the generation makes stale ids detectable. Components live in
//! dense tables keyed by the entity index.
//!
//! Besides raw component access, the store knows how to place, capture and
//! restore whole buildings so commands and persistence never touch the grid and
//! component tables separately.

use std::collections::BTreeMap;

use bevy_ecs::prelude::*;
use bevy_ecs::query::QueryFilter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffers::{ItemBuffer, MachineBuffer, MachineBuffers};
use crate::components::*;
use crate::config::SimConfig;
use crate::registry::RecipeRegistry;
use crate::spatial::SpatialGrid;
use crate::systems::{DeltaTime, PowerNetworks, SimTick};

/// Stable handle to an entity. Persisted as `Entity::to_bits()`.
pub type EntityId = Entity;

/// Everything needed to place one building.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub building_type: BuildingType,
    pub position: GridPos,
    #[serde(default)]
    pub rotation: Rotation,
    /// Network to join; ignored for non-electrical buildings.
    #[serde(default)]
    pub network: Option<NetworkId>,
    #[serde(default)]
    pub recipe_index: Option<usize>,
    #[serde(default)]
    pub power_shards: u32,
}

impl PlacementRequest {
    pub fn new(building_type: BuildingType, position: GridPos) -> Self {
        Self {
            building_type,
            position,
            rotation: Rotation::Deg0,
            network: None,
            recipe_index: None,
            power_shards: 0,
        }
    }

    pub fn rotated(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn on_network(mut self, network: NetworkId) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_recipe(mut self, recipe_index: usize) -> Self {
        self.recipe_index = Some(recipe_index);
        self
    }

    pub fn with_shards(mut self, power_shards: u32) -> Self {
        self.power_shards = power_shards;
        self
    }
}

/// Mutable per-building state that survives save/load and removal/undo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingState {
    #[serde(default)]
    pub network: Option<u32>,
    #[serde(default)]
    pub recipe_index: Option<usize>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub power_shards: u32,
    #[serde(default)]
    pub stored_mwh: f64,
    #[serde(default)]
    pub input: BTreeMap<String, u32>,
    #[serde(default)]
    pub output: BTreeMap<String, u32>,
}

/// Full description of a placed building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingRecord {
    /// Id the building had when captured.
    pub id: u64,
    #[serde(rename = "type")]
    pub building_type: BuildingType,
    pub position: GridPos,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default)]
    pub state: BuildingState,
}

impl BuildingRecord {
    /// Same building, ignoring the id it had.
    pub fn same_building(&self, other: &BuildingRecord) -> bool {
        self.building_type == other.building_type
            && self.position == other.position
            && self.rotation == other.rotation
            && self.state == other.state
    }
}

/// Owner of the ECS world.
pub struct EntityStore {
    world: World,
}

impl EntityStore {
    /// Create an empty store with an empty recipe registry.
    pub fn new(config: SimConfig) -> Self {
        Self::with_recipes(config, RecipeRegistry::new())
    }

    /// Create an empty store using the host-provided recipe registry.
    pub fn with_recipes(config: SimConfig, recipes: RecipeRegistry) -> Self {
        let mut world = World::new();

        world.insert_resource(DeltaTime(config.fixed_timestep));
        world.insert_resource(SimTick(0));
        world.insert_resource(SpatialGrid::new(config.chunk_size));
        world.insert_resource(PowerNetworks::new());
        world.insert_resource(MachineBuffers::new(config.production.buffer_slot_cap));
        world.insert_resource(recipes);
        world.insert_resource(config);

        Self { world }
    }

    // ========================================================================
    // Raw entity access
    // ========================================================================

    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> EntityId {
        self.world.spawn(bundle).id()
    }

    /// Remove an entity from every table, the grid and the buffer store.
    ///
    /// Unknown or already removed ids are a no-op returning `false`.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        if !self.contains(id) {
            return false;
        }

        let placement = self
            .world
            .get::<GridPos>(id)
            .copied()
            .zip(self.world.get::<Footprint>(id).copied());
        if let Some((pos, footprint)) = placement {
            self.world
                .resource_mut::<SpatialGrid>()
                .remove_owned(pos, footprint.size_x, footprint.size_z, id);
        }
        self.world.resource_mut::<MachineBuffers>().remove(id);

        self.world.despawn(id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.world.entities().contains(id)
    }

    pub fn get<C: Component>(&self, id: EntityId) -> Option<&C> {
        self.world.get::<C>(id)
    }

    pub fn get_mut<C: Component>(&mut self, id: EntityId) -> Option<Mut<'_, C>> {
        self.world.get_mut::<C>(id)
    }

    /// Attach or replace a component. Returns `false` for unknown ids.
    pub fn insert<C: Component>(&mut self, id: EntityId, component: C) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.world.entity_mut(id).insert(component);
        true
    }

    /// Every entity matching `F`, ordered by id.
    ///
    /// ```ignore
    /// let powered_machines = store.query_ids::<(With<Producer>, With<Consumer>)>();
    /// ```
    pub fn query_ids<F: QueryFilter>(&mut self) -> Vec<EntityId> {
        let mut query = self.world.query_filtered::<Entity, F>();
        let mut ids: Vec<EntityId> = query.iter(&self.world).collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // Buildings
    // ========================================================================

    /// Place a building atomically: nothing is spawned if any cell is taken.
    pub fn place_building(&mut self, request: &PlacementRequest) -> Option<EntityId> {
        let footprint = request.building_type.footprint(request.rotation);
        if !self.grid().can_place(request.position, footprint.size_x, footprint.size_z) {
            debug!(
                building = request.building_type.name(),
                x = request.position.x,
                y = request.position.y,
                z = request.position.z,
                "Placement conflict"
            );
            return None;
        }

        let entity = self.spawn(BuildingBundle::new(
            request.building_type,
            request.position,
            request.rotation,
        ));
        self.attach_building_components(
            entity,
            request.building_type,
            request.network,
            request.recipe_index,
            request.power_shards,
        );
        self.occupy(entity, request.building_type, request.position, request.rotation, footprint);

        Some(entity)
    }

    /// Entity occupying a cell.
    pub fn building_at(&self, pos: GridPos) -> Option<EntityId> {
        self.grid().cell_at(pos).map(|cell| cell.entity)
    }

    /// Snapshot one building, including its buffers and charge.
    pub fn capture(&self, id: EntityId) -> Option<BuildingRecord> {
        let building_type = *self.get::<BuildingType>(id)?;
        let position = *self.get::<GridPos>(id)?;
        let rotation = self.get::<Rotation>(id).copied().unwrap_or_default();
        let producer = self.get::<Producer>(id);
        let buffer = self.buffers().get(id);

        let state = BuildingState {
            network: self.get::<PowerNode>(id).map(|node| node.network.0),
            recipe_index: producer.and_then(|p| p.recipe_index),
            progress: producer.map_or(0.0, |p| f64::from(p.progress)),
            power_shards: producer.map_or(0, |p| p.power_shards),
            stored_mwh: self.get::<PowerStorage>(id).map_or(0.0, |s| s.stored_mwh),
            input: buffer.map(|b| b.input.to_map()).unwrap_or_default(),
            output: buffer.map(|b| b.output.to_map()).unwrap_or_default(),
        };

        Some(BuildingRecord {
            id: id.to_bits(),
            building_type,
            position,
            rotation,
            state,
        })
    }

    /// Recreate a captured building. The entity id may differ from the record's.
    pub fn restore(&mut self, record: &BuildingRecord) -> Option<EntityId> {
        let footprint = record.building_type.footprint(record.rotation);
        if !self.grid().can_place(record.position, footprint.size_x, footprint.size_z) {
            debug!(id = record.id, "Cannot restore building, cells are occupied");
            return None;
        }

        let state = &record.state;
        let entity = self.spawn(BuildingBundle::new(
            record.building_type,
            record.position,
            record.rotation,
        ));
        self.attach_building_components(
            entity,
            record.building_type,
            state.network.map(NetworkId),
            state.recipe_index,
            state.power_shards,
        );

        if let Some(mut producer) = self.get_mut::<Producer>(entity) {
            producer.progress = state.progress as f32;
        }
        if let Some(mut storage) = self.get_mut::<PowerStorage>(entity) {
            let capacity = storage.capacity_mwh;
            storage.stored_mwh = state.stored_mwh.clamp(0.0, capacity);
        }
        if !state.input.is_empty() || !state.output.is_empty() {
            let mut buffers = self.world.resource_mut::<MachineBuffers>();
            let slot_cap = buffers.slot_cap();
            buffers.insert(
                entity,
                MachineBuffer {
                    input: ItemBuffer::from_map(slot_cap, &state.input),
                    output: ItemBuffer::from_map(slot_cap, &state.output),
                },
            );
        }

        self.occupy(entity, record.building_type, record.position, record.rotation, footprint);
        Some(entity)
    }

    /// Every building, ordered by id.
    pub fn records(&mut self) -> Vec<BuildingRecord> {
        self.query_ids::<With<BuildingType>>()
            .into_iter()
            .filter_map(|id| self.capture(id))
            .collect()
    }

    pub fn building_count(&mut self) -> usize {
        let mut query = self.world.query_filtered::<(), With<BuildingType>>();
        query.iter(&self.world).count()
    }

    /// Remove every building and forget every network.
    pub fn clear(&mut self) {
        for id in self.query_ids::<With<BuildingType>>() {
            self.despawn(id);
        }
        self.world.resource_mut::<PowerNetworks>().clear();
        self.world.resource_mut::<SpatialGrid>().clear();
        self.world.resource_mut::<MachineBuffers>().clear();
    }

    fn attach_building_components(
        &mut self,
        entity: EntityId,
        building_type: BuildingType,
        network: Option<NetworkId>,
        recipe_index: Option<usize>,
        power_shards: u32,
    ) {
        let spec = building_type.spec();
        let network = network.filter(|_| building_type.is_electrical());
        if let Some(network) = network {
            self.world.resource_mut::<PowerNetworks>().ensure(network);
        }

        let mut entity_mut = self.world.entity_mut(entity);
        if let Some(network) = network {
            entity_mut.insert(PowerNode::new(network));
        }
        if spec.generator_mw > 0.0 {
            entity_mut.insert(Generator {
                output_mw: spec.generator_mw,
            });
        }
        if spec.bonus_flat_mw > 0.0 {
            entity_mut.insert(BonusProducer {
                flat_output_mw: spec.bonus_flat_mw,
            });
        }
        if spec.base_draw_mw > 0.0 {
            entity_mut.insert(Consumer::new(spec.base_draw_mw));
        }
        if spec.storage_mwh > 0.0 {
            entity_mut.insert(PowerStorage::empty(spec.storage_mwh));
        }
        if spec.producer {
            entity_mut.insert(Producer::new(recipe_index, power_shards));
        }
    }

    fn occupy(
        &mut self,
        entity: EntityId,
        building_type: BuildingType,
        position: GridPos,
        rotation: Rotation,
        footprint: Footprint,
    ) {
        let placed = self.world.resource_mut::<SpatialGrid>().place(
            position,
            footprint.size_x,
            footprint.size_z,
            entity,
            building_type,
            rotation,
        );
        debug_assert!(placed, "footprint was checked before spawning");
    }

    // ========================================================================
    // Resources
    // ========================================================================

    pub fn grid(&self) -> &SpatialGrid {
        self.world.resource::<SpatialGrid>()
    }

    pub fn networks(&self) -> &PowerNetworks {
        self.world.resource::<PowerNetworks>()
    }

    pub fn networks_mut(&mut self) -> Mut<'_, PowerNetworks> {
        self.world.resource_mut::<PowerNetworks>()
    }

    pub fn buffers(&self) -> &MachineBuffers {
        self.world.resource::<MachineBuffers>()
    }

    pub fn buffers_mut(&mut self) -> Mut<'_, MachineBuffers> {
        self.world.resource_mut::<MachineBuffers>()
    }

    pub fn recipes(&self) -> &RecipeRegistry {
        self.world.resource::<RecipeRegistry>()
    }

    pub fn config(&self) -> &SimConfig {
        self.world.resource::<SimConfig>()
    }

    /// Direct access to the ECS world (for systems and advanced usage).
    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}
