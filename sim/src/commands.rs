//! Reversible player commands and the undo/redo executor.
//!
//! Commands are plain data: a tagged enum whose variants carry only what they
//! need to mutate the entity store, plus the state they captured while applying
//! so they can revert. The serialized form is the wire format a transport
//! replays on a peer:
//!
//! ```json
//! {"type":"remove_building","timestamp":1700000000000,"position":{"x":0,"y":0,"z":0}}
//! ```
//!
//! Captured state is never serialized. Remove and configure commands target a
//! grid position rather than an entity id, so a command stays valid after undo
//! and redo hand the building a new id.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::components::*;
use crate::entity_store::{BuildingRecord, EntityId, EntityStore, PlacementRequest};

/// A mutation of the world that can be undone.
pub trait ReversibleCommand {
    /// Perform the mutation. `false` means nothing changed.
    fn apply(&mut self, store: &mut EntityStore) -> bool;

    /// Undo the last successful `apply`.
    fn revert(&mut self, store: &mut EntityStore);

    /// Creation time in Unix milliseconds.
    fn timestamp(&self) -> i64;

    /// JSON wire form.
    fn to_wire(&self) -> Result<String, serde_json::Error>;
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// PLACE
// ============================================================================

/// Place one building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceBuilding {
    pub timestamp: i64,
    pub building_type: BuildingType,
    pub position: GridPos,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default)]
    pub network: Option<NetworkId>,
    #[serde(default)]
    pub recipe_index: Option<usize>,
    #[serde(default)]
    pub power_shards: u32,
    #[serde(skip)]
    placed: Option<EntityId>,
    /// Full state captured on revert, so a redo brings back buffers too.
    #[serde(skip)]
    undone: Option<BuildingRecord>,
}

impl PlaceBuilding {
    pub fn request(&self) -> PlacementRequest {
        PlacementRequest {
            building_type: self.building_type,
            position: self.position,
            rotation: self.rotation,
            network: self.network,
            recipe_index: self.recipe_index,
            power_shards: self.power_shards,
        }
    }

    /// Entity created by the last successful apply.
    pub fn placed(&self) -> Option<EntityId> {
        self.placed
    }
}

impl ReversibleCommand for PlaceBuilding {
    fn apply(&mut self, store: &mut EntityStore) -> bool {
        self.placed = match self.undone.take() {
            Some(record) => store.restore(&record),
            None => store.place_building(&self.request()),
        };
        self.placed.is_some()
    }

    fn revert(&mut self, store: &mut EntityStore) {
        if let Some(id) = self.placed.take() {
            self.undone = store.capture(id);
            store.despawn(id);
        }
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Command::PlaceBuilding(self.clone()))
    }
}

// ============================================================================
// REMOVE
// ============================================================================

/// Remove whatever building covers a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveBuilding {
    pub timestamp: i64,
    pub position: GridPos,
    #[serde(skip)]
    removed: Option<BuildingRecord>,
}

impl ReversibleCommand for RemoveBuilding {
    fn apply(&mut self, store: &mut EntityStore) -> bool {
        let Some(id) = store.building_at(self.position) else {
            return false;
        };
        let Some(record) = store.capture(id) else {
            return false;
        };
        store.despawn(id);
        self.removed = Some(record);
        true
    }

    fn revert(&mut self, store: &mut EntityStore) {
        let Some(record) = self.removed.take() else {
            return;
        };
        if store.restore(&record).is_none() {
            warn!(
                building = record.building_type.name(),
                x = record.position.x,
                y = record.position.y,
                z = record.position.z,
                "Cannot restore removed building, cells are occupied"
            );
        }
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Command::RemoveBuilding(self.clone()))
    }
}

// ============================================================================
// CONFIGURE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct ProducerSettings {
    recipe_index: Option<usize>,
    power_shards: u32,
    progress: f32,
}

/// Change the recipe and power shards of the producer covering a cell.
///
/// Progress resets when the recipe changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigureProducer {
    pub timestamp: i64,
    pub position: GridPos,
    pub recipe_index: Option<usize>,
    #[serde(default)]
    pub power_shards: u32,
    #[serde(skip)]
    previous: Option<ProducerSettings>,
}

impl ReversibleCommand for ConfigureProducer {
    fn apply(&mut self, store: &mut EntityStore) -> bool {
        if self
            .recipe_index
            .is_some_and(|index| store.recipes().get(index).is_none())
        {
            debug!(recipe_index = ?self.recipe_index, "Unknown recipe, configure rejected");
            return false;
        }
        let Some(id) = store.building_at(self.position) else {
            return false;
        };
        let Some(mut producer) = store.get_mut::<Producer>(id) else {
            return false;
        };

        self.previous = Some(ProducerSettings {
            recipe_index: producer.recipe_index,
            power_shards: producer.power_shards,
            progress: producer.progress,
        });
        if producer.recipe_index != self.recipe_index {
            producer.progress = 0.0;
        }
        producer.recipe_index = self.recipe_index;
        producer.power_shards = self.power_shards;
        true
    }

    fn revert(&mut self, store: &mut EntityStore) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        let Some(id) = store.building_at(self.position) else {
            return;
        };
        if let Some(mut producer) = store.get_mut::<Producer>(id) {
            producer.recipe_index = previous.recipe_index;
            producer.power_shards = previous.power_shards;
            producer.progress = previous.progress;
        }
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Command::ConfigureProducer(self.clone()))
    }
}

// ============================================================================
// COMMAND ENUM
// ============================================================================

/// Every player command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    PlaceBuilding(PlaceBuilding),
    RemoveBuilding(RemoveBuilding),
    ConfigureProducer(ConfigureProducer),
}

impl Command {
    pub fn place(request: PlacementRequest) -> Self {
        Command::PlaceBuilding(PlaceBuilding {
            timestamp: now_millis(),
            building_type: request.building_type,
            position: request.position,
            rotation: request.rotation,
            network: request.network,
            recipe_index: request.recipe_index,
            power_shards: request.power_shards,
            placed: None,
            undone: None,
        })
    }

    pub fn remove(position: GridPos) -> Self {
        Command::RemoveBuilding(RemoveBuilding {
            timestamp: now_millis(),
            position,
            removed: None,
        })
    }

    pub fn configure(position: GridPos, recipe_index: Option<usize>, power_shards: u32) -> Self {
        Command::ConfigureProducer(ConfigureProducer {
            timestamp: now_millis(),
            position,
            recipe_index,
            power_shards,
            previous: None,
        })
    }

    /// Rebuild a command from its wire form.
    pub fn from_wire(wire: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(wire)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::PlaceBuilding(_) => "place_building",
            Command::RemoveBuilding(_) => "remove_building",
            Command::ConfigureProducer(_) => "configure_producer",
        }
    }

    fn inner(&mut self) -> &mut dyn ReversibleCommand {
        match self {
            Command::PlaceBuilding(cmd) => cmd,
            Command::RemoveBuilding(cmd) => cmd,
            Command::ConfigureProducer(cmd) => cmd,
        }
    }
}

impl ReversibleCommand for Command {
    fn apply(&mut self, store: &mut EntityStore) -> bool {
        self.inner().apply(store)
    }

    fn revert(&mut self, store: &mut EntityStore) {
        self.inner().revert(store);
    }

    fn timestamp(&self) -> i64 {
        match self {
            Command::PlaceBuilding(cmd) => cmd.timestamp,
            Command::RemoveBuilding(cmd) => cmd.timestamp,
            Command::ConfigureProducer(cmd) => cmd.timestamp,
        }
    }

    fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// Bounded undo history plus a redo stack.
#[derive(Debug)]
pub struct CommandExecutor {
    undo_stack: VecDeque<Command>,
    redo_stack: Vec<Command>,
    limit: usize,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(100)
    }
}

impl CommandExecutor {
    pub fn new(limit: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            limit,
        }
    }

    /// Apply a command and record it. Failed commands are discarded.
    pub fn execute(&mut self, mut command: Command, store: &mut EntityStore) -> bool {
        if !command.apply(store) {
            debug!(kind = command.kind(), "Command had no effect, discarded");
            return false;
        }
        debug!(kind = command.kind(), timestamp = command.timestamp(), "Command executed");
        self.redo_stack.clear();
        self.push_undo(command);
        true
    }

    /// Revert the most recent command. `false` when there is nothing to undo.
    pub fn undo(&mut self, store: &mut EntityStore) -> bool {
        let Some(mut command) = self.undo_stack.pop_back() else {
            return false;
        };
        command.revert(store);
        debug!(kind = command.kind(), "Command undone");
        self.redo_stack.push(command);
        true
    }

    /// Re-apply the most recently undone command.
    pub fn redo(&mut self, store: &mut EntityStore) -> bool {
        let Some(mut command) = self.redo_stack.pop() else {
            return false;
        };
        if !command.apply(store) {
            debug!(kind = command.kind(), "Redo failed, command dropped");
            return false;
        }
        self.push_undo(command);
        true
    }

    fn push_undo(&mut self, command: Command) {
        self.undo_stack.push_back(command);
        while self.undo_stack.len() > self.limit {
            self.undo_stack.pop_front();
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Recorded commands, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Command> {
        self.undo_stack.iter()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::registry::{ItemStack, Recipe, RecipeRegistry};

    fn store() -> EntityStore {
        let recipes = RecipeRegistry::from_recipes(vec![
            Recipe::new("iron_ingot", 2.0, vec![ItemStack::new("iron_ore", 1)], vec![ItemStack::new("iron_ingot", 1)]),
            Recipe::new("copper_ingot", 2.0, vec![ItemStack::new("copper_ore", 1)], vec![ItemStack::new("copper_ingot", 1)]),
        ])
        .unwrap();
        EntityStore::with_recipes(SimConfig::default(), recipes)
    }

    /// World contents independent of entity ids.
    fn layout(store: &mut EntityStore) -> Vec<BuildingRecord> {
        let mut records: Vec<_> = store
            .records()
            .into_iter()
            .map(|mut r| {
                r.id = 0;
                r
            })
            .collect();
        records.sort_by_key(|r| r.position);
        records
    }

    #[test]
    fn test_undo_redo_restores_state() {
        let mut store = store();
        let mut executor = CommandExecutor::default();

        let a = Command::place(PlacementRequest::new(BuildingType::Miner, GridPos::new(0, 0, 0)));
        let b = Command::place(PlacementRequest::new(BuildingType::Smelter, GridPos::new(4, 0, 0)).with_recipe(0));
        assert!(executor.execute(a, &mut store));
        let after_a = layout(&mut store);
        assert!(executor.execute(b, &mut store));
        let after_b = layout(&mut store);

        assert!(executor.undo(&mut store));
        assert_eq!(layout(&mut store), after_a);
        assert_eq!(store.grid().occupied_cells(), 4);

        assert!(executor.redo(&mut store));
        assert_eq!(layout(&mut store), after_b);
        assert_eq!(store.grid().occupied_cells(), 6);
    }

    #[test]
    fn test_undo_past_history_is_noop() {
        let mut store = store();
        let mut executor = CommandExecutor::default();
        executor.execute(
            Command::place(PlacementRequest::new(BuildingType::Foundation, GridPos::new(0, 0, 0))),
            &mut store,
        );

        assert!(executor.undo(&mut store));
        let empty = layout(&mut store);
        assert!(!executor.undo(&mut store));
        assert_eq!(layout(&mut store), empty);
        assert!(!CommandExecutor::default().redo(&mut store));
    }

    #[test]
    fn test_failed_command_not_recorded() {
        let mut store = store();
        let mut executor = CommandExecutor::default();
        let place = PlacementRequest::new(BuildingType::Miner, GridPos::new(0, 0, 0));
        assert!(executor.execute(Command::place(place), &mut store));
        assert!(!executor.execute(Command::place(place), &mut store));
        assert!(!executor.execute(Command::remove(GridPos::new(50, 0, 50)), &mut store));
        assert_eq!(executor.undo_len(), 1);
    }

    #[test]
    fn test_execute_clears_redo() {
        let mut store = store();
        let mut executor = CommandExecutor::default();
        executor.execute(
            Command::place(PlacementRequest::new(BuildingType::Foundation, GridPos::new(0, 0, 0))),
            &mut store,
        );
        executor.undo(&mut store);
        assert!(executor.can_redo());

        executor.execute(
            Command::place(PlacementRequest::new(BuildingType::Foundation, GridPos::new(1, 0, 0))),
            &mut store,
        );
        assert!(!executor.can_redo());
    }

    #[test]
    fn test_history_limit_evicts_oldest() {
        let mut store = store();
        let mut executor = CommandExecutor::new(2);
        for x in 0..3 {
            executor.execute(
                Command::place(PlacementRequest::new(BuildingType::Foundation, GridPos::new(x, 0, 0))),
                &mut store,
            );
        }
        assert_eq!(executor.undo_len(), 2);
        assert!(executor.undo(&mut store));
        assert!(executor.undo(&mut store));
        assert!(!executor.undo(&mut store));
        // The evicted first placement stays.
        assert_eq!(store.building_count(), 1);
        assert!(store.building_at(GridPos::new(0, 0, 0)).is_some());
    }

    #[test]
    fn test_remove_undo_restores_contents() {
        let mut store = store();
        let mut executor = CommandExecutor::default();
        let smelter = store
            .place_building(&PlacementRequest::new(BuildingType::Smelter, GridPos::new(2, 0, 2)).with_recipe(0))
            .unwrap();
        store.get_mut::<Producer>(smelter).unwrap().progress = 0.5;
        store.buffers_mut().get_or_create(smelter).output.add("iron_ingot", 7);
        let before = layout(&mut store);

        // Any covered cell selects the building.
        assert!(executor.execute(Command::remove(GridPos::new(2, 0, 3)), &mut store));
        assert_eq!(store.building_count(), 0);

        assert!(executor.undo(&mut store));
        assert_eq!(layout(&mut store), before);

        assert!(executor.redo(&mut store));
        assert_eq!(store.building_count(), 0);
    }

    #[test]
    fn test_remove_undo_onto_occupied_cells_keeps_occupant() {
        let mut store = store();
        let mut executor = CommandExecutor::default();
        let pos = GridPos::new(2, 0, 2);
        executor.execute(Command::place(PlacementRequest::new(BuildingType::Miner, pos)), &mut store);
        assert!(executor.execute(Command::remove(pos), &mut store));

        // Something else took the cells outside the history.
        let occupant = store
            .place_building(&PlacementRequest::new(BuildingType::Conveyor, GridPos::new(3, 0, 3)))
            .unwrap();

        assert!(executor.undo(&mut store));
        assert_eq!(store.building_count(), 1);
        assert_eq!(store.building_at(GridPos::new(3, 0, 3)), Some(occupant));
        assert_eq!(store.building_at(pos), None);
        assert_eq!(store.grid().occupied_cells(), 1);
    }

    #[test]
    fn test_configure_and_revert() {
        let mut store = store();
        let mut executor = CommandExecutor::default();
        let pos = GridPos::new(0, 0, 0);
        let smelter = store
            .place_building(&PlacementRequest::new(BuildingType::Smelter, pos).with_recipe(0))
            .unwrap();
        store.get_mut::<Producer>(smelter).unwrap().progress = 0.25;

        assert!(executor.execute(Command::configure(pos, Some(1), 2), &mut store));
        let producer = *store.get::<Producer>(smelter).unwrap();
        assert_eq!(producer.recipe_index, Some(1));
        assert_eq!(producer.power_shards, 2);
        assert_eq!(producer.progress, 0.0);

        assert!(executor.undo(&mut store));
        let producer = *store.get::<Producer>(smelter).unwrap();
        assert_eq!(producer.recipe_index, Some(0));
        assert_eq!(producer.power_shards, 0);
        assert_eq!(producer.progress, 0.25);

        // Unknown recipe or a non-producer target is rejected.
        assert!(!executor.execute(Command::configure(pos, Some(9), 0), &mut store));
        store.place_building(&PlacementRequest::new(BuildingType::Foundation, GridPos::new(9, 0, 9)));
        assert!(!executor.execute(Command::configure(GridPos::new(9, 0, 9), None, 0), &mut store));
    }

    #[test]
    fn test_wire_replay_on_peer() {
        let command = Command::place(
            PlacementRequest::new(BuildingType::CoalGenerator, GridPos::new(-5, 0, 3))
                .rotated(Rotation::Deg90)
                .on_network(NetworkId(2)),
        );
        let wire = command.to_wire().unwrap();
        assert!(wire.contains("\"type\":\"place_building\""));
        assert!(wire.contains("\"timestamp\""));

        let replayed = Command::from_wire(&wire).unwrap();
        assert_eq!(replayed, command);
        assert_eq!(replayed.timestamp(), command.timestamp());

        let mut local = store();
        let mut peer = store();
        CommandExecutor::default().execute(command, &mut local);
        CommandExecutor::default().execute(replayed, &mut peer);
        assert_eq!(layout(&mut local), layout(&mut peer));
    }

    #[test]
    fn test_rejects_unknown_wire_type() {
        assert!(Command::from_wire(r#"{"type":"launch_rocket","timestamp":0}"#).is_err());
    }
}
