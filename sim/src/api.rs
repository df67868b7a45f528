//! Public API for the simulation.
//!
//! `SimWorld` is the orchestrator a host loop drives. It owns the entity store,
//! the system schedule, the command executor and the player-facing state
//! (progression, game state, camera).
//!
//! ## Fixed Timestep
//!
//! The simulation uses a fixed timestep internally (default 30 Hz). When
//! `step(dt)` is called, time is accumulated and as many fixed updates run as
//! fit, possibly none. Leftover time carries over to the next call. One call
//! runs at most `max_ticks_per_step` ticks; a longer stall is dropped rather
//! than replayed.
//!
//! ## Tick Order
//!
//! 1. Queued commands, undo and redo requests, in submission order.
//! 2. `power_network_system`.
//! 3. `production_system`.
//! 4. On the autosave cadence: prune orphan networks and empty chunks, then
//!    hand a snapshot to the autosave worker (if one is running).

use std::collections::{BTreeMap, VecDeque};
use std::io;

use bevy_ecs::prelude::*;
use tracing::{debug, info, warn};

use crate::commands::{Command, CommandExecutor};
use crate::components::*;
use crate::config::SimConfig;
use crate::entity_store::{EntityId, EntityStore, PlacementRequest};
use crate::error::{ConfigError, PersistError};
use crate::persistence::{AutosaveWorker, PersistenceManager, SaveSnapshot, SlotStorage, SAVE_VERSION};
use crate::progression::{DeliveryOutcome, Progression};
use crate::registry::{MilestoneRegistry, RecipeRegistry};
use crate::spatial::SpatialGrid;
use crate::systems::*;
use crate::world::{CameraPose, FrameSnapshot, GameState, InteractionMode, UiSnapshot};

/// Work queued for the start of the next tick.
#[derive(Debug, Clone)]
enum PendingAction {
    Execute(Command),
    Undo,
    Redo,
}

/// The main simulation world container.
pub struct SimWorld {
    store: EntityStore,
    schedule: Schedule,
    executor: CommandExecutor,
    pending: VecDeque<PendingAction>,
    progression: Progression,
    state: GameState,
    camera: CameraPose,
    tick: u64,
    time: f64,
    /// Accumulated time for fixed timestep.
    time_accumulator: f32,
    /// Simulated seconds since the last maintenance pass.
    maintenance_timer: f32,
    autosave: Option<AutosaveWorker>,
}

impl SimWorld {
    /// Create an empty world with default configuration and no game data.
    pub fn new() -> Self {
        Self::assemble(SimConfig::default(), RecipeRegistry::new(), MilestoneRegistry::default())
    }

    pub fn with_config(config: SimConfig) -> Result<Self, ConfigError> {
        Self::with_registries(config, RecipeRegistry::new(), MilestoneRegistry::default())
    }

    /// Create a world with the host's recipe and milestone registries.
    ///
    /// Fails if the configuration does not pass [`SimConfig::validate`].
    pub fn with_registries(
        config: SimConfig,
        recipes: RecipeRegistry,
        milestones: MilestoneRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(config, recipes, milestones))
    }

    fn assemble(config: SimConfig, recipes: RecipeRegistry, milestones: MilestoneRegistry) -> Self {
        let history_limit = config.history_limit;
        let mut store = EntityStore::with_recipes(config, recipes);
        store.world_mut().insert_resource(milestones);

        let mut schedule = Schedule::default();
        // Production must see this tick's blackout state.
        schedule.add_systems((power_network_system, production_system).chain());

        Self {
            store,
            schedule,
            executor: CommandExecutor::new(history_limit),
            pending: VecDeque::new(),
            progression: Progression::new(),
            state: GameState::default(),
            camera: CameraPose::default(),
            tick: 0,
            time: 0.0,
            time_accumulator: 0.0,
            maintenance_timer: 0.0,
            autosave: None,
        }
    }

    // ========================================================================
    // Ticking
    // ========================================================================

    /// Step the simulation forward by `dt` seconds of host time.
    ///
    /// Returns the number of fixed ticks that ran. A paused world runs none
    /// and does not accumulate time.
    pub fn step(&mut self, dt: f32) -> u32 {
        if self.state.paused {
            return 0;
        }
        let fixed_dt = self.store.config().fixed_timestep;
        let max_ticks = self.store.config().max_ticks_per_step;

        self.time_accumulator += dt.max(0.0);

        let mut ticks = 0;
        while self.time_accumulator >= fixed_dt {
            if ticks == max_ticks {
                warn!(
                    ticks,
                    dropped_secs = self.time_accumulator,
                    "Simulation fell behind, dropping accumulated time"
                );
                self.time_accumulator = 0.0;
                break;
            }
            self.fixed_update(fixed_dt);
            self.time_accumulator -= fixed_dt;
            ticks += 1;
        }
        ticks
    }

    /// Run a single fixed timestep update.
    fn fixed_update(&mut self, dt: f32) {
        self.drain_pending();

        let world = self.store.world_mut();
        world.resource_mut::<DeltaTime>().0 = dt;
        world.resource_mut::<SimTick>().increment();

        self.schedule.run(self.store.world_mut());

        self.tick += 1;
        self.time += f64::from(dt);
        self.state.elapsed = self.time;

        let interval = self.store.config().persistence.autosave_interval_secs;
        if interval > 0.0 {
            self.maintenance_timer += dt;
            if self.maintenance_timer >= interval {
                self.maintenance_timer -= interval;
                self.run_maintenance();
            }
        }
    }

    fn drain_pending(&mut self) {
        while let Some(action) = self.pending.pop_front() {
            match action {
                PendingAction::Execute(command) => {
                    self.executor.execute(command, &mut self.store);
                }
                PendingAction::Undo => {
                    self.executor.undo(&mut self.store);
                }
                PendingAction::Redo => {
                    self.executor.redo(&mut self.store);
                }
            }
        }
    }

    /// Housekeeping plus autosave.
    fn run_maintenance(&mut self) {
        let networks = self.store.networks_mut().prune_orphans();
        let chunks = self
            .store
            .world_mut()
            .resource_mut::<SpatialGrid>()
            .prune_empty_chunks();
        if networks > 0 || chunks > 0 {
            debug!(networks, chunks, "Pruned unused networks and chunks");
        }

        if self.autosave.is_some() {
            let snapshot = self.save_snapshot();
            if let Some(worker) = &self.autosave {
                worker.submit(snapshot);
            }
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Queue a command for the next tick.
    pub fn submit(&mut self, command: Command) {
        self.pending.push_back(PendingAction::Execute(command));
    }

    /// Queue a command received in wire form from a peer.
    pub fn submit_wire(&mut self, wire: &str) -> Result<(), serde_json::Error> {
        let command = Command::from_wire(wire)?;
        self.submit(command);
        Ok(())
    }

    pub fn request_undo(&mut self) {
        self.pending.push_back(PendingAction::Undo);
    }

    pub fn request_redo(&mut self) {
        self.pending.push_back(PendingAction::Redo);
    }

    /// Execute a command immediately, outside the tick.
    pub fn execute_now(&mut self, command: Command) -> bool {
        self.executor.execute(command, &mut self.store)
    }

    /// Place a building immediately through the undo history.
    pub fn place_now(&mut self, request: PlacementRequest) -> Option<EntityId> {
        if self.execute_now(Command::place(request)) {
            self.store.building_at(request.position)
        } else {
            None
        }
    }

    pub fn undo(&mut self) -> bool {
        self.executor.undo(&mut self.store)
    }

    pub fn redo(&mut self) -> bool {
        self.executor.redo(&mut self.store)
    }

    /// Register a new, empty power network.
    pub fn create_network(&mut self) -> NetworkId {
        self.store.networks_mut().create()
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Copy of everything the renderer needs.
    pub fn frame_snapshot(&mut self) -> FrameSnapshot {
        FrameSnapshot::from_world(self.store.world_mut(), self.tick, self.time)
    }

    /// Get the frame snapshot as a JSON string.
    pub fn snapshot_json(&mut self) -> String {
        self.frame_snapshot()
            .to_json()
            .unwrap_or_else(|_| "{}".to_string())
    }

    /// Copy of everything the UI needs.
    pub fn ui_snapshot(&self) -> UiSnapshot {
        let world = self.store.world();
        UiSnapshot::build(
            &self.state,
            self.store.networks(),
            self.store.config().power.bonus_fraction,
            &self.progression,
            world.resource::<MilestoneRegistry>(),
        )
    }

    // ========================================================================
    // Save / load
    // ========================================================================

    /// Full persisted state. Version, timestamp and checksum are stamped on save.
    pub fn save_snapshot(&mut self) -> SaveSnapshot {
        SaveSnapshot {
            version: SAVE_VERSION,
            timestamp: 0,
            checksum: String::new(),
            game_time: self.time,
            entities: self.store.records(),
            inventory: self.progression.inventory.clone(),
            unlocked_milestones: self.progression.unlocked_milestones.clone(),
            unlocked_recipes: self.progression.unlocked_recipes.clone(),
            milestone_progress: self.progression.milestone_progress.clone(),
            camera_position: self.camera.position,
            camera_target: self.camera.target,
        }
    }

    /// Replace the world with a snapshot. Returns the number of buildings restored.
    ///
    /// Undo history and queued commands are discarded.
    pub fn restore(&mut self, snapshot: &SaveSnapshot) -> usize {
        self.store.clear();
        self.executor.clear();
        self.pending.clear();

        let mut restored = 0;
        for record in &snapshot.entities {
            if self.store.restore(record).is_some() {
                restored += 1;
            } else {
                warn!(id = record.id, "Saved building overlaps another, dropped");
            }
        }

        self.progression = Progression {
            inventory: snapshot.inventory.clone(),
            unlocked_milestones: snapshot.unlocked_milestones.clone(),
            unlocked_recipes: snapshot.unlocked_recipes.clone(),
            milestone_progress: snapshot.milestone_progress.clone(),
        };
        self.camera = CameraPose {
            position: snapshot.camera_position,
            target: snapshot.camera_target,
        };
        self.time = snapshot.game_time;
        self.state.elapsed = snapshot.game_time;
        self.time_accumulator = 0.0;
        self.maintenance_timer = 0.0;

        restored
    }

    /// Save synchronously through `manager`.
    pub fn save_game<S: SlotStorage>(
        &mut self,
        manager: &mut PersistenceManager<S>,
    ) -> Result<usize, PersistError> {
        let snapshot = self.save_snapshot();
        manager.save(&snapshot)
    }

    /// Load the newest valid save. `false` means no save was found and the
    /// world is left as it is.
    pub fn load_game<S: SlotStorage>(&mut self, manager: &mut PersistenceManager<S>) -> bool {
        let Some(loaded) = manager.load() else {
            return false;
        };
        let restored = self.restore(&loaded.snapshot);
        info!(slot = loaded.slot, buildings = restored, "World restored from save");
        true
    }

    /// Start autosaving to `storage` on the configured cadence.
    pub fn enable_autosave<S: SlotStorage + 'static>(&mut self, storage: S) -> io::Result<()> {
        let slot_count = self.store.config().persistence.slot_count;
        let worker = AutosaveWorker::spawn(PersistenceManager::new(storage, slot_count))?;
        self.autosave = Some(worker);
        Ok(())
    }

    /// Stop autosaving, waiting for an in-flight save to finish.
    pub fn disable_autosave(&mut self) {
        if let Some(worker) = self.autosave.take() {
            worker.shutdown();
        }
    }

    pub fn autosave_enabled(&self) -> bool {
        self.autosave.is_some()
    }

    // ========================================================================
    // Inventory and progression
    // ========================================================================

    /// Move a machine's whole output buffer into the player inventory.
    pub fn collect_output(&mut self, pos: GridPos) -> BTreeMap<String, u32> {
        let Some(id) = self.store.building_at(pos) else {
            return BTreeMap::new();
        };
        let collected = self
            .store
            .buffers_mut()
            .get_mut(id)
            .map(|buffer| buffer.output.drain())
            .unwrap_or_default();
        for (item, &amount) in &collected {
            self.progression.add_items(item, amount);
        }
        collected
    }

    /// Move up to `amount` of `item` from the inventory into a producer's
    /// input buffer. Returns how many were accepted; the rest stays in the
    /// inventory.
    pub fn load_input(&mut self, pos: GridPos, item: &str, amount: u32) -> u32 {
        let Some(id) = self.store.building_at(pos) else {
            return 0;
        };
        if self.store.get::<Producer>(id).is_none() {
            return 0;
        }

        let available = self.progression.take_items(item, amount);
        let accepted = self
            .store
            .buffers_mut()
            .get_or_create(id)
            .input
            .add(item, available);
        self.progression.add_items(item, available - accepted);
        accepted
    }

    /// Hand in inventory toward a milestone. `None` for unknown milestones.
    pub fn deliver_milestone(&mut self, milestone_id: &str) -> Option<DeliveryOutcome> {
        let milestone = self
            .store
            .world()
            .resource::<MilestoneRegistry>()
            .get(milestone_id)?
            .clone();
        Some(self.progression.deliver(&milestone))
    }

    pub fn progression(&self) -> &Progression {
        &self.progression
    }

    pub fn progression_mut(&mut self) -> &mut Progression {
        &mut self.progression
    }

    // ========================================================================
    // Game state
    // ========================================================================

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn set_mode(&mut self, mode: InteractionMode) {
        self.state.mode = mode;
    }

    pub fn select_building(&mut self, building: Option<BuildingType>) {
        self.state.selected_building = building;
        if building.is_some() {
            self.state.mode = InteractionMode::Build;
        }
    }

    pub fn set_floor(&mut self, floor: i32) {
        self.state.current_floor = floor;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.state.paused = paused;
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.state.paused = !self.state.paused;
        self.state.paused
    }

    pub fn camera(&self) -> CameraPose {
        self.camera
    }

    pub fn set_camera(&mut self, camera: CameraPose) {
        self.camera = camera;
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Get the current tick number.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Get the elapsed simulation time.
    pub fn current_time(&self) -> f64 {
        self.time
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Number of queued actions waiting for the next tick.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}
