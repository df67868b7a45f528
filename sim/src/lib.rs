//! Factory Simulation Core
//!
//! A deterministic, fixed-timestep ECS simulation for a factory builder:
//! buildings on a chunked grid, power networks, recipe-driven production,
//! undoable commands and checksummed save slots.
//! Uses `bevy_ecs` for the entity-component-system architecture.

pub mod api;
pub mod buffers;
pub mod commands;
pub mod components;
pub mod config;
pub mod entity_store;
pub mod error;
pub mod persistence;
pub mod progression;
pub mod registry;
pub mod render_bridge;
pub mod spatial;
pub mod systems;
pub mod world;

pub use api::SimWorld;
pub use buffers::{ItemBuffer, MachineBuffer, MachineBuffers};
pub use commands::{Command, CommandExecutor, ReversibleCommand};
pub use components::*;
pub use config::SimConfig;
pub use entity_store::{BuildingRecord, EntityId, EntityStore, PlacementRequest};
pub use error::{ConfigError, PersistError, RegistryError};
pub use persistence::{
    AutosaveWorker, FileSlotStorage, MemorySlotStorage, PersistenceManager, SaveSnapshot, SlotStorage,
};
pub use progression::{DeliveryOutcome, Progression};
pub use registry::{ItemStack, Milestone, MilestoneRegistry, Recipe, RecipeRegistry};
pub use spatial::SpatialGrid;
pub use systems::*;
pub use world::{CameraPose, FrameSnapshot, GameState, InteractionMode, UiSnapshot, Vec3};
