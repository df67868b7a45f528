//! Game state and the read-only views handed to rendering and UI hosts.
//!
//! Views are plain copies built between ticks. A host can hold on to them for
//! as long as it likes; they never alias the live ECS world.

use std::collections::BTreeMap;

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::components::*;
use crate::progression::Progression;
use crate::registry::MilestoneRegistry;
use crate::systems::PowerNetworks;

// ============================================================================
// GAME STATE
// ============================================================================

/// Plain 3D vector used for the camera pose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Camera position and look-at target. Persisted, never simulated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub position: Vec3,
    pub target: Vec3,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 40.0, 40.0),
            target: Vec3::default(),
        }
    }
}

/// What the player's pointer currently does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    #[default]
    Select,
    Build,
    Remove,
    Configure,
}

/// Session state shown by the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub mode: InteractionMode,
    pub selected_building: Option<BuildingType>,
    pub current_floor: i32,
    pub paused: bool,
    /// Simulated seconds since the game started, across save/load.
    pub elapsed: f64,
}

// ============================================================================
// FRAME SNAPSHOT
// ============================================================================

/// One placed building, as the renderer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    pub id: u64,
    pub building_type: BuildingType,
    pub position: GridPos,
    pub rotation: Rotation,
    pub active: bool,
    pub blackout: bool,
}

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    /// Current simulation tick.
    pub tick: u64,
    /// Elapsed simulation time in seconds.
    pub time: f64,
    /// Buildings ordered by id.
    pub entities: Vec<EntityView>,
}

impl FrameSnapshot {
    /// Create a snapshot from the ECS world.
    pub fn from_world(world: &mut World, tick: u64, time: f64) -> Self {
        let mut query = world.query::<(
            Entity,
            &BuildingType,
            &GridPos,
            Option<&Rotation>,
            Option<&Producer>,
            Option<&PowerNode>,
        )>();

        let mut entities: Vec<EntityView> = query
            .iter(world)
            .map(|(entity, building_type, pos, rotation, producer, node)| EntityView {
                id: entity.to_bits(),
                building_type: *building_type,
                position: *pos,
                rotation: rotation.copied().unwrap_or_default(),
                active: producer.is_some_and(|p| p.is_active),
                blackout: node.is_some_and(|n| n.connected && n.blackout),
            })
            .collect();
        entities.sort_by_key(|view| view.id);

        Self { tick, time, entities }
    }

    /// Serialize snapshot to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// UI SNAPSHOT
// ============================================================================

/// Per-network numbers for the power panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub id: u32,
    /// Effective production in MW.
    pub production: f64,
    pub consumption: f64,
    pub surplus: f64,
    pub storage_percent: f64,
    pub blackout: bool,
    pub bonus_percent: f64,
}

/// Progress of one milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneStatus {
    pub id: String,
    pub tier: u32,
    pub name: String,
    pub completed: bool,
    /// Outstanding amount per item.
    pub remaining: BTreeMap<String, u32>,
}

/// Everything the UI needs between ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiSnapshot {
    pub state: GameState,
    pub networks: Vec<NetworkStats>,
    pub milestones: Vec<MilestoneStatus>,
    pub inventory: BTreeMap<String, u32>,
}

impl UiSnapshot {
    pub fn build(
        state: &GameState,
        networks: &PowerNetworks,
        bonus_fraction: f64,
        progression: &Progression,
        milestones: &MilestoneRegistry,
    ) -> Self {
        let networks = networks
            .sorted()
            .into_iter()
            .map(|network| NetworkStats {
                id: network.id.0,
                production: network.effective_production_mw,
                consumption: network.total_consumption_mw,
                surplus: network.surplus_mw(),
                storage_percent: network.storage_percent(),
                blackout: network.blackout,
                bonus_percent: network.bonus_percent(bonus_fraction),
            })
            .collect();

        let milestones = milestones
            .iter()
            .map(|milestone| MilestoneStatus {
                id: milestone.id.clone(),
                tier: milestone.tier,
                name: milestone.name.clone(),
                completed: progression.is_completed(&milestone.id),
                remaining: progression.remaining(milestone),
            })
            .collect();

        Self {
            state: state.clone(),
            networks,
            milestones,
            inventory: progression.inventory.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
