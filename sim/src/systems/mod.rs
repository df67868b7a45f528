//! ECS systems for the factory simulation.
//!
//! Systems contain the game logic that operates on components.
//!
//! ## System Order
//!
//! Each fixed tick runs, strictly in order:
//!
//! 1. `power_network_system` - aggregates every network, settles storage and
//!    writes blackout flags back into `PowerNode`s.
//! 2. `production_system` - advances producers, reading this tick's blackout
//!    state and publishing next tick's demand.
//!
//! Player commands are applied by the orchestrator before the schedule runs.

pub mod power;
pub mod production;

use bevy_ecs::prelude::*;

pub use power::{power_network_system, PowerNetwork, PowerNetworks};
pub use production::{production_system, IdleReason};

/// Resource containing the delta time for the current tick.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct DeltaTime(pub f32);

/// Global simulation tick counter.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct SimTick(pub u64);

impl SimTick {
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}
