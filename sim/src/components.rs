//! ECS components for the factory simulation.
//!
//! Components are pure data containers attached to entities.
//! All game logic lives in systems that query these components.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// SPATIAL COMPONENTS
// ============================================================================

/// Integer grid coordinates. `y` is the floor index.
#[derive(
    Component, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GridPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Same floor, shifted along x and z. `None` past the coordinate range.
    pub const fn checked_offset(&self, dx: i32, dz: i32) -> Option<Self> {
        let Some(x) = self.x.checked_add(dx) else {
            return None;
        };
        let Some(z) = self.z.checked_add(dz) else {
            return None;
        };
        Some(Self { x, y: self.y, z })
    }
}

/// Facing of a placed building, in quarter turns.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Footprint extents after rotation. Quarter turns swap the axes.
    pub const fn rotate_size(&self, size_x: i32, size_z: i32) -> (i32, i32) {
        match self {
            Rotation::Deg0 | Rotation::Deg180 => (size_x, size_z),
            Rotation::Deg90 | Rotation::Deg270 => (size_z, size_x),
        }
    }

    pub const fn degrees(&self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub const fn clockwise(&self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }
}

/// Occupied extent of a placed building, already rotated.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    pub size_x: i32,
    pub size_z: i32,
}

impl Default for Footprint {
    fn default() -> Self {
        Self { size_x: 1, size_z: 1 }
    }
}

// ============================================================================
// BUILDING CATALOG
// ============================================================================

/// Kind of placed building.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingType {
    Foundation,
    Conveyor,
    /// Draws and supplies nothing, but joins its network as a member.
    PowerPole,
    Miner,
    Smelter,
    Constructor,
    Assembler,
    BiomassBurner,
    CoalGenerator,
    FuelGenerator,
    PowerStorage,
    PowerAugmenter,
}

/// Static numbers describing a building kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildingSpec {
    /// Unrotated footprint along x.
    pub size_x: i32,
    /// Unrotated footprint along z.
    pub size_z: i32,
    /// Generator output in MW (0 = not a generator).
    pub generator_mw: f64,
    /// Draw at speed 1.0 in MW (0 = not a consumer).
    pub base_draw_mw: f64,
    /// Battery capacity in MWh (0 = no storage).
    pub storage_mwh: f64,
    /// Flat output of a bonus producer in MW (0 = not a bonus producer).
    pub bonus_flat_mw: f64,
    /// Runs recipes.
    pub producer: bool,
}

impl BuildingSpec {
    const fn passive(size_x: i32, size_z: i32) -> Self {
        Self {
            size_x,
            size_z,
            generator_mw: 0.0,
            base_draw_mw: 0.0,
            storage_mwh: 0.0,
            bonus_flat_mw: 0.0,
            producer: false,
        }
    }

    const fn machine(size_x: i32, size_z: i32, base_draw_mw: f64) -> Self {
        Self {
            base_draw_mw,
            producer: true,
            ..Self::passive(size_x, size_z)
        }
    }

    const fn generator(size_x: i32, size_z: i32, generator_mw: f64) -> Self {
        Self {
            generator_mw,
            ..Self::passive(size_x, size_z)
        }
    }

    /// Takes part in a power network at all.
    pub fn is_electrical(&self) -> bool {
        self.generator_mw > 0.0
            || self.base_draw_mw > 0.0
            || self.storage_mwh > 0.0
            || self.bonus_flat_mw > 0.0
    }
}

impl BuildingType {
    pub const fn spec(&self) -> BuildingSpec {
        match self {
            BuildingType::Foundation => BuildingSpec::passive(1, 1),
            BuildingType::Conveyor => BuildingSpec::passive(1, 1),
            BuildingType::PowerPole => BuildingSpec::passive(1, 1),
            BuildingType::Miner => BuildingSpec::machine(2, 2, 5.0),
            BuildingType::Smelter => BuildingSpec::machine(1, 2, 4.0),
            BuildingType::Constructor => BuildingSpec::machine(1, 2, 4.0),
            BuildingType::Assembler => BuildingSpec::machine(2, 3, 15.0),
            BuildingType::BiomassBurner => BuildingSpec::generator(1, 1, 30.0),
            BuildingType::CoalGenerator => BuildingSpec::generator(2, 2, 75.0),
            BuildingType::FuelGenerator => BuildingSpec::generator(2, 3, 150.0),
            BuildingType::PowerStorage => BuildingSpec {
                storage_mwh: 100.0,
                ..BuildingSpec::passive(2, 2)
            },
            BuildingType::PowerAugmenter => BuildingSpec {
                bonus_flat_mw: 500.0,
                ..BuildingSpec::passive(3, 3)
            },
        }
    }

    /// Footprint extents for a rotation.
    pub fn footprint(&self, rotation: Rotation) -> Footprint {
        let spec = self.spec();
        let (size_x, size_z) = rotation.rotate_size(spec.size_x, spec.size_z);
        Footprint { size_x, size_z }
    }

    /// Whether the building joins a power network.
    pub fn is_electrical(&self) -> bool {
        *self == BuildingType::PowerPole || self.spec().is_electrical()
    }

    pub const fn name(&self) -> &'static str {
        match self {
            BuildingType::Foundation => "foundation",
            BuildingType::Conveyor => "conveyor",
            BuildingType::PowerPole => "power_pole",
            BuildingType::Miner => "miner",
            BuildingType::Smelter => "smelter",
            BuildingType::Constructor => "constructor",
            BuildingType::Assembler => "assembler",
            BuildingType::BiomassBurner => "biomass_burner",
            BuildingType::CoalGenerator => "coal_generator",
            BuildingType::FuelGenerator => "fuel_generator",
            BuildingType::PowerStorage => "power_storage",
            BuildingType::PowerAugmenter => "power_augmenter",
        }
    }

    /// Stable numeric code for flat FFI buffers.
    pub const fn code(&self) -> u8 {
        match self {
            BuildingType::Foundation => 0,
            BuildingType::Conveyor => 1,
            BuildingType::PowerPole => 2,
            BuildingType::Miner => 3,
            BuildingType::Smelter => 4,
            BuildingType::Constructor => 5,
            BuildingType::Assembler => 6,
            BuildingType::BiomassBurner => 7,
            BuildingType::CoalGenerator => 8,
            BuildingType::FuelGenerator => 9,
            BuildingType::PowerStorage => 10,
            BuildingType::PowerAugmenter => 11,
        }
    }
}

// ============================================================================
// POWER COMPONENTS
// ============================================================================

/// Identifier of an electrically connected group of entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(pub u32);

/// Membership in a power network, plus the state the power system wrote back
/// this tick.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerNode {
    pub network: NetworkId,
    /// The network id resolved to a known network this tick.
    pub connected: bool,
    /// The network is blacked out.
    pub blackout: bool,
}

impl PowerNode {
    pub const fn new(network: NetworkId) -> Self {
        Self {
            network,
            connected: false,
            blackout: false,
        }
    }

    /// Power is actually available to this entity.
    #[inline]
    pub const fn is_powered(&self) -> bool {
        self.connected && !self.blackout
    }
}

/// Power source with a steady output.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Generator {
    pub output_mw: f64,
}

/// Flat output plus a percentage bonus on the network's base production.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct BonusProducer {
    pub flat_output_mw: f64,
}

/// Power draw of an entity.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Consumer {
    /// Draw at speed 1.0.
    pub base_draw_mw: f64,
    /// Draw requested from the network this tick.
    pub demand_mw: f64,
    /// Draw actually taken this tick (0 while idle or unpowered).
    pub current_draw_mw: f64,
}

impl Consumer {
    pub const fn new(base_draw_mw: f64) -> Self {
        Self {
            base_draw_mw,
            demand_mw: base_draw_mw,
            current_draw_mw: 0.0,
        }
    }
}

/// Battery bank.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct PowerStorage {
    pub capacity_mwh: f64,
    pub stored_mwh: f64,
}

impl PowerStorage {
    pub const fn empty(capacity_mwh: f64) -> Self {
        Self {
            capacity_mwh,
            stored_mwh: 0.0,
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.capacity_mwh <= 0.0 {
            0.0
        } else {
            (self.stored_mwh / self.capacity_mwh).clamp(0.0, 1.0)
        }
    }
}

// ============================================================================
// PRODUCTION COMPONENTS
// ============================================================================

/// Recipe-driven machine state.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Producer {
    /// Index into the recipe registry; `None` = no recipe selected.
    pub recipe_index: Option<usize>,
    /// Cycle progress in `[0, 1)`.
    pub progress: f32,
    /// Effective speed, derived from installed shards each tick.
    pub speed_multiplier: f32,
    pub power_shards: u32,
    pub is_active: bool,
}

impl Producer {
    pub const fn new(recipe_index: Option<usize>, power_shards: u32) -> Self {
        Self {
            recipe_index,
            progress: 0.0,
            speed_multiplier: 1.0,
            power_shards,
            is_active: false,
        }
    }

    /// `min(1 + shards * bonus, max)`.
    pub fn compute_speed(&self, bonus_per_shard: f32, max_multiplier: f32) -> f32 {
        (1.0 + self.power_shards as f32 * bonus_per_shard).min(max_multiplier)
    }

    #[inline]
    pub fn at_cycle_start(&self) -> bool {
        self.progress <= 0.0
    }
}

// ============================================================================
// BUNDLE HELPERS
// ============================================================================

/// Components every placed building carries.
#[derive(Bundle, Debug, Clone, Copy)]
pub struct BuildingBundle {
    pub building_type: BuildingType,
    pub position: GridPos,
    pub rotation: Rotation,
    pub footprint: Footprint,
}

impl BuildingBundle {
    pub fn new(building_type: BuildingType, position: GridPos, rotation: Rotation) -> Self {
        Self {
            building_type,
            position,
            rotation,
            footprint: building_type.footprint(rotation),
        }
    }
}
