//! Simulation configuration.
//!
//! `SimConfig` is inserted into the ECS world as a resource so systems can read
//! tuning values directly. Every field has a default, so a TOML file only needs
//! to list what it overrides:
//!
//! ```toml
//! fixed_timestep = 0.05
//!
//! [power]
//! bonus_fraction = 0.3
//!
//! [persistence]
//! slot_count = 5
//! ```

use std::path::Path;

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level simulation configuration.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Fixed timestep in seconds (e.g., 1/30 = 0.0333 for 30 Hz).
    pub fixed_timestep: f32,
    /// Edge length of a spatial chunk, in cells.
    pub chunk_size: i32,
    /// Maximum number of undoable commands kept.
    pub history_limit: usize,
    /// Fixed ticks one `step` may run; time beyond that is dropped.
    pub max_ticks_per_step: u32,
    pub power: PowerConfig,
    pub production: ProductionConfig,
    pub persistence: PersistenceConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fixed_timestep: 1.0 / 30.0, // 30 Hz
            chunk_size: 32,
            history_limit: 100,
            max_ticks_per_step: 300,
            power: PowerConfig::default(),
            production: ProductionConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Power network tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Fraction of base generator output each bonus producer adds.
    pub bonus_fraction: f64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            bonus_fraction: 0.10,
        }
    }
}

/// Production tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductionConfig {
    /// Speed added per installed power shard.
    pub bonus_per_shard: f32,
    /// Upper bound for the speed multiplier.
    pub max_speed_multiplier: f32,
    /// Exponent of the speed → power draw curve.
    pub power_exponent: f32,
    /// Maximum count per item slot in a machine buffer.
    pub buffer_slot_cap: u32,
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            bonus_per_shard: 0.5,
            max_speed_multiplier: 2.5,
            power_exponent: 1.6,
            buffer_slot_cap: 200,
        }
    }
}

/// Save slot rotation and autosave cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Number of round-robin save slots.
    pub slot_count: usize,
    /// Simulated seconds between autosaves; 0 disables autosave.
    pub autosave_interval_secs: f32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            slot_count: 3,
            autosave_interval_secs: 300.0,
        }
    }
}

impl SimConfig {
    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fixed_timestep.is_finite() && self.fixed_timestep > 0.0) {
            return Err(ConfigError::Invalid {
                field: "fixed_timestep",
                reason: format!("must be positive, got {}", self.fixed_timestep),
            });
        }
        if self.max_ticks_per_step == 0 {
            return Err(ConfigError::Invalid {
                field: "max_ticks_per_step",
                reason: "at least one tick per step is required".to_string(),
            });
        }
        if self.chunk_size <= 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_size",
                reason: format!("must be positive, got {}", self.chunk_size),
            });
        }
        if self.persistence.slot_count == 0 {
            return Err(ConfigError::Invalid {
                field: "persistence.slot_count",
                reason: "at least one slot is required".to_string(),
            });
        }
        if self.production.max_speed_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "production.max_speed_multiplier",
                reason: format!("must be >= 1.0, got {}", self.production.max_speed_multiplier),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SimConfig::from_toml_str(
            r#"
            fixed_timestep = 0.05

            [power]
            bonus_fraction = 0.3
            "#,
        )
        .unwrap();

        assert!((config.fixed_timestep - 0.05).abs() < 1e-6);
        assert!((config.power.bonus_fraction - 0.3).abs() < 1e-9);
        assert_eq!(config.chunk_size, 32);
        assert_eq!(config.persistence.slot_count, 3);
        assert_eq!(config.production, ProductionConfig::default());
    }

    #[test]
    fn test_rejects_zero_slots() {
        let err = SimConfig::from_toml_str("[persistence]\nslot_count = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "persistence.slot_count", .. }));
    }

    #[test]
    fn test_rejects_non_positive_timestep() {
        let config = SimConfig {
            fixed_timestep: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "fixed_timestep", .. })));
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = SimConfig::from_toml_str("chunk_size = \"big\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
