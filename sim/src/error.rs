//! Error types for the simulation core.
//!
//! Only infrastructure failures live here (disk, parsing, malformed registry
//! data). Expected simulation outcomes such as placement conflicts, blackouts
//! or short ingredient stocks are plain return values, not errors.

use std::io;

/// Errors raised by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Reading or writing a storage slot failed.
    #[error("storage i/o failed: {0}")]
    Io(#[from] io::Error),

    /// A snapshot or metadata record could not be (de)serialized.
    #[error("snapshot serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// The stored checksum does not match the recomputed one.
    #[error("checksum mismatch in slot {slot}: stored {stored}, computed {computed}")]
    Checksum {
        /// Slot index that failed validation.
        slot: usize,
        /// Checksum read from the record.
        stored: String,
        /// Checksum recomputed from the record content.
        computed: String,
    },

    /// The snapshot was written by a version this build cannot load.
    #[error("unsupported save version {version} (supported {min}..={max})")]
    UnsupportedVersion {
        /// Version found in the record.
        version: u32,
        /// Oldest version that can be migrated.
        min: u32,
        /// Current version.
        max: u32,
    },
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    /// The configuration is not valid TOML for [`crate::config::SimConfig`].
    #[error("failed to parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value parsed but is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field path.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Errors raised while building recipe or milestone registries.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two recipes share an id.
    #[error("duplicate recipe id: {0}")]
    DuplicateRecipe(String),

    /// A recipe has a zero, negative or non-finite duration.
    #[error("recipe {0} has a non-positive duration")]
    InvalidDuration(String),

    /// A recipe produces nothing.
    #[error("recipe {0} has no products")]
    NoProducts(String),

    /// Two milestones share an id.
    #[error("duplicate milestone id: {0}")]
    DuplicateMilestone(String),
}
