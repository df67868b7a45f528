//! Persistence: checksummed save snapshots in rotating slots.
//!
//! Each save goes to the next of `slot_count` slots (`save_slot_{i}`), followed
//! by a small metadata record (`save_meta`) naming the slot just written. The
//! checksum is the SHA-256 of the snapshot's compact JSON with an empty
//! checksum field, so any edit to a stored slot is detected on load.
//!
//! Loading starts at the newest slot and walks backward until a slot parses,
//! verifies and passes the version policy:
//! - same version: accepted;
//! - older but `>= MIN_SUPPORTED_VERSION`: migrated in memory with a warning;
//! - newer, or older than the minimum: the slot is skipped.
//!
//! Autosaves run on a dedicated thread so the tick loop never blocks on I/O.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::entity_store::BuildingRecord;
use crate::error::PersistError;
use crate::world::Vec3;

/// Version written by this build.
pub const SAVE_VERSION: u32 = 1;
/// Oldest version this build can migrate.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

const META_KEY: &str = "save_meta";

pub fn slot_key(slot: usize) -> String {
    format!("save_slot_{slot}")
}

fn default_save_version() -> u32 {
    SAVE_VERSION
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ============================================================================
// Snapshot
// ============================================================================

/// Complete persisted world state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSnapshot {
    #[serde(default = "default_save_version")]
    pub version: u32,
    /// Unix milliseconds at save time.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub checksum: String,
    pub game_time: f64,
    pub entities: Vec<BuildingRecord>,
    #[serde(default)]
    pub inventory: BTreeMap<String, u32>,
    #[serde(default)]
    pub unlocked_milestones: BTreeSet<String>,
    #[serde(default)]
    pub unlocked_recipes: BTreeSet<String>,
    #[serde(default)]
    pub milestone_progress: BTreeMap<String, BTreeMap<String, u32>>,
    #[serde(default)]
    pub camera_position: Vec3,
    #[serde(default)]
    pub camera_target: Vec3,
}

impl SaveSnapshot {
    /// SHA-256 hex of the compact JSON with the checksum field emptied.
    pub fn compute_checksum(&self) -> Result<String, PersistError> {
        let mut unsigned = self.clone();
        unsigned.checksum.clear();
        let bytes = serde_json::to_vec(&unsigned)?;
        Ok(sha256_hex(&bytes))
    }

    /// Stamp the checksum.
    pub fn seal(&mut self) -> Result<(), PersistError> {
        self.checksum = self.compute_checksum()?;
        Ok(())
    }

    pub fn verify(&self, slot: usize) -> Result<(), PersistError> {
        let computed = self.compute_checksum()?;
        if computed == self.checksum {
            Ok(())
        } else {
            Err(PersistError::Checksum {
                slot,
                stored: self.checksum.clone(),
                computed,
            })
        }
    }

    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(input: &str) -> Result<Self, PersistError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Apply the version policy, upgrading older snapshots in memory.
    ///
    /// Returns the version the snapshot had before migration, if it changed.
    pub fn migrate(&mut self) -> Result<Option<u32>, PersistError> {
        if self.version > SAVE_VERSION || self.version < MIN_SUPPORTED_VERSION {
            return Err(PersistError::UnsupportedVersion {
                version: self.version,
                min: MIN_SUPPORTED_VERSION,
                max: SAVE_VERSION,
            });
        }
        if self.version == SAVE_VERSION {
            return Ok(None);
        }

        // Every supported older version shares the current layout; fields
        // added since default through serde.
        let from = self.version;
        self.version = SAVE_VERSION;
        Ok(Some(from))
    }
}

/// Which slot was written last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
    pub last_slot: usize,
    pub last_timestamp: i64,
    pub slot_count: usize,
}

/// A snapshot accepted by `load`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSave {
    pub slot: usize,
    pub snapshot: SaveSnapshot,
    /// Original version when the snapshot was migrated.
    pub migrated_from: Option<u32>,
}

// ============================================================================
// Storage backends
// ============================================================================

/// Key/value byte storage for slots and metadata.
pub trait SlotStorage: Send {
    /// `Ok(None)` when the key was never written.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError>;
    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), PersistError>;
}

/// One `<key>.json` file per slot in a directory.
#[derive(Debug, Clone)]
pub struct FileSlotStorage {
    dir: PathBuf,
}

impl FileSlotStorage {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, PersistError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SlotStorage for FileSlotStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), PersistError> {
        // Write then rename, so a crash mid-write leaves the old slot intact.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-memory storage. Clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct MemorySlotStorage {
    slots: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemorySlotStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes stored under `key`.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Overwrite raw bytes, bypassing checksums.
    pub fn put_raw(&self, key: &str, bytes: Vec<u8>) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes);
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }
}

impl SlotStorage for MemorySlotStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        Ok(self.raw(key))
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), PersistError> {
        self.put_raw(key, bytes.to_vec());
        Ok(())
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Rotating-slot save manager.
#[derive(Debug)]
pub struct PersistenceManager<S: SlotStorage> {
    storage: S,
    slot_count: usize,
    next_slot: usize,
}

impl<S: SlotStorage> PersistenceManager<S> {
    /// Continue the rotation recorded in the storage's metadata, if any.
    pub fn new(storage: S, slot_count: usize) -> Self {
        let slot_count = slot_count.max(1);
        let mut manager = Self {
            storage,
            slot_count,
            next_slot: 0,
        };
        if let Some(meta) = manager.read_metadata() {
            manager.next_slot = (meta.last_slot % slot_count + 1) % slot_count;
        }
        manager
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Slot the next `save` writes.
    pub fn next_slot(&self) -> usize {
        self.next_slot
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Stamp, checksum and write a snapshot. Returns the slot written.
    pub fn save(&mut self, snapshot: &SaveSnapshot) -> Result<usize, PersistError> {
        let mut sealed = snapshot.clone();
        sealed.version = SAVE_VERSION;
        sealed.timestamp = chrono::Utc::now().timestamp_millis();
        sealed.seal()?;

        let slot = self.next_slot;
        self.storage
            .write(&slot_key(slot), sealed.to_json()?.as_bytes())?;

        let meta = SaveMetadata {
            last_slot: slot,
            last_timestamp: sealed.timestamp,
            slot_count: self.slot_count,
        };
        self.storage
            .write(META_KEY, &serde_json::to_vec_pretty(&meta)?)?;

        self.next_slot = (slot + 1) % self.slot_count;
        info!(
            slot,
            entities = sealed.entities.len(),
            game_time = sealed.game_time,
            "Game saved"
        );
        Ok(slot)
    }

    /// Newest valid snapshot, or `None` for a fresh game.
    pub fn load(&mut self) -> Option<LoadedSave> {
        let start = self
            .read_metadata()
            .map(|meta| meta.last_slot % self.slot_count)
            .unwrap_or(0);

        for step in 0..self.slot_count {
            let slot = (start + self.slot_count - step) % self.slot_count;
            match self.load_slot(slot) {
                Ok(Some(loaded)) => {
                    self.next_slot = (slot + 1) % self.slot_count;
                    info!(slot, game_time = loaded.snapshot.game_time, "Save loaded");
                    return Some(loaded);
                }
                Ok(None) => debug!(slot, "Save slot is empty"),
                Err(err) => warn!(slot, %err, "Skipping save slot"),
            }
        }

        info!("No valid save found, starting fresh");
        None
    }

    /// Read, verify and migrate one slot.
    pub fn load_slot(&self, slot: usize) -> Result<Option<LoadedSave>, PersistError> {
        let Some(bytes) = self.storage.read(&slot_key(slot))? else {
            return Ok(None);
        };
        let mut snapshot: SaveSnapshot = serde_json::from_slice(&bytes)?;
        snapshot.verify(slot)?;
        let migrated_from = snapshot.migrate()?;
        if let Some(from) = migrated_from {
            warn!(slot, from, to = SAVE_VERSION, "Migrated save from an older version");
        }
        Ok(Some(LoadedSave {
            slot,
            snapshot,
            migrated_from,
        }))
    }

    pub fn read_metadata(&self) -> Option<SaveMetadata> {
        match self.storage.read(META_KEY) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(meta) => Some(meta),
                Err(err) => {
                    warn!(%err, "Save metadata is unreadable");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "Failed to read save metadata");
                None
            }
        }
    }
}

// ============================================================================
// Autosave worker
// ============================================================================

/// Background thread that owns a `PersistenceManager` and saves snapshots
/// handed to it. At most one snapshot waits at a time.
#[derive(Debug)]
pub struct AutosaveWorker {
    sender: Option<SyncSender<SaveSnapshot>>,
    handle: Option<JoinHandle<()>>,
}

impl AutosaveWorker {
    pub fn spawn<S: SlotStorage + 'static>(manager: PersistenceManager<S>) -> io::Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<SaveSnapshot>(1);
        let handle = thread::Builder::new()
            .name("autosave".to_string())
            .spawn(move || {
                let mut manager = manager;
                for snapshot in receiver {
                    if let Err(err) = manager.save(&snapshot) {
                        error!(%err, "Autosave failed, retrying next interval");
                    }
                }
                debug!("Autosave worker stopped");
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queue a snapshot. `false` if one is still pending or the worker is gone.
    pub fn submit(&self, snapshot: SaveSnapshot) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(snapshot) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Autosave still in flight, skipping");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Autosave worker is not running");
                false
            }
        }
    }

    /// Finish pending work and stop the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Autosave worker panicked");
            }
        }
    }
}

impl Drop for AutosaveWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BuildingType, GridPos, Rotation};
    use crate::entity_store::BuildingState;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn snapshot(game_time: f64) -> SaveSnapshot {
        let mut inventory = BTreeMap::new();
        inventory.insert("iron_plate".to_string(), 12);
        SaveSnapshot {
            game_time,
            entities: vec![BuildingRecord {
                id: 42,
                building_type: BuildingType::Smelter,
                position: GridPos::new(3, 0, -4),
                rotation: Rotation::Deg180,
                state: BuildingState {
                    network: Some(0),
                    recipe_index: Some(1),
                    progress: 0.1,
                    power_shards: 1,
                    stored_mwh: 0.0,
                    input: BTreeMap::new(),
                    output: BTreeMap::new(),
                },
            }],
            inventory,
            camera_position: Vec3::new(1.5, 20.0, -3.25),
            ..Default::default()
        }
    }

    fn temp_dir(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("duration")
            .as_nanos();
        std::env::temp_dir().join(format!("factory-sim-tests-{prefix}-{unique}"))
    }

    #[test]
    fn test_save_then_load() {
        let storage = MemorySlotStorage::new();
        let mut manager = PersistenceManager::new(storage.clone(), 3);
        assert_eq!(manager.save(&snapshot(10.0)).unwrap(), 0);

        let loaded = manager.load().unwrap();
        assert_eq!(loaded.slot, 0);
        assert_eq!(loaded.snapshot.game_time, 10.0);
        assert_eq!(loaded.snapshot.entities, snapshot(10.0).entities);
        assert_eq!(loaded.snapshot.camera_position, Vec3::new(1.5, 20.0, -3.25));
        assert!(loaded.migrated_from.is_none());
        assert_eq!(manager.next_slot(), 1);
    }

    #[test]
    fn test_slots_rotate_and_newest_wins() {
        let storage = MemorySlotStorage::new();
        let mut manager = PersistenceManager::new(storage.clone(), 3);
        let slots: Vec<usize> = (0..4)
            .map(|i| manager.save(&snapshot(i as f64)).unwrap())
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0]);

        let meta = manager.read_metadata().unwrap();
        assert_eq!(meta.last_slot, 0);
        assert_eq!(meta.slot_count, 3);

        // A fresh manager over the same storage picks up the rotation.
        let mut reopened = PersistenceManager::new(storage, 3);
        assert_eq!(reopened.next_slot(), 1);
        assert_eq!(reopened.load().unwrap().snapshot.game_time, 3.0);
    }

    #[test]
    fn test_corrupted_checksum_falls_back() {
        let storage = MemorySlotStorage::new();
        let mut manager = PersistenceManager::new(storage.clone(), 3);
        manager.save(&snapshot(1.0)).unwrap();
        manager.save(&snapshot(2.0)).unwrap();

        // Edit a value but keep the stored checksum.
        let raw = storage.raw(&slot_key(1)).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        value["gameTime"] = serde_json::json!(999.0);
        storage.put_raw(&slot_key(1), serde_json::to_vec(&value).unwrap());

        assert!(matches!(
            manager.load_slot(1),
            Err(PersistError::Checksum { slot: 1, .. })
        ));
        let loaded = manager.load().unwrap();
        assert_eq!(loaded.slot, 0);
        assert_eq!(loaded.snapshot.game_time, 1.0);
        assert_eq!(manager.next_slot(), 1);
    }

    #[test]
    fn test_garbage_slot_is_skipped() {
        let storage = MemorySlotStorage::new();
        let mut manager = PersistenceManager::new(storage.clone(), 2);
        manager.save(&snapshot(1.0)).unwrap();
        manager.save(&snapshot(2.0)).unwrap();
        storage.put_raw(&slot_key(1), b"{ not json".to_vec());

        assert_eq!(manager.load().unwrap().snapshot.game_time, 1.0);
    }

    #[test]
    fn test_newer_version_rejected() {
        let storage = MemorySlotStorage::new();
        let mut manager = PersistenceManager::new(storage.clone(), 3);
        manager.save(&snapshot(1.0)).unwrap();

        let mut future = snapshot(2.0);
        future.version = SAVE_VERSION + 1;
        future.seal().unwrap();
        storage.put_raw(&slot_key(1), future.to_json().unwrap().into_bytes());
        storage.put_raw(
            META_KEY,
            serde_json::to_vec(&SaveMetadata {
                last_slot: 1,
                last_timestamp: 0,
                slot_count: 3,
            })
            .unwrap(),
        );

        assert!(matches!(
            manager.load_slot(1),
            Err(PersistError::UnsupportedVersion { .. })
        ));
        assert_eq!(manager.load().unwrap().slot, 0);
    }

    #[test]
    fn test_no_valid_slot_means_fresh_game() {
        let storage = MemorySlotStorage::new();
        let mut manager = PersistenceManager::new(storage.clone(), 3);
        assert!(manager.load().is_none());

        manager.save(&snapshot(1.0)).unwrap();
        storage.put_raw(&slot_key(0), b"garbage".to_vec());
        assert!(manager.load().is_none());
    }

    #[test]
    fn test_missing_metadata_walks_from_slot_zero() {
        let storage = MemorySlotStorage::new();
        let mut manager = PersistenceManager::new(storage.clone(), 3);
        manager.save(&snapshot(1.0)).unwrap();
        manager.save(&snapshot(2.0)).unwrap();
        storage.remove(META_KEY);

        // Slot 0 is checked first when the pointer is lost.
        assert_eq!(manager.load().unwrap().slot, 0);
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = temp_dir("file-slots");
        let storage = FileSlotStorage::new(&dir).unwrap();
        let mut manager = PersistenceManager::new(storage, 2);
        manager.save(&snapshot(5.0)).unwrap();
        assert!(dir.join("save_slot_0.json").exists());
        assert!(dir.join("save_meta.json").exists());

        let mut reopened = PersistenceManager::new(FileSlotStorage::new(&dir).unwrap(), 2);
        assert_eq!(reopened.load().unwrap().snapshot.game_time, 5.0);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_autosave_worker_writes_in_background() {
        let storage = MemorySlotStorage::new();
        let worker = AutosaveWorker::spawn(PersistenceManager::new(storage.clone(), 3)).unwrap();
        assert!(worker.submit(snapshot(7.0)));
        worker.shutdown();

        let mut manager = PersistenceManager::new(storage, 3);
        assert_eq!(manager.load().unwrap().snapshot.game_time, 7.0);
    }
}
