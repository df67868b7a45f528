//! Chunked occupancy grid for placement queries.
//!
//! The world is split into square chunks of `chunk_size` cells per side. Each
//! chunk lazily allocates one dense cell array per floor the first time a cell
//! on that floor is written, so sparse worlds stay cheap. Every cell records
//! which entity occupies it; at most one entity may occupy a cell.

use std::collections::HashMap;

use bevy_ecs::prelude::*;

use crate::components::{BuildingType, GridPos, Rotation};

/// Occupancy record for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRecord {
    pub entity: Entity,
    pub building_type: BuildingType,
    pub rotation: Rotation,
}

/// One `chunk_size × chunk_size` tile, sparse over floors.
#[derive(Debug, Default)]
struct Chunk {
    floors: HashMap<i32, Vec<Option<CellRecord>>>,
    occupied: usize,
}

impl Chunk {
    fn get(&self, floor: i32, index: usize) -> Option<CellRecord> {
        self.floors
            .get(&floor)
            .and_then(|cells| cells.get(index).copied().flatten())
    }

    fn set(&mut self, floor: i32, index: usize, record: CellRecord, area: usize) {
        let cells = self.floors.entry(floor).or_insert_with(|| vec![None; area]);
        if let Some(slot) = cells.get_mut(index) {
            if slot.is_none() {
                self.occupied += 1;
            }
            *slot = Some(record);
        }
    }

    fn clear(&mut self, floor: i32, index: usize) {
        let Some(cells) = self.floors.get_mut(&floor) else {
            return;
        };
        if let Some(slot) = cells.get_mut(index) {
            if slot.take().is_some() {
                self.occupied -= 1;
            }
        }
    }
}

/// Grid-based spatial index of placed buildings.
#[derive(Resource, Debug)]
pub struct SpatialGrid {
    chunk_size: i32,
    chunks: HashMap<(i32, i32), Chunk>,
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(32)
    }
}

impl SpatialGrid {
    /// Create a grid with the given chunk edge length (clamped to at least 1).
    pub fn new(chunk_size: i32) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunks: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> i32 {
        self.chunk_size
    }

    /// Chunk coordinate of an axis value, flooring toward negative infinity.
    #[inline]
    pub fn chunk_coord(&self, axis: i32) -> i32 {
        axis.div_euclid(self.chunk_size)
    }

    /// Position inside the chunk, always in `[0, chunk_size)`.
    #[inline]
    pub fn local_coord(&self, axis: i32) -> i32 {
        axis.rem_euclid(self.chunk_size)
    }

    fn locate(&self, pos: GridPos) -> ((i32, i32), usize) {
        let key = (self.chunk_coord(pos.x), self.chunk_coord(pos.z));
        let lx = self.local_coord(pos.x) as usize;
        let lz = self.local_coord(pos.z) as usize;
        (key, lz * self.chunk_size as usize + lx)
    }

    fn area(&self) -> usize {
        (self.chunk_size as usize) * (self.chunk_size as usize)
    }

    /// Cells covered by a footprint anchored at `pos`.
    ///
    /// Cells past the `i32` range are skipped; `footprint_in_range` tells
    /// whether the whole footprint exists.
    pub fn footprint_cells(pos: GridPos, size_x: i32, size_z: i32) -> impl Iterator<Item = GridPos> {
        (0..size_x.max(0))
            .flat_map(move |dx| (0..size_z.max(0)).filter_map(move |dz| pos.checked_offset(dx, dz)))
    }

    /// The footprint is non-empty and its far corner is representable.
    pub fn footprint_in_range(pos: GridPos, size_x: i32, size_z: i32) -> bool {
        size_x > 0 && size_z > 0 && pos.checked_offset(size_x - 1, size_z - 1).is_some()
    }

    /// Occupancy of a single cell.
    pub fn cell_at(&self, pos: GridPos) -> Option<CellRecord> {
        let (key, index) = self.locate(pos);
        self.chunks.get(&key).and_then(|chunk| chunk.get(pos.y, index))
    }

    /// Every covered cell on the entity's floor is empty.
    pub fn can_place(&self, pos: GridPos, size_x: i32, size_z: i32) -> bool {
        if !Self::footprint_in_range(pos, size_x, size_z) {
            return false;
        }
        Self::footprint_cells(pos, size_x, size_z).all(|cell| self.cell_at(cell).is_none())
    }

    /// Occupy every covered cell, or none of them.
    ///
    /// Returns `false` without writing anything if any covered cell is taken.
    pub fn place(
        &mut self,
        pos: GridPos,
        size_x: i32,
        size_z: i32,
        entity: Entity,
        building_type: BuildingType,
        rotation: Rotation,
    ) -> bool {
        if !self.can_place(pos, size_x, size_z) {
            return false;
        }

        let record = CellRecord {
            entity,
            building_type,
            rotation,
        };
        let area = self.area();
        for cell in Self::footprint_cells(pos, size_x, size_z) {
            let (key, index) = self.locate(cell);
            self.chunks
                .entry(key)
                .or_default()
                .set(cell.y, index, record, area);
        }
        true
    }

    /// Clear every covered cell.
    pub fn remove(&mut self, pos: GridPos, size_x: i32, size_z: i32) {
        for cell in Self::footprint_cells(pos, size_x, size_z) {
            let (key, index) = self.locate(cell);
            if let Some(chunk) = self.chunks.get_mut(&key) {
                chunk.clear(cell.y, index);
            }
        }
    }

    /// Clear covered cells that still belong to `entity`.
    pub fn remove_owned(&mut self, pos: GridPos, size_x: i32, size_z: i32, entity: Entity) {
        for cell in Self::footprint_cells(pos, size_x, size_z) {
            if self.cell_at(cell).is_some_and(|record| record.entity == entity) {
                self.remove(cell, 1, 1);
            }
        }
    }

    /// Total occupied cells across all chunks and floors.
    pub fn occupied_cells(&self) -> usize {
        self.chunks.values().map(|chunk| chunk.occupied).sum()
    }

    /// Number of allocated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Drop chunks with no occupied cell. Returns how many were dropped.
    pub fn prune_empty_chunks(&mut self) -> usize {
        let before = self.chunks.len();
        self.chunks.retain(|_, chunk| chunk.occupied > 0);
        before - self.chunks.len()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}
