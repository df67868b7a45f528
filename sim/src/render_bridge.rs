//! Rendering bridge.
//!
//! Converts a [`FrameSnapshot`] into a flat `f32` buffer that an FFI host
//! (a game engine binding, a WASM front end) can read without parsing JSON.
//!
//! # Buffer Layout (Version 1)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ HEADER (2 elements)                                             │
//! │ [0] entity_count (as f32)                                       │
//! │ [1] tick (low 24 bits as f32, wraps)                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ For each entity i (offset = HEADER_SIZE + i * ENTITY_STRIDE):   │
//! │   [+0] index        - Entity index (low 32 bits of the id)      │
//! │   [+1] generation   - Entity generation (high 32 bits)          │
//! │   [+2] type_code    - `BuildingType::code()`                    │
//! │   [+3] x            - Grid x                                    │
//! │   [+4] floor        - Grid y (floor index)                      │
//! │   [+5] z            - Grid z                                    │
//! │   [+6] rotation     - Degrees (0, 90, 180, 270)                 │
//! │   [+7] is_active    - 1.0 while producing                       │
//! │   [+8] is_blackout  - 1.0 when its network is blacked out       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entities keep the snapshot's order (sorted by id), so the same snapshot
//! always produces the same buffer.

use crate::world::FrameSnapshot;

// ============================================================================
// CONSTANTS - STABLE FFI CONTRACT
// ============================================================================

/// Number of f32 values per entity.
pub const ENTITY_STRIDE: usize = 9;

/// Number of f32 values in the header.
pub const HEADER_SIZE: usize = 2;

pub const FIELD_INDEX: usize = 0;
pub const FIELD_GENERATION: usize = 1;
pub const FIELD_TYPE: usize = 2;
pub const FIELD_X: usize = 3;
pub const FIELD_FLOOR: usize = 4;
pub const FIELD_Z: usize = 5;
pub const FIELD_ROTATION: usize = 6;
pub const FIELD_IS_ACTIVE: usize = 7;
pub const FIELD_IS_BLACKOUT: usize = 8;

#[inline]
fn flag(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Convert a frame snapshot to a flat buffer.
pub fn snapshot_to_flatbuffer(snapshot: &FrameSnapshot) -> Vec<f32> {
    let entity_count = snapshot.entities.len();
    let buffer_size = calculate_buffer_size(entity_count);

    let mut buffer = Vec::with_capacity(buffer_size);
    buffer.push(entity_count as f32);
    buffer.push((snapshot.tick & 0x00FF_FFFF) as f32);

    for entity in &snapshot.entities {
        buffer.push((entity.id & 0xFFFF_FFFF) as f32);
        buffer.push((entity.id >> 32) as f32);
        buffer.push(f32::from(entity.building_type.code()));
        buffer.push(entity.position.x as f32);
        buffer.push(entity.position.y as f32);
        buffer.push(entity.position.z as f32);
        buffer.push(f32::from(entity.rotation.degrees()));
        buffer.push(flag(entity.active));
        buffer.push(flag(entity.blackout));
    }

    debug_assert_eq!(buffer.len(), buffer_size, "Buffer size mismatch");
    buffer
}

/// `HEADER_SIZE + entity_count * ENTITY_STRIDE`
#[inline]
pub fn calculate_buffer_size(entity_count: usize) -> usize {
    HEADER_SIZE + entity_count * ENTITY_STRIDE
}

/// Entity count from a buffer header, `None` if the buffer is too short.
#[inline]
pub fn parse_entity_count(buffer: &[f32]) -> Option<usize> {
    if buffer.len() < HEADER_SIZE {
        return None;
    }
    Some(buffer[0] as usize)
}

#[inline]
pub const fn entity_offset(entity_index: usize) -> usize {
    HEADER_SIZE + entity_index * ENTITY_STRIDE
}
