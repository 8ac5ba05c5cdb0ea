//! Memory layout of the game state inside the emulated console.
//!
//! Every address here is an emulated (console virtual) address. Scalars are
//! single bytes except positions, which are big-endian `f32`. Entities live
//! in a fixed table of `max_slots` records spaced `stride` bytes apart.
//!
//! `lives` is the known address of the lives counter; the remaining
//! defaults describe the table shape and are expected to be overridden from
//! the configuration file for a specific game build.

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;

/// Default number of entity slots in the table.
pub const DEFAULT_ENTITY_SLOTS: u32 = 16;

/// Width in bytes of a position component.
const F32_WIDTH: u32 = 4;

/// Width in bytes of a single-byte field.
const BYTE_WIDTH: u32 = 1;

/// Addresses of every field the monitor reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryLayout {
    pub lives: u32,
    pub level_number: u32,
    pub player_x: u32,
    pub player_y: u32,
    pub num_starting_entities: u32,
    pub num_remaining_entities: u32,
    pub entities: EntityLayout,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            lives: 0x91D2_81FF,
            level_number: 0x91D2_8203,
            player_x: 0x91D2_8210,
            player_y: 0x91D2_8214,
            num_starting_entities: 0x91D2_8220,
            num_remaining_entities: 0x91D2_8221,
            entities: EntityLayout::default(),
        }
    }
}

impl MemoryLayout {
    /// Checks that the entity table is well formed.
    pub fn validate(&self) -> Result<(), LayoutError> {
        self.entities.validate()
    }
}

/// Shape of the entity table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntityLayout {
    /// Address of slot 0
    pub base: u32,
    /// Bytes between consecutive slots
    pub stride: u32,
    /// Capacity of the table
    pub max_slots: u32,
    /// Field offsets within one record
    pub offsets: EntityOffsets,
}

impl Default for EntityLayout {
    fn default() -> Self {
        Self {
            base: 0x91D2_8300,
            stride: 0x20,
            max_slots: DEFAULT_ENTITY_SLOTS,
            offsets: EntityOffsets::default(),
        }
    }
}

/// Offsets of each entity field from the start of its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntityOffsets {
    pub x: u32,
    pub y: u32,
    pub color: u32,
    pub alive: u32,
}

impl Default for EntityOffsets {
    fn default() -> Self {
        Self {
            x: 0x0,
            y: 0x4,
            color: 0x8,
            alive: 0x9,
        }
    }
}

impl EntityOffsets {
    /// Number of bytes one record must span to hold every field.
    ///
    /// Returns `None` if an offset is so large the extent overflows.
    pub fn extent(&self) -> Option<u32> {
        [
            self.x.checked_add(F32_WIDTH),
            self.y.checked_add(F32_WIDTH),
            self.color.checked_add(BYTE_WIDTH),
            self.alive.checked_add(BYTE_WIDTH),
        ]
        .into_iter()
        .try_fold(0u32, |acc, end| end.map(|e| acc.max(e)))
    }
}

impl EntityLayout {
    /// Address of the first byte of slot `index`: `base + index * stride`.
    pub fn slot_address(&self, index: u32) -> Option<u32> {
        index
            .checked_mul(self.stride)
            .and_then(|delta| self.base.checked_add(delta))
    }

    /// Address of a field at `offset` within slot `index`.
    pub fn field_address(&self, index: u32, offset: u32) -> Option<u32> {
        self.slot_address(index)
            .and_then(|slot| slot.checked_add(offset))
    }

    /// Checks slot count, stride and address-space bounds.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.max_slots == 0 {
            return Err(LayoutError::NoSlots);
        }

        let extent = self
            .offsets
            .extent()
            .ok_or(LayoutError::TableOverflow { base: self.base })?;

        if self.max_slots > 1 && self.stride < extent {
            return Err(LayoutError::StrideTooSmall {
                stride: self.stride,
                extent,
            });
        }

        // Last byte of the last slot must be addressable.
        self.slot_address(self.max_slots - 1)
            .and_then(|last| last.checked_add(extent - 1))
            .map(|_| ())
            .ok_or(LayoutError::TableOverflow { base: self.base })
    }
}
