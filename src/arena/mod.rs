//! Vector arena: a fixed-byte-budget slab of vector slots.
//!
//! The arena pre-allocates its whole budget at construction: a contiguous
//! `f32` buffer for vector data and a parallel [`SlotMeta`] table. Slots
//! are handed out from a free list, so every operation is O(1) and the
//! capacity bound is enforced structurally rather than by accounting.
//!
//! # Memory Layout
//!
//! - `data`: flat `Vec<f32>`, `capacity * dimensions` entries.
//! - `meta`: `Vec<SlotMeta>`, one fixed-layout record per slot.
//! - `active`: `BitVec`, one liveness bit per slot.

use crate::types::{MemoryType, Speaker};
use bitvec::prelude::*;
use bytemuck::{Pod, Zeroable};
use thiserror::Error;
use uuid::Uuid;

/// A position in the vector arena.
///
/// Slot IDs are dense non-negative integers; a slot's lifetime spans from
/// [`VectorArena::allocate`] to [`VectorArena::free`], after which the ID
/// may be recycled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SlotId(pub u32);

impl SlotId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Errors raised by arena operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// Every slot is allocated.
    #[error("arena full")]
    Full,

    /// The slot is not currently allocated (or out of range).
    #[error("invalid slot: {0}")]
    InvalidSlot(u32),

    /// Vector length differs from the arena dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimensionality.
        expected: usize,
        /// Provided vector length.
        actual: usize,
    },
}

const FLAG_HAS_CONVERSATION: u8 = 0b0000_0001;
const FLAG_HAS_SPEAKER: u8 = 0b0000_0010;

/// Inline metadata co-located with each vector slot.
///
/// # Layout
///
/// Total size: 56 bytes, aligned to 8. `#[repr(C)]` with explicit padding
/// so the record is `Pod` and its size enters the slot-size arithmetic
/// deterministically. UUIDs are stored as raw bytes; optional fields are
/// encoded through the `flags` bitmask.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct SlotMeta {
    /// Owning persona, as raw UUID bytes.
    pub persona_id: [u8; 16],
    /// Conversation grouping, as raw UUID bytes (valid iff flagged).
    pub conversation_id: [u8; 16],
    /// Ingestion wall-clock time, epoch milliseconds.
    pub created_at_ms: i64,
    /// Event timestamp, epoch milliseconds (drives decay and age filters).
    pub timestamp_ms: i64,
    /// Importance in `[0, 1]`.
    pub importance: f32,
    /// Memory-type code (see [`MemoryType`]).
    pub memory_type: u8,
    /// Speaker code (see [`Speaker`]); 0 when absent.
    pub speaker: u8,
    /// Presence bits for the optional fields.
    pub flags: u8,
    /// Explicit padding, always zero.
    pub _pad: u8,
}

const _: () = assert!(std::mem::size_of::<SlotMeta>() == 56);
const _: () = assert!(std::mem::align_of::<SlotMeta>() == 8);

impl SlotMeta {
    /// Builds a slot record from typed fields.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        persona_id: Uuid,
        conversation_id: Option<Uuid>,
        memory_type: MemoryType,
        speaker: Option<Speaker>,
        importance: f32,
        created_at_ms: i64,
        timestamp_ms: i64,
    ) -> Self {
        let mut flags = 0;
        let conversation_bytes = match conversation_id {
            Some(id) => {
                flags |= FLAG_HAS_CONVERSATION;
                *id.as_bytes()
            }
            None => [0; 16],
        };
        let speaker_code = match speaker {
            Some(s) => {
                flags |= FLAG_HAS_SPEAKER;
                s.to_code()
            }
            None => 0,
        };
        Self {
            persona_id: *persona_id.as_bytes(),
            conversation_id: conversation_bytes,
            created_at_ms,
            timestamp_ms,
            importance,
            memory_type: memory_type.to_code(),
            speaker: speaker_code,
            flags,
            _pad: 0,
        }
    }

    /// The owning persona.
    #[must_use]
    pub fn persona(&self) -> Uuid {
        Uuid::from_bytes(self.persona_id)
    }

    /// The conversation grouping, if any.
    #[must_use]
    pub fn conversation(&self) -> Option<Uuid> {
        if self.flags & FLAG_HAS_CONVERSATION != 0 {
            Some(Uuid::from_bytes(self.conversation_id))
        } else {
            None
        }
    }

    /// The typed memory kind.
    #[must_use]
    pub fn kind(&self) -> MemoryType {
        MemoryType::from_code(self.memory_type).unwrap_or(MemoryType::Context)
    }

    /// The speaker tag, if any.
    #[must_use]
    pub fn speaker_tag(&self) -> Option<Speaker> {
        if self.flags & FLAG_HAS_SPEAKER != 0 {
            Speaker::from_code(self.speaker)
        } else {
            None
        }
    }
}

/// Fixed-capacity slab of vector slots with free-list allocation.
pub struct VectorArena {
    dimensions: usize,
    capacity: usize,
    data: Vec<f32>,
    meta: Vec<SlotMeta>,
    active: BitVec,
    free: Vec<SlotId>,
}

impl VectorArena {
    /// Creates an arena sized to a byte budget.
    ///
    /// Capacity is `floor(max_memory_mb * 2^20 / slot_size)` with
    /// `slot_size = dimensions * 4 + size_of::<SlotMeta>()`, fixed for
    /// the arena's lifetime. The full budget is allocated up front.
    #[must_use]
    pub fn new(max_memory_mb: usize, dimensions: usize) -> Self {
        let slot_size = dimensions * std::mem::size_of::<f32>() + std::mem::size_of::<SlotMeta>();
        let capacity = (max_memory_mb * 1024 * 1024) / slot_size.max(1);
        Self::with_capacity(capacity, dimensions)
    }

    /// Creates an arena with an explicit slot capacity (test aid).
    #[must_use]
    pub fn with_capacity(capacity: usize, dimensions: usize) -> Self {
        // Highest slot last so allocation starts at slot 0.
        let free: Vec<SlotId> = (0..capacity as u32).rev().map(SlotId).collect();
        Self {
            dimensions,
            capacity,
            data: vec![0.0; capacity * dimensions],
            meta: vec![SlotMeta::zeroed(); capacity],
            active: bitvec![0; capacity],
            free,
        }
    }

    /// Pops a slot from the free list and marks it live.
    ///
    /// # Errors
    ///
    /// `ArenaError::Full` when no slot is available.
    pub fn allocate(&mut self) -> Result<SlotId, ArenaError> {
        let slot = self.free.pop().ok_or(ArenaError::Full)?;
        self.active.set(slot.index(), true);
        Ok(slot)
    }

    /// Writes a vector and its metadata into an allocated slot.
    ///
    /// # Errors
    ///
    /// `InvalidSlot` if the slot is not live; `DimensionMismatch` if the
    /// vector length differs from the arena dimensionality.
    pub fn write(&mut self, slot: SlotId, vector: &[f32], meta: SlotMeta) -> Result<(), ArenaError> {
        if !self.is_live(slot) {
            return Err(ArenaError::InvalidSlot(slot.0));
        }
        if vector.len() != self.dimensions {
            return Err(ArenaError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        let start = slot.index() * self.dimensions;
        self.data[start..start + self.dimensions].copy_from_slice(vector);
        self.meta[slot.index()] = meta;
        Ok(())
    }

    /// Returns the vector and metadata views for a live slot.
    ///
    /// # Errors
    ///
    /// `InvalidSlot` if the slot was never allocated or has been freed.
    pub fn read(&self, slot: SlotId) -> Result<(&[f32], &SlotMeta), ArenaError> {
        if !self.is_live(slot) {
            return Err(ArenaError::InvalidSlot(slot.0));
        }
        let start = slot.index() * self.dimensions;
        Ok((
            &self.data[start..start + self.dimensions],
            &self.meta[slot.index()],
        ))
    }

    /// Returns the vector slice for a live slot.
    pub fn vector(&self, slot: SlotId) -> Result<&[f32], ArenaError> {
        self.read(slot).map(|(v, _)| v)
    }

    /// Returns the metadata record for a live slot.
    pub fn slot_meta(&self, slot: SlotId) -> Result<&SlotMeta, ArenaError> {
        self.read(slot).map(|(_, m)| m)
    }

    /// Releases a slot back to the free list.
    ///
    /// Subsequent reads of the slot fail with `InvalidSlot` until it is
    /// allocated again. Double frees are rejected, which also keeps the
    /// free list duplicate-free.
    pub fn free(&mut self, slot: SlotId) -> Result<(), ArenaError> {
        if !self.is_live(slot) {
            return Err(ArenaError::InvalidSlot(slot.0));
        }
        self.active.set(slot.index(), false);
        self.free.push(slot);
        Ok(())
    }

    /// True if the slot is currently allocated.
    #[must_use]
    pub fn is_live(&self, slot: SlotId) -> bool {
        slot.index() < self.capacity && self.active[slot.index()]
    }

    /// Iterates live slots with their vectors and metadata.
    pub fn iter_live(&self) -> impl Iterator<Item = (SlotId, &[f32], &SlotMeta)> + '_ {
        self.active.iter_ones().map(move |idx| {
            let start = idx * self.dimensions;
            (
                SlotId(idx as u32),
                &self.data[start..start + self.dimensions],
                &self.meta[idx],
            )
        })
    }

    /// Raw vector bytes for a slot, ignoring liveness.
    ///
    /// Freed slots keep their last contents until rewritten; the HNSW
    /// graph reads tombstoned ghosts through this accessor while they
    /// still provide routing connectivity.
    pub(crate) fn raw_vector(&self, slot: SlotId) -> &[f32] {
        let start = slot.index() * self.dimensions;
        &self.data[start..start + self.dimensions]
    }

    /// Number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity - self.free.len()
    }

    /// True when no slot is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot capacity fixed at construction.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Vector dimensionality.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Approximate resident bytes of the arena buffers.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.data.capacity() * std::mem::size_of::<f32>()
            + self.meta.capacity() * std::mem::size_of::<SlotMeta>()
            + self.free.capacity() * std::mem::size_of::<SlotId>()
            + self.active.capacity() / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_for(persona: Uuid) -> SlotMeta {
        SlotMeta::new(persona, None, MemoryType::Fact, None, 0.5, 1_000, 1_000)
    }

    #[test]
    fn capacity_derives_from_byte_budget() {
        // slot = 4 * 4 + 56 = 72 bytes; 1 MiB / 72 = 14563 slots
        let arena = VectorArena::new(1, 4);
        assert_eq!(arena.capacity(), 1024 * 1024 / 72);
        assert!(arena.is_empty());
    }

    #[test]
    fn allocate_write_read_free_cycle() {
        let persona = Uuid::new_v4();
        let mut arena = VectorArena::with_capacity(4, 3);
        let slot = arena.allocate().unwrap();
        arena.write(slot, &[1.0, 2.0, 3.0], meta_for(persona)).unwrap();

        let (vector, meta) = arena.read(slot).unwrap();
        assert_eq!(vector, &[1.0, 2.0, 3.0]);
        assert_eq!(meta.persona(), persona);
        assert_eq!(meta.kind(), MemoryType::Fact);

        arena.free(slot).unwrap();
        assert_eq!(arena.read(slot), Err(ArenaError::InvalidSlot(slot.0)));
    }

    #[test]
    fn allocation_fails_when_full() {
        let mut arena = VectorArena::with_capacity(2, 2);
        arena.allocate().unwrap();
        arena.allocate().unwrap();
        assert_eq!(arena.allocate(), Err(ArenaError::Full));
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut arena = VectorArena::with_capacity(2, 2);
        let a = arena.allocate().unwrap();
        let _b = arena.allocate().unwrap();
        arena.free(a).unwrap();
        let c = arena.allocate().unwrap();
        assert_eq!(a, c);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn double_free_rejected() {
        let mut arena = VectorArena::with_capacity(2, 2);
        let slot = arena.allocate().unwrap();
        arena.free(slot).unwrap();
        assert_eq!(arena.free(slot), Err(ArenaError::InvalidSlot(slot.0)));
        // A rejected double free must not duplicate the free-list entry.
        assert_eq!(arena.capacity() - arena.len(), 2);
    }

    #[test]
    fn write_validates_dimensions() {
        let mut arena = VectorArena::with_capacity(1, 3);
        let slot = arena.allocate().unwrap();
        let err = arena
            .write(slot, &[1.0, 2.0], meta_for(Uuid::new_v4()))
            .unwrap_err();
        assert_eq!(
            err,
            ArenaError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn optional_fields_round_trip() {
        let conversation = Uuid::new_v4();
        let meta = SlotMeta::new(
            Uuid::new_v4(),
            Some(conversation),
            MemoryType::Conversation,
            Some(Speaker::Assistant),
            0.8,
            5,
            7,
        );
        assert_eq!(meta.conversation(), Some(conversation));
        assert_eq!(meta.speaker_tag(), Some(Speaker::Assistant));

        let bare = meta_for(Uuid::new_v4());
        assert_eq!(bare.conversation(), None);
        assert_eq!(bare.speaker_tag(), None);
    }

    #[test]
    fn iter_live_skips_freed_slots() {
        let mut arena = VectorArena::with_capacity(3, 2);
        let a = arena.allocate().unwrap();
        let b = arena.allocate().unwrap();
        arena.write(a, &[1.0, 0.0], meta_for(Uuid::new_v4())).unwrap();
        arena.write(b, &[0.0, 1.0], meta_for(Uuid::new_v4())).unwrap();
        arena.free(a).unwrap();

        let live: Vec<SlotId> = arena.iter_live().map(|(slot, _, _)| slot).collect();
        assert_eq!(live, vec![b]);
    }
}
