//! Slot layout, classification flags, and entry snapshots.

use crate::config::SLOT_SIZE;
use crate::hash::{DrawCall, TOMBSTONE_HASH};
use std::mem::{align_of, offset_of, size_of};
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

bitflags::bitflags! {
    /// Classification bitset stored with every entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntryFlags: u32 {
        /// Slot holds a live entry.
        const VALID = 1 << 0;
        /// Draw uses an index buffer.
        const INDEXED = 1 << 1;
        /// Draw is instanced.
        const INSTANCED = 1 << 2;
        /// Geometry does not change between frames.
        const STATIC = 1 << 3;
        /// Executed often enough to be worth special handling.
        const HOT = 1 << 4;
        /// Not seen for longer than the cold threshold.
        const COLD = 1 << 5;
        /// Eligible for GPU-side indirect submission.
        const INDIRECT_READY = 1 << 6;
        /// Entry was invalidated; the slot is free to reclaim.
        const TOMBSTONE = 1 << 7;
    }
}

/// A point-in-time copy of one cache entry.
///
/// Fields other than `hash` are read without cross-field atomicity. A
/// snapshot taken right after another thread claimed the slot may show the
/// new hash with zeroed or previous metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Draw-call fingerprint.
    pub hash: u64,
    /// Shader program id.
    pub shader_id: i32,
    /// Vertex array id.
    pub vao_id: i32,
    /// Vertex count.
    pub vertex_count: i32,
    /// Index count.
    pub index_count: i32,
    /// Instance count.
    pub instance_count: i32,
    /// Classification flags.
    pub flags: EntryFlags,
    /// Frame of insertion.
    pub first_seen_frame: u64,
    /// Frame of the most recent hit or execution.
    pub last_seen_frame: u64,
    /// Sum of recorded execution times.
    pub total_execution_time_nanos: u64,
    /// Insert counts as one; every hit and recorded execution adds one.
    pub hit_count: i32,
}

impl Entry {
    /// HOT flag set.
    pub fn is_hot(&self) -> bool {
        self.flags.contains(EntryFlags::HOT)
    }

    /// COLD flag set.
    pub fn is_cold(&self) -> bool {
        self.flags.contains(EntryFlags::COLD)
    }

    /// INDIRECT_READY flag set.
    pub fn is_indirect_ready(&self) -> bool {
        self.flags.contains(EntryFlags::INDIRECT_READY)
    }

    /// Recorded execution time divided by `hit_count`.
    ///
    /// `hit_count` also counts the insert and every lookup, so this is the
    /// execution cost amortized over all uses, not a per-execution mean.
    pub fn execution_nanos_per_use(&self) -> u64 {
        if self.hit_count <= 0 {
            0
        } else {
            self.total_execution_time_nanos / self.hit_count as u64
        }
    }
}

/// One cache-line-sized slot in the off-heap table.
///
/// The table memory is zero-filled, which is a valid value for every atomic
/// here and means "empty slot". `hash` is only changed by CAS or SeqCst
/// store; the remaining fields use Acquire/Release.
#[repr(C, align(64))]
pub(crate) struct Slot {
    pub(crate) hash: AtomicU64,
    pub(crate) shader_id: AtomicI32,
    pub(crate) vao_id: AtomicI32,
    pub(crate) vertex_count: AtomicI32,
    pub(crate) index_count: AtomicI32,
    pub(crate) instance_count: AtomicI32,
    pub(crate) flags: AtomicU32,
    pub(crate) first_seen_frame: AtomicU64,
    pub(crate) last_seen_frame: AtomicU64,
    pub(crate) total_execution_nanos: AtomicU64,
    pub(crate) hit_count: AtomicI32,
    pub(crate) reserved: AtomicI32,
}

const _: () = assert!(size_of::<Slot>() == SLOT_SIZE);
const _: () = assert!(align_of::<Slot>() == SLOT_SIZE);
const _: () = assert!(offset_of!(Slot, hash) == 0);
const _: () = assert!(offset_of!(Slot, shader_id) == 8);
const _: () = assert!(offset_of!(Slot, flags) == 28);
const _: () = assert!(offset_of!(Slot, first_seen_frame) == 32);
const _: () = assert!(offset_of!(Slot, last_seen_frame) == 40);
const _: () = assert!(offset_of!(Slot, total_execution_nanos) == 48);
const _: () = assert!(offset_of!(Slot, hit_count) == 56);
const _: () = assert!(offset_of!(Slot, reserved) == 60);

/// Metadata written into a slot after its hash is claimed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotFields {
    pub(crate) shader_id: i32,
    pub(crate) vao_id: i32,
    pub(crate) vertex_count: i32,
    pub(crate) index_count: i32,
    pub(crate) instance_count: i32,
    pub(crate) flags: EntryFlags,
}

impl From<&DrawCall> for SlotFields {
    fn from(draw: &DrawCall) -> Self {
        Self {
            shader_id: draw.shader_id,
            vao_id: draw.vao_id,
            vertex_count: draw.vertex_count,
            index_count: draw.index_count,
            instance_count: draw.instance_count,
            flags: draw.flags,
        }
    }
}

impl Slot {
    #[inline(always)]
    pub(crate) fn load_hash(&self) -> u64 {
        self.hash.load(Ordering::SeqCst)
    }

    /// Populate a slot this thread just claimed.
    ///
    /// `last_seen_frame` is written before `first_seen_frame` so a reader
    /// racing with the overwrite of an older entry never sees
    /// `first > last`.
    pub(crate) fn write(&self, fields: &SlotFields, frame: u64) {
        self.shader_id.store(fields.shader_id, Ordering::Release);
        self.vao_id.store(fields.vao_id, Ordering::Release);
        self.vertex_count.store(fields.vertex_count, Ordering::Release);
        self.index_count.store(fields.index_count, Ordering::Release);
        self.instance_count.store(fields.instance_count, Ordering::Release);
        self.total_execution_nanos.store(0, Ordering::Release);
        self.hit_count.store(1, Ordering::Release);
        self.last_seen_frame.store(frame, Ordering::Release);
        self.first_seen_frame.store(frame, Ordering::Release);
        self.flags.store(
            (fields.flags | EntryFlags::VALID).bits() & !EntryFlags::TOMBSTONE.bits(),
            Ordering::Release,
        );
    }

    /// Count one use of the entry at `frame`. Returns the new hit count.
    #[inline]
    pub(crate) fn touch(&self, frame: u64) -> i32 {
        self.last_seen_frame.fetch_max(frame, Ordering::AcqRel);
        self.hit_count.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    #[inline]
    pub(crate) fn flags(&self) -> EntryFlags {
        EntryFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_flags(&self, flags: EntryFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn clear_flags(&self, flags: EntryFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Replace `flags` with TOMBSTONE after this thread tombstoned the hash.
    ///
    /// Skipped if the slot was already reclaimed or its flags changed since
    /// `observed` was read.
    pub(crate) fn retire(&self, observed: EntryFlags) {
        if self.load_hash() != TOMBSTONE_HASH {
            return;
        }
        let _ = self.flags.compare_exchange(
            observed.bits(),
            EntryFlags::TOMBSTONE.bits(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Copy the slot out, reporting `hash` as the identity.
    pub(crate) fn snapshot(&self, hash: u64) -> Entry {
        Entry {
            hash,
            shader_id: self.shader_id.load(Ordering::Acquire),
            vao_id: self.vao_id.load(Ordering::Acquire),
            vertex_count: self.vertex_count.load(Ordering::Acquire),
            index_count: self.index_count.load(Ordering::Acquire),
            instance_count: self.instance_count.load(Ordering::Acquire),
            flags: self.flags(),
            first_seen_frame: self.first_seen_frame.load(Ordering::Acquire),
            last_seen_frame: self.last_seen_frame.load(Ordering::Acquire),
            total_execution_time_nanos: self.total_execution_nanos.load(Ordering::Acquire),
            hit_count: self.hit_count.load(Ordering::Acquire),
        }
    }

    /// Zero every word, leaving an empty slot.
    pub(crate) fn reset(&self) {
        self.hash.store(0, Ordering::SeqCst);
        self.shader_id.store(0, Ordering::Relaxed);
        self.vao_id.store(0, Ordering::Relaxed);
        self.vertex_count.store(0, Ordering::Relaxed);
        self.index_count.store(0, Ordering::Relaxed);
        self.instance_count.store(0, Ordering::Relaxed);
        self.flags.store(0, Ordering::Relaxed);
        self.first_seen_frame.store(0, Ordering::Relaxed);
        self.last_seen_frame.store(0, Ordering::Relaxed);
        self.total_execution_nanos.store(0, Ordering::Relaxed);
        self.hit_count.store(0, Ordering::Relaxed);
        self.reserved.store(0, Ordering::Relaxed);
    }
}
