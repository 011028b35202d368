//! Draw-call fingerprinting.
//!
//! A draw call is identified by the integers the graphics layer binds for it.
//! [`compute_hash`] folds them into a 64-bit key with xxHash-style
//! multiply/rotate mixing and a murmur3 finalizer, so `hash & bucket_mask`
//! spreads evenly across buckets.

use crate::entry::EntryFlags;

/// Hash value of an empty slot.
pub const EMPTY_HASH: u64 = 0;

/// Hash value of a tombstoned slot (the bit pattern of `i64::MIN`).
pub const TOMBSTONE_HASH: u64 = 1 << 63;

/// What [`compute_hash`] returns in place of a reserved value.
const REMAPPED_HASH: u64 = 1;

const SEED: u64 = 0x9E37_79B9_7F4A_7C15;

const K: [u64; 3] = [
    0xC2B2_AE3D_27D4_EB4F,
    0x1656_67B1_9E37_79F9,
    0x85EB_CA77_C2B2_AE63,
];

const ROTATIONS: [u32; 8] = [31, 27, 33, 29, 23, 37, 19, 41];

const FMIX_1: u64 = 0xFF51_AFD7_ED55_8CCD;
const FMIX_2: u64 = 0xC4CE_B9FE_1A85_EC53;

/// Returns true if `hash` is one of the two slot sentinels.
#[inline(always)]
pub fn is_reserved(hash: u64) -> bool {
    hash == EMPTY_HASH || hash == TOMBSTONE_HASH
}

/// Compute the fingerprint of a draw call.
///
/// Deterministic across runs and processes. Never returns [`EMPTY_HASH`] or
/// [`TOMBSTONE_HASH`].
#[allow(clippy::too_many_arguments)]
#[inline]
pub fn compute_hash(
    shader_id: i32,
    vao_id: i32,
    vertex_buffer_id: i32,
    vertex_count: i32,
    index_count: i32,
    instance_count: i32,
    primitive_type: i32,
    flags: i32,
) -> u64 {
    let fields = [
        shader_id,
        vao_id,
        vertex_buffer_id,
        vertex_count,
        index_count,
        instance_count,
        primitive_type,
        flags,
    ];

    let mut h = SEED;
    for (i, &field) in fields.iter().enumerate() {
        // sign-extend so negative ids mix differently from their u32 twins
        let v = field as i64 as u64;
        h ^= v.wrapping_mul(K[i % 3]);
        h = h.rotate_left(ROTATIONS[i]).wrapping_mul(K[(i + 1) % 3]);
    }

    h ^= h >> 33;
    h = h.wrapping_mul(FMIX_1);
    h ^= h >> 33;
    h = h.wrapping_mul(FMIX_2);
    h ^= h >> 33;

    if is_reserved(h) { REMAPPED_HASH } else { h }
}

/// Identity of one draw call as issued by the graphics layer.
///
/// Every field takes part in the hash. Only the subset stored in a slot
/// (`shader_id`, `vao_id`, the three counts, and `flags`) is returned by a
/// lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawCall {
    /// Linked program object.
    pub shader_id: i32,
    /// Vertex array object.
    pub vao_id: i32,
    /// Vertex buffer object.
    pub vertex_buffer_id: i32,
    /// Vertices per instance.
    pub vertex_count: i32,
    /// Indices (0 for non-indexed draws).
    pub index_count: i32,
    /// Instances (0 or 1 for non-instanced draws).
    pub instance_count: i32,
    /// Primitive topology enum value.
    pub primitive_type: i32,
    /// Caller-side classification (INDEXED, INSTANCED, STATIC).
    pub flags: EntryFlags,
}

impl DrawCall {
    /// Fingerprint of this draw call. See [`compute_hash`].
    #[inline]
    pub fn hash(&self) -> u64 {
        compute_hash(
            self.shader_id,
            self.vao_id,
            self.vertex_buffer_id,
            self.vertex_count,
            self.index_count,
            self.instance_count,
            self.primitive_type,
            self.flags.bits() as i32,
        )
    }
}
