//! MurmurHash2, endian-neutral variant.

use super::key::{HashInput, HashKey};

const M: i32 = 0x5bd1_e995;
const R: u32 = 24;
const SEED: i32 = -1;

/// Endian-neutral MurmurHash2 over raw bytes, keys and pre-computed codes.
///
/// Bytes are assembled into little-endian 4-byte chunks. Each byte lane is
/// sign-extended before it is or-ed into the chunk, which keeps results
/// identical to existing cluster members that hash with signed bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MurmurHash2;

impl MurmurHash2 {
    /// Create a hasher. The hasher is stateless.
    pub const fn new() -> Self {
        Self
    }

    /// Hash a byte slice.
    pub fn hash_bytes(&self, payload: &[u8]) -> i32 {
        let mut h = SEED;

        let mut chunks = payload.chunks_exact(4);
        for chunk in &mut chunks {
            let mut k = lane(chunk[0]);
            k |= lane(chunk[1]) << 8;
            k |= lane(chunk[2]) << 16;
            k |= lane(chunk[3]) << 24;

            k = k.wrapping_mul(M);
            k ^= unsigned_shr(k, R);
            k = k.wrapping_mul(M);
            h = h.wrapping_mul(M);
            h ^= k;
        }

        // Tail bytes are folded highest index first, without the chunk pre-mix.
        let tail = chunks.remainder();
        if tail.len() == 3 {
            h ^= lane(tail[2]) << 16;
        }
        if tail.len() >= 2 {
            h ^= lane(tail[1]) << 8;
        }
        if !tail.is_empty() {
            h ^= lane(tail[0]);
            h = h.wrapping_mul(M);
        }

        h ^= unsigned_shr(h, 13);
        h = h.wrapping_mul(M);
        h ^= unsigned_shr(h, 15);
        h
    }

    /// Spread a pre-computed hash code through the same mixing function.
    ///
    /// Equal to hashing the code's four little-endian bytes.
    pub fn hash_code(&self, code: i32) -> i32 {
        self.hash_bytes(&code.to_le_bytes())
    }

    /// Hash any key, dispatching on its byte or code representation.
    pub fn hash<K: HashKey + ?Sized>(&self, key: &K) -> i32 {
        match key.hash_input() {
            HashInput::Bytes(bytes) => self.hash_bytes(bytes),
            HashInput::Code(code) => self.hash_code(code),
        }
    }
}

#[inline]
fn lane(b: u8) -> i32 {
    b as i8 as i32
}

#[inline]
fn unsigned_shr(v: i32, n: u32) -> i32 {
    ((v as u32) >> n) as i32
}
