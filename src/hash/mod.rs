//! Key hashing for stripe selection and owner placement.
//!
//! Every node must map the same key to the same stripe and the same owners
//! without exchanging hash codes, so the hash is a fixed, endian-neutral
//! MurmurHash2 variant computed with 32-bit wrapping arithmetic.
//!
//! # Example
//!
//! ```rust
//! use cortado::hash::{HashKey, MurmurHash2};
//!
//! let murmur = MurmurHash2::new();
//!
//! // Text and its UTF-8 bytes hash identically
//! assert_eq!(murmur.hash("user:123"), murmur.hash(b"user:123".as_slice()));
//!
//! // A pre-computed code is spread through the same mixing function
//! assert_eq!(murmur.hash_code(42), murmur.hash_bytes(&42i32.to_le_bytes()));
//! ```

mod key;
mod murmur;

pub use key::{ByteArrayKey, HashInput, HashKey, Hashed};
pub use murmur::MurmurHash2;

/// Map a signed 32-bit hash onto `[0, buckets)`.
///
/// The hash is reinterpreted as unsigned before the modulo, so negative
/// hashes never produce an out-of-range index.
///
/// # Panics
///
/// Panics if `buckets` is zero.
#[inline]
pub fn bucket_index(hash: i32, buckets: usize) -> usize {
    (hash as u32 as usize) % buckets
}
