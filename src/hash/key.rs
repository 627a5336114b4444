//! What a key contributes to the hash.

use bytes::Bytes;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

/// The representation of a key that gets hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashInput<'a> {
    /// Hash these bytes directly.
    Bytes(&'a [u8]),
    /// Spread this pre-computed code.
    Code(i32),
}

/// A key that can be mapped to a stripe or an owner.
///
/// Byte sequences and text hash their bytes (text as UTF-8); integers and
/// [`Hashed`] wrappers contribute a native hash code which is then spread.
pub trait HashKey {
    /// The bytes or code to hash.
    fn hash_input(&self) -> HashInput<'_>;
}

impl HashKey for [u8] {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput::Bytes(self)
    }
}

impl<const N: usize> HashKey for [u8; N] {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput::Bytes(self)
    }
}

impl HashKey for Vec<u8> {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput::Bytes(self)
    }
}

impl HashKey for Bytes {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput::Bytes(self)
    }
}

impl HashKey for str {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput::Bytes(self.as_bytes())
    }
}

impl HashKey for String {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput::Bytes(self.as_bytes())
    }
}

impl HashKey for i32 {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput::Code(*self)
    }
}

impl HashKey for u32 {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput::Code(*self as i32)
    }
}

impl HashKey for i64 {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput::Code(fold64(*self as u64))
    }
}

impl HashKey for u64 {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput::Code(fold64(*self))
    }
}

impl<K: HashKey + ?Sized> HashKey for &K {
    fn hash_input(&self) -> HashInput<'_> {
        (**self).hash_input()
    }
}

/// Fold a 64-bit value into 32 bits by xoring its halves.
fn fold64(v: u64) -> i32 {
    (v ^ (v >> 32)) as u32 as i32
}

/// A key wrapping an opaque byte payload.
///
/// Hashes exactly like its payload, so a wrapped key and the raw bytes
/// always land on the same stripe and owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteArrayKey(Bytes);

impl ByteArrayKey {
    /// Wrap a payload.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    /// The wrapped payload.
    pub fn data(&self) -> &Bytes {
        &self.0
    }

    /// Unwrap into the payload.
    pub fn into_inner(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for ByteArrayKey {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}

impl From<Vec<u8>> for ByteArrayKey {
    fn from(data: Vec<u8>) -> Self {
        Self(Bytes::from(data))
    }
}

impl HashKey for ByteArrayKey {
    fn hash_input(&self) -> HashInput<'_> {
        HashInput::Bytes(&self.0)
    }
}

/// Adapter for keys with no byte form: hashes `T` with a seeded xxHash64,
/// folds the result to 32 bits, and spreads that code.
///
/// The xxHash seed is fixed, so the code is stable across processes as
/// long as `T`'s [`Hash`] impl is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hashed<T>(pub T);

impl<T: Hash> HashKey for Hashed<T> {
    fn hash_input(&self) -> HashInput<'_> {
        let mut hasher = XxHash64::with_seed(0);
        self.0.hash(&mut hasher);
        HashInput::Code(fold64(hasher.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_is_utf8_bytes() {
        assert_eq!("abc".hash_input(), HashInput::Bytes(b"abc"));
        assert_eq!(
            String::from("é").hash_input(),
            HashInput::Bytes(&[0xc3, 0xa9])
        );
    }

    #[test]
    fn test_long_code_folds_halves() {
        assert_eq!(1i64.hash_input(), HashInput::Code(1));
        assert_eq!((1i64 << 32).hash_input(), HashInput::Code(1));
        assert_eq!((-1i64).hash_input(), HashInput::Code(0));
    }

    #[test]
    fn test_byte_array_key_unwraps() {
        let key = ByteArrayKey::from(b"payload".to_vec());
        assert_eq!(key.hash_input(), HashInput::Bytes(b"payload"));
        assert_eq!(key.data().as_ref(), b"payload");
    }
}
