//! Stable wire/persistence encoding for [`StoredValue`].
//!
//! ```text
//! ┌──────────┬──────────────────────┬─────────────────────────────────┐
//! │ tag: u8  │ value: uvarint len + │ timing fields (variant-specific) │
//! │          │        bytes         │                                 │
//! └──────────┴──────────────────────┴─────────────────────────────────┘
//!
//! 0x01 Immortal        (none)
//! 0x02 Mortal          created: uvarint, lifespan: i64
//! 0x03 Transient       last_used: uvarint, max_idle: i64
//! 0x04 TransientMortal created: uvarint, lifespan: i64,
//!                      last_used: uvarint, max_idle: i64
//! ```
//!
//! `created` and `last_used` are never negative and use an unsigned varint
//! (7 bits per byte, least significant group first, high bit = continue).
//! `lifespan` and `max_idle` may be -1 and are written as big-endian i64.
//! Field order is part of the cluster wire contract.

use super::entries::StoredValue;
use crate::error::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

const TAG_IMMORTAL: u8 = 0x01;
const TAG_MORTAL: u8 = 0x02;
const TAG_TRANSIENT: u8 = 0x03;
const TAG_TRANSIENT_MORTAL: u8 = 0x04;

/// Encode a stored value.
pub fn encode(value: &StoredValue) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(encoded_len_hint(value));
    encode_into(value, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a stored value onto the end of `buf`.
///
/// Nothing is written if a timestamp field is negative.
pub fn encode_into(value: &StoredValue, buf: &mut BytesMut) -> Result<(), CodecError> {
    match value {
        StoredValue::Immortal { value } => {
            buf.put_u8(TAG_IMMORTAL);
            put_payload(buf, value);
        }
        StoredValue::Mortal {
            value,
            created,
            lifespan,
        } => {
            let created = timestamp("created", *created)?;
            buf.put_u8(TAG_MORTAL);
            put_payload(buf, value);
            put_uvarint(buf, created);
            buf.put_i64(*lifespan);
        }
        StoredValue::Transient {
            value,
            max_idle,
            last_used,
        } => {
            let last_used = timestamp("last_used", *last_used)?;
            buf.put_u8(TAG_TRANSIENT);
            put_payload(buf, value);
            put_uvarint(buf, last_used);
            buf.put_i64(*max_idle);
        }
        StoredValue::TransientMortal {
            value,
            created,
            lifespan,
            max_idle,
            last_used,
        } => {
            let created = timestamp("created", *created)?;
            let last_used = timestamp("last_used", *last_used)?;
            buf.put_u8(TAG_TRANSIENT_MORTAL);
            put_payload(buf, value);
            put_uvarint(buf, created);
            buf.put_i64(*lifespan);
            put_uvarint(buf, last_used);
            buf.put_i64(*max_idle);
        }
    }
    Ok(())
}

/// Decode a stored value that occupies all of `data`.
pub fn decode(data: &[u8]) -> Result<StoredValue, CodecError> {
    let mut buf = data;
    let value = decode_from(&mut buf)?;
    if buf.has_remaining() {
        return Err(CodecError::Trailing(buf.remaining()));
    }
    Ok(value)
}

/// Decode one stored value from the front of `buf`, advancing it.
pub fn decode_from<B: Buf>(buf: &mut B) -> Result<StoredValue, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::UnexpectedEof("tag"));
    }
    let tag = buf.get_u8();
    let value = get_payload(buf)?;

    let stored = match tag {
        TAG_IMMORTAL => StoredValue::Immortal { value },
        TAG_MORTAL => {
            let created = get_timestamp(buf, "created")?;
            let lifespan = get_i64(buf, "lifespan")?;
            StoredValue::Mortal {
                value,
                created,
                lifespan,
            }
        }
        TAG_TRANSIENT => {
            let last_used = get_timestamp(buf, "last_used")?;
            let max_idle = get_i64(buf, "max_idle")?;
            StoredValue::Transient {
                value,
                max_idle,
                last_used,
            }
        }
        TAG_TRANSIENT_MORTAL => {
            let created = get_timestamp(buf, "created")?;
            let lifespan = get_i64(buf, "lifespan")?;
            let last_used = get_timestamp(buf, "last_used")?;
            let max_idle = get_i64(buf, "max_idle")?;
            StoredValue::TransientMortal {
                value,
                created,
                lifespan,
                max_idle,
                last_used,
            }
        }
        other => return Err(CodecError::UnknownTag(other)),
    };
    Ok(stored)
}

/// Write an unsigned varint.
pub fn put_uvarint<B: BufMut>(buf: &mut B, mut v: u64) {
    while v >= 0x80 {
        buf.put_u8((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

/// Read an unsigned varint.
pub fn get_uvarint<B: Buf>(buf: &mut B, field: &'static str) -> Result<u64, CodecError> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(CodecError::UnexpectedEof(field));
        }
        let byte = buf.get_u8();
        let bits = u64::from(byte & 0x7f);
        if shift == 63 && bits > 1 || shift > 63 {
            return Err(CodecError::VarintOverflow);
        }
        result |= bits << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

fn timestamp(field: &'static str, value: i64) -> Result<u64, CodecError> {
    u64::try_from(value).map_err(|_| CodecError::NegativeTimestamp { field, value })
}

fn get_timestamp<B: Buf>(buf: &mut B, field: &'static str) -> Result<i64, CodecError> {
    let raw = get_uvarint(buf, field)?;
    i64::try_from(raw).map_err(|_| CodecError::NegativeTimestamp {
        field,
        value: raw as i64,
    })
}

fn get_i64<B: Buf>(buf: &mut B, field: &'static str) -> Result<i64, CodecError> {
    if buf.remaining() < 8 {
        return Err(CodecError::UnexpectedEof(field));
    }
    Ok(buf.get_i64())
}

fn put_payload(buf: &mut BytesMut, value: &Bytes) {
    put_uvarint(buf, value.len() as u64);
    buf.put_slice(value);
}

fn get_payload<B: Buf>(buf: &mut B) -> Result<Bytes, CodecError> {
    let len = get_uvarint(buf, "value length")?;
    let len = usize::try_from(len).map_err(|_| CodecError::UnexpectedEof("value"))?;
    if buf.remaining() < len {
        return Err(CodecError::UnexpectedEof("value"));
    }
    Ok(buf.copy_to_bytes(len))
}

fn encoded_len_hint(value: &StoredValue) -> usize {
    // tag + length varint + payload + up to two (varint, i64) pairs
    1 + 10 + value.value().len() + 2 * (10 + 8)
}
