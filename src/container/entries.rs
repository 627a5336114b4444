//! Stored values and the entries rehydrated from them.
//!
//! A [`StoredValue`] is what a storage slot holds: the value plus whichever
//! timing fields its variant needs. The key is never duplicated into it;
//! [`StoredValue::to_full_entry`] pairs it with the key on read.
//!
//! | Variant           | Expires when                                         |
//! |-------------------|------------------------------------------------------|
//! | `Immortal`        | never                                                |
//! | `Mortal`          | `now > created + lifespan`                           |
//! | `Transient`       | `now > last_used + max_idle`                         |
//! | `TransientMortal` | either of the above                                  |
//!
//! A lifespan or max-idle of `-1` disables that bound. All times are
//! wall-clock milliseconds.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel for "no lifespan / no max-idle".
pub const UNBOUNDED: i64 = -1;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Whether an entry with the given lifespan, created at `created`, is expired at `now`.
pub fn is_expired_mortal(lifespan: i64, created: i64, now: i64) -> bool {
    lifespan > UNBOUNDED && created > UNBOUNDED && now > created.saturating_add(lifespan)
}

/// Whether an entry with the given max-idle, last used at `last_used`, is expired at `now`.
pub fn is_expired_transient(max_idle: i64, last_used: i64, now: i64) -> bool {
    max_idle > UNBOUNDED && last_used > UNBOUNDED && now > last_used.saturating_add(max_idle)
}

/// A value held by one storage slot, tagged by which timing fields apply.
///
/// Equality covers the tag and every field: an immortal value never equals
/// a mortal one with the same payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoredValue {
    /// Never expires.
    Immortal { value: Bytes },

    /// Expires `lifespan` ms after `created`.
    Mortal {
        value: Bytes,
        created: i64,
        lifespan: i64,
    },

    /// Expires `max_idle` ms after `last_used`.
    Transient {
        value: Bytes,
        max_idle: i64,
        last_used: i64,
    },

    /// Expires at the earlier of the lifespan and max-idle deadlines.
    TransientMortal {
        value: Bytes,
        created: i64,
        lifespan: i64,
        max_idle: i64,
        last_used: i64,
    },
}

impl StoredValue {
    /// Create an immortal value.
    pub fn immortal(value: impl Into<Bytes>) -> Self {
        Self::Immortal {
            value: value.into(),
        }
    }

    /// Create a mortal value.
    pub fn mortal(value: impl Into<Bytes>, created: i64, lifespan: i64) -> Self {
        Self::Mortal {
            value: value.into(),
            created,
            lifespan,
        }
    }

    /// Create a transient value.
    pub fn transient(value: impl Into<Bytes>, last_used: i64, max_idle: i64) -> Self {
        Self::Transient {
            value: value.into(),
            max_idle,
            last_used,
        }
    }

    /// Create a transient, mortal value.
    pub fn transient_mortal(
        value: impl Into<Bytes>,
        created: i64,
        lifespan: i64,
        last_used: i64,
        max_idle: i64,
    ) -> Self {
        Self::TransientMortal {
            value: value.into(),
            created,
            lifespan,
            max_idle,
            last_used,
        }
    }

    /// Create the variant matching the requested bounds, stamped at `now`.
    ///
    /// A bound of `-1` (or any negative value) is unbounded; with both
    /// unbounded the value is immortal.
    pub fn create(value: impl Into<Bytes>, now: i64, lifespan: i64, max_idle: i64) -> Self {
        let value = value.into();
        match (lifespan > UNBOUNDED, max_idle > UNBOUNDED) {
            (false, false) => Self::immortal(value),
            (true, false) => Self::mortal(value, now, lifespan),
            (false, true) => Self::transient(value, now, max_idle),
            (true, true) => Self::transient_mortal(value, now, lifespan, now, max_idle),
        }
    }

    /// The stored payload.
    pub fn value(&self) -> &Bytes {
        match self {
            Self::Immortal { value }
            | Self::Mortal { value, .. }
            | Self::Transient { value, .. }
            | Self::TransientMortal { value, .. } => value,
        }
    }

    /// Creation time, or -1 for variants that do not track it.
    pub fn created(&self) -> i64 {
        match self {
            Self::Mortal { created, .. } | Self::TransientMortal { created, .. } => *created,
            Self::Immortal { .. } | Self::Transient { .. } => UNBOUNDED,
        }
    }

    /// Last access time, or -1 for variants that do not track it.
    pub fn last_used(&self) -> i64 {
        match self {
            Self::Transient { last_used, .. } | Self::TransientMortal { last_used, .. } => {
                *last_used
            }
            Self::Immortal { .. } | Self::Mortal { .. } => UNBOUNDED,
        }
    }

    /// Lifespan in ms, or -1 when unbounded.
    pub fn lifespan(&self) -> i64 {
        match self {
            Self::Mortal { lifespan, .. } | Self::TransientMortal { lifespan, .. } => *lifespan,
            Self::Immortal { .. } | Self::Transient { .. } => UNBOUNDED,
        }
    }

    /// Max-idle in ms, or -1 when unbounded.
    pub fn max_idle(&self) -> i64 {
        match self {
            Self::Transient { max_idle, .. } | Self::TransientMortal { max_idle, .. } => *max_idle,
            Self::Immortal { .. } | Self::Mortal { .. } => UNBOUNDED,
        }
    }

    /// Whether this value is expired at `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        match self {
            Self::Immortal { .. } => false,
            Self::Mortal {
                created, lifespan, ..
            } => is_expired_mortal(*lifespan, *created, now),
            Self::Transient {
                max_idle,
                last_used,
                ..
            } => is_expired_transient(*max_idle, *last_used, now),
            Self::TransientMortal {
                created,
                lifespan,
                max_idle,
                last_used,
                ..
            } => {
                is_expired_transient(*max_idle, *last_used, now)
                    || is_expired_mortal(*lifespan, *created, now)
            }
        }
    }

    /// Whether this value is expired right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Whether this value can ever expire. False only for `Immortal`.
    pub fn can_expire(&self) -> bool {
        !matches!(self, Self::Immortal { .. })
    }

    /// Absolute expiry time in ms, if any bound applies.
    pub fn expiry_time(&self) -> Option<i64> {
        let by_lifespan = (self.lifespan() > UNBOUNDED && self.created() > UNBOUNDED)
            .then(|| self.created().saturating_add(self.lifespan()));
        let by_idle = (self.max_idle() > UNBOUNDED && self.last_used() > UNBOUNDED)
            .then(|| self.last_used().saturating_add(self.max_idle()));
        match (by_lifespan, by_idle) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Replace the payload, returning the previous one. The tag is unchanged.
    pub fn set_value(&mut self, new_value: impl Into<Bytes>) -> Bytes {
        let slot = match self {
            Self::Immortal { value }
            | Self::Mortal { value, .. }
            | Self::Transient { value, .. }
            | Self::TransientMortal { value, .. } => value,
        };
        std::mem::replace(slot, new_value.into())
    }

    /// Record an access at `now`.
    ///
    /// Returns false, leaving the value untouched, for variants that do not
    /// track last use.
    pub fn set_last_used(&mut self, now: i64) -> bool {
        match self {
            Self::Transient { last_used, .. } | Self::TransientMortal { last_used, .. } => {
                *last_used = now;
                true
            }
            Self::Immortal { .. } | Self::Mortal { .. } => false,
        }
    }

    /// Change the max-idle bound.
    ///
    /// Returns false, leaving the value untouched, for variants without an
    /// idle bound; those would need a different tag.
    pub fn set_max_idle(&mut self, new_max_idle: i64) -> bool {
        match self {
            Self::Transient { max_idle, .. } | Self::TransientMortal { max_idle, .. } => {
                *max_idle = new_max_idle;
                true
            }
            Self::Immortal { .. } | Self::Mortal { .. } => false,
        }
    }

    /// Name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Immortal { .. } => "immortal",
            Self::Mortal { .. } => "mortal",
            Self::Transient { .. } => "transient",
            Self::TransientMortal { .. } => "transient-mortal",
        }
    }

    /// Rehydrate into a key-bearing entry.
    pub fn to_full_entry(&self, key: impl Into<Bytes>) -> InternalEntry {
        InternalEntry {
            key: key.into(),
            value: self.clone(),
        }
    }
}

/// A stored value together with its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalEntry {
    key: Bytes,
    value: StoredValue,
}

impl InternalEntry {
    /// Pair a key with a stored value.
    pub fn new(key: impl Into<Bytes>, value: StoredValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// The entry's key.
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// The payload.
    pub fn value(&self) -> &Bytes {
        self.value.value()
    }

    /// The timing-bearing stored form.
    pub fn stored(&self) -> &StoredValue {
        &self.value
    }

    /// Mutable access to the stored form.
    pub fn stored_mut(&mut self) -> &mut StoredValue {
        &mut self.value
    }

    /// Whether this entry is expired at `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.value.is_expired_at(now)
    }

    /// Drop the key, keeping the compact stored form.
    pub fn into_stored_value(self) -> StoredValue {
        self.value
    }

    /// Split into key and stored form.
    pub fn into_parts(self) -> (Bytes, StoredValue) {
        (self.key, self.value)
    }
}

/// An entry as seen by a transaction: the key, its value if present, and
/// whether the transaction changed it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheEntry {
    key: Bytes,
    value: Option<StoredValue>,
    changed: bool,
}

impl CacheEntry {
    /// An entry read from storage.
    pub fn read(entry: InternalEntry) -> Self {
        let (key, value) = entry.into_parts();
        Self {
            key,
            value: Some(value),
            changed: false,
        }
    }

    /// An entry for a key with no value.
    pub fn absent(key: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: None,
            changed: false,
        }
    }

    /// An entry this transaction wrote.
    pub fn written(key: impl Into<Bytes>, value: StoredValue) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            changed: true,
        }
    }

    /// An entry this transaction removed.
    pub fn removed(key: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: None,
            changed: true,
        }
    }

    /// The entry's key.
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// The stored value, if any.
    pub fn stored(&self) -> Option<&StoredValue> {
        self.value.as_ref()
    }

    /// The payload, if any.
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref().map(StoredValue::value)
    }

    /// Whether the key has no value.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Whether the transaction wrote or removed this entry.
    pub fn is_changed(&self) -> bool {
        self.changed
    }
}
