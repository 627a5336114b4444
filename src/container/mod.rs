//! Entry model and the local data container.
//!
//! ```text
//!             ┌──────────────────────┐
//!   get/put ─►│    DataContainer     │── miss / write-through ──► CacheStore
//!             │ DashMap<Bytes,       │                           (codec-encoded)
//!             │         StoredValue> │
//!             └──────────────────────┘
//!                        │ read
//!                        ▼
//!                  InternalEntry ──► CacheEntry (transaction context)
//! ```

pub mod codec;
mod data_container;
mod entries;
mod store;

pub use data_container::DataContainer;
pub use entries::{
    is_expired_mortal, is_expired_transient, now_millis, CacheEntry, InternalEntry, StoredValue,
    UNBOUNDED,
};
pub use store::{CacheStore, InMemoryCacheStore};
