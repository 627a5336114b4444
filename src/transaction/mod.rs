//! Transaction bookkeeping.
//!
//! ```text
//!  TransactionTable ── DashMap<GlobalTransaction, Arc<TransactionShared>>
//!        │ begin()                         ▲
//!        ▼                                 │ mark_for_rollback (view change)
//!  LocalTransaction ── owned by the tx thread ──┘
//!    modifications: Vec<Modification>
//!    looked_up:     LookedUpEntries<Bytes, CacheEntry>
//!    local locks, xid, state
//!        │
//!        ▼
//!  TransactionCoordinator ── prepare / commit / rollback, local + remote lock release
//! ```

mod coordinator;
mod local;
mod lookup;
mod table;
mod xid;

pub use coordinator::TransactionCoordinator;
pub use local::{LocalTransaction, TransactionShared, TransactionState};
pub use lookup::{empty_looked_up_entries, LookedUpEntries};
pub use table::TransactionTable;
pub use xid::{GlobalTransaction, Xid};
