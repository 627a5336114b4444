//! Striped reader/writer locking.
//!
//! ```text
//!   key ──murmur──► hash ──(u32) mod N──► stripe i
//!
//!   ┌─────────┬─────────┬─────────┬─────────┬─────────┐
//!   │ stripe0 │ stripe1 │ stripe2 │ stripe3 │ stripe4 │   N = 5
//!   └─────────┴─────────┴─────────┴─────────┴─────────┘
//!   global: 0 → 1 → 2 → 3 → 4   (always ascending)
//! ```
//!
//! Every acquisition is bounded by a timeout and reports failure as `false`
//! (or [`LockError::Timeout`](crate::error::LockError) through the scoped
//! API). Scoped guards release on every exit path, including unwinding.

mod guard;
mod owner;
mod stripe;
mod striped;

pub use guard::{GlobalGuard, StripeGuard};
pub use owner::LockOwner;
pub use stripe::ReentrantRwLock;
pub use striped::StripedLock;
