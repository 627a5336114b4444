//! Key-to-owner mapping.
//!
//! ```text
//!  key ──murmur──► position on the 2^32 wheel
//!
//!      ┌────┐  ┌────┐  ┌────┐  ┌────┐  ┌────┐  ┌────┐
//!  ───►│1:17│─►│2:3 │─►│3:90│─►│1:4 │─►│2:61│─►│3:8 │──┐
//!      └────┘  └────┘  └────┘  └────┘  └────┘  └────┘  │
//!        ▲                                             │
//!        └─────────────────────────────────────────────┘
//!  owners = first num_owners distinct nodes clockwise
//! ```
//!
//! Rebalancing and state transfer are not handled here; callers rebuild the
//! wheel when the view changes.

mod consistent_hash;

pub use consistent_hash::{ConsistentHash, DEFAULT_SEGMENTS_PER_NODE};
