//! Transaction identities.

use crate::lock::LockOwner;
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster-wide transaction id: the originating node plus a per-node sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalTransaction {
    pub origin: NodeId,
    pub id: u64,
}

impl GlobalTransaction {
    pub const fn new(origin: NodeId, id: u64) -> Self {
        Self { origin, id }
    }

    /// The lock owner that represents this transaction on every node.
    pub fn lock_owner(&self) -> LockOwner {
        LockOwner::Transaction(*self)
    }
}

impl fmt::Display for GlobalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalTx:{}:{}", self.origin, self.id)
    }
}

/// Externally issued transaction branch identifier, assigned on enlistment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    pub format_id: i32,
    pub global_transaction_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

impl Xid {
    pub fn new(
        format_id: i32,
        global_transaction_id: impl Into<Vec<u8>>,
        branch_qualifier: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            format_id,
            global_transaction_id: global_transaction_id.into(),
            branch_qualifier: branch_qualifier.into(),
        }
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xid{{format={}, gtrid=", self.format_id)?;
        for b in &self.global_transaction_id {
            write!(f, "{b:02x}")?;
        }
        f.write_str(", bqual=")?;
        for b in &self.branch_qualifier {
            write!(f, "{b:02x}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(GlobalTransaction::new(2, 17).to_string(), "GlobalTx:2:17");
        assert_eq!(
            Xid::new(1, vec![0xab, 0x01], vec![0xff]).to_string(),
            "Xid{format=1, gtrid=ab01, bqual=ff}"
        );
    }

    #[test]
    fn test_lock_owner_identity() {
        let gtx = GlobalTransaction::new(1, 5);
        assert_eq!(gtx.lock_owner(), GlobalTransaction::new(1, 5).lock_owner());
        assert_ne!(gtx.lock_owner(), GlobalTransaction::new(2, 5).lock_owner());
    }
}
