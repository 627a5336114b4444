use crate::transaction::GlobalTransaction;
use crate::types::Modification;
use serde::{Deserialize, Serialize};

/// Commands a coordinator sends to the owners of keys it touches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteCommand {
    /// Take exclusive stripe locks for `keys` on behalf of `gtx`.
    LockKeys {
        gtx: GlobalTransaction,
        keys: Vec<Vec<u8>>,
    },
    /// Validate and stage the transaction's writes.
    Prepare {
        gtx: GlobalTransaction,
        modifications: Vec<Modification>,
    },
    /// Apply staged writes and release locks.
    Commit { gtx: GlobalTransaction },
    /// Discard staged writes and release locks.
    Rollback { gtx: GlobalTransaction },
}

impl RemoteCommand {
    pub fn gtx(&self) -> GlobalTransaction {
        match self {
            RemoteCommand::LockKeys { gtx, .. }
            | RemoteCommand::Prepare { gtx, .. }
            | RemoteCommand::Commit { gtx }
            | RemoteCommand::Rollback { gtx } => *gtx,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCommand::LockKeys { .. } => "lock_keys",
            RemoteCommand::Prepare { .. } => "prepare",
            RemoteCommand::Commit { .. } => "commit",
            RemoteCommand::Rollback { .. } => "rollback",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let gtx = GlobalTransaction::new(1, 9);
        let cmd = RemoteCommand::Prepare {
            gtx,
            modifications: vec![Modification::put("k", "v"), Modification::remove("x")],
        };
        let decoded = RemoteCommand::from_bytes(&cmd.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(decoded.gtx(), gtx);
        assert_eq!(decoded.name(), "prepare");
    }
}
