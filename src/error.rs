//! Error types for the transactional cache core.

use crate::remoting::RemoteException;
use crate::types::NodeId;
use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cache.
#[derive(Error, Debug)]
pub enum Error {
    /// Lock acquisition or release errors.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Transaction state errors.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Entry encoding/decoding errors.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The remote node processed the request and it failed there.
    #[error("remote execution failed on node {node_id}: {exception}")]
    RemoteExecution {
        node_id: NodeId,
        exception: RemoteException,
    },

    /// The request never reached the remote node, or its reply was lost.
    #[error("network error: {0}")]
    Network(String),

    /// Cache store collaborator failure.
    #[error("cache store error: {0}")]
    Store(String),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization of commands or responses failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure happened on a remote node after the request was delivered.
    ///
    /// Such failures must never be retried blindly: the operation ran.
    pub fn is_remote_execution(&self) -> bool {
        matches!(self, Error::RemoteExecution { .. })
    }

    /// Whether a bounded lock wait expired.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(
            self,
            Error::Lock(LockError::Timeout { .. } | LockError::GlobalTimeout { .. })
        )
    }

    /// Short, stable name of the error kind, used when shipping an error to a peer.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Lock(LockError::Timeout { .. } | LockError::GlobalTimeout { .. }) => "LockTimeout",
            Error::Lock(_) => "IllegalLockState",
            Error::Transaction(TransactionError::RollbackOnly { .. }) => "RollbackOnly",
            Error::Transaction(_) => "Transaction",
            Error::Codec(_) => "Codec",
            Error::RemoteExecution { .. } => "RemoteExecution",
            Error::Network(_) => "Network",
            Error::Store(_) => "Store",
            Error::Config(_) => "Config",
            Error::Serialization(_) => "Serialization",
            Error::Internal(_) => "Internal",
        }
    }
}

/// Striped lock errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// A bounded wait on a stripe expired.
    #[error("timed out after {timeout_ms}ms waiting for stripe {stripe}")]
    Timeout { stripe: usize, timeout_ms: u64 },

    /// The global lock could not be acquired within the timeout.
    #[error("timed out after {timeout_ms}ms waiting for the global lock")]
    GlobalTimeout { timeout_ms: u64 },

    /// Release attempted by an owner that does not hold the stripe.
    #[error("stripe {stripe} is not held by the releasing owner")]
    NotHeld { stripe: usize },

    /// Release attempted in a mode other than the one granted.
    #[error("stripe {stripe} is held in {held} mode, release requested in {requested} mode")]
    WrongMode {
        stripe: usize,
        held: &'static str,
        requested: &'static str,
    },
}

/// Transaction bookkeeping errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Commit attempted on a transaction marked rollback-only.
    #[error("transaction {gtx} is marked rollback-only")]
    RollbackOnly { gtx: String },

    /// Operation not permitted in the transaction's current state.
    #[error("transaction {gtx} cannot {operation} in state {state}")]
    InvalidState {
        gtx: String,
        operation: &'static str,
        state: &'static str,
    },

    /// The transaction has not been enlisted with the transaction manager.
    #[error("transaction {gtx} is not enlisted")]
    NotEnlisted { gtx: String },

    /// An xid was supplied twice.
    #[error("transaction {gtx} is already enlisted")]
    AlreadyEnlisted { gtx: String },
}

/// Wire codec errors for stored values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended in the middle of a field.
    #[error("unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),

    /// The variant tag byte is not known.
    #[error("unknown stored value tag: {0:#04x}")]
    UnknownTag(u8),

    /// An unsigned varint ran past 64 bits.
    #[error("unsigned varint overflows 64 bits")]
    VarintOverflow,

    /// A timestamp that must be non-negative was negative.
    #[error("timestamp field {field} is negative: {value}")]
    NegativeTimestamp { field: &'static str, value: i64 },

    /// Bytes left over after a complete value was decoded.
    #[error("{0} trailing bytes after stored value")]
    Trailing(usize),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_execution_is_distinct_from_network() {
        let remote = Error::RemoteExecution {
            node_id: 3,
            exception: RemoteException::new("Store", "disk full"),
        };
        assert!(remote.is_remote_execution());
        assert!(!Error::Network("connection reset".into()).is_remote_execution());
    }

    #[test]
    fn test_error_kind() {
        let timeout: Error = LockError::Timeout {
            stripe: 1,
            timeout_ms: 0,
        }
        .into();
        assert_eq!(timeout.kind(), "LockTimeout");

        let not_held: Error = LockError::NotHeld { stripe: 2 }.into();
        assert_eq!(not_held.kind(), "IllegalLockState");
    }
}
