use crate::transaction::GlobalTransaction;
use std::fmt;
use std::thread::{self, ThreadId};

/// Identity a stripe is granted to.
///
/// Non-transactional calls lock on behalf of the calling thread. Transactional
/// calls lock on behalf of the transaction, so any thread driving the
/// transaction (and a remote node acting for it) can release what it took.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockOwner {
    Thread(ThreadId),
    Transaction(GlobalTransaction),
}

impl LockOwner {
    /// Owner for the calling thread.
    pub fn current_thread() -> Self {
        LockOwner::Thread(thread::current().id())
    }
}

impl From<GlobalTransaction> for LockOwner {
    fn from(gtx: GlobalTransaction) -> Self {
        LockOwner::Transaction(gtx)
    }
}

impl fmt::Debug for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOwner::Thread(id) => write!(f, "{id:?}"),
            LockOwner::Transaction(gtx) => write!(f, "{gtx}"),
        }
    }
}
