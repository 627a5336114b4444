//! Scoped lock holds.

use super::owner::LockOwner;
use super::striped::StripedLock;

/// A single stripe held until the guard drops.
#[must_use = "the stripe is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct StripeGuard<'a> {
    lock: &'a StripedLock,
    owner: LockOwner,
    stripe: usize,
    exclusive: bool,
}

impl<'a> StripeGuard<'a> {
    pub(super) fn new(lock: &'a StripedLock, owner: LockOwner, stripe: usize, exclusive: bool) -> Self {
        Self {
            lock,
            owner,
            stripe,
            exclusive,
        }
    }

    pub fn stripe(&self) -> usize {
        self.stripe
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl Drop for StripeGuard<'_> {
    fn drop(&mut self) {
        self.lock
            .release_guarded(&self.owner, self.stripe, self.exclusive);
    }
}

/// Every stripe held until the guard drops.
#[must_use = "the global lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct GlobalGuard<'a> {
    lock: &'a StripedLock,
    owner: LockOwner,
    exclusive: bool,
}

impl<'a> GlobalGuard<'a> {
    pub(super) fn new(lock: &'a StripedLock, owner: LockOwner, exclusive: bool) -> Self {
        Self {
            lock,
            owner,
            exclusive,
        }
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl Drop for GlobalGuard<'_> {
    fn drop(&mut self) {
        // logged and counted by the manager
        let _ = self.lock.release_global_lock_for(&self.owner, self.exclusive);
    }
}
