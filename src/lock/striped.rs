//! Fixed array of lock stripes addressed by key hash.

use super::guard::{GlobalGuard, StripeGuard};
use super::owner::LockOwner;
use super::stripe::ReentrantRwLock;
use crate::config::LockingConfig;
use crate::error::LockError;
use crate::hash::{bucket_index, HashKey, MurmurHash2};
use crate::metrics::LockMetrics;
use std::time::{Duration, Instant};

/// Striped lock manager.
///
/// Keys map to one of N stripes by `murmur(key) mod N` (hash taken as
/// unsigned). Keys on different stripes never block each other; keys on the
/// same stripe share its fate.
///
/// Global acquisitions walk the stripes in ascending index order, the only
/// order any caller ever uses, so two global callers (or a global caller and
/// any single-stripe caller) cannot deadlock. A global acquisition that
/// cannot finish before its deadline releases what it took in that call.
#[derive(Debug)]
pub struct StripedLock {
    stripes: Box<[ReentrantRwLock]>,
    hasher: MurmurHash2,
    metrics: LockMetrics,
}

impl StripedLock {
    /// Create a manager with `concurrency_level` stripes (at least one).
    pub fn new(concurrency_level: usize) -> Self {
        let stripes = (0..concurrency_level.max(1))
            .map(ReentrantRwLock::new)
            .collect();
        Self {
            stripes,
            hasher: MurmurHash2::new(),
            metrics: LockMetrics::new(),
        }
    }

    pub fn from_config(config: &LockingConfig) -> Self {
        Self::new(config.concurrency_level)
    }

    pub fn num_stripes(&self) -> usize {
        self.stripes.len()
    }

    /// Stripe index for a key, always in `[0, num_stripes)`.
    pub fn stripe_for<K: HashKey + ?Sized>(&self, key: &K) -> usize {
        bucket_index(self.hasher.hash(key), self.stripes.len())
    }

    pub fn stripe(&self, index: usize) -> Option<&ReentrantRwLock> {
        self.stripes.get(index)
    }

    pub fn metrics(&self) -> &LockMetrics {
        &self.metrics
    }

    /// Acquire the key's stripe for the calling thread. Returns false on timeout.
    pub fn acquire_lock<K: HashKey + ?Sized>(
        &self,
        key: &K,
        exclusive: bool,
        timeout: Duration,
    ) -> bool {
        self.acquire_lock_for(LockOwner::current_thread(), key, exclusive, timeout)
    }

    /// Acquire the key's stripe for `owner`. Returns false on timeout.
    pub fn acquire_lock_for<K: HashKey + ?Sized>(
        &self,
        owner: LockOwner,
        key: &K,
        exclusive: bool,
        timeout: Duration,
    ) -> bool {
        let stripe = self.stripe_for(key);
        let acquired =
            self.stripes[stripe].try_acquire_until(owner, exclusive, Instant::now() + timeout);
        if acquired {
            self.metrics.acquisitions.inc();
            tracing::trace!(stripe, exclusive, ?owner, "stripe acquired");
        } else {
            self.metrics.timeouts.inc();
            tracing::debug!(
                stripe,
                exclusive,
                ?owner,
                timeout_ms = timeout.as_millis() as u64,
                "stripe acquisition timed out"
            );
        }
        acquired
    }

    /// Release the calling thread's hold on the key's stripe.
    pub fn release_lock<K: HashKey + ?Sized>(&self, key: &K) -> Result<(), LockError> {
        self.release_lock_for(&LockOwner::current_thread(), key)
    }

    /// Release `owner`'s hold on the key's stripe, exclusive before shared.
    pub fn release_lock_for<K: HashKey + ?Sized>(
        &self,
        owner: &LockOwner,
        key: &K,
    ) -> Result<(), LockError> {
        let stripe = self.stripe_for(key);
        let result = self.stripes[stripe].release(owner);
        self.observe_release(stripe, owner, result)
    }

    /// Release `owner`'s hold on the key's stripe in the given mode.
    pub fn release_lock_in_mode_for<K: HashKey + ?Sized>(
        &self,
        owner: &LockOwner,
        key: &K,
        exclusive: bool,
    ) -> Result<(), LockError> {
        let stripe = self.stripe_for(key);
        self.release_stripe(owner, stripe, exclusive)
    }

    fn release_stripe(
        &self,
        owner: &LockOwner,
        stripe: usize,
        exclusive: bool,
    ) -> Result<(), LockError> {
        let result = if exclusive {
            self.stripes[stripe].release_write(owner)
        } else {
            self.stripes[stripe].release_read(owner)
        };
        self.observe_release(stripe, owner, result)
    }

    fn observe_release(
        &self,
        stripe: usize,
        owner: &LockOwner,
        result: Result<(), LockError>,
    ) -> Result<(), LockError> {
        match &result {
            Ok(()) => tracing::trace!(stripe, ?owner, "stripe released"),
            Err(e) => {
                self.metrics.illegal_releases.inc();
                tracing::error!(stripe, ?owner, error = %e, "illegal stripe release");
            }
        }
        result
    }

    /// Acquire every stripe for the calling thread.
    pub fn acquire_global_lock(&self, exclusive: bool, timeout: Duration) -> bool {
        self.acquire_global_lock_for(LockOwner::current_thread(), exclusive, timeout)
    }

    /// Acquire every stripe for `owner`, in ascending order, within one deadline.
    ///
    /// On failure nothing taken by this call remains held.
    pub fn acquire_global_lock_for(
        &self,
        owner: LockOwner,
        exclusive: bool,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        for (index, stripe) in self.stripes.iter().enumerate() {
            if stripe.try_acquire_until(owner, exclusive, deadline) {
                continue;
            }

            for taken in self.stripes[..index].iter().rev() {
                let undo = if exclusive {
                    taken.release_write(&owner)
                } else {
                    taken.release_read(&owner)
                };
                if let Err(e) = undo {
                    tracing::error!(stripe = taken.index(), error = %e, "rollback of partial global lock failed");
                }
            }
            self.metrics.timeouts.inc();
            tracing::debug!(
                failed_stripe = index,
                exclusive,
                ?owner,
                timeout_ms = timeout.as_millis() as u64,
                "global lock acquisition timed out"
            );
            return false;
        }

        self.metrics.global_acquisitions.inc();
        tracing::trace!(exclusive, ?owner, stripes = self.stripes.len(), "global lock acquired");
        true
    }

    /// Release every stripe held by the calling thread in the given mode.
    pub fn release_global_lock(&self, exclusive: bool) -> Result<(), LockError> {
        self.release_global_lock_for(&LockOwner::current_thread(), exclusive)
    }

    /// Release every stripe held by `owner` in the given mode.
    ///
    /// Every stripe is checked before any is released: a wrong-mode or
    /// unheld release is reported and leaves all stripes as they were.
    pub fn release_global_lock_for(
        &self,
        owner: &LockOwner,
        exclusive: bool,
    ) -> Result<(), LockError> {
        for stripe in self.stripes.iter() {
            if let Err(e) = stripe.check_release(owner, exclusive) {
                self.metrics.illegal_releases.inc();
                tracing::error!(?owner, exclusive, error = %e, "illegal global lock release");
                return Err(e);
            }
        }
        for stripe in self.stripes.iter().rev() {
            let result = if exclusive {
                stripe.release_write(owner)
            } else {
                stripe.release_read(owner)
            };
            self.observe_release(stripe.index(), owner, result)?;
        }
        tracing::trace!(exclusive, ?owner, "global lock released");
        Ok(())
    }

    /// Scoped acquisition for the calling thread.
    pub fn lock<K: HashKey + ?Sized>(
        &self,
        key: &K,
        exclusive: bool,
        timeout: Duration,
    ) -> Result<StripeGuard<'_>, LockError> {
        self.lock_for(LockOwner::current_thread(), key, exclusive, timeout)
    }

    /// Scoped acquisition for `owner`; released when the guard drops.
    pub fn lock_for<K: HashKey + ?Sized>(
        &self,
        owner: LockOwner,
        key: &K,
        exclusive: bool,
        timeout: Duration,
    ) -> Result<StripeGuard<'_>, LockError> {
        let stripe = self.stripe_for(key);
        if self.acquire_lock_for(owner, key, exclusive, timeout) {
            Ok(StripeGuard::new(self, owner, stripe, exclusive))
        } else {
            Err(LockError::Timeout {
                stripe,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    /// Scoped global acquisition for the calling thread.
    pub fn lock_global(
        &self,
        exclusive: bool,
        timeout: Duration,
    ) -> Result<GlobalGuard<'_>, LockError> {
        self.lock_global_for(LockOwner::current_thread(), exclusive, timeout)
    }

    /// Scoped global acquisition for `owner`; released when the guard drops.
    pub fn lock_global_for(
        &self,
        owner: LockOwner,
        exclusive: bool,
        timeout: Duration,
    ) -> Result<GlobalGuard<'_>, LockError> {
        if self.acquire_global_lock_for(owner, exclusive, timeout) {
            Ok(GlobalGuard::new(self, owner, exclusive))
        } else {
            Err(LockError::GlobalTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    pub(super) fn release_guarded(&self, owner: &LockOwner, stripe: usize, exclusive: bool) {
        // errors are already logged and counted
        let _ = self.release_stripe(owner, stripe, exclusive);
    }

    /// Whether `owner` holds the key's stripe in any mode.
    pub fn is_held_by<K: HashKey + ?Sized>(&self, owner: &LockOwner, key: &K) -> bool {
        self.stripes[self.stripe_for(key)].is_held_by(owner)
    }

    /// Whether the key's stripe is held exclusively by anyone.
    pub fn is_write_locked<K: HashKey + ?Sized>(&self, key: &K) -> bool {
        self.stripes[self.stripe_for(key)].is_write_locked()
    }

    /// Shared holds summed over all stripes.
    pub fn total_read_lock_count(&self) -> usize {
        self.stripes.iter().map(ReentrantRwLock::read_hold_count).sum()
    }

    /// Number of stripes currently held exclusively.
    pub fn total_write_lock_count(&self) -> usize {
        self.stripes.iter().filter(|s| s.is_write_locked()).count()
    }

    /// Number of stripes held in any mode.
    pub fn locked_stripe_count(&self) -> usize {
        self.stripes.iter().filter(|s| s.is_locked()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::GlobalTransaction;

    const ZERO: Duration = Duration::ZERO;

    fn tx(id: u64) -> LockOwner {
        GlobalTransaction::new(1, id).lock_owner()
    }

    #[test]
    fn test_stripe_for_is_stable_and_bounded() {
        let lock = StripedLock::new(5);
        assert_eq!(lock.stripe_for("21321321321321321"), 2);
        for i in 0..1_000u32 {
            assert!(lock.stripe_for(&i) < 5);
        }
        assert_eq!(StripedLock::new(0).num_stripes(), 1);
    }

    #[test]
    fn test_same_stripe_excludes_different_stripes_do_not() {
        let lock = StripedLock::new(8);
        let a = "alpha";
        let b = (0..100)
            .map(|i| format!("key-{i}"))
            .find(|k| lock.stripe_for(k.as_str()) != lock.stripe_for(a))
            .unwrap();

        assert!(lock.acquire_lock_for(tx(1), a, true, ZERO));
        assert!(!lock.acquire_lock_for(tx(2), a, false, ZERO));
        assert!(lock.acquire_lock_for(tx(2), b.as_str(), true, ZERO));

        lock.release_lock_for(&tx(1), a).unwrap();
        lock.release_lock_for(&tx(2), b.as_str()).unwrap();
        assert_eq!(lock.locked_stripe_count(), 0);
        assert_eq!(lock.metrics().snapshot().timeouts, 1);
    }

    #[test]
    fn test_release_unheld_is_reported() {
        let lock = StripedLock::new(4);
        let err = lock.release_lock_for(&tx(1), "k").unwrap_err();
        assert!(matches!(err, LockError::NotHeld { .. }));
        assert_eq!(lock.metrics().snapshot().illegal_releases, 1);
    }

    #[test]
    fn test_global_release_in_wrong_mode_changes_nothing() {
        let lock = StripedLock::new(4);
        assert!(lock.acquire_global_lock_for(tx(1), false, ZERO));

        let err = lock.release_global_lock_for(&tx(1), true).unwrap_err();
        assert!(matches!(err, LockError::WrongMode { .. }));
        assert_eq!(lock.total_read_lock_count(), 4);

        lock.release_global_lock_for(&tx(1), false).unwrap();
        assert_eq!(lock.locked_stripe_count(), 0);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = StripedLock::new(4);
        {
            let guard = lock.lock_for(tx(1), "k", true, ZERO).unwrap();
            assert_eq!(guard.stripe(), lock.stripe_for("k"));
            assert!(lock.is_write_locked("k"));
        }
        assert!(!lock.is_write_locked("k"));

        {
            let _global = lock.lock_global_for(tx(1), true, ZERO).unwrap();
            assert_eq!(lock.total_write_lock_count(), 4);
            let err = lock.lock_for(tx(2), "k", false, ZERO).unwrap_err();
            assert!(matches!(err, LockError::Timeout { .. }));
        }
        assert_eq!(lock.locked_stripe_count(), 0);
    }
}
