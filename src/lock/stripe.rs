//! A single reentrant reader/writer lock stripe.

use super::owner::LockOwner;
use crate::error::LockError;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Default)]
struct StripeState {
    /// Shared holders and their hold counts.
    readers: HashMap<LockOwner, usize>,
    /// Exclusive holder and its hold count.
    writer: Option<(LockOwner, usize)>,
}

impl StripeState {
    fn can_read(&self, owner: &LockOwner) -> bool {
        match &self.writer {
            None => true,
            Some((holder, _)) => holder == owner,
        }
    }

    fn can_write(&self, owner: &LockOwner) -> bool {
        match &self.writer {
            Some((holder, _)) => holder == owner,
            None => self.readers.is_empty(),
        }
    }

    /// A shared holder asking for exclusive access while others share the
    /// stripe would wait on itself.
    fn is_upgrade(&self, owner: &LockOwner) -> bool {
        self.writer.is_none() && self.readers.contains_key(owner)
    }

    fn grant(&mut self, owner: LockOwner, exclusive: bool) {
        if exclusive {
            match &mut self.writer {
                Some((_, count)) => *count += 1,
                None => self.writer = Some((owner, 1)),
            }
        } else {
            *self.readers.entry(owner).or_insert(0) += 1;
        }
    }
}

/// Reentrant reader/writer lock with timeout-bounded acquisition.
///
/// Any number of owners may share the stripe; at most one owner holds it
/// exclusively. The exclusive owner may also take it shared. Holds are
/// counted per owner and each acquisition needs a matching release.
#[derive(Debug)]
pub struct ReentrantRwLock {
    index: usize,
    state: Mutex<StripeState>,
    released: Condvar,
}

impl ReentrantRwLock {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            state: Mutex::new(StripeState::default()),
            released: Condvar::new(),
        }
    }

    /// Position of this stripe in its manager.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Try to acquire until `deadline`.
    ///
    /// Returns false once the deadline passes. A deadline already in the
    /// past makes this a single non-blocking attempt.
    pub fn try_acquire_until(&self, owner: LockOwner, exclusive: bool, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        loop {
            let grantable = if exclusive {
                state.can_write(&owner)
            } else {
                state.can_read(&owner)
            };
            if grantable {
                state.grant(owner, exclusive);
                return true;
            }
            if exclusive && state.is_upgrade(&owner) {
                tracing::debug!(stripe = self.index, ?owner, "refusing shared-to-exclusive upgrade");
                return false;
            }
            if self.released.wait_until(&mut state, deadline).timed_out() {
                let grantable = if exclusive {
                    state.can_write(&owner)
                } else {
                    state.can_read(&owner)
                };
                if grantable {
                    state.grant(owner, exclusive);
                }
                return grantable;
            }
        }
    }

    /// Release one exclusive hold.
    pub fn release_write(&self, owner: &LockOwner) -> Result<(), LockError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let remaining = match &mut state.writer {
            Some((holder, count)) if *holder == *owner => {
                *count -= 1;
                *count
            }
            _ if state.readers.contains_key(owner) => {
                return Err(LockError::WrongMode {
                    stripe: self.index,
                    held: "shared",
                    requested: "exclusive",
                })
            }
            _ => return Err(LockError::NotHeld { stripe: self.index }),
        };
        if remaining == 0 {
            state.writer = None;
        }
        drop(guard);
        self.released.notify_all();
        Ok(())
    }

    /// Release one shared hold.
    pub fn release_read(&self, owner: &LockOwner) -> Result<(), LockError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let remaining = match state.readers.get_mut(owner) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None if matches!(&state.writer, Some((holder, _)) if holder == owner) => {
                return Err(LockError::WrongMode {
                    stripe: self.index,
                    held: "exclusive",
                    requested: "shared",
                })
            }
            None => return Err(LockError::NotHeld { stripe: self.index }),
        };
        if remaining == 0 {
            state.readers.remove(owner);
        }
        drop(guard);
        self.released.notify_all();
        Ok(())
    }

    /// Release whichever hold `owner` has, exclusive first.
    pub fn release(&self, owner: &LockOwner) -> Result<(), LockError> {
        let exclusive = self.is_write_locked_by(owner);
        if exclusive {
            self.release_write(owner)
        } else {
            self.release_read(owner)
        }
    }

    /// Whether a release in the given mode by `owner` would be accepted.
    pub fn check_release(&self, owner: &LockOwner, exclusive: bool) -> Result<(), LockError> {
        let state = self.state.lock();
        let writes = matches!(&state.writer, Some((holder, _)) if holder == owner);
        let reads = state.readers.contains_key(owner);
        match (exclusive, writes, reads) {
            (true, true, _) | (false, _, true) => Ok(()),
            (true, false, true) => Err(LockError::WrongMode {
                stripe: self.index,
                held: "shared",
                requested: "exclusive",
            }),
            (false, true, false) => Err(LockError::WrongMode {
                stripe: self.index,
                held: "exclusive",
                requested: "shared",
            }),
            (_, false, false) => Err(LockError::NotHeld { stripe: self.index }),
        }
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    pub fn is_write_locked_by(&self, owner: &LockOwner) -> bool {
        matches!(&self.state.lock().writer, Some((holder, _)) if holder == owner)
    }

    /// Whether `owner` holds this stripe in any mode.
    pub fn is_held_by(&self, owner: &LockOwner) -> bool {
        let state = self.state.lock();
        state.readers.contains_key(owner)
            || matches!(&state.writer, Some((holder, _)) if holder == owner)
    }

    /// Whether anyone holds this stripe.
    pub fn is_locked(&self) -> bool {
        let state = self.state.lock();
        state.writer.is_some() || !state.readers.is_empty()
    }

    /// Total shared holds across all owners.
    pub fn read_hold_count(&self) -> usize {
        self.state.lock().readers.values().sum()
    }

    /// Exclusive hold count of the current writer, zero if none.
    pub fn write_hold_count(&self) -> usize {
        self.state.lock().writer.map_or(0, |(_, count)| count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::GlobalTransaction;
    use std::time::Duration;

    fn owner(id: u64) -> LockOwner {
        GlobalTransaction::new(1, id).lock_owner()
    }

    fn now() -> Instant {
        Instant::now()
    }

    #[test]
    fn test_shared_holders_coexist() {
        let lock = ReentrantRwLock::new(0);
        assert!(lock.try_acquire_until(owner(1), false, now()));
        assert!(lock.try_acquire_until(owner(2), false, now()));
        assert_eq!(lock.read_hold_count(), 2);
        assert!(!lock.try_acquire_until(owner(3), true, now()));
    }

    #[test]
    fn test_exclusive_is_reentrant_and_may_share() {
        let lock = ReentrantRwLock::new(3);
        assert!(lock.try_acquire_until(owner(1), true, now()));
        assert!(lock.try_acquire_until(owner(1), true, now()));
        assert!(lock.try_acquire_until(owner(1), false, now()));
        assert!(!lock.try_acquire_until(owner(2), false, now()));
        assert_eq!(lock.write_hold_count(), 2);

        lock.release_read(&owner(1)).unwrap();
        lock.release_write(&owner(1)).unwrap();
        assert!(lock.is_write_locked());
        lock.release_write(&owner(1)).unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_upgrade_fails_fast() {
        let lock = ReentrantRwLock::new(0);
        assert!(lock.try_acquire_until(owner(1), false, now()));
        let started = Instant::now();
        assert!(!lock.try_acquire_until(owner(1), true, now() + Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_illegal_releases() {
        let lock = ReentrantRwLock::new(4);
        assert_eq!(
            lock.release(&owner(1)),
            Err(LockError::NotHeld { stripe: 4 })
        );

        assert!(lock.try_acquire_until(owner(1), false, now()));
        assert_eq!(
            lock.release_write(&owner(1)),
            Err(LockError::WrongMode {
                stripe: 4,
                held: "shared",
                requested: "exclusive"
            })
        );
        assert_eq!(
            lock.release_read(&owner(2)),
            Err(LockError::NotHeld { stripe: 4 })
        );
        assert!(lock.check_release(&owner(1), false).is_ok());
        lock.release(&owner(1)).unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let lock = std::sync::Arc::new(ReentrantRwLock::new(0));
        assert!(lock.try_acquire_until(owner(1), true, now()));

        let waiter = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                lock.try_acquire_until(owner(2), true, Instant::now() + Duration::from_secs(10))
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        lock.release_write(&owner(1)).unwrap();

        assert!(waiter.join().unwrap());
        assert!(lock.is_write_locked_by(&owner(2)));
    }
}
