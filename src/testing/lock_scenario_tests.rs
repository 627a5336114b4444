//! Striped lock behaviour across real threads.

#[cfg(test)]
mod tests {
    use crate::lock::{LockOwner, StripedLock};
    use crate::transaction::GlobalTransaction;
    use rand::Rng;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    const KEY: &str = "21321321321321321";
    const ZERO: Duration = Duration::ZERO;

    fn tx(id: u64) -> LockOwner {
        GlobalTransaction::new(1, id).lock_owner()
    }

    #[test]
    fn test_exclusive_holder_blocks_shared_until_released() {
        let lock = Arc::new(StripedLock::new(5));
        assert_eq!(lock.stripe_for(KEY), 2);

        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let lock = lock.clone();
            thread::spawn(move || {
                assert!(lock.acquire_lock(KEY, true, ZERO));
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                lock.release_lock(KEY).unwrap();
            })
        };

        locked_rx.recv().unwrap();
        assert!(lock.is_write_locked(KEY));
        assert!(!lock.acquire_lock(KEY, false, ZERO));

        release_tx.send(()).unwrap();
        holder.join().unwrap();

        assert!(lock.acquire_lock(KEY, false, ZERO));
        assert_eq!(lock.total_read_lock_count(), 1);
        lock.release_lock(KEY).unwrap();
        assert_eq!(lock.locked_stripe_count(), 0);
    }

    #[test]
    fn test_waiter_is_woken_by_release() {
        let lock = Arc::new(StripedLock::new(5));
        assert!(lock.acquire_lock_for(tx(1), KEY, true, ZERO));

        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let acquired = lock.acquire_lock_for(tx(2), KEY, false, Duration::from_secs(5));
                (acquired, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        lock.release_lock_for(&tx(1), KEY).unwrap();

        let (acquired, waited) = waiter.join().unwrap();
        assert!(acquired);
        assert!(waited < Duration::from_secs(5));
        lock.release_lock_for(&tx(2), KEY).unwrap();
    }

    #[test]
    fn test_global_shared_admits_readers_and_excludes_writers() {
        let lock = Arc::new(StripedLock::new(5));
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let lock = lock.clone();
            thread::spawn(move || {
                assert!(lock.acquire_global_lock(false, ZERO));
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                lock.release_global_lock(false).unwrap();
            })
        };
        locked_rx.recv().unwrap();

        assert!(!lock.acquire_lock(KEY, true, ZERO));
        assert!(lock.acquire_lock(KEY, false, ZERO));
        lock.release_lock(KEY).unwrap();
        assert!(!lock.acquire_global_lock(true, Duration::from_millis(20)));
        assert_eq!(lock.total_read_lock_count(), 5);

        release_tx.send(()).unwrap();
        holder.join().unwrap();

        assert!(lock.acquire_global_lock(true, ZERO));
        assert_eq!(lock.total_write_lock_count(), 5);
        lock.release_global_lock(true).unwrap();
        assert_eq!(lock.locked_stripe_count(), 0);
    }

    #[test]
    fn test_failed_global_acquisition_leaves_nothing_held() {
        let lock = StripedLock::new(5);
        assert!(lock.acquire_lock_for(tx(2), KEY, true, ZERO));

        assert!(!lock.acquire_global_lock_for(tx(1), true, Duration::from_millis(20)));

        // stripes 0 and 1 were taken and given back; only the blocker remains
        assert_eq!(lock.locked_stripe_count(), 1);
        assert!(lock.is_held_by(&tx(2), KEY));
        for i in 0..5 {
            assert!(!lock.stripe(i).unwrap().is_held_by(&tx(1)));
        }

        lock.release_lock_for(&tx(2), KEY).unwrap();
        assert!(lock.acquire_global_lock_for(tx(1), true, ZERO));
        lock.release_global_lock_for(&tx(1), true).unwrap();
    }

    #[test]
    fn test_reentrant_holds_and_failed_upgrade() {
        let lock = StripedLock::new(5);

        assert!(lock.acquire_lock_for(tx(1), KEY, true, ZERO));
        assert!(lock.acquire_lock_for(tx(1), KEY, true, ZERO));
        assert!(lock.acquire_lock_for(tx(1), KEY, false, ZERO));
        let stripe = lock.stripe(lock.stripe_for(KEY)).unwrap();
        assert_eq!(stripe.write_hold_count(), 2);
        assert_eq!(stripe.read_hold_count(), 1);

        lock.release_lock_in_mode_for(&tx(1), KEY, false).unwrap();
        lock.release_lock_in_mode_for(&tx(1), KEY, true).unwrap();
        assert!(lock.is_write_locked(KEY));
        lock.release_lock_in_mode_for(&tx(1), KEY, true).unwrap();
        assert!(!lock.is_write_locked(KEY));

        // a shared holder asking for exclusive gives up at once
        assert!(lock.acquire_lock_for(tx(1), KEY, false, ZERO));
        let started = Instant::now();
        assert!(!lock.acquire_lock_for(tx(1), KEY, true, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
        lock.release_lock_for(&tx(1), KEY).unwrap();
        assert_eq!(lock.locked_stripe_count(), 0);
    }

    #[test]
    fn test_exclusive_sections_never_overlap() {
        let lock = Arc::new(StripedLock::new(5));
        let inside = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                let inside = inside.clone();
                let entered = entered.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        assert!(lock.acquire_lock(KEY, true, Duration::from_secs(10)));
                        assert!(!inside.swap(true, Ordering::SeqCst));
                        entered.fetch_add(1, Ordering::SeqCst);
                        inside.store(false, Ordering::SeqCst);
                        lock.release_lock(KEY).unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(entered.load(Ordering::SeqCst), 100);
        assert_eq!(lock.locked_stripe_count(), 0);
        assert_eq!(lock.metrics().snapshot().acquisitions, 100);
    }

    #[test]
    fn test_random_keys_reach_every_stripe() {
        let lock = StripedLock::new(16);
        let mut rng = rand::thread_rng();
        let mut hits = [0usize; 16];

        for _ in 0..2_000 {
            let key: u64 = rng.gen();
            let text = format!("user:{}", rng.gen_range(0..1_000_000u32));
            hits[lock.stripe_for(&key)] += 1;
            hits[lock.stripe_for(text.as_str())] += 1;
        }
        assert!(hits.iter().all(|&h| h > 0), "stripe usage: {hits:?}");
    }
}
