//! Per-record locking.
//!
//! Every ledger record is a [`Record`]: a `lock_api` mutex whose raw lock type
//! decides which executors the record can be shared between. [`ThreadLatch`]
//! serves threads of one process, and
//! [`SharedLatch`](crate::shm::SharedLatch) serves processes mapping the same
//! shared segment.
//!
//! Records that are locked together are always acquired in a fixed global
//! order (see [`lock_ordered`]), so two operations touching the same pair of
//! records from opposite directions cannot deadlock.

use parking_lot::lock_api::{Mutex, MutexGuard, RawMutex};
use std::cmp::Ordering;

/// In-process raw lock for records shared between threads.
pub type ThreadLatch = parking_lot::RawMutex;

/// A ledger value guarded by its own lock.
pub type Record<L, T> = Mutex<L, T>;

pub type RecordGuard<'a, L, T> = MutexGuard<'a, L, T>;

/// Guards for two records keyed by the same ordering key.
pub enum PairGuard<'a, L: RawMutex, T> {
    /// Both keys named the same record; it is held once.
    Same(RecordGuard<'a, L, T>),
    /// Guards in argument order, regardless of acquisition order.
    Distinct(RecordGuard<'a, L, T>, RecordGuard<'a, L, T>),
}

/// Lock two records, lower key first. Both are held until the returned
/// guard drops.
pub fn lock_ordered<'a, K: Ord, L: RawMutex, T>(
    first: (K, &'a Record<L, T>),
    second: (K, &'a Record<L, T>),
) -> PairGuard<'a, L, T> {
    let (first_key, first_record) = first;
    let (second_key, second_record) = second;

    match first_key.cmp(&second_key) {
        Ordering::Equal => PairGuard::Same(first_record.lock()),
        Ordering::Less => {
            let a = first_record.lock();
            let b = second_record.lock();
            PairGuard::Distinct(a, b)
        }
        Ordering::Greater => {
            let b = second_record.lock();
            let a = first_record.lock();
            PairGuard::Distinct(a, b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    type Counter = Record<ThreadLatch, u64>;

    #[test]
    fn test_guard_gives_exclusive_access() {
        let counter = Arc::new(Counter::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        let mut value = counter.lock();
                        let seen = *value;
                        thread::yield_now();
                        *value = seen + 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*counter.lock(), 8_000);
    }

    #[test]
    fn test_pair_guards_follow_argument_order() {
        let low = Counter::new(1);
        let high = Counter::new(2);

        match lock_ordered((9, &high), (3, &low)) {
            PairGuard::Distinct(a, b) => {
                assert_eq!(*a, 2);
                assert_eq!(*b, 1);
            }
            PairGuard::Same(_) => panic!("distinct keys returned a single guard"),
        }

        // Both locks were released by the guards above.
        assert!(!low.is_locked());
        assert!(!high.is_locked());
    }

    #[test]
    fn test_same_key_locks_once() {
        let record = Counter::new(5);

        match lock_ordered((4, &record), (4, &record)) {
            PairGuard::Same(mut guard) => *guard += 1,
            PairGuard::Distinct(..) => panic!("same key locked twice"),
        }

        assert_eq!(*record.lock(), 6);
    }

    #[test]
    fn test_opposite_pairs_do_not_deadlock() {
        let records = Arc::new([Counter::new(10_000), Counter::new(10_000)]);

        let handles: Vec<_> = [(0usize, 1usize), (1, 0)]
            .into_iter()
            .map(|(from, to)| {
                let records = Arc::clone(&records);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        if let PairGuard::Distinct(mut a, mut b) =
                            lock_ordered((from, &records[from]), (to, &records[to]))
                        {
                            *a -= 1;
                            *b += 1;
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*records[0].lock() + *records[1].lock(), 20_000);
    }
}
