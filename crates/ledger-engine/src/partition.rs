use crate::transaction::{Sequenced, Transaction, UserId};
use std::num::NonZeroUsize;

/// Worker index for `key`: `key mod partitions`.
pub fn partition(key: UserId, partitions: NonZeroUsize) -> usize {
    // u32 always fits usize on supported targets.
    key as usize % partitions.get()
}

/// Splits an ordered transaction stream into one bucket per worker.
///
/// Assignment is for scheduling only; record ownership is enforced by the
/// ledger's per-record locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    partitions: NonZeroUsize,
}

impl Partitioner {
    pub const fn new(partitions: NonZeroUsize) -> Self {
        Self { partitions }
    }

    pub const fn partitions(&self) -> NonZeroUsize {
        self.partitions
    }

    pub fn worker_for(&self, transaction: &Transaction) -> usize {
        partition(transaction.primary_key(), self.partitions)
    }

    /// Number transactions in input order and route each to its worker's
    /// bucket. Buckets preserve input order.
    pub fn split<I>(&self, transactions: I) -> Vec<Vec<Sequenced>>
    where
        I: IntoIterator<Item = Transaction>,
    {
        let mut buckets = vec![Vec::new(); self.partitions.get()];

        for (seq, transaction) in transactions.into_iter().enumerate() {
            buckets[self.worker_for(&transaction)].push(Sequenced { seq, transaction });
        }

        buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).unwrap()
    }

    fn deposit(actor: UserId) -> Transaction {
        Transaction::Deposit {
            actor,
            account_number: actor.into(),
            pin: actor.into(),
            amount: 1,
        }
    }

    #[test]
    fn test_partition_is_key_mod_n() {
        assert_eq!(partition(7, n(4)), 3);
        assert_eq!(partition(8, n(4)), 0);
        assert_eq!(partition(0, n(3)), 0);
        assert_eq!(partition(u32::MAX, n(1)), 0);
    }

    #[test]
    fn test_split_preserves_order_within_buckets() {
        let partitioner = Partitioner::new(n(2));
        let buckets = partitioner.split([1, 2, 3, 4, 5].map(deposit));

        assert_eq!(buckets.len(), 2);
        let even: Vec<_> = buckets[0].iter().map(|s| s.seq).collect();
        let odd: Vec<_> = buckets[1].iter().map(|s| s.seq).collect();
        assert_eq!(even, vec![1, 3]);
        assert_eq!(odd, vec![0, 2, 4]);
    }

    #[test]
    fn test_transfer_scheduled_by_sender() {
        let partitioner = Partitioner::new(n(3));
        let transfer = Transaction::Transfer {
            sender: 4,
            account_number: 4,
            pin: 4,
            receiver: 5,
            amount: 1,
        };

        assert_eq!(partitioner.worker_for(&transfer), 1);
    }

    #[test]
    fn test_single_partition_keeps_everything() {
        let partitioner = Partitioner::new(n(1));
        let buckets = partitioner.split((1..=10).map(deposit));

        assert_eq!(buckets.len(), 1);
        assert!(buckets[0].iter().enumerate().all(|(i, s)| s.seq == i));
    }

    #[test]
    fn test_empty_input_yields_empty_buckets() {
        let buckets = Partitioner::new(n(4)).split(std::iter::empty());

        assert_eq!(buckets.len(), 4);
        assert!(buckets.iter().all(Vec::is_empty));
    }
}
