use crate::ledger::Ledger;
use crate::transaction::{Completed, Outcome, Sequenced};
use parking_lot::lock_api::RawMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Draining,
    Done,
}

/// Destination for the outcomes a worker produces, in bucket order.
pub trait OutcomeSink {
    /// `position` is the transaction's index within the worker's bucket.
    fn record(&mut self, position: usize, entry: &Sequenced, outcome: Outcome);
}

impl OutcomeSink for Vec<Completed> {
    fn record(&mut self, _position: usize, entry: &Sequenced, outcome: Outcome) {
        self.push(Completed {
            seq: entry.seq,
            transaction: entry.transaction,
            outcome,
        });
    }
}

/// Drains one bucket against the ledger.
///
/// Workers never talk to each other; all interaction goes through the
/// ledger's locks.
#[derive(Debug)]
pub struct Worker<'a> {
    bucket: &'a [Sequenced],
    state: WorkerState,
}

impl<'a> Worker<'a> {
    pub const fn new(bucket: &'a [Sequenced]) -> Self {
        Self {
            bucket,
            state: WorkerState::Idle,
        }
    }

    pub const fn state(&self) -> WorkerState {
        self.state
    }

    /// Apply every transaction in the bucket, in order, and hand each outcome
    /// to `sink`. Rejections are recorded, never propagated.
    pub fn run<L: RawMutex, S: OutcomeSink>(&mut self, ledger: &Ledger<'_, L>, sink: &mut S) {
        if self.state == WorkerState::Done {
            return;
        }
        self.state = WorkerState::Draining;

        for (position, entry) in self.bucket.iter().enumerate() {
            let outcome = ledger.apply(&entry.transaction);
            sink.record(position, entry, outcome);
        }

        self.state = WorkerState::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::error::Rejection;
    use crate::ledger::LocalLedger;
    use crate::transaction::Transaction;
    use crate::workload::ZeroCost;

    #[test]
    fn test_worker_drains_bucket_in_order() {
        let config = LedgerConfig {
            max_users: 4,
            ..LedgerConfig::default()
        };
        let store = LocalLedger::new(&config.genesis().unwrap());
        let ledger = store.ledger(&ZeroCost);

        let bucket = [
            Sequenced {
                seq: 2,
                transaction: Transaction::Deposit {
                    actor: 2,
                    account_number: 2,
                    pin: 2,
                    amount: 5,
                },
            },
            Sequenced {
                seq: 6,
                transaction: Transaction::LoanRequest {
                    user: 9,
                    identifier: 9,
                    amount: 1,
                },
            },
        ];

        let mut worker = Worker::new(&bucket);
        assert_eq!(worker.state(), WorkerState::Idle);

        let mut outcomes = Vec::new();
        worker.run(&ledger, &mut outcomes);

        assert_eq!(worker.state(), WorkerState::Done);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].seq, 2);
        assert!(outcomes[0].outcome.is_accepted());
        assert_eq!(outcomes[1].seq, 6);
        assert_eq!(
            outcomes[1].outcome,
            Outcome::Rejected(Rejection::InvalidUser)
        );
    }

    #[test]
    fn test_done_worker_does_not_rerun() {
        let config = LedgerConfig {
            max_users: 2,
            ..LedgerConfig::default()
        };
        let store = LocalLedger::new(&config.genesis().unwrap());
        let ledger = store.ledger(&ZeroCost);
        let bucket = [Sequenced {
            seq: 0,
            transaction: Transaction::Deposit {
                actor: 1,
                account_number: 1,
                pin: 1,
                amount: 10,
            },
        }];

        let mut worker = Worker::new(&bucket);
        let mut outcomes = Vec::new();
        worker.run(&ledger, &mut outcomes);
        worker.run(&ledger, &mut outcomes);

        assert_eq!(outcomes.len(), 1);
        assert_eq!(ledger.snapshot().account(1).unwrap().balance, 100_010);
    }
}
