//! Realisations of "N workers running concurrently".
//!
//! Every backend consumes the partitioner's buckets, builds the ledger from
//! configuration before any worker starts, and only exposes the final ledger
//! state from [`PendingBatch::join_all`], after every worker has finished.

mod sequential;
mod thread;

#[cfg(unix)]
mod process;

pub use sequential::{FinishedBatch, SequentialBackend};
pub use thread::{ThreadBackend, ThreadBatch};

#[cfg(unix)]
pub use process::{ProcessBackend, ProcessBatch};

use crate::config::CreditLimits;
use crate::error::BackendError;
use crate::ledger::LedgerSnapshot;
use crate::transaction::{Completed, Sequenced};
use tracing::debug;

/// Strategy that starts one worker per bucket.
pub trait ExecutionBackend {
    type Pending: PendingBatch;

    /// Initialise the ledger and start `buckets.len()` workers.
    fn start(self, buckets: Vec<Vec<Sequenced>>) -> Result<Self::Pending, BackendError>;
}

/// A started batch. Results are only reachable by joining every worker.
pub trait PendingBatch {
    fn worker_count(&self) -> usize;

    fn join_all(self) -> Result<BatchReport, BackendError>;
}

/// Start and immediately join a batch.
pub fn run<B: ExecutionBackend>(
    backend: B,
    buckets: Vec<Vec<Sequenced>>,
) -> Result<BatchReport, BackendError> {
    let pending = backend.start(buckets)?;
    debug!("Joining {} workers", pending.worker_count());

    pending.join_all()
}

/// Outcomes produced by one worker, in the order it applied them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub outcomes: Vec<Completed>,
}

/// Everything a joined batch hands to the reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub workers: Vec<WorkerReport>,
    pub snapshot: LedgerSnapshot,
    pub credit_limits: CreditLimits,
}

impl BatchReport {
    pub fn transaction_count(&self) -> usize {
        self.workers.iter().map(|w| w.outcomes.len()).sum()
    }

    pub fn accepted(&self) -> usize {
        self.completed()
            .filter(|completed| completed.outcome.is_accepted())
            .count()
    }

    pub fn rejected(&self) -> usize {
        self.transaction_count() - self.accepted()
    }

    /// All outcomes merged back into input log order.
    pub fn outcomes_in_order(&self) -> Vec<Completed> {
        let mut merged: Vec<_> = self.completed().copied().collect();
        merged.sort_unstable_by_key(|completed| completed.seq);
        merged
    }

    fn completed(&self) -> impl Iterator<Item = &Completed> {
        self.workers.iter().flat_map(|w| w.outcomes.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::partition::Partitioner;
    use crate::transaction::Transaction;
    use crate::workload::ZeroCost;
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    fn buckets(partitions: usize) -> Vec<Vec<Sequenced>> {
        let partitioner = Partitioner::new(NonZeroUsize::new(partitions).unwrap());
        assert_eq!(partitioner.partitions().get(), partitions);

        partitioner.split((1..=6).map(|user| Transaction::LoanRequest {
            user,
            identifier: user.into(),
            amount: 10,
        }))
    }

    fn config() -> LedgerConfig {
        LedgerConfig {
            max_users: 6,
            ..LedgerConfig::default()
        }
    }

    #[test]
    fn test_pending_batch_counts_one_worker_per_bucket() {
        let sequential = SequentialBackend::new(config(), Arc::new(ZeroCost))
            .start(buckets(3))
            .unwrap();
        assert_eq!(sequential.worker_count(), 3);

        let threads = ThreadBackend::new(config(), Arc::new(ZeroCost))
            .start(buckets(4))
            .unwrap();
        assert_eq!(threads.worker_count(), 4);

        let report = threads.join_all().unwrap();
        assert_eq!(report.workers.len(), 4);
        assert_eq!(report.transaction_count(), 6);
    }

    #[test]
    fn test_empty_buckets_still_get_a_worker() {
        let report = run(
            SequentialBackend::new(config(), Arc::new(ZeroCost)),
            vec![Vec::new(), Vec::new()],
        )
        .unwrap();

        assert_eq!(report.workers.len(), 2);
        assert_eq!(report.transaction_count(), 0);
        assert_eq!(report.rejected(), 0);
    }
}
