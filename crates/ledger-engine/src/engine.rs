use crate::backend::{self, BatchReport, SequentialBackend, ThreadBackend};
use crate::config::LedgerConfig;
use crate::error::BackendError;
use crate::partition::Partitioner;
use crate::transaction::Transaction;
use crate::workload::{SyntheticCost, WorkloadSimulator};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// Which concurrency strategy executes the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Sequential,
    Threads,
    /// Forked processes over a shared memory segment. Unix only.
    Processes,
}

/// Main batch processing engine
pub struct TransactionEngine {
    config: LedgerConfig,
    partitioner: Partitioner,
    backend: BackendKind,
    workload: Arc<dyn WorkloadSimulator>,
}

impl TransactionEngine {
    pub fn new(config: LedgerConfig, partitions: NonZeroUsize, backend: BackendKind) -> Self {
        Self {
            config,
            partitioner: Partitioner::new(partitions),
            backend,
            workload: Arc::new(SyntheticCost::default()),
        }
    }

    pub fn with_workload(mut self, workload: Arc<dyn WorkloadSimulator>) -> Self {
        self.workload = workload;
        self
    }

    pub const fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Partition `transactions` (in log order) and run them to completion.
    pub fn run<I>(&self, transactions: I) -> Result<BatchReport, BackendError>
    where
        I: IntoIterator<Item = Transaction>,
    {
        let buckets = self.partitioner.split(transactions);
        debug!(
            "Bucket sizes over {} partitions: {:?}",
            self.partitioner.partitions(),
            buckets.iter().map(Vec::len).collect::<Vec<_>>()
        );

        let config = self.config.clone();
        let workload = Arc::clone(&self.workload);

        match self.backend {
            BackendKind::Sequential => {
                backend::run(SequentialBackend::new(config, workload), buckets)
            }
            BackendKind::Threads => backend::run(ThreadBackend::new(config, workload), buckets),
            #[cfg(unix)]
            BackendKind::Processes => {
                backend::run(backend::ProcessBackend::new(config, workload), buckets)
            }
            #[cfg(not(unix))]
            BackendKind::Processes => Err(BackendError::Unsupported("processes")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Rejection;
    use crate::transaction::Outcome;
    use crate::workload::ZeroCost;

    fn engine(backend: BackendKind, partitions: usize) -> TransactionEngine {
        let config = LedgerConfig {
            max_users: 8,
            ..LedgerConfig::default()
        };
        TransactionEngine::new(config, NonZeroUsize::new(partitions).unwrap(), backend)
            .with_workload(Arc::new(ZeroCost))
    }

    fn mixed_batch() -> Vec<Transaction> {
        vec![
            Transaction::Deposit {
                actor: 1,
                account_number: 1,
                pin: 1,
                amount: 500,
            },
            Transaction::Transfer {
                sender: 2,
                account_number: 2,
                pin: 2,
                receiver: 3,
                amount: 2_000,
            },
            Transaction::LoanRequest {
                user: 4,
                identifier: 4,
                amount: 30_001,
            },
            Transaction::Deposit {
                actor: 9,
                account_number: 9,
                pin: 9,
                amount: 1,
            },
        ]
    }

    #[test]
    fn test_run_reports_every_transaction() {
        let report = engine(BackendKind::Threads, 3).run(mixed_batch()).unwrap();

        assert_eq!(report.workers.len(), 3);
        assert_eq!(report.transaction_count(), 4);
        assert_eq!(report.accepted(), 2);
        assert_eq!(report.rejected(), 2);

        let ordered = report.outcomes_in_order();
        assert!(ordered.iter().enumerate().all(|(i, c)| c.seq == i));
        assert_eq!(
            ordered[2].outcome,
            Outcome::Rejected(Rejection::CreditLimitExceeded)
        );
        assert_eq!(ordered[3].outcome, Outcome::Rejected(Rejection::InvalidUser));
    }

    #[test]
    fn test_backends_agree_on_final_state() {
        let reference = engine(BackendKind::Sequential, 1).run(mixed_batch()).unwrap();
        let threads = engine(BackendKind::Threads, 4).run(mixed_batch()).unwrap();

        assert_eq!(reference.snapshot, threads.snapshot);
        assert_eq!(reference.outcomes_in_order(), threads.outcomes_in_order());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_backend_matches_reference() {
        let reference = engine(BackendKind::Sequential, 1).run(mixed_batch()).unwrap();
        let processes = engine(BackendKind::Processes, 2).run(mixed_batch()).unwrap();

        assert_eq!(reference.snapshot, processes.snapshot);
        assert_eq!(
            reference.outcomes_in_order(),
            processes.outcomes_in_order()
        );
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = LedgerConfig {
            max_users: 0,
            ..LedgerConfig::default()
        };
        let engine = TransactionEngine::new(config, NonZeroUsize::MIN, BackendKind::Threads);

        assert!(matches!(
            engine.run(Vec::new()),
            Err(BackendError::Config(_))
        ));
    }
}
