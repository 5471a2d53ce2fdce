use super::{BatchReport, ExecutionBackend, PendingBatch, WorkerReport};
use crate::config::LedgerConfig;
use crate::error::BackendError;
use crate::ledger::LocalLedger;
use crate::transaction::Sequenced;
use crate::worker::Worker;
use crate::workload::WorkloadSimulator;
use std::sync::Arc;
use tracing::info;

/// Drains every bucket on the calling thread, one after another.
pub struct SequentialBackend {
    config: LedgerConfig,
    workload: Arc<dyn WorkloadSimulator>,
}

impl SequentialBackend {
    pub fn new(config: LedgerConfig, workload: Arc<dyn WorkloadSimulator>) -> Self {
        Self { config, workload }
    }
}

impl ExecutionBackend for SequentialBackend {
    type Pending = FinishedBatch;

    fn start(self, buckets: Vec<Vec<Sequenced>>) -> Result<FinishedBatch, BackendError> {
        let genesis = self.config.genesis()?;
        let store = LocalLedger::new(&genesis);
        let ledger = store.ledger(&*self.workload);

        info!("Running {} buckets sequentially", buckets.len());

        let workers = buckets
            .iter()
            .enumerate()
            .map(|(id, bucket)| {
                let mut outcomes = Vec::with_capacity(bucket.len());
                Worker::new(bucket).run(&ledger, &mut outcomes);
                WorkerReport {
                    worker: id,
                    outcomes,
                }
            })
            .collect();

        Ok(FinishedBatch {
            report: BatchReport {
                workers,
                snapshot: ledger.snapshot(),
                credit_limits: genesis.credit_limits,
            },
        })
    }
}

/// A batch that completed inside `start`.
pub struct FinishedBatch {
    report: BatchReport,
}

impl PendingBatch for FinishedBatch {
    fn worker_count(&self) -> usize {
        self.report.workers.len()
    }

    fn join_all(self) -> Result<BatchReport, BackendError> {
        Ok(self.report)
    }
}
