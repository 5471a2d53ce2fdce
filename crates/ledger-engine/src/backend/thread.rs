use super::{BatchReport, ExecutionBackend, PendingBatch, WorkerReport};
use crate::config::{CreditLimits, LedgerConfig};
use crate::error::BackendError;
use crate::ledger::LocalLedger;
use crate::transaction::{Completed, Sequenced};
use crate::worker::Worker;
use crate::workload::WorkloadSimulator;
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// One OS thread per bucket, all sharing a heap ledger.
pub struct ThreadBackend {
    config: LedgerConfig,
    workload: Arc<dyn WorkloadSimulator>,
}

impl ThreadBackend {
    pub fn new(config: LedgerConfig, workload: Arc<dyn WorkloadSimulator>) -> Self {
        Self { config, workload }
    }
}

impl ExecutionBackend for ThreadBackend {
    type Pending = ThreadBatch;

    fn start(self, buckets: Vec<Vec<Sequenced>>) -> Result<ThreadBatch, BackendError> {
        let genesis = self.config.genesis()?;
        let mut batch = ThreadBatch {
            store: Arc::new(LocalLedger::new(&genesis)),
            workload: self.workload,
            credit_limits: genesis.credit_limits,
            handles: Vec::with_capacity(buckets.len()),
        };

        info!("Starting {} worker threads", buckets.len());

        for (id, bucket) in buckets.into_iter().enumerate() {
            let store = Arc::clone(&batch.store);
            let workload = Arc::clone(&batch.workload);

            let handle = thread::Builder::new()
                .name(format!("ledger-worker-{id}"))
                .spawn(move || {
                    let ledger = store.ledger(&*workload);
                    let mut outcomes = Vec::with_capacity(bucket.len());
                    Worker::new(&bucket).run(&ledger, &mut outcomes);
                    outcomes
                })
                .map_err(|source| BackendError::Spawn { worker: id, source })?;

            batch.handles.push(handle);
        }

        Ok(batch)
    }
}

/// Running worker threads. Dropping an unjoined batch still waits for them.
pub struct ThreadBatch {
    store: Arc<LocalLedger>,
    workload: Arc<dyn WorkloadSimulator>,
    credit_limits: CreditLimits,
    handles: Vec<JoinHandle<Vec<Completed>>>,
}

impl PendingBatch for ThreadBatch {
    fn worker_count(&self) -> usize {
        self.handles.len()
    }

    fn join_all(mut self) -> Result<BatchReport, BackendError> {
        let mut workers = Vec::with_capacity(self.handles.len());
        let mut failures = Vec::new();

        for (id, handle) in mem::take(&mut self.handles).into_iter().enumerate() {
            match handle.join() {
                Ok(outcomes) => {
                    debug!("Worker {id} applied {} transactions", outcomes.len());
                    workers.push(WorkerReport {
                        worker: id,
                        outcomes,
                    });
                }
                Err(_) => {
                    warn!("Worker {id} panicked");
                    failures.push(BackendError::WorkerPanicked(id));
                }
            }
        }

        if let Some(error) = failures.into_iter().next() {
            return Err(error);
        }

        Ok(BatchReport {
            workers,
            snapshot: self.store.ledger(&*self.workload).snapshot(),
            credit_limits: self.credit_limits,
        })
    }
}

impl Drop for ThreadBatch {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
