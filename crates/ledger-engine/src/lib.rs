pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod partition;
#[cfg(unix)]
pub mod shm;
pub mod transaction;
pub mod worker;
pub mod workload;

use backend::{ExecutionBackend, PendingBatch, SequentialBackend};
use config::LedgerConfig;
use error::BackendError;
use ledger::LedgerSnapshot;
use std::sync::Arc;
use transaction::Transaction;
use workload::ZeroCost;

/// Apply a batch in log order on the calling thread, without simulated cost,
/// and return the final ledger state. The serial reference for any other run.
pub fn process_batch(
    config: &LedgerConfig,
    transactions: impl IntoIterator<Item = Transaction>,
) -> Result<LedgerSnapshot, BackendError> {
    let sequenced = partition::Partitioner::new(std::num::NonZeroUsize::MIN).split(transactions);
    let backend = SequentialBackend::new(config.clone(), Arc::new(ZeroCost));

    Ok(backend.start(sequenced)?.join_all()?.snapshot)
}
