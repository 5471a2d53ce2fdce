use super::{BatchReport, ExecutionBackend, PendingBatch, WorkerReport};
use crate::config::{CreditLimits, LedgerConfig};
use crate::error::BackendError;
use crate::shm::SharedSegment;
use crate::transaction::{Completed, Outcome, Sequenced};
use crate::worker::{OutcomeSink, Worker};
use crate::workload::WorkloadSimulator;
use std::io;
use std::mem;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CHILD_PANICKED: libc::c_int = 101;

/// One forked child process per bucket, all mapping one shared segment.
pub struct ProcessBackend {
    config: LedgerConfig,
    workload: Arc<dyn WorkloadSimulator>,
}

impl ProcessBackend {
    pub fn new(config: LedgerConfig, workload: Arc<dyn WorkloadSimulator>) -> Self {
        Self { config, workload }
    }
}

impl ExecutionBackend for ProcessBackend {
    type Pending = ProcessBatch;

    fn start(self, buckets: Vec<Vec<Sequenced>>) -> Result<ProcessBatch, BackendError> {
        let genesis = self.config.genesis()?;

        let mut ranges = Vec::with_capacity(buckets.len());
        let mut next = 0;
        for bucket in &buckets {
            ranges.push(next..next + bucket.len());
            next += bucket.len();
        }

        let segment = SharedSegment::create(&genesis, next)?;
        let mut batch = ProcessBatch {
            segment,
            workload: self.workload,
            credit_limits: genesis.credit_limits,
            buckets,
            ranges,
            children: Vec::new(),
        };

        info!(
            "Forking {} worker processes over {} transactions",
            batch.buckets.len(),
            next
        );

        for worker in 0..batch.buckets.len() {
            match unsafe { libc::fork() } {
                -1 => {
                    let source = io::Error::last_os_error();
                    warn!("Failed to fork worker {worker}: {source}");
                    return Err(BackendError::Spawn { worker, source });
                }
                0 => batch.run_child(worker),
                pid => batch.children.push(Child { worker, pid }),
            }
        }

        Ok(batch)
    }
}

#[derive(Debug, Clone, Copy)]
struct Child {
    worker: usize,
    pid: libc::pid_t,
}

/// Running worker processes. The segment is unmapped only after every child
/// has been reaped, including when the batch is dropped unjoined.
pub struct ProcessBatch {
    segment: SharedSegment,
    workload: Arc<dyn WorkloadSimulator>,
    credit_limits: CreditLimits,
    buckets: Vec<Vec<Sequenced>>,
    ranges: Vec<Range<usize>>,
    children: Vec<Child>,
}

impl ProcessBatch {
    /// Body of a forked child. Never returns and never runs destructors: the
    /// segment and its locks belong to the parent.
    fn run_child(&self, worker: usize) -> ! {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let ledger = self.segment.ledger(&*self.workload);
            // Each child owns exactly its own slot range.
            let slots = unsafe { self.segment.slots_mut(self.ranges[worker].clone()) };
            Worker::new(&self.buckets[worker]).run(&ledger, &mut SlotSink { slots });
        }));

        let code = if result.is_ok() { 0 } else { CHILD_PANICKED };
        unsafe { libc::_exit(code) }
    }

    fn collect(&self) -> Result<Vec<WorkerReport>, BackendError> {
        self.buckets
            .iter()
            .zip(&self.ranges)
            .enumerate()
            .map(|(worker, (bucket, range))| -> Result<WorkerReport, BackendError> {
                let outcomes = bucket
                    .iter()
                    .zip(range.clone())
                    .map(|(entry, index)| {
                        self.segment
                            .slot(index)
                            .map(|outcome| Completed {
                                seq: entry.seq,
                                transaction: entry.transaction,
                                outcome,
                            })
                            .ok_or(BackendError::MissingOutcome {
                                worker,
                                seq: entry.seq,
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                debug!("Worker {worker} applied {} transactions", outcomes.len());
                Ok(WorkerReport { worker, outcomes })
            })
            .collect()
    }
}

impl PendingBatch for ProcessBatch {
    fn worker_count(&self) -> usize {
        self.buckets.len()
    }

    fn join_all(mut self) -> Result<BatchReport, BackendError> {
        let mut failures = Vec::new();

        // Reap every child before reporting, even after a failure.
        for child in mem::take(&mut self.children) {
            match wait_for(child.pid) {
                Ok(status) if exited_cleanly(status) => {}
                Ok(status) => {
                    warn!("Worker {} exited with status {status}", child.worker);
                    failures.push(BackendError::WorkerFailed {
                        worker: child.worker,
                        status,
                    });
                }
                Err(source) => failures.push(BackendError::Wait {
                    worker: child.worker,
                    source,
                }),
            }
        }

        if let Some(error) = failures.into_iter().next() {
            return Err(error);
        }

        Ok(BatchReport {
            workers: self.collect()?,
            snapshot: self.segment.ledger(&*self.workload).snapshot(),
            credit_limits: self.credit_limits,
        })
    }
}

impl Drop for ProcessBatch {
    fn drop(&mut self) {
        for child in self.children.drain(..) {
            if let Err(e) = wait_for(child.pid) {
                warn!("Failed to reap worker {}: {e}", child.worker);
            }
        }
    }
}

struct SlotSink<'a> {
    slots: &'a mut [Option<Outcome>],
}

impl OutcomeSink for SlotSink<'_> {
    fn record(&mut self, position: usize, _entry: &Sequenced, outcome: Outcome) {
        self.slots[position] = Some(outcome);
    }
}

fn wait_for(pid: libc::pid_t) -> io::Result<libc::c_int> {
    let mut status = 0;

    loop {
        if unsafe { libc::waitpid(pid, &mut status, 0) } == pid {
            return Ok(status);
        }

        let error = io::Error::last_os_error();
        if error.kind() != io::ErrorKind::Interrupted {
            return Err(error);
        }
    }
}

fn exited_cleanly(status: libc::c_int) -> bool {
    libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0
}
