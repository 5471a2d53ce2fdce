use anyhow::{Context, Result};
use ledger_engine::backend::BatchReport;
use ledger_engine::ledger::LedgerSnapshot;
use ledger_engine::transaction::{OpKind, Outcome, UserId};
use serde::Serialize;
use std::io::Write;
use tracing::{debug, info};

/// Final per-user state row
#[derive(Debug, Serialize)]
struct AccountRow {
    user: UserId,
    balance: u64,
    debt: u64,
    credit_rank: u8,
}

/// One processed transaction
#[derive(Debug, Serialize)]
struct OutcomeRow {
    seq: usize,
    worker: usize,
    kind: OpKind,
    status: &'static str,
    reason: Option<&'static str>,
}

pub fn write_snapshot<W: Write>(writer: W, snapshot: &LedgerSnapshot) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().from_writer(writer);

    for (account, loan) in snapshot.accounts.iter().zip(&snapshot.loans) {
        writer
            .serialize(AccountRow {
                user: account.user,
                balance: account.balance,
                debt: loan.debt,
                credit_rank: loan.credit_rank.into(),
            })
            .context("Failed to serialize account")?;
    }

    writer.flush().context("Failed to flush account report")?;

    Ok(())
}

pub fn write_outcomes<W: Write>(writer: W, report: &BatchReport) -> Result<()> {
    let mut rows: Vec<_> = report
        .workers
        .iter()
        .flat_map(|w| w.outcomes.iter().map(move |c| (w.worker, c)))
        .map(|(worker, completed)| {
            let (status, reason) = match completed.outcome {
                Outcome::Accepted(_) => ("accepted", None),
                Outcome::Rejected(reason) => ("rejected", Some(reason.code())),
            };
            OutcomeRow {
                seq: completed.seq,
                worker,
                kind: completed.transaction.kind(),
                status,
                reason,
            }
        })
        .collect();
    rows.sort_unstable_by_key(|row| row.seq);

    let mut writer = csv::WriterBuilder::new().from_writer(writer);
    for row in &rows {
        writer.serialize(row).context("Failed to serialize outcome")?;
    }
    writer.flush().context("Failed to flush outcome report")?;

    Ok(())
}

pub fn log_summary(report: &BatchReport, skipped: usize) {
    for worker in &report.workers {
        let accepted = worker
            .outcomes
            .iter()
            .filter(|c| c.outcome.is_accepted())
            .count();
        info!(
            "Worker {}: {} transactions, {accepted} accepted",
            worker.worker,
            worker.outcomes.len()
        );

        for completed in &worker.outcomes {
            if let Outcome::Rejected(reason) = completed.outcome {
                debug!("Transaction {} rejected: {reason}", completed.seq);
            }
        }
    }

    let snapshot = &report.snapshot;
    info!(
        "Processed {} transactions ({} accepted, {} rejected), skipped {skipped} invalid records",
        report.transaction_count(),
        report.accepted(),
        report.rejected()
    );
    info!(
        "ATM reserve {}, bank reserve {}, total balance {}, total debt {}",
        snapshot.atm_reserve,
        snapshot.bank_reserve,
        snapshot.total_balance(),
        snapshot.total_debt()
    );
}
