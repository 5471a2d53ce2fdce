mod config;
mod reader;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use config::{CliConfig, Config};
use ledger_engine::engine::TransactionEngine;
use reader::TransactionLog;
use std::fs::File;
use std::io::{self, BufWriter};
use tracing::{info, warn};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = CliConfig::parse();

    process_transactions(&config)?;

    info!("Processing completed successfully");

    Ok(())
}

fn process_transactions<C: Config>(config: &C) -> Result<()> {
    let engine = TransactionEngine::new(
        config.ledger_config()?,
        config.partitions(),
        config.backend(),
    )
    .with_workload(config.workload());

    info!(
        "Running {} with {} workers on the {:?} backend",
        config.input_path().display(),
        config.partitions(),
        engine.backend()
    );

    let log = TransactionLog::new(config.input_path());
    let mut skipped = 0;

    let transactions = log.transactions()?.filter_map(|record| match record {
        Ok(tx) => Some(tx),
        Err(e) => {
            warn!("Skipping log record: {e:#}");
            skipped += 1;

            None
        }
    });

    let report = engine.run(transactions).context("Batch run failed")?;

    report::log_summary(&report, skipped);

    if let Some(path) = config.outcomes_path() {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        report::write_outcomes(BufWriter::new(file), &report)?;
    }

    let stdout = io::stdout();
    report::write_snapshot(stdout.lock(), &report.snapshot)?;

    Ok(())
}
