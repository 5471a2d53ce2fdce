use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use ledger_engine::config::{BalancePolicy, CreditLimits, LedgerConfig};
use ledger_engine::engine::BackendKind;
use ledger_engine::workload::{SyntheticCost, WorkloadSimulator, ZeroCost};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Range drawn from when initial balances are seeded.
const SEEDED_BALANCE_MIN: u64 = 1_000_000;
const SEEDED_BALANCE_MAX: u64 = 51_000_000;

/// Trait for reading configuration parameters
pub trait Config {
    fn input_path(&self) -> &Path;
    fn outcomes_path(&self) -> Option<&Path>;
    fn partitions(&self) -> NonZeroUsize;
    fn backend(&self) -> BackendKind;
    fn ledger_config(&self) -> Result<LedgerConfig>;
    fn workload(&self) -> Arc<dyn WorkloadSimulator>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Sequential,
    Threads,
    Processes,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Sequential => Self::Sequential,
            BackendArg::Threads => Self::Threads,
            BackendArg::Processes => Self::Processes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WorkloadArg {
    /// No simulated cost
    Zero,
    /// CPU-bound cost per operation kind
    Synthetic,
}

/// CLI configuration
#[derive(Parser, Debug)]
#[command(
    name = "partitioned-ledger",
    about = "Runs a bank/loan transaction log through a partitioned concurrent ledger",
    version
)]
pub struct CliConfig {
    /// Path to the transaction log (one whitespace-separated record per line)
    #[arg(value_name = "INPUT_FILE")]
    input_file: PathBuf,

    /// Number of workers; transactions go to worker `user mod workers`
    #[arg(short, long, default_value = "4")]
    workers: NonZeroUsize,

    /// Concurrency strategy
    #[arg(short, long, value_enum, default_value_t = BackendArg::Threads)]
    backend: BackendArg,

    /// Users are numbered 1..=max_users
    #[arg(long, default_value_t = 1000)]
    max_users: usize,

    #[arg(long, default_value_t = 1_000_000)]
    atm_reserve: u64,

    #[arg(long, default_value_t = 500_000)]
    bank_reserve: u64,

    /// Initial balance of every account, unless --seed is given
    #[arg(long, default_value_t = 100_000)]
    initial_balance: u64,

    /// Draw initial balances from a seeded RNG instead
    #[arg(long)]
    seed: Option<u64>,

    /// Maximum debt for credit ranks 1 through 5
    #[arg(long, value_delimiter = ',', value_name = "LIMITS")]
    credit_limits: Option<Vec<u64>>,

    /// Simulated processing cost
    #[arg(long, value_enum, default_value_t = WorkloadArg::Synthetic)]
    workload: WorkloadArg,

    /// Also write every outcome as CSV to this file
    #[arg(long, value_name = "PATH")]
    outcomes: Option<PathBuf>,
}

impl Config for CliConfig {
    fn input_path(&self) -> &Path {
        &self.input_file
    }

    fn outcomes_path(&self) -> Option<&Path> {
        self.outcomes.as_deref()
    }

    fn partitions(&self) -> NonZeroUsize {
        self.workers
    }

    fn backend(&self) -> BackendKind {
        self.backend.into()
    }

    fn ledger_config(&self) -> Result<LedgerConfig> {
        let credit_limits = match self.credit_limits.as_deref() {
            None => CreditLimits::default(),
            Some(&[r1, r2, r3, r4, r5]) => CreditLimits::new([r1, r2, r3, r4, r5])?,
            Some(other) => bail!("expected 5 credit limits, got {}", other.len()),
        };

        let balances = match self.seed {
            Some(seed) => BalancePolicy::Seeded {
                seed,
                min: SEEDED_BALANCE_MIN,
                max: SEEDED_BALANCE_MAX,
            },
            None => BalancePolicy::Fixed(self.initial_balance),
        };

        Ok(LedgerConfig {
            max_users: self.max_users,
            atm_reserve: self.atm_reserve,
            bank_reserve: self.bank_reserve,
            credit_limits,
            balances,
            ..LedgerConfig::default()
        })
    }

    fn workload(&self) -> Arc<dyn WorkloadSimulator> {
        match self.workload {
            WorkloadArg::Zero => Arc::new(ZeroCost),
            WorkloadArg::Synthetic => Arc::new(SyntheticCost::default()),
        }
    }
}
