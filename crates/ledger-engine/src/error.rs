use std::io;
use thiserror::Error;

/// Reason a single transaction was rejected by the ledger.
///
/// Rejections are recoverable: the worker records them as an outcome and moves
/// on to the next transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Rejection {
    #[error("user id outside the ledger's id range")]
    InvalidUser,
    #[error("credentials do not match the stored record")]
    AuthFailure,
    #[error("insufficient account balance")]
    InsufficientBalance,
    #[error("insufficient ATM reserve")]
    InsufficientReserve,
    #[error("loan would exceed the credit limit for the user's rank")]
    CreditLimitExceeded,
    #[error("insufficient bank funds for the loan")]
    BankFundsExhausted,
    #[error("credit would overflow the balance")]
    BalanceOverflow,
}

impl Rejection {
    /// Stable reason code used by reports.
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidUser => "invalid_user",
            Self::AuthFailure => "auth_failure",
            Self::InsufficientBalance => "insufficient_balance",
            Self::InsufficientReserve => "insufficient_reserve",
            Self::CreditLimitExceeded => "credit_limit_exceeded",
            Self::BankFundsExhausted => "bank_funds_exhausted",
            Self::BalanceOverflow => "balance_overflow",
        }
    }
}

/// Invalid ledger initialization parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_users must be at least 1")]
    NoUsers,
    #[error("max_users {0} does not fit the user id type")]
    TooManyUsers(usize),
    #[error("credit limits must not increase with rank: {0:?}")]
    IncreasingLimits([u64; 5]),
    #[error("seeded balance range {min}..{max} is empty")]
    EmptyBalanceRange { min: u64, max: u64 },
    #[error("balance override for user {0} is outside the id range")]
    OverrideOutOfRange(u32),
}

/// Fatal fault that prevents a batch from running to completion.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid ledger configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to map shared ledger segment: {0}")]
    SegmentMap(#[source] io::Error),
    #[error("failed to initialise cross-process lock: {0}")]
    LockInit(#[source] io::Error),
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for worker {worker}: {source}")]
    Wait {
        worker: usize,
        #[source]
        source: io::Error,
    },
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
    #[error("worker {worker} exited abnormally (wait status {status})")]
    WorkerFailed { worker: usize, status: i32 },
    #[error("worker {worker} left transaction {seq} without an outcome")]
    MissingOutcome { worker: usize, seq: usize },
    #[error("{0} backend is not available on this platform")]
    Unsupported(&'static str),
}
