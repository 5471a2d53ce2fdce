use crate::config::CreditRank;
use crate::error::Rejection;
use serde::Serialize;

/// Stable key of an account and its loan record.
pub type UserId = u32;

/// Credential value compared for equality against the stored record.
pub type Credential = i64;

/// Operation class, used to price a transaction in the workload simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Account,
    Transfer,
    Loan,
}

/// One parsed log record. Immutable once read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transaction {
    /// ATM deposit (`amount >= 0`) or withdrawal (`amount < 0`).
    Deposit {
        actor: UserId,
        account_number: Credential,
        pin: Credential,
        amount: i64,
    },
    Transfer {
        sender: UserId,
        account_number: Credential,
        pin: Credential,
        receiver: UserId,
        amount: u64,
    },
    LoanRequest {
        user: UserId,
        identifier: Credential,
        amount: u64,
    },
}

impl Transaction {
    /// Key the partitioner schedules on: the acting user.
    pub const fn primary_key(&self) -> UserId {
        match *self {
            Self::Deposit { actor, .. } => actor,
            Self::Transfer { sender, .. } => sender,
            Self::LoanRequest { user, .. } => user,
        }
    }

    pub const fn kind(&self) -> OpKind {
        match self {
            Self::Deposit { .. } => OpKind::Account,
            Self::Transfer { .. } => OpKind::Transfer,
            Self::LoanRequest { .. } => OpKind::Loan,
        }
    }
}

/// A transaction tagged with its position in the input log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequenced {
    pub seq: usize,
    pub transaction: Transaction,
}

/// State observed under lock when a transaction was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Account {
        user: UserId,
        balance: u64,
        atm_reserve: u64,
    },
    Transfer {
        sender: UserId,
        sender_balance: u64,
        receiver: UserId,
        receiver_balance: u64,
    },
    Loan {
        user: UserId,
        debt: u64,
        bank_reserve: u64,
    },
}

/// Result of applying one transaction. Emitted once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted(StateChange),
    Rejected(Rejection),
}

impl Outcome {
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

impl From<Result<StateChange, Rejection>> for Outcome {
    fn from(result: Result<StateChange, Rejection>) -> Self {
        match result {
            Ok(change) => Self::Accepted(change),
            Err(reason) => Self::Rejected(reason),
        }
    }
}

/// An outcome paired with the transaction that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completed {
    pub seq: usize,
    pub transaction: Transaction,
    pub outcome: Outcome,
}

/// Bank account state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountRecord {
    pub user: UserId,
    pub account_number: Credential,
    pub pin: Credential,
    pub balance: u64,
}

impl AccountRecord {
    pub(crate) fn authenticate(
        &self,
        account_number: Credential,
        pin: Credential,
    ) -> Result<(), Rejection> {
        if self.account_number == account_number && self.pin == pin {
            return Ok(());
        }

        Err(Rejection::AuthFailure)
    }

    pub(crate) fn credited(&self, amount: u64) -> Result<u64, Rejection> {
        self.balance
            .checked_add(amount)
            .ok_or(Rejection::BalanceOverflow)
    }

    pub(crate) fn debited(&self, amount: u64) -> Result<u64, Rejection> {
        self.balance
            .checked_sub(amount)
            .ok_or(Rejection::InsufficientBalance)
    }
}

/// Loan account state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanRecord {
    pub user: UserId,
    pub identifier: Credential,
    pub debt: u64,
    pub credit_rank: CreditRank,
}

impl LoanRecord {
    pub(crate) fn authenticate(&self, identifier: Credential) -> Result<(), Rejection> {
        if self.identifier == identifier {
            return Ok(());
        }

        Err(Rejection::AuthFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_is_acting_user() {
        let transfer = Transaction::Transfer {
            sender: 3,
            account_number: 3,
            pin: 3,
            receiver: 9,
            amount: 10,
        };
        let loan = Transaction::LoanRequest {
            user: 12,
            identifier: 12,
            amount: 1,
        };

        assert_eq!(transfer.primary_key(), 3);
        assert_eq!(transfer.kind(), OpKind::Transfer);
        assert_eq!(loan.primary_key(), 12);
        assert_eq!(loan.kind(), OpKind::Loan);
    }

    #[test]
    fn test_account_credentials() {
        let account = AccountRecord {
            user: 1,
            account_number: 11,
            pin: 1234,
            balance: 0,
        };

        assert!(account.authenticate(11, 1234).is_ok());
        assert_eq!(account.authenticate(11, 4321), Err(Rejection::AuthFailure));
        assert_eq!(account.authenticate(12, 1234), Err(Rejection::AuthFailure));
    }

    #[test]
    fn test_balance_arithmetic_is_checked() {
        let account = AccountRecord {
            user: 1,
            account_number: 1,
            pin: 1,
            balance: 50,
        };

        assert_eq!(account.debited(50), Ok(0));
        assert_eq!(account.debited(51), Err(Rejection::InsufficientBalance));
        assert_eq!(account.credited(u64::MAX), Err(Rejection::BalanceOverflow));
    }
}
