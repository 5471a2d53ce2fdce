//! Ledger operations.
//!
//! [`Ledger`] is a borrowed view over record storage. The storage itself lives
//! either on the heap ([`LocalLedger`], shared between threads) or in a shared
//! memory segment ([`SharedSegment`](crate::shm::SharedSegment), shared between
//! processes). Every operation is all-or-nothing: funds are checked while the
//! relevant locks are held, and nothing is written unless every check passes.
//!
//! Lock order: account records by ascending user id, then the ATM reserve.
//! Loan record, then the bank reserve.

use crate::config::{CreditLimits, Genesis};
use crate::error::Rejection;
use crate::lock::{lock_ordered, PairGuard, Record, ThreadLatch};
use crate::transaction::{
    AccountRecord, Credential, LoanRecord, OpKind, Outcome, StateChange, Transaction, UserId,
};
use crate::workload::WorkloadSimulator;
use parking_lot::lock_api::RawMutex;
use thiserror::Error;

/// Operation surface over one set of ledger records.
pub struct Ledger<'a, L> {
    accounts: &'a [Record<L, AccountRecord>],
    loans: &'a [Record<L, LoanRecord>],
    atm_reserve: &'a Record<L, u64>,
    bank_reserve: &'a Record<L, u64>,
    credit_limits: CreditLimits,
    workload: &'a dyn WorkloadSimulator,
}

impl<'a, L: RawMutex> Ledger<'a, L> {
    pub(crate) fn from_parts(
        accounts: &'a [Record<L, AccountRecord>],
        loans: &'a [Record<L, LoanRecord>],
        atm_reserve: &'a Record<L, u64>,
        bank_reserve: &'a Record<L, u64>,
        credit_limits: CreditLimits,
        workload: &'a dyn WorkloadSimulator,
    ) -> Self {
        Self {
            accounts,
            loans,
            atm_reserve,
            bank_reserve,
            credit_limits,
            workload,
        }
    }

    pub fn apply(&self, transaction: &Transaction) -> Outcome {
        let result = match *transaction {
            Transaction::Deposit {
                actor,
                account_number,
                pin,
                amount,
            } => self.deposit(actor, account_number, pin, amount),
            Transaction::Transfer {
                sender,
                account_number,
                pin,
                receiver,
                amount,
            } => self.transfer(sender, account_number, pin, receiver, amount),
            Transaction::LoanRequest {
                user,
                identifier,
                amount,
            } => self.issue_loan(user, identifier, amount),
        };

        Outcome::from(result)
    }

    /// ATM deposit, or withdrawal when `amount` is negative. Moves value
    /// between the account and the ATM reserve.
    pub fn deposit(
        &self,
        actor: UserId,
        account_number: Credential,
        pin: Credential,
        amount: i64,
    ) -> Result<StateChange, Rejection> {
        let record = self.account(actor)?;
        self.workload.cost(OpKind::Account);

        let mut account = record.lock();
        account.authenticate(account_number, pin)?;

        let mut atm = self.atm_reserve.lock();
        let magnitude = amount.unsigned_abs();
        let (balance, reserve) = if amount >= 0 {
            let reserve = atm
                .checked_add(magnitude)
                .ok_or(Rejection::BalanceOverflow)?;
            (account.credited(magnitude)?, reserve)
        } else {
            let balance = account.debited(magnitude)?;
            let reserve = atm
                .checked_sub(magnitude)
                .ok_or(Rejection::InsufficientReserve)?;
            (balance, reserve)
        };

        account.balance = balance;
        *atm = reserve;

        Ok(StateChange::Account {
            user: actor,
            balance,
            atm_reserve: reserve,
        })
    }

    /// Move `amount` from sender to receiver. Both accounts are locked before
    /// either is read.
    pub fn transfer(
        &self,
        sender: UserId,
        account_number: Credential,
        pin: Credential,
        receiver: UserId,
        amount: u64,
    ) -> Result<StateChange, Rejection> {
        let from = self.account(sender)?;
        let to = self.account(receiver)?;
        self.workload.cost(OpKind::Transfer);

        match lock_ordered((sender, from), (receiver, to)) {
            PairGuard::Same(account) => {
                account.authenticate(account_number, pin)?;
                account.debited(amount)?;

                Ok(StateChange::Transfer {
                    sender,
                    sender_balance: account.balance,
                    receiver,
                    receiver_balance: account.balance,
                })
            }
            PairGuard::Distinct(mut from, mut to) => {
                from.authenticate(account_number, pin)?;
                let sender_balance = from.debited(amount)?;
                let receiver_balance = to.credited(amount)?;

                from.balance = sender_balance;
                to.balance = receiver_balance;

                Ok(StateChange::Transfer {
                    sender,
                    sender_balance,
                    receiver,
                    receiver_balance,
                })
            }
        }
    }

    /// Lend `amount` from the bank reserve, bounded by the user's credit rank.
    pub fn issue_loan(
        &self,
        user: UserId,
        identifier: Credential,
        amount: u64,
    ) -> Result<StateChange, Rejection> {
        let record = self.loan(user)?;
        self.workload.cost(OpKind::Loan);

        let mut loan = record.lock();
        loan.authenticate(identifier)?;

        let limit = self.credit_limits.limit(loan.credit_rank);
        let debt = loan
            .debt
            .checked_add(amount)
            .filter(|&debt| debt <= limit)
            .ok_or(Rejection::CreditLimitExceeded)?;

        let mut bank = self.bank_reserve.lock();
        let reserve = bank
            .checked_sub(amount)
            .ok_or(Rejection::BankFundsExhausted)?;

        loan.debt = debt;
        *bank = reserve;

        Ok(StateChange::Loan {
            user,
            debt,
            bank_reserve: reserve,
        })
    }

    /// Copy every record out, one lock at a time. Only consistent once no
    /// operation is in flight.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            accounts: self.accounts.iter().map(|record| *record.lock()).collect(),
            loans: self.loans.iter().map(|record| *record.lock()).collect(),
            atm_reserve: *self.atm_reserve.lock(),
            bank_reserve: *self.bank_reserve.lock(),
        }
    }

    pub const fn credit_limits(&self) -> &CreditLimits {
        &self.credit_limits
    }

    fn account(&self, user: UserId) -> Result<&'a Record<L, AccountRecord>, Rejection> {
        slot(user)
            .and_then(|index| self.accounts.get(index))
            .ok_or(Rejection::InvalidUser)
    }

    fn loan(&self, user: UserId) -> Result<&'a Record<L, LoanRecord>, Rejection> {
        slot(user)
            .and_then(|index| self.loans.get(index))
            .ok_or(Rejection::InvalidUser)
    }
}

fn slot(user: UserId) -> Option<usize> {
    usize::try_from(user).ok()?.checked_sub(1)
}

/// Heap-backed ledger storage shared between threads of one process.
pub struct LocalLedger {
    accounts: Box<[Record<ThreadLatch, AccountRecord>]>,
    loans: Box<[Record<ThreadLatch, LoanRecord>]>,
    atm_reserve: Record<ThreadLatch, u64>,
    bank_reserve: Record<ThreadLatch, u64>,
    credit_limits: CreditLimits,
}

impl LocalLedger {
    pub fn new(genesis: &Genesis) -> Self {
        Self {
            accounts: genesis
                .accounts
                .iter()
                .map(|&account| Record::new(account))
                .collect(),
            loans: genesis
                .loans
                .iter()
                .map(|&loan| Record::new(loan))
                .collect(),
            atm_reserve: Record::new(genesis.atm_reserve),
            bank_reserve: Record::new(genesis.bank_reserve),
            credit_limits: genesis.credit_limits,
        }
    }

    pub fn ledger<'a>(&'a self, workload: &'a dyn WorkloadSimulator) -> Ledger<'a, ThreadLatch> {
        Ledger::from_parts(
            &self.accounts,
            &self.loans,
            &self.atm_reserve,
            &self.bank_reserve,
            self.credit_limits,
            workload,
        )
    }
}

/// Full ledger state read after a batch has been joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub accounts: Vec<AccountRecord>,
    pub loans: Vec<LoanRecord>,
    pub atm_reserve: u64,
    pub bank_reserve: u64,
}

impl LedgerSnapshot {
    pub fn account(&self, user: UserId) -> Option<&AccountRecord> {
        slot(user).and_then(|index| self.accounts.get(index))
    }

    pub fn loan(&self, user: UserId) -> Option<&LoanRecord> {
        slot(user).and_then(|index| self.loans.get(index))
    }

    pub fn total_balance(&self) -> u128 {
        self.accounts.iter().map(|a| u128::from(a.balance)).sum()
    }

    pub fn total_debt(&self) -> u128 {
        self.loans.iter().map(|l| u128::from(l.debt)).sum()
    }

    /// Check every debt against its rank limit. Non-negativity of balances,
    /// debts and reserves holds by construction.
    pub fn check_invariants(&self, limits: &CreditLimits) -> Result<(), InvariantViolation> {
        for loan in &self.loans {
            let limit = limits.limit(loan.credit_rank);
            if loan.debt > limit {
                return Err(InvariantViolation::DebtOverLimit {
                    user: loan.user,
                    debt: loan.debt,
                    limit,
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("user {user} owes {debt}, above the rank limit {limit}")]
    DebtOverLimit { user: UserId, debt: u64, limit: u64 },
}
