//! Synthetic per-operation processing cost.
//!
//! The ledger calls [`WorkloadSimulator::cost`] before taking any lock, so the
//! simulated work runs in parallel across workers. Tests plug in [`ZeroCost`].

use crate::transaction::OpKind;
use std::hint::black_box;

const MODULUS: u64 = 1_000_000_007;
const BASE_USER: u64 = 12_345;
const EXPONENT: u64 = 20;

/// Pluggable cost function, one call per ledger operation.
pub trait WorkloadSimulator: Send + Sync {
    /// Burn the cost of one `kind` operation and report the work units spent.
    fn cost(&self, kind: OpKind) -> u64;
}

/// Does no work. Used for fast correctness runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroCost;

impl WorkloadSimulator for ZeroCost {
    fn cost(&self, _kind: OpKind) -> u64 {
        0
    }
}

/// Iteration counts for [`SyntheticCost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostProfile {
    /// Modular exponentiation rounds for deposits and withdrawals.
    pub account_rounds: u64,
    /// Modular exponentiation rounds for transfers.
    pub transfer_rounds: u64,
    /// Modular exponentiation rounds for loan requests.
    pub loan_rounds: u64,
    /// Extra credit-scoring iterations for loan requests.
    pub scoring_iterations: u64,
    /// Extra interest-accrual iterations for loan requests.
    pub interest_iterations: u64,
}

impl Default for CostProfile {
    fn default() -> Self {
        Self {
            account_rounds: 1_000,
            transfer_rounds: 1_000,
            loan_rounds: 667,
            scoring_iterations: 20_000,
            interest_iterations: 20_000,
        }
    }
}

/// CPU-bound cost modelled on credential decryption plus, for loans, credit
/// scoring and interest calculation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticCost {
    profile: CostProfile,
}

impl SyntheticCost {
    pub const fn new(profile: CostProfile) -> Self {
        Self { profile }
    }
}

impl WorkloadSimulator for SyntheticCost {
    fn cost(&self, kind: OpKind) -> u64 {
        let profile = &self.profile;

        match kind {
            OpKind::Account => modular_rounds(profile.account_rounds),
            OpKind::Transfer => modular_rounds(profile.transfer_rounds),
            OpKind::Loan => {
                modular_rounds(profile.loan_rounds)
                    + credit_scoring(profile.scoring_iterations)
                    + interest_accrual(profile.interest_iterations)
            }
        }
    }
}

fn modular_rounds(rounds: u64) -> u64 {
    let mut acc = 0u64;

    for i in 1..=rounds {
        let base = BASE_USER.wrapping_mul(i) % MODULUS;
        let mut result = 1u64;
        for _ in 0..EXPONENT {
            result = result * base % MODULUS;
        }
        acc = acc.wrapping_add(black_box(result));
    }

    black_box(acc);
    rounds * EXPONENT
}

fn credit_scoring(iterations: u64) -> u64 {
    let mut score = 0u64;

    for _ in 0..iterations {
        score = black_box(score.wrapping_add(score.wrapping_mul(31).wrapping_add(17) % 1_234_567));
    }

    iterations
}

fn interest_accrual(iterations: u64) -> u64 {
    let mut interest = 1.05f64;

    for _ in 0..iterations {
        interest = black_box(interest * 1.00001);
    }

    iterations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_cost_does_no_work() {
        assert_eq!(ZeroCost.cost(OpKind::Account), 0);
        assert_eq!(ZeroCost.cost(OpKind::Loan), 0);
    }

    #[test]
    fn test_synthetic_cost_is_deterministic_per_kind() {
        let workload = SyntheticCost::new(CostProfile {
            account_rounds: 3,
            transfer_rounds: 5,
            loan_rounds: 2,
            scoring_iterations: 7,
            interest_iterations: 11,
        });

        assert_eq!(workload.cost(OpKind::Account), 3 * EXPONENT);
        assert_eq!(workload.cost(OpKind::Transfer), 5 * EXPONENT);
        assert_eq!(workload.cost(OpKind::Loan), 2 * EXPONENT + 7 + 11);
        assert_eq!(workload.cost(OpKind::Loan), workload.cost(OpKind::Loan));
    }

    #[test]
    fn test_default_profile_prices_loans_highest() {
        let workload = SyntheticCost::default();

        assert!(workload.cost(OpKind::Loan) > workload.cost(OpKind::Account));
    }
}
