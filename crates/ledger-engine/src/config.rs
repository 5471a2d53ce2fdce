use crate::error::ConfigError;
use crate::transaction::{AccountRecord, Credential, LoanRecord, UserId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// Credit rank assigned at genesis. Rank 1 carries the highest loan limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CreditRank {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Five = 5,
}

impl CreditRank {
    pub const ALL: [Self; 5] = [Self::One, Self::Two, Self::Three, Self::Four, Self::Five];

    /// Ranks cycle 1..=5 over consecutive user ids.
    pub const fn for_user(user: UserId) -> Self {
        Self::ALL[(user.saturating_sub(1) % 5) as usize]
    }

    const fn index(self) -> usize {
        self as usize - 1
    }
}

impl From<CreditRank> for u8 {
    fn from(rank: CreditRank) -> Self {
        rank as Self
    }
}

impl TryFrom<u8> for CreditRank {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1..=5 => Ok(Self::ALL[usize::from(value) - 1]),
            other => Err(other),
        }
    }
}

/// Maximum debt per credit rank, indexed rank 1 through rank 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditLimits([u64; 5]);

impl CreditLimits {
    /// Limits must not increase from rank 1 to rank 5.
    pub fn new(limits: [u64; 5]) -> Result<Self, ConfigError> {
        if limits.windows(2).any(|pair| pair[1] > pair[0]) {
            return Err(ConfigError::IncreasingLimits(limits));
        }

        Ok(Self(limits))
    }

    pub const fn limit(&self, rank: CreditRank) -> u64 {
        self.0[rank.index()]
    }

    pub const fn as_array(&self) -> [u64; 5] {
        self.0
    }
}

impl Default for CreditLimits {
    fn default() -> Self {
        Self([100_000, 70_000, 50_000, 30_000, 0])
    }
}

/// How initial account balances are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancePolicy {
    Fixed(u64),
    /// Uniform in `min..max`, reproducible for a given seed.
    Seeded { seed: u64, min: u64, max: u64 },
}

/// Ledger initialization parameters.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub max_users: usize,
    pub atm_reserve: u64,
    pub bank_reserve: u64,
    pub credit_limits: CreditLimits,
    pub balances: BalancePolicy,
    pub balance_overrides: BTreeMap<UserId, u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_users: 1000,
            atm_reserve: 1_000_000,
            bank_reserve: 500_000,
            credit_limits: CreditLimits::default(),
            balances: BalancePolicy::Fixed(100_000),
            balance_overrides: BTreeMap::new(),
        }
    }
}

impl LedgerConfig {
    pub fn with_balance(mut self, user: UserId, balance: u64) -> Self {
        self.balance_overrides.insert(user, balance);
        self
    }

    /// Validate the configuration and build every initial record.
    pub fn genesis(&self) -> Result<Genesis, ConfigError> {
        if self.max_users == 0 {
            return Err(ConfigError::NoUsers);
        }
        let max_users = UserId::try_from(self.max_users)
            .map_err(|_| ConfigError::TooManyUsers(self.max_users))?;

        if let Some(&user) = self
            .balance_overrides
            .keys()
            .find(|&&user| user == 0 || user > max_users)
        {
            return Err(ConfigError::OverrideOutOfRange(user));
        }

        let mut balances = BalanceSource::new(self.balances)?;
        let mut accounts = Vec::with_capacity(self.max_users);
        let mut loans = Vec::with_capacity(self.max_users);

        for user in 1..=max_users {
            let credential = Credential::from(user);
            let drawn = balances.next_balance();

            accounts.push(AccountRecord {
                user,
                account_number: credential,
                pin: credential,
                balance: self.balance_overrides.get(&user).copied().unwrap_or(drawn),
            });
            loans.push(LoanRecord {
                user,
                identifier: credential,
                debt: 0,
                credit_rank: CreditRank::for_user(user),
            });
        }

        Ok(Genesis {
            accounts,
            loans,
            atm_reserve: self.atm_reserve,
            bank_reserve: self.bank_reserve,
            credit_limits: self.credit_limits,
        })
    }
}

enum BalanceSource {
    Fixed(u64),
    Seeded {
        rng: ChaCha8Rng,
        min: u64,
        max: u64,
    },
}

impl BalanceSource {
    fn new(policy: BalancePolicy) -> Result<Self, ConfigError> {
        match policy {
            BalancePolicy::Fixed(balance) => Ok(Self::Fixed(balance)),
            BalancePolicy::Seeded { min, max, .. } if min >= max => {
                Err(ConfigError::EmptyBalanceRange { min, max })
            }
            BalancePolicy::Seeded { seed, min, max } => Ok(Self::Seeded {
                rng: ChaCha8Rng::seed_from_u64(seed),
                min,
                max,
            }),
        }
    }

    fn next_balance(&mut self) -> u64 {
        match self {
            Self::Fixed(balance) => *balance,
            Self::Seeded { rng, min, max } => rng.gen_range(*min..*max),
        }
    }
}

/// Fully materialised initial ledger state, indexed by `user - 1`.
#[derive(Debug, Clone)]
pub struct Genesis {
    pub accounts: Vec<AccountRecord>,
    pub loans: Vec<LoanRecord>,
    pub atm_reserve: u64,
    pub bank_reserve: u64,
    pub credit_limits: CreditLimits,
}

impl Genesis {
    pub fn user_count(&self) -> usize {
        self.accounts.len()
    }
}
