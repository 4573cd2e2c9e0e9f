//! Finalizer deposits and the stake snapshots derived from them.
//!
//! Deposits are owned by the staking ledger. This crate only reads them: a [DepositSet] is built
//! once per evaluation and [DepositSet::active] turns it into the [Stakes] that weigh votes for a
//! whole epoch.
//!
//! A deposit does not confer voting weight right away. It becomes active at a start [Dynasty]
//! fixed when the deposit is processed, so the finalizer set only ever changes when an epoch is
//! finalized.

use crate::{Address, Amount, Config, Dynasty};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur when building a [DepositSet] or a [Stakes] snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DepositError {
    #[error("deposit of {amount} is below the minimum of {minimum}")]
    Insufficient { amount: Amount, minimum: Amount },
    #[error("finalizer {0} already has a deposit")]
    Duplicate(Address),
    #[error("total stake overflows")]
    Overflow,
}

/// A stake commitment made by a finalizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deposit {
    /// Owner of the deposit (and the identity used when voting).
    pub finalizer: Address,

    /// Locked stake.
    pub amount: Amount,

    /// First dynasty in which the deposit confers voting weight.
    pub start_dynasty: Dynasty,
}

/// All known deposits, keyed by finalizer.
#[derive(Clone, Debug, Default)]
pub struct DepositSet {
    min_deposit: Amount,
    activation_delay: u64,
    deposits: BTreeMap<Address, Deposit>,

    /// Sum of all deposits. Bounds the total of any [Stakes] snapshot.
    total: Amount,
}

impl DepositSet {
    /// Creates an empty set using the deposit rules of `config`.
    pub fn new(config: &Config) -> Self {
        Self {
            min_deposit: config.min_deposit,
            activation_delay: config.activation_delay,
            deposits: BTreeMap::new(),
            total: 0,
        }
    }

    /// Checks whether `deposit` would be accepted without inserting it.
    pub fn validate(&self, deposit: &Deposit) -> Result<(), DepositError> {
        if deposit.amount < self.min_deposit {
            return Err(DepositError::Insufficient {
                amount: deposit.amount,
                minimum: self.min_deposit,
            });
        }
        if self.deposits.contains_key(&deposit.finalizer) {
            return Err(DepositError::Duplicate(deposit.finalizer));
        }
        self.total
            .checked_add(deposit.amount)
            .ok_or(DepositError::Overflow)?;
        Ok(())
    }

    /// Adds an already processed deposit to the set.
    pub fn insert(&mut self, deposit: Deposit) -> Result<(), DepositError> {
        self.validate(&deposit)?;
        self.total += deposit.amount;
        self.deposits.insert(deposit.finalizer, deposit);
        Ok(())
    }

    /// Processes a deposit of `amount` made by `finalizer` during dynasty `current`.
    ///
    /// Returns the dynasty from which the deposit is active.
    pub fn process(
        &mut self,
        finalizer: Address,
        amount: Amount,
        current: Dynasty,
    ) -> Result<Dynasty, DepositError> {
        let start_dynasty = current
            .checked_add(self.activation_delay)
            .ok_or(DepositError::Overflow)?;
        self.insert(Deposit {
            finalizer,
            amount,
            start_dynasty,
        })?;
        Ok(start_dynasty)
    }

    /// Returns the deposit of `finalizer`, if any.
    pub fn get(&self, finalizer: &Address) -> Option<&Deposit> {
        self.deposits.get(finalizer)
    }

    /// Returns the number of deposits.
    pub fn len(&self) -> usize {
        self.deposits.len()
    }

    /// Returns true if there are no deposits.
    pub fn is_empty(&self) -> bool {
        self.deposits.is_empty()
    }

    /// Returns the stake of every deposit active during `dynasty`.
    pub fn active(&self, dynasty: Dynasty) -> Result<Stakes, DepositError> {
        let weights = self
            .deposits
            .values()
            .filter(|deposit| deposit.start_dynasty <= dynasty)
            .map(|deposit| (deposit.finalizer, deposit.amount))
            .collect();
        Stakes::new(weights)
    }
}

/// Voting weight of every active finalizer, frozen for the duration of an epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stakes {
    weights: BTreeMap<Address, Amount>,
    total: Amount,
}

impl Stakes {
    /// Creates a snapshot from finalizer weights.
    pub fn new(weights: BTreeMap<Address, Amount>) -> Result<Self, DepositError> {
        let total = weights
            .values()
            .try_fold(0 as Amount, |acc, weight| acc.checked_add(*weight))
            .ok_or(DepositError::Overflow)?;
        Ok(Self { weights, total })
    }

    /// Returns the weight of `finalizer` (zero if not active).
    pub fn weight(&self, finalizer: &Address) -> Amount {
        self.weights.get(finalizer).copied().unwrap_or(0)
    }

    /// Returns the summed weight of all active finalizers.
    pub fn total(&self) -> Amount {
        self.total
    }

    /// Returns the number of active finalizers.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Returns true if no finalizer is active.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ACTIVATION_DELAY, MIN_DEPOSIT};

    fn finalizer(seed: u8) -> Address {
        Address::new([seed; 20])
    }

    fn deposits() -> DepositSet {
        DepositSet::new(&Config::regtest())
    }

    #[test]
    fn test_insufficient_deposit() {
        let set = deposits();
        let deposit = Deposit {
            finalizer: finalizer(1),
            amount: MIN_DEPOSIT - 1,
            start_dynasty: Dynasty::zero(),
        };
        assert_eq!(
            set.validate(&deposit),
            Err(DepositError::Insufficient {
                amount: MIN_DEPOSIT - 1,
                minimum: MIN_DEPOSIT
            })
        );
    }

    #[test]
    fn test_duplicate_deposit() {
        let mut set = deposits();
        let deposit = Deposit {
            finalizer: finalizer(1),
            amount: MIN_DEPOSIT,
            start_dynasty: Dynasty::zero(),
        };
        assert_eq!(set.validate(&deposit), Ok(()));
        set.insert(deposit).unwrap();
        assert_eq!(
            set.insert(deposit),
            Err(DepositError::Duplicate(finalizer(1)))
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_process_deposit() {
        let mut set = deposits();
        let start = set
            .process(finalizer(1), MIN_DEPOSIT, Dynasty::zero())
            .unwrap();
        assert_eq!(start, Dynasty::new(ACTIVATION_DELAY));
        assert_eq!(start, Dynasty::new(3));
        set.process(finalizer(2), MIN_DEPOSIT, Dynasty::new(2))
            .unwrap();

        let deposit = set.get(&finalizer(1)).unwrap();
        assert_eq!(deposit.start_dynasty, Dynasty::new(3));
        assert_eq!(deposit.amount, MIN_DEPOSIT);
        assert_eq!(
            set.get(&finalizer(2)).map(|d| d.start_dynasty),
            Some(Dynasty::new(5))
        );
    }

    #[test]
    fn test_active_stakes() {
        let mut set = deposits();
        set.process(finalizer(1), 3_000, Dynasty::zero()).unwrap();
        set.process(finalizer(2), 6_000, Dynasty::new(1)).unwrap();

        let stakes = set.active(Dynasty::new(2)).unwrap();
        assert!(stakes.is_empty());
        assert_eq!(stakes.total(), 0);

        let stakes = set.active(Dynasty::new(3)).unwrap();
        assert_eq!(stakes.len(), 1);
        assert_eq!(stakes.weight(&finalizer(1)), 3_000);
        assert_eq!(stakes.weight(&finalizer(2)), 0);
        assert_eq!(stakes.total(), 3_000);

        let stakes = set.active(Dynasty::new(4)).unwrap();
        assert_eq!(stakes.total(), 9_000);
    }

    #[test]
    fn test_total_stake_overflow() {
        let mut set = deposits();
        let half = u64::MAX / 2 + 1;
        set.process(finalizer(1), half, Dynasty::zero()).unwrap();
        assert_eq!(
            set.process(finalizer(2), half, Dynasty::zero()),
            Err(DepositError::Overflow)
        );
        assert_eq!(set.len(), 1);
        assert_eq!(set.active(Dynasty::new(3)).unwrap().total(), half);

        // Snapshots built directly are checked too
        let weights = BTreeMap::from([(finalizer(1), half), (finalizer(2), half)]);
        assert_eq!(Stakes::new(weights), Err(DepositError::Overflow));
    }

    #[test]
    fn test_start_dynasty_overflow() {
        let mut set = deposits();
        assert_eq!(
            set.process(finalizer(1), MIN_DEPOSIT, Dynasty::new(u64::MAX)),
            Err(DepositError::Overflow)
        );
        assert!(set.is_empty());
    }
}
