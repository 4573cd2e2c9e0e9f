//! Consensus parameters for finalization rewards.
//!
//! Every value in [Config] is part of the consensus contract: nodes using different values
//! derive different coinbases and will reject each other's blocks.

use crate::{
    types::{Epocher, Height},
    Amount, Error,
};
use std::cmp::Ordering;

/// Number of blocks per epoch on the regression test network.
pub const EPOCH_LENGTH: u64 = 5;

/// Finalization reward paid per block (before halvings) on the regression test network.
pub const FULL_FINALIZATION_REWARD: Amount = 15;

/// Proposer reward paid per block (before halvings) on the regression test network.
pub const BLOCK_REWARD: Amount = 10;

/// Smallest deposit accepted from a finalizer on the regression test network.
pub const MIN_DEPOSIT: Amount = 1_500;

/// Dynasties between processing a deposit and the deposit conferring voting weight on the
/// regression test network.
pub const ACTIVATION_DELAY: u64 = 3;

/// Number of standard outputs every coinbase starts with.
///
/// The first pays the proposer its block reward (plus fees) and the second returns the stake
/// used to propose. Finalization rewards, if any, follow.
pub const STANDARD_OUTPUTS: usize = 2;

/// Halvings after which a reward is always zero.
const MAX_HALVINGS: u64 = 64;

/// An exact, non-negative fraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ratio {
    pub numerator: u64,
    pub denominator: u64,
}

impl Ratio {
    /// Creates a new ratio.
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Returns the ratio one.
    pub const fn one() -> Self {
        Self::new(1, 1)
    }

    /// Returns true if the ratio is well formed (non-zero denominator).
    pub const fn is_valid(&self) -> bool {
        self.denominator != 0
    }

    /// Compares `self` with `other` without losing precision.
    ///
    /// Both ratios must have a non-zero denominator.
    pub fn compare(&self, other: &Ratio) -> Ordering {
        let lhs = self.numerator as u128 * other.denominator as u128;
        let rhs = other.numerator as u128 * self.denominator as u128;
        lhs.cmp(&rhs)
    }

    /// Returns true if `part / whole` is at least this ratio.
    pub fn reached_by(&self, part: u64, whole: u64) -> bool {
        part as u128 * self.denominator as u128 >= whole as u128 * self.numerator as u128
    }
}

/// Reward schedule applied to both the proposer and the finalization reward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// Proposer reward per block before any halving.
    pub block_reward: Amount,

    /// Finalization reward per block before any halving (paid at full participation).
    pub finalization_reward: Amount,

    /// Number of heights after which both rewards halve.
    ///
    /// If `None`, rewards never decay.
    pub halving_interval: Option<u64>,
}

impl Schedule {
    fn decay(&self, reward: Amount, height: Height) -> Amount {
        let Some(interval) = self.halving_interval else {
            return reward;
        };
        let halvings = height.get() / interval;
        if halvings >= MAX_HALVINGS {
            return 0;
        }
        reward >> halvings
    }

    /// Returns the proposer reward for a block at `height`.
    pub fn block_reward(&self, height: Height) -> Amount {
        self.decay(self.block_reward, height)
    }

    /// Returns the full finalization reward for a block at `height`.
    pub fn finalization_reward(&self, height: Height) -> Amount {
        self.decay(self.finalization_reward, height)
    }
}

/// Configuration for deriving finalization state and coinbases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Number of blocks per epoch.
    pub epoch_length: u64,

    /// Share of active stake that must vote for an epoch before it is justified.
    ///
    /// The threshold is inclusive (`voted / total >= threshold`).
    pub justification_threshold: Ratio,

    /// Share of active stake that must vote in an epoch for its blocks to receive the full
    /// finalization reward.
    ///
    /// Below this threshold the reward scales down linearly with participation and reaches
    /// zero when no active finalizer voted.
    pub full_reward_threshold: Ratio,

    /// Rewards paid to proposers.
    pub schedule: Schedule,

    /// Smallest deposit accepted from a finalizer.
    pub min_deposit: Amount,

    /// Dynasties a deposit waits before its finalizer may vote.
    ///
    /// A deposit processed during dynasty `d` is active from dynasty `d + activation_delay`.
    pub activation_delay: u64,
}

impl Config {
    /// Returns the parameters of the regression test network.
    pub fn regtest() -> Self {
        Self {
            epoch_length: EPOCH_LENGTH,
            justification_threshold: Ratio::new(2, 3),
            full_reward_threshold: Ratio::one(),
            schedule: Schedule {
                block_reward: BLOCK_REWARD,
                finalization_reward: FULL_FINALIZATION_REWARD,
                halving_interval: None,
            },
            min_deposit: MIN_DEPOSIT,
            activation_delay: ACTIVATION_DELAY,
        }
    }

    /// Ensures the configuration can be used to process a chain.
    pub fn validate(&self) -> Result<(), Error> {
        if self.epoch_length == 0 {
            return Err(Error::InvalidConfig("epoch length must be positive"));
        }
        if !self.justification_threshold.is_valid() || self.justification_threshold.numerator == 0
        {
            return Err(Error::InvalidConfig("justification threshold must be positive"));
        }
        if self.justification_threshold.compare(&Ratio::one()) == Ordering::Greater {
            return Err(Error::InvalidConfig(
                "justification threshold must not exceed one",
            ));
        }
        if !self.full_reward_threshold.is_valid() || self.full_reward_threshold.numerator == 0 {
            return Err(Error::InvalidConfig("full reward threshold must be positive"));
        }
        if self.full_reward_threshold.compare(&Ratio::one()) == Ordering::Greater {
            return Err(Error::InvalidConfig("full reward threshold must not exceed one"));
        }
        if self.schedule.halving_interval == Some(0) {
            return Err(Error::InvalidConfig("halving interval must be positive"));
        }
        Ok(())
    }

    /// Returns the [Epocher] for these parameters.
    pub fn epocher(&self) -> Epocher {
        Epocher::new(self.epoch_length)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::regtest()
    }
}
