//! Finalization rewards owed to the proposers of a closed epoch.

use crate::{
    config::{Config, Ratio, Schedule},
    types::Epocher,
    Address, Amount, Epoch, Error, Height,
};

/// Reward owed to the proposer of a single block, paid by the next checkpoint block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RewardRecord {
    /// Epoch the rewarded block belongs to.
    pub epoch: Epoch,

    /// Height of the rewarded block.
    pub height: Height,

    /// Address the rewarded block paid its proposer reward to.
    pub proposer: Address,

    /// Reward paid.
    pub amount: Amount,
}

/// Scales `full` by `participation`.
///
/// * No active stake pays the full reward.
/// * Participation at or above `threshold` pays the full reward.
/// * Anything below scales linearly (rounding down) and reaches zero without votes.
pub fn scale(full: Amount, participation: &Ratio, threshold: &Ratio) -> Amount {
    let Ratio {
        numerator: voted,
        denominator: total,
    } = *participation;
    if total == 0 || threshold.reached_by(voted, total) {
        return full;
    }

    // voted / total < threshold, so the result is strictly below `full`
    let scaled = full as u128 * voted as u128 * threshold.denominator as u128
        / (total as u128 * threshold.numerator as u128);
    scaled as Amount
}

/// Computes the rewards paid at checkpoint blocks.
#[derive(Clone, Debug)]
pub struct Calculator {
    epocher: Epocher,
    schedule: Schedule,
    full_reward_threshold: Ratio,
}

impl Calculator {
    /// Creates a new calculator.
    pub fn new(config: &Config) -> Self {
        Self {
            epocher: config.epocher(),
            schedule: config.schedule,
            full_reward_threshold: config.full_reward_threshold,
        }
    }

    /// Returns the reward amount for every block of `epoch` scaled by `participation`, in
    /// ascending height order.
    ///
    /// With full participation ([Ratio::one]) these are the unscaled per-height rewards.
    pub fn amounts(&self, epoch: Epoch, participation: &Ratio) -> Vec<Amount> {
        let first = self.epocher.first(epoch).get();
        (first..first + self.epocher.length())
            .map(|height| {
                let full = self.schedule.finalization_reward(Height::new(height));
                scale(full, participation, &self.full_reward_threshold)
            })
            .collect()
    }

    /// Returns the reward records for a closed `epoch`.
    ///
    /// `proposers[i]` must be the proposer of the `i`-th block of `epoch`. The same address may
    /// appear multiple times and is paid once per block.
    pub fn rewards(
        &self,
        epoch: Epoch,
        proposers: &[Address],
        participation: &Ratio,
    ) -> Result<Vec<RewardRecord>, Error> {
        if proposers.len() as u64 != self.epocher.length() {
            return Err(Error::StateInconsistency(
                "closed epoch does not have one proposer per block",
            ));
        }
        let first = self.epocher.first(epoch).get();
        let records = proposers
            .iter()
            .zip(self.amounts(epoch, participation))
            .enumerate()
            .map(|(offset, (proposer, amount))| RewardRecord {
                epoch,
                height: Height::new(first + offset as u64),
                proposer: *proposer,
                amount,
            })
            .collect();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FULL_FINALIZATION_REWARD;

    fn address(seed: u8) -> Address {
        Address::new([seed; 20])
    }

    #[test]
    fn test_scale_full() {
        let threshold = Ratio::one();
        assert_eq!(scale(15, &Ratio::new(0, 0), &threshold), 15);
        assert_eq!(scale(15, &Ratio::new(9, 9), &threshold), 15);
        assert_eq!(scale(15, &Ratio::new(0, 9), &threshold), 0);
    }

    #[test]
    fn test_scale_partial() {
        let threshold = Ratio::one();
        // 2/3 and 1/3 of the stake voted
        assert_eq!(scale(15, &Ratio::new(6_000, 9_000), &threshold), 10);
        assert_eq!(scale(15, &Ratio::new(3_000, 9_000), &threshold), 5);
        assert_eq!(scale(16, &Ratio::new(1, 3), &threshold), 5);

        // Reaching a lower threshold already pays in full
        let threshold = Ratio::new(2, 3);
        assert_eq!(scale(15, &Ratio::new(6_000, 9_000), &threshold), 15);
        assert_eq!(scale(15, &Ratio::new(3_000, 9_000), &threshold), 7);
    }

    #[test]
    fn test_scale_monotonic() {
        let threshold = Ratio::new(3, 4);
        let mut previous = Amount::MAX;
        for voted in (0..=100).rev() {
            let amount = scale(1_000, &Ratio::new(voted, 100), &threshold);
            assert!(amount <= previous);
            previous = amount;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_rewards_order() {
        let calculator = Calculator::new(&Config::regtest());
        let proposers = [address(1), address(1), address(1), address(2), address(2)];
        let rewards = calculator
            .rewards(Epoch::new(0), &proposers, &Ratio::new(0, 0))
            .unwrap();
        assert_eq!(rewards.len(), 5);
        for (i, record) in rewards.iter().enumerate() {
            assert_eq!(record.epoch, Epoch::new(0));
            assert_eq!(record.height, Height::new(1 + i as u64));
            assert_eq!(record.proposer, proposers[i]);
            assert_eq!(record.amount, FULL_FINALIZATION_REWARD);
        }
    }

    #[test]
    fn test_rewards_with_halvings() {
        let mut config = Config::regtest();
        config.schedule.finalization_reward = 40;
        config.schedule.halving_interval = Some(config.epoch_length - 1);
        let calculator = Calculator::new(&config);

        // Heights 6..=10 cross the halvings at 8
        let amounts = calculator.amounts(Epoch::new(1), &Ratio::new(0, 0));
        assert_eq!(amounts, vec![40 >> 1, 40 >> 1, 40 >> 2, 40 >> 2, 40 >> 2]);

        // Two thirds participation with a full threshold of one
        let amounts = calculator.amounts(Epoch::new(1), &Ratio::new(2, 3));
        assert_eq!(amounts, vec![13, 13, 6, 6, 6]);
    }

    #[test]
    fn test_full_participation_amounts_follow_schedule() {
        let mut config = Config::regtest();
        config.schedule.halving_interval = Some(7);
        let calculator = Calculator::new(&config);
        for epoch in 1..5 {
            let epoch = Epoch::new(epoch);
            let expected: Vec<_> = (0..config.epoch_length)
                .map(|offset| {
                    let height = Height::new(config.epocher().first(epoch).get() + offset);
                    config.schedule.finalization_reward(height)
                })
                .collect();
            assert_eq!(calculator.amounts(epoch, &Ratio::one()), expected);
        }
    }

    #[test]
    fn test_rewards_wrong_length() {
        let calculator = Calculator::new(&Config::regtest());
        assert!(matches!(
            calculator.rewards(Epoch::new(2), &[address(1)], &Ratio::new(0, 0)),
            Err(Error::StateInconsistency(_))
        ));
    }
}
