//! Per-block processing of a single branch.
//!
//! A [ChainState] captures everything needed to process the next block of a branch. It is a plain
//! value: [Processor::apply] never mutates its input and returns the successor state instead, so
//! forks can be evaluated from the same ancestor without sharing anything.
//!
//! Processing block `h` always happens in the same order:
//!
//! 1. If `h` starts a new epoch, close the open epoch (tracker transition + reward records) and
//!    open a tally for the new one with the stake active in the resulting dynasty.
//! 2. Build the expected coinbase and compare it with the one carried by the block.
//! 3. Record the block's proposer.
//! 4. Tally the votes included in the block.

use crate::{
    coinbase::{Builder, Coinbase, Template},
    deposit::{DepositSet, Stakes},
    reward::{Calculator, RewardRecord},
    tally::VoteTally,
    tracker::{FinalizationState, Tracker},
    types::Epocher,
    vote::Vote,
    Address, Amount, Config, Error, Height,
};
use tracing::debug;

/// A block as seen by the finalization engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub height: Height,

    /// Address paid the proposer reward.
    pub proposer: Address,

    /// Stake used to propose, returned in the coinbase.
    pub stake: Amount,

    /// Fees collected from the block's transactions.
    pub fees: Amount,

    /// Finalizer votes included in the block.
    pub votes: Vec<Vote>,

    /// Coinbase carried by the block.
    pub coinbase: Coinbase,
}

impl Block {
    /// Returns the coinbase template of this block.
    pub fn template(&self) -> Template {
        Template {
            height: self.height,
            proposer: self.proposer,
            stake: self.stake,
            fees: self.fees,
        }
    }
}

/// Finalization state of a branch after processing its tip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainState {
    tip: Height,
    tracker: Tracker,
    tally: VoteTally,

    /// Proposers of the blocks of the open epoch, in height order.
    proposers: Vec<Address>,
}

impl Default for ChainState {
    fn default() -> Self {
        Self::genesis()
    }
}

impl ChainState {
    /// Returns the state after genesis.
    pub fn genesis() -> Self {
        let tracker = Tracker::new();
        let tally = VoteTally::new(tracker.state().current_epoch, Default::default());
        Self {
            tip: Height::zero(),
            tracker,
            tally,
            proposers: Vec::new(),
        }
    }

    /// Returns the height of the last processed block.
    pub fn tip(&self) -> Height {
        self.tip
    }

    /// Returns the finalization snapshot at the tip.
    pub fn finalization(&self) -> FinalizationState {
        self.tracker.state()
    }

    /// Returns the tracker of this branch.
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Returns the tally of the open epoch.
    pub fn tally(&self) -> &VoteTally {
        &self.tally
    }

    /// Returns the proposers of the open epoch so far.
    pub fn proposers(&self) -> &[Address] {
        &self.proposers
    }
}

/// Derives coinbases and finalization state block by block.
#[derive(Clone, Debug)]
pub struct Processor {
    config: Config,
    epocher: Epocher,
    calculator: Calculator,
    builder: Builder,
}

impl Processor {
    /// Creates a new processor.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            epocher: config.epocher(),
            calculator: Calculator::new(&config),
            builder: Builder::new(config.schedule),
            config,
        })
    }

    /// Returns the configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the epocher in use.
    pub fn epocher(&self) -> &Epocher {
        &self.epocher
    }

    /// Moves `state` to `height`, closing the open epoch if `height` starts a new one.
    ///
    /// Returns the successor state (without the block at `height` recorded) and the rewards the
    /// block at `height` must pay.
    fn advance(
        &self,
        state: &ChainState,
        height: Height,
        deposits: &DepositSet,
    ) -> Result<(ChainState, Vec<RewardRecord>), Error> {
        if state.tip.next() != height {
            return Err(Error::StateInconsistency(
                "blocks must be processed in height order",
            ));
        }
        let mut next = state.clone();
        next.tip = height;
        if !self.epocher.is_checkpoint(height) {
            return Ok((next, Vec::new()));
        }

        let epoch = self.epocher.containing(height);
        let mut rewards = Vec::new();
        if !epoch.is_zero() {
            let transition = next
                .tracker
                .close_epoch(&state.tally, &self.config.justification_threshold)?;
            let participation = state.tally.participation();
            rewards = self
                .calculator
                .rewards(transition.closed, &state.proposers, &participation)?;
            debug!(
                closed = %transition.closed,
                voted = participation.numerator,
                total = participation.denominator,
                rewards = rewards.len(),
                "closed epoch"
            );
        }
        if next.tracker.state().current_epoch != epoch {
            return Err(Error::StateInconsistency(
                "tracker epoch does not match height",
            ));
        }

        // Voting weight is frozen for the whole epoch. Epoch zero is justified at genesis and
        // nobody votes on it.
        let stakes = if epoch.is_zero() {
            Stakes::default()
        } else {
            deposits.active(next.tracker.state().current_dynasty)?
        };
        next.tally = VoteTally::new(epoch, stakes);
        next.proposers.clear();
        Ok((next, rewards))
    }

    /// Returns the rewards a block at `height` (the successor of `state`'s tip) must pay.
    pub fn rewards_at(
        &self,
        state: &ChainState,
        height: Height,
        deposits: &DepositSet,
    ) -> Result<Vec<RewardRecord>, Error> {
        self.advance(state, height, deposits)
            .map(|(_, rewards)| rewards)
    }

    /// Builds the coinbase a new block described by `template` must carry.
    pub fn assemble(
        &self,
        state: &ChainState,
        template: &Template,
        deposits: &DepositSet,
    ) -> Result<Coinbase, Error> {
        let rewards = self.rewards_at(state, template.height, deposits)?;
        self.builder.build(template, &rewards)
    }

    /// Processes `block` on top of `state`.
    ///
    /// Returns the successor state and the rewards paid by the block. A block whose coinbase does
    /// not match the derived one is rejected with [Error::ConsensusFault].
    pub fn apply(
        &self,
        state: &ChainState,
        block: &Block,
        deposits: &DepositSet,
    ) -> Result<(ChainState, Vec<RewardRecord>), Error> {
        let (mut next, rewards) = self.advance(state, block.height, deposits)?;
        let expected = self.builder.build(&block.template(), &rewards)?;
        Builder::verify(&expected, &block.coinbase)?;
        next.proposers.push(block.proposer);

        for vote in &block.votes {
            let tracker = &next.tracker;
            if let Err(reason) = next.tally.record(vote, |e| tracker.is_justified(e)) {
                debug!(
                    height = %block.height,
                    finalizer = %vote.finalizer,
                    source = %vote.source,
                    target = %vote.target,
                    %reason,
                    "rejected vote"
                );
            }
        }
        Ok((next, rewards))
    }
}
