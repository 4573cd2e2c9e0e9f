//! Canonical chain bookkeeping, queries and reorgs.
//!
//! [Chain] records, for every accepted height, the block, the [FinalizationState] reached and the
//! rewards paid. Full [ChainState]s are only kept at checkpoint heights; the state at any other
//! height is rebuilt by replaying the blocks of its epoch, none of which open a new tally.
//!
//! Reorgs restart from the last common ancestor. Entries above the ancestor are discarded and never
//! reused.

use crate::{
    coinbase::Coinbase,
    deposit::DepositSet,
    processor::{Block, ChainState, Processor},
    reward::RewardRecord,
    tracker::FinalizationState,
    Error, Height,
};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Result of processing a single height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// The processed block.
    pub block: Block,

    /// Finalization snapshot after processing the block.
    pub finalization: FinalizationState,

    /// Rewards paid by the block.
    pub rewards: Vec<RewardRecord>,
}

/// Blocks processed on top of a common base state.
#[derive(Clone, Debug)]
pub struct Branch {
    /// State after the last block (the base if there were no blocks).
    pub tip: ChainState,

    /// One entry per block, in height order.
    pub entries: Vec<Entry>,

    /// States after each checkpoint block of the branch.
    pub snapshots: BTreeMap<Height, ChainState>,
}

/// The canonical chain as seen by the finalization engine.
#[derive(Clone, Debug)]
pub struct Chain {
    processor: Processor,
    tip: ChainState,

    /// `entries[i]` holds the result of processing height `i + 1`.
    entries: Vec<Entry>,

    /// States after genesis and after every checkpoint block.
    snapshots: BTreeMap<Height, ChainState>,
}

impl Chain {
    /// Creates a chain containing only genesis.
    pub fn new(processor: Processor) -> Self {
        let genesis = ChainState::genesis();
        Self {
            processor,
            snapshots: BTreeMap::from([(Height::zero(), genesis.clone())]),
            tip: genesis,
            entries: Vec::new(),
        }
    }

    /// Returns the processor in use.
    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    /// Returns the height of the tip.
    pub fn tip(&self) -> Height {
        Height::new(self.entries.len() as u64)
    }

    /// Returns the state at the tip.
    pub fn state(&self) -> &ChainState {
        &self.tip
    }

    fn entry(&self, height: Height) -> Option<&Entry> {
        let index = height.get().checked_sub(1)?;
        self.entries.get(usize::try_from(index).ok()?)
    }

    /// Rebuilds the state after processing `height`.
    ///
    /// Blocks are replayed from the closest checkpoint at or below `height`.
    pub fn state_at(&self, height: Height, deposits: &DepositSet) -> Result<ChainState, Error> {
        if height > self.tip() {
            return Err(Error::StateInconsistency("height is not on the chain"));
        }
        if height == self.tip() {
            return Ok(self.tip.clone());
        }
        let (base, snapshot) = self
            .snapshots
            .range(..=height)
            .next_back()
            .ok_or(Error::StateInconsistency("missing genesis snapshot"))?;
        let start = usize::try_from(base.get())
            .map_err(|_| Error::StateInconsistency("height out of range"))?;
        let end = usize::try_from(height.get())
            .map_err(|_| Error::StateInconsistency("height out of range"))?;

        let mut state = snapshot.clone();
        for entry in &self.entries[start..end] {
            state = self.processor.apply(&state, &entry.block, deposits)?.0;
        }
        Ok(state)
    }

    /// Returns the finalization snapshot at `height`.
    pub fn finalization_state(&self, height: Height) -> Option<FinalizationState> {
        if height.is_genesis() {
            return self
                .snapshots
                .get(&height)
                .map(ChainState::finalization);
        }
        self.entry(height).map(|entry| entry.finalization)
    }

    /// Returns the coinbase of the block at `height`.
    pub fn coinbase(&self, height: Height) -> Option<&Coinbase> {
        self.entry(height).map(|entry| &entry.block.coinbase)
    }

    /// Returns the rewards paid by the block at `height`.
    pub fn reward_records(&self, height: Height) -> Option<&[RewardRecord]> {
        self.entry(height).map(|entry| entry.rewards.as_slice())
    }

    /// Returns true if the rewards paid at `height` refer to an epoch that is final at the tip.
    ///
    /// Heights that pay no rewards are trivially mature.
    pub fn is_reward_mature(&self, height: Height) -> Option<bool> {
        let rewards = self.reward_records(height)?;
        let tracker = self.tip.tracker();
        Some(
            rewards
                .iter()
                .all(|record| tracker.is_finalized(record.epoch)),
        )
    }

    /// Appends `block` to the tip.
    pub fn append(&mut self, block: Block, deposits: &DepositSet) -> Result<&Entry, Error> {
        let (state, rewards) = self.processor.apply(&self.tip, &block, deposits)?;
        debug!(height = %block.height, rewards = rewards.len(), "appended block");
        if self.processor.epocher().is_checkpoint(block.height) {
            self.snapshots.insert(block.height, state.clone());
        }
        let index = self.entries.len();
        self.entries.push(Entry {
            finalization: state.finalization(),
            block,
            rewards,
        });
        self.tip = state;
        Ok(&self.entries[index])
    }

    /// Replaces everything above `ancestor` with `blocks`.
    ///
    /// The new branch is fully recomputed from the state at `ancestor`. If any block is invalid
    /// the chain is left untouched.
    pub fn reorg(
        &mut self,
        ancestor: Height,
        blocks: &[Block],
        deposits: &DepositSet,
    ) -> Result<(), Error> {
        let base = self.state_at(ancestor, deposits)?;
        let branch = process_branch(&self.processor, &base, blocks, deposits)?;

        let keep = usize::try_from(ancestor.get())
            .map_err(|_| Error::StateInconsistency("reorg ancestor out of range"))?;
        let discarded = self.entries.len() - keep;
        self.entries.truncate(keep);
        self.snapshots.retain(|height, _| *height <= ancestor);
        self.entries.extend(branch.entries);
        self.snapshots.extend(branch.snapshots);
        self.tip = branch.tip;
        info!(
            %ancestor,
            discarded,
            tip = %self.tip(),
            "reorganized chain"
        );
        Ok(())
    }
}

/// Processes `blocks` on top of `base`.
pub fn process_branch(
    processor: &Processor,
    base: &ChainState,
    blocks: &[Block],
    deposits: &DepositSet,
) -> Result<Branch, Error> {
    let mut tip = base.clone();
    let mut entries = Vec::with_capacity(blocks.len());
    let mut snapshots = BTreeMap::new();
    for block in blocks {
        let (state, rewards) = processor.apply(&tip, block, deposits)?;
        if processor.epocher().is_checkpoint(block.height) {
            snapshots.insert(block.height, state.clone());
        }
        entries.push(Entry {
            block: block.clone(),
            finalization: state.finalization(),
            rewards,
        });
        tip = state;
    }
    Ok(Branch {
        tip,
        entries,
        snapshots,
    })
}

/// Evaluates independent candidate branches built on `base` in parallel.
///
/// Each branch starts from its own copy of `base`; results are returned in input order.
pub fn evaluate_forks(
    processor: &Processor,
    base: &ChainState,
    forks: &[Vec<Block>],
    deposits: &DepositSet,
) -> Vec<Result<ChainState, Error>> {
    forks
        .par_iter()
        .map(|blocks| process_branch(processor, base, blocks, deposits).map(|branch| branch.tip))
        .collect()
}
