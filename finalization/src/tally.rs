//! Stake-weighted aggregation of votes for the open epoch.
//!
//! A [VoteTally] is opened at the checkpoint block of an epoch with the [Stakes] snapshot active at
//! that height and is closed when the next epoch starts. Only votes targeting the open epoch are
//! counted; anything else is rejected with a [Rejection] and never affects block validity.

use crate::{config::Ratio, deposit::Stakes, vote::Vote, Address, Amount, Epoch};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Reasons a vote is excluded from the tally.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("finalizer has no active stake")]
    UnknownFinalizer,
    #[error("target {target} already closed (open epoch {open})")]
    Late { target: Epoch, open: Epoch },
    #[error("target {target} not open yet (open epoch {open})")]
    Future { target: Epoch, open: Epoch },
    #[error("source {from} does not precede target {to}")]
    InvalidLink { from: Epoch, to: Epoch },
    #[error("source {0} is not justified")]
    UnjustifiedSource(Epoch),
    #[error("finalizer already voted for target {0}")]
    Duplicate(Epoch),
}

/// Votes counted for a single target epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteTally {
    epoch: Epoch,
    stakes: Stakes,

    /// Source chosen by each finalizer that voted.
    voters: BTreeMap<Address, Epoch>,

    /// Stake backing each `source -> epoch` link.
    links: BTreeMap<Epoch, Amount>,

    /// Stake of all distinct finalizers that voted.
    voted: Amount,
}

impl VoteTally {
    /// Opens a tally for `epoch` weighted by `stakes`.
    pub fn new(epoch: Epoch, stakes: Stakes) -> Self {
        Self {
            epoch,
            stakes,
            voters: BTreeMap::new(),
            links: BTreeMap::new(),
            voted: 0,
        }
    }

    /// Returns the epoch votes are counted for.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Returns the stake snapshot used to weigh votes.
    pub fn stakes(&self) -> &Stakes {
        &self.stakes
    }

    /// Counts `vote` if valid, returning the weight it added.
    ///
    /// `is_justified` reports whether an epoch has been justified so far on this branch.
    pub fn record(
        &mut self,
        vote: &Vote,
        is_justified: impl Fn(Epoch) -> bool,
    ) -> Result<Amount, Rejection> {
        let weight = self.stakes.weight(&vote.finalizer);
        if weight == 0 {
            return Err(Rejection::UnknownFinalizer);
        }
        if vote.target < self.epoch {
            return Err(Rejection::Late {
                target: vote.target,
                open: self.epoch,
            });
        }
        if vote.target > self.epoch {
            return Err(Rejection::Future {
                target: vote.target,
                open: self.epoch,
            });
        }
        if vote.source >= vote.target {
            return Err(Rejection::InvalidLink {
                from: vote.source,
                to: vote.target,
            });
        }
        if !is_justified(vote.source) {
            return Err(Rejection::UnjustifiedSource(vote.source));
        }
        if self.voters.contains_key(&vote.finalizer) {
            return Err(Rejection::Duplicate(vote.target));
        }

        self.voters.insert(vote.finalizer, vote.source);
        *self.links.entry(vote.source).or_default() += weight;
        self.voted += weight;
        debug!(
            finalizer = %vote.finalizer,
            source = %vote.source,
            target = %vote.target,
            weight,
            voted = self.voted,
            total = self.stakes.total(),
            "counted vote"
        );
        Ok(weight)
    }

    /// Returns true if `finalizer` has been counted.
    pub fn has_voted(&self, finalizer: &Address) -> bool {
        self.voters.contains_key(finalizer)
    }

    /// Returns the stake of all distinct finalizers that voted.
    pub fn voted(&self) -> Amount {
        self.voted
    }

    /// Returns the share of active stake that voted for this epoch.
    ///
    /// With no active stake the ratio is `0 / 0`; callers decide what that means.
    pub fn participation(&self) -> Ratio {
        Ratio::new(self.voted, self.stakes.total())
    }

    /// Returns the source of the link backed by at least `threshold` of the active stake.
    ///
    /// Each finalizer backs a single link, so with a threshold above one half at most one source
    /// can qualify. Lower thresholds favour the most recent source.
    pub fn supermajority(&self, threshold: &Ratio) -> Option<Epoch> {
        let total = self.stakes.total();
        if total == 0 {
            return None;
        }
        self.links
            .iter()
            .rev()
            .find(|(_, stake)| threshold.reached_by(**stake, total))
            .map(|(source, _)| *source)
    }
}
