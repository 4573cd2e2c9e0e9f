//! Epoch, dynasty, justification and finalization tracking.
//!
//! # Transition Rule
//!
//! The [Tracker] moves only at epoch boundaries. When the first block of epoch `E + 1` is
//! processed, the tally of `E` is closed and:
//!
//! * If no stake was active during `E`, `E` is justified through an implicit link from the last
//!   justified epoch (proposers alone advance finality until finalizers are active).
//! * Otherwise `E` is justified if a single `source -> E` link is backed by the justification
//!   threshold of the active stake.
//! * If `E` was justified through `E - 1 -> E`, `E - 1` is finalized and the dynasty advances.
//! * The current epoch becomes `E + 1`.
//!
//! Nothing ever moves backward. Finalizing an epoch that is not justified is a
//! [Error::StateInconsistency] and halts the branch.
//!
//! Only justified epochs at or above the last finalized epoch are remembered. Older epochs can no
//! longer serve as the source of a link, so the tracker stays the same size however long the
//! chain grows.

use crate::{config::Ratio, tally::VoteTally, Dynasty, Epoch, Error};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Snapshot of the finalization progress at some height.
///
/// Serializes to the shape returned by a `getfinalizationstate` query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizationState {
    pub current_dynasty: Dynasty,
    pub current_epoch: Epoch,
    pub last_justified_epoch: Epoch,
    pub last_finalized_epoch: Epoch,
}

/// Result of closing an epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// The epoch that was closed.
    pub closed: Epoch,

    /// Source of the link that justified the closed epoch, if any.
    pub justified_by: Option<Epoch>,

    /// Epoch finalized by this transition, if any.
    pub finalized: Option<Epoch>,
}

/// Deterministic finalization state of a single branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tracker {
    state: FinalizationState,

    /// Justified epochs not below the last finalized epoch.
    justified: BTreeSet<Epoch>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    /// Returns the genesis tracker: everything at zero, epoch zero justified and finalized.
    pub fn new() -> Self {
        Self {
            state: FinalizationState::default(),
            justified: BTreeSet::from([Epoch::zero()]),
        }
    }

    /// Returns the current snapshot.
    pub fn state(&self) -> FinalizationState {
        self.state
    }

    /// Returns the remembered justified epochs in ascending order.
    pub fn justified(&self) -> impl Iterator<Item = Epoch> + '_ {
        self.justified.iter().copied()
    }

    /// Returns true if `epoch` is justified and may still be used as a link source.
    ///
    /// Epochs below the last finalized epoch are forgotten and report false.
    pub fn is_justified(&self, epoch: Epoch) -> bool {
        self.justified.contains(&epoch)
    }

    /// Returns true if `epoch` is final (finality is prefix-closed).
    pub fn is_finalized(&self, epoch: Epoch) -> bool {
        epoch <= self.state.last_finalized_epoch
    }

    /// Closes the open epoch using its tally and opens the next one.
    pub fn close_epoch(
        &mut self,
        tally: &VoteTally,
        threshold: &Ratio,
    ) -> Result<Transition, Error> {
        let closed = self.state.current_epoch;
        if tally.epoch() != closed {
            return Err(Error::StateInconsistency(
                "tally does not belong to the open epoch",
            ));
        }
        let before = self.state;

        // Epoch zero is justified at genesis, nothing can vote on it
        let link = if closed.is_zero() {
            None
        } else if tally.stakes().total() == 0 {
            Some(self.state.last_justified_epoch)
        } else {
            tally.supermajority(threshold)
        };

        let mut finalized = None;
        if let Some(source) = link {
            self.justify(closed, source)?;
            if source.next() == closed && self.finalize(source)? {
                finalized = Some(source);
            }
        } else if !closed.is_zero() {
            debug!(
                epoch = %closed,
                voted = tally.voted(),
                total = tally.stakes().total(),
                "epoch not justified"
            );
        }
        self.state.current_epoch = closed.next();

        if self.state.last_justified_epoch < before.last_justified_epoch
            || self.state.last_finalized_epoch < before.last_finalized_epoch
            || self.state.current_dynasty < before.current_dynasty
        {
            warn!(?before, after = ?self.state, "finalization state regressed");
            return Err(Error::StateInconsistency("finalization state regressed"));
        }
        Ok(Transition {
            closed,
            justified_by: link,
            finalized,
        })
    }

    fn justify(&mut self, epoch: Epoch, source: Epoch) -> Result<(), Error> {
        if !self.is_justified(source) {
            warn!(%epoch, %source, "justification link from unjustified source");
            return Err(Error::StateInconsistency(
                "justification link from unjustified source",
            ));
        }
        self.justified.insert(epoch);
        if epoch > self.state.last_justified_epoch {
            self.state.last_justified_epoch = epoch;
        }
        info!(%epoch, %source, "justified epoch");
        Ok(())
    }

    /// Finalizes `epoch`, advancing the dynasty.
    ///
    /// Returns false if `epoch` was already final.
    pub fn finalize(&mut self, epoch: Epoch) -> Result<bool, Error> {
        if self.is_finalized(epoch) {
            return Ok(false);
        }
        if !self.is_justified(epoch) {
            warn!(%epoch, "attempted to finalize unjustified epoch");
            return Err(Error::StateInconsistency(
                "cannot finalize an unjustified epoch",
            ));
        }
        let dynasty = self
            .state
            .current_dynasty
            .checked_next()
            .ok_or(Error::StateInconsistency("dynasty overflow"))?;
        self.justified = self.justified.split_off(&epoch);
        self.state.last_finalized_epoch = epoch;
        self.state.current_dynasty = dynasty;
        info!(%epoch, %dynasty, "finalized epoch");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{deposit::Stakes, vote::Vote, Address};
    use std::collections::BTreeMap;

    const THRESHOLD: Ratio = Ratio::new(2, 3);

    fn finalizer(seed: u8) -> Address {
        Address::new([seed; 20])
    }

    fn stakes() -> Stakes {
        Stakes::new(BTreeMap::from([
            (finalizer(1), 3_000),
            (finalizer(2), 6_000),
        ]))
        .unwrap()
    }

    fn state(dynasty: u64, epoch: u64, justified: u64, finalized: u64) -> FinalizationState {
        FinalizationState {
            current_dynasty: Dynasty::new(dynasty),
            current_epoch: Epoch::new(epoch),
            last_justified_epoch: Epoch::new(justified),
            last_finalized_epoch: Epoch::new(finalized),
        }
    }

    fn close_without_stake(tracker: &mut Tracker) -> Transition {
        let tally = VoteTally::new(tracker.state().current_epoch, Stakes::default());
        tracker.close_epoch(&tally, &THRESHOLD).unwrap()
    }

    fn close_with_votes(tracker: &mut Tracker, votes: &[Vote]) -> Transition {
        let mut tally = VoteTally::new(tracker.state().current_epoch, stakes());
        for vote in votes {
            let _ = tally.record(vote, |e| tracker.is_justified(e));
        }
        tracker.close_epoch(&tally, &THRESHOLD).unwrap()
    }

    #[test]
    fn test_genesis() {
        let tracker = Tracker::new();
        assert_eq!(tracker.state(), state(0, 0, 0, 0));
        assert!(tracker.is_justified(Epoch::zero()));
        assert!(tracker.is_finalized(Epoch::zero()));
        assert!(!tracker.is_justified(Epoch::new(1)));
    }

    #[test]
    fn test_progress_without_finalizers() {
        let mut tracker = Tracker::new();

        let transition = close_without_stake(&mut tracker);
        assert_eq!(transition.justified_by, None);
        assert_eq!(tracker.state(), state(0, 1, 0, 0));

        // Epoch 1 is justified from 0, which is already final
        let transition = close_without_stake(&mut tracker);
        assert_eq!(transition.justified_by, Some(Epoch::zero()));
        assert_eq!(transition.finalized, None);
        assert_eq!(tracker.state(), state(0, 2, 1, 0));

        let transition = close_without_stake(&mut tracker);
        assert_eq!(transition.finalized, Some(Epoch::new(1)));
        assert_eq!(tracker.state(), state(1, 3, 2, 1));

        close_without_stake(&mut tracker);
        assert_eq!(tracker.state(), state(2, 4, 3, 2));
        assert!(tracker.is_finalized(Epoch::new(2)));
        assert!(tracker.is_justified(Epoch::new(3)));
        assert!(!tracker.is_finalized(Epoch::new(3)));
    }

    #[test]
    fn test_forgets_epochs_below_finalized() {
        let mut tracker = Tracker::new();
        for _ in 0..1_000 {
            close_without_stake(&mut tracker);
        }
        assert_eq!(tracker.state(), state(998, 1_000, 999, 998));
        assert_eq!(
            tracker.justified().collect::<Vec<_>>(),
            vec![Epoch::new(998), Epoch::new(999)]
        );
        assert!(tracker.is_finalized(Epoch::new(1)));
        assert!(!tracker.is_justified(Epoch::new(1)));

        // Links from forgotten epochs are rejected
        let mut tally = VoteTally::new(tracker.state().current_epoch, stakes());
        let vote = Vote::new(finalizer(2), Epoch::new(1), Epoch::new(1_000));
        assert!(tally.record(&vote, |e| tracker.is_justified(e)).is_err());
        assert_eq!(tally.voted(), 0);
    }

    #[test]
    fn test_justify_and_finalize_with_votes() {
        let mut tracker = Tracker::new();
        for _ in 0..4 {
            close_without_stake(&mut tracker);
        }
        assert_eq!(tracker.state(), state(2, 4, 3, 2));

        // Two thirds of the stake links 3 -> 4: justifies 4 and finalizes 3
        let transition =
            close_with_votes(&mut tracker, &[Vote::new(finalizer(2), Epoch::new(3), Epoch::new(4))]);
        assert_eq!(transition.justified_by, Some(Epoch::new(3)));
        assert_eq!(transition.finalized, Some(Epoch::new(3)));
        assert_eq!(tracker.state(), state(3, 5, 4, 3));

        // One third is not enough
        let transition =
            close_with_votes(&mut tracker, &[Vote::new(finalizer(1), Epoch::new(4), Epoch::new(5))]);
        assert_eq!(transition.justified_by, None);
        assert_eq!(tracker.state(), state(3, 6, 4, 3));
        assert!(!tracker.is_justified(Epoch::new(5)));

        // A link skipping the unjustified epoch justifies without finalizing
        let transition = close_with_votes(
            &mut tracker,
            &[
                Vote::new(finalizer(1), Epoch::new(4), Epoch::new(6)),
                Vote::new(finalizer(2), Epoch::new(4), Epoch::new(6)),
            ],
        );
        assert_eq!(transition.justified_by, Some(Epoch::new(4)));
        assert_eq!(transition.finalized, None);
        assert_eq!(tracker.state(), state(3, 7, 6, 3));
    }

    #[test]
    fn test_rejected_votes_do_not_justify() {
        let mut tracker = Tracker::new();
        for _ in 0..3 {
            close_without_stake(&mut tracker);
        }
        let transition = close_with_votes(
            &mut tracker,
            &[
                Vote::new(finalizer(2), Epoch::new(5), Epoch::new(3)),
                Vote::new(finalizer(1), Epoch::new(2), Epoch::new(4)),
            ],
        );
        assert_eq!(transition.justified_by, None);
        assert_eq!(tracker.state().last_justified_epoch, Epoch::new(2));
    }

    #[test]
    fn test_finalize_unjustified() {
        let mut tracker = Tracker::new();
        assert_eq!(
            tracker.finalize(Epoch::new(1)),
            Err(Error::StateInconsistency(
                "cannot finalize an unjustified epoch"
            ))
        );
        assert_eq!(tracker.finalize(Epoch::zero()), Ok(false));
        assert_eq!(tracker.state(), state(0, 0, 0, 0));
    }

    #[test]
    fn test_mismatched_tally() {
        let mut tracker = Tracker::new();
        let tally = VoteTally::new(Epoch::new(3), Stakes::default());
        assert!(matches!(
            tracker.close_epoch(&tally, &THRESHOLD),
            Err(Error::StateInconsistency(_))
        ));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(state(1, 4, 3, 2)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "currentDynasty": 1,
                "currentEpoch": 4,
                "lastJustifiedEpoch": 3,
                "lastFinalizedEpoch": 2,
            })
        );
    }
}
