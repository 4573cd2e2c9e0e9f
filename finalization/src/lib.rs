//! Pay proposers for finalized epochs with deterministic coinbase outputs.
//!
//! # Overview
//!
//! A finality gadget layered on a proposer chain groups blocks into fixed-length epochs. Finalizers
//! (participants that locked a deposit) vote on the checkpoint of each epoch and, once a
//! stake-weighted supermajority links two consecutive epochs, the earlier one is finalized.
//!
//! This crate tracks that progression and derives, for every block, the exact coinbase outputs the
//! block must carry. The first block of each epoch (the _checkpoint block_) pays one reward output
//! per block of the previous epoch, addressed to that block's proposer and scaled by how much of the
//! active stake participated in voting.
//!
//! # Components
//!
//! Data flows one way per block:
//!
//! - [tracker::Tracker] maintains the [tracker::FinalizationState] (epoch, dynasty, last justified
//!   and last finalized epoch).
//! - [tally::VoteTally] aggregates stake-weighted [vote::Vote]s for the open epoch.
//! - [reward::Calculator] turns a closed epoch's proposers and participation into
//!   [reward::RewardRecord]s.
//! - [coinbase::Builder] emits the standard outputs followed by any reward outputs.
//!
//! [processor::Processor] ties the components together for a single block and
//! [chain::Chain] keeps per-height results, serves queries and handles reorgs.
//!
//! # Determinism
//!
//! Every node must reproduce the coinbase of every block bit-for-bit. All amounts are integers,
//! all ratios are exact fractions and no state is shared across branches: a [processor::ChainState]
//! is a plain value that is cloned when a branch forks.
//!
//! # Status
//!
//! `commonware-finalization` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

use thiserror::Error;

pub mod chain;
pub mod coinbase;
pub mod config;
pub mod deposit;
pub mod processor;
pub mod reward;
pub mod tally;
pub mod tracker;
pub mod types;
pub mod vote;

pub use config::Config;
pub use types::{Address, Amount, Dynasty, Epoch, Height};

/// Errors that halt processing of a block (and the branch it belongs to).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The coinbase carried by a block does not match the one derived for its height.
    #[error("consensus fault at height {height}: expected coinbase {expected}, found {actual}")]
    ConsensusFault {
        height: Height,
        expected: String,
        actual: String,
    },
    /// An internal invariant of the finalization state was violated.
    #[error("state inconsistency: {0}")]
    StateInconsistency(&'static str),
    /// The configuration cannot be used to process a chain.
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    /// The deposit set cannot produce a stake snapshot.
    #[error("deposit: {0}")]
    Deposit(#[from] deposit::DepositError),
}
