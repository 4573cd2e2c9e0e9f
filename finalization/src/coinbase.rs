//! Deterministic coinbase construction.
//!
//! # Layout
//!
//! A coinbase starts with [STANDARD_OUTPUTS] outputs:
//!
//! 0. The proposer reward (`block_reward(height) + fees`) paid to the proposer.
//! 1. The stake used to propose, returned to the proposer.
//!
//! Checkpoint blocks of epoch one onwards then carry one output per block of the previous epoch,
//! in ascending height order.
//!
//! # Encoding
//!
//! ```text
//! +--------------+--------------+---------------------------------+-----+
//! | height (var) | count (var)  | value (u64 BE) | address (20B)  | ... |
//! +--------------+--------------+---------------------------------+-----+
//! ```
//!
//! Independent nodes must produce identical bytes: any difference is a
//! [Error::ConsensusFault] and the block is rejected.

use crate::{
    config::{Schedule, STANDARD_OUTPUTS},
    reward::RewardRecord,
    Address, Amount, Error, Height,
};
use bytes::{Buf, BufMut};
use commonware_codec::{
    Encode, EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write,
};
use commonware_utils::hex;
use sha2::{Digest as _, Sha256};
use tracing::warn;

/// A single coinbase output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Output {
    pub value: Amount,
    pub address: Address,
}

impl Output {
    /// Creates a new output.
    pub const fn new(value: Amount, address: Address) -> Self {
        Self { value, address }
    }
}

impl Write for Output {
    fn write(&self, buf: &mut impl BufMut) {
        self.value.write(buf);
        self.address.write(buf);
    }
}

impl Read for Output {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let value = Amount::read(buf)?;
        let address = Address::read(buf)?;
        Ok(Self { value, address })
    }
}

impl FixedSize for Output {
    const SIZE: usize = Amount::SIZE + Address::SIZE;
}

impl From<&RewardRecord> for Output {
    fn from(record: &RewardRecord) -> Self {
        Self::new(record.amount, record.proposer)
    }
}

/// The outputs of a block's coinbase transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coinbase {
    pub height: Height,
    pub outputs: Vec<Output>,
}

impl Coinbase {
    /// Returns the standard outputs.
    pub fn standard(&self) -> &[Output] {
        let end = self.outputs.len().min(STANDARD_OUTPUTS);
        &self.outputs[..end]
    }

    /// Returns the finalization reward outputs.
    pub fn rewards(&self) -> &[Output] {
        let start = self.outputs.len().min(STANDARD_OUTPUTS);
        &self.outputs[start..]
    }

    /// Returns the address paid by the proposer reward output.
    pub fn reward_address(&self) -> Option<Address> {
        self.outputs.first().map(|output| output.address)
    }

    /// Returns the SHA-256 digest of the encoded coinbase.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.encode()).into()
    }
}

impl Write for Coinbase {
    fn write(&self, buf: &mut impl BufMut) {
        self.height.write(buf);
        self.outputs.len().write(buf);
        for output in &self.outputs {
            output.write(buf);
        }
    }
}

impl Read for Coinbase {
    /// Maximum number of outputs.
    type Cfg = usize;

    fn read_cfg(buf: &mut impl Buf, max_outputs: &usize) -> Result<Self, CodecError> {
        let height = Height::read(buf)?;
        let count = usize::read_cfg(buf, &(..=*max_outputs).into())?;
        if count < STANDARD_OUTPUTS {
            return Err(CodecError::Invalid(
                "Coinbase",
                "missing standard outputs",
            ));
        }
        let mut outputs = Vec::with_capacity(count);
        for _ in 0..count {
            outputs.push(Output::read(buf)?);
        }
        Ok(Self { height, outputs })
    }
}

impl EncodeSize for Coinbase {
    fn encode_size(&self) -> usize {
        self.height.encode_size()
            + self.outputs.len().encode_size()
            + self.outputs.len() * Output::SIZE
    }
}

/// What the proposer of a block contributes to its coinbase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Template {
    pub height: Height,

    /// Address paid the proposer reward (and later the finalization reward for this block).
    pub proposer: Address,

    /// Stake used to propose, returned in the second output.
    pub stake: Amount,

    /// Fees collected from the block's transactions.
    pub fees: Amount,
}

/// Assembles and checks coinbases.
#[derive(Clone, Debug)]
pub struct Builder {
    schedule: Schedule,
}

impl Builder {
    /// Creates a new builder.
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule }
    }

    /// Returns the standard outputs for `template`.
    pub fn standard(&self, template: &Template) -> Result<[Output; STANDARD_OUTPUTS], Error> {
        let reward = self
            .schedule
            .block_reward(template.height)
            .checked_add(template.fees)
            .ok_or(Error::StateInconsistency("proposer reward overflow"))?;
        Ok([
            Output::new(reward, template.proposer),
            Output::new(template.stake, template.proposer),
        ])
    }

    /// Builds the coinbase for `template`, appending `rewards` after the standard outputs.
    ///
    /// `rewards` must be empty unless the block is a checkpoint block paying a closed epoch.
    pub fn build(&self, template: &Template, rewards: &[RewardRecord]) -> Result<Coinbase, Error> {
        let mut outputs = Vec::with_capacity(STANDARD_OUTPUTS + rewards.len());
        outputs.extend(self.standard(template)?);
        outputs.extend(rewards.iter().map(Output::from));
        Ok(Coinbase {
            height: template.height,
            outputs,
        })
    }

    /// Checks that `actual` is byte-identical to `expected`.
    pub fn verify(expected: &Coinbase, actual: &Coinbase) -> Result<(), Error> {
        if expected.encode() == actual.encode() {
            return Ok(());
        }
        let expected_digest = hex(&expected.digest());
        let actual_digest = hex(&actual.digest());
        warn!(
            height = %expected.height,
            expected = %expected_digest,
            actual = %actual_digest,
            expected_outputs = expected.outputs.len(),
            actual_outputs = actual.outputs.len(),
            "coinbase mismatch"
        );
        Err(Error::ConsensusFault {
            height: expected.height,
            expected: expected_digest,
            actual: actual_digest,
        })
    }
}
