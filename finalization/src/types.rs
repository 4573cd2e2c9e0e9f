//! Types shared across the crate.
//!
//! - [`Height`]: Position of a block on the chain. Genesis is height zero.
//!
//! - [`Epoch`]: A contiguous run of blocks of a fixed length. Epochs are the unit of
//!   finalization accounting: finalizers vote on epochs and rewards are paid per epoch.
//!
//! - [`Dynasty`]: A grouping of epochs that share the same finalizer set. The dynasty advances
//!   every time an epoch is finalized and never decreases.
//!
//! - [`Address`]: The payable identity of a proposer or finalizer.
//!
//! - [`Epocher`]: Maps heights to epochs and back.
//!
//! # Type Conversions
//!
//! Explicit type constructors (`Epoch::new()`, `Height::new()`) are required to create instances
//! from raw integers. Implicit conversions via, e.g. `From<u64>` are intentionally not provided
//! to prevent accidentally mixing heights and epochs.

use bytes::{Buf, BufMut};
use commonware_codec::{varint::UInt, EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use commonware_utils::hex;
use serde::Serialize;
use std::fmt::{self, Debug, Display, Formatter};

/// Amount of the native token, in base units.
pub type Amount = u64;

/// Position of a block on the canonical chain.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Height(u64);

impl Height {
    /// Returns the genesis height.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Creates a new height from a u64 value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying u64 value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns true if this is the genesis height.
    pub const fn is_genesis(self) -> bool {
        self.0 == 0
    }

    /// Returns the next height.
    ///
    /// # Panics
    ///
    /// Panics if the height would overflow u64::MAX.
    pub const fn next(self) -> Self {
        Self(self.0.checked_add(1).expect("height overflow"))
    }

    /// Returns the previous height, or `None` at genesis.
    pub fn previous(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl Display for Height {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Read for Height {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, Error> {
        let value: u64 = UInt::read(buf)?.into();
        Ok(Self(value))
    }
}

impl Write for Height {
    fn write(&self, buf: &mut impl BufMut) {
        UInt(self.0).write(buf);
    }
}

impl EncodeSize for Height {
    fn encode_size(&self) -> usize {
        UInt(self.0).encode_size()
    }
}

/// A contiguous run of `epoch_length` blocks.
///
/// Epoch zero is the genesis epoch: it is justified and finalized by definition and its
/// checkpoint block pays no rewards.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Epoch(u64);

impl Epoch {
    /// Returns epoch zero.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Creates a new epoch from a u64 value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying u64 value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns true if this is epoch zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Returns the epoch opened after this one closes.
    ///
    /// # Panics
    ///
    /// Panics past u64::MAX. Epochs advance once every `epoch_length` heights, so heights overflow
    /// first.
    pub const fn next(self) -> Self {
        Self(self.0.checked_add(1).expect("epoch overflow"))
    }

    /// Returns the previous epoch, or `None` if this is epoch zero.
    pub fn previous(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl Display for Epoch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Read for Epoch {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _cfg: &Self::Cfg) -> Result<Self, Error> {
        let value: u64 = UInt::read(buf)?.into();
        Ok(Self(value))
    }
}

impl Write for Epoch {
    fn write(&self, buf: &mut impl BufMut) {
        UInt(self.0).write(buf);
    }
}

impl EncodeSize for Epoch {
    fn encode_size(&self) -> usize {
        UInt(self.0).encode_size()
    }
}

/// A grouping of epochs sharing the same finalizer set.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Dynasty(u64);

impl Dynasty {
    /// Returns dynasty zero.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Creates a new dynasty from a u64 value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying u64 value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next dynasty, or `None` on overflow.
    pub fn checked_next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Returns the dynasty `delay` finalizations after this one, or `None` on overflow.
    pub fn checked_add(self, delay: u64) -> Option<Self> {
        self.0.checked_add(delay).map(Self)
    }
}

impl Display for Dynasty {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Length of an [Address] in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Payable identity of a proposer or finalizer (a 20-byte key hash).
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[repr(transparent)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Creates an address from raw bytes.
    pub const fn new(value: [u8; ADDRESS_LENGTH]) -> Self {
        Self(value)
    }
}

impl Write for Address {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Address {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        <[u8; ADDRESS_LENGTH]>::read(buf).map(Self)
    }
}

impl FixedSize for Address {
    const SIZE: usize = ADDRESS_LENGTH;
}

impl From<[u8; ADDRESS_LENGTH]> for Address {
    fn from(value: [u8; ADDRESS_LENGTH]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

/// Maps block heights to epochs.
///
/// Genesis (height zero) sits outside of any reward accounting and is reported as part of
/// epoch zero. Every other height `h` belongs to epoch `(h - 1) / epoch_length`, so the first
/// block of epoch `E` (its checkpoint block) is at height `E * epoch_length + 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Epocher {
    epoch_length: u64,
}

impl Epocher {
    /// Creates a new epocher.
    ///
    /// # Panics
    ///
    /// Panics if `epoch_length` is zero.
    pub fn new(epoch_length: u64) -> Self {
        assert!(epoch_length > 0, "epoch length must be positive");
        Self { epoch_length }
    }

    /// Returns the number of blocks per epoch.
    pub const fn length(&self) -> u64 {
        self.epoch_length
    }

    /// Returns the epoch containing the given height.
    pub fn containing(&self, height: Height) -> Epoch {
        match height.previous() {
            Some(offset) => Epoch::new(offset.get() / self.epoch_length),
            None => Epoch::zero(),
        }
    }

    /// Returns the first height (the checkpoint block) of the given epoch.
    pub fn first(&self, epoch: Epoch) -> Height {
        Height::new(epoch.get() * self.epoch_length + 1)
    }

    /// Returns the last height of the given epoch.
    pub fn last(&self, epoch: Epoch) -> Height {
        Height::new(self.first(epoch).get() + self.epoch_length - 1)
    }

    /// Returns true if `height` is the first block of its epoch.
    pub fn is_checkpoint(&self, height: Height) -> bool {
        match height.previous() {
            Some(offset) => offset.get() % self.epoch_length == 0,
            None => false,
        }
    }

    /// Returns the number of finalization reward outputs a block at `height` must carry.
    ///
    /// Only checkpoint blocks of epoch one onwards pay rewards (for every block of the
    /// previous epoch).
    pub fn reward_outputs(&self, height: Height) -> usize {
        if self.is_checkpoint(height) && !self.containing(height).is_zero() {
            self.epoch_length as usize
        } else {
            0
        }
    }
}
