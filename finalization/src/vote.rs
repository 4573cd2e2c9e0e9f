//! Finalizer votes included in blocks.

use crate::{Address, Epoch};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};

/// A finalizer's attestation that `target` should be justified, linked from the already
/// justified `source`.
///
/// Votes are identified by `(finalizer, target)`. Signatures are verified by the subsystem that
/// admits votes into blocks and are not represented here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Vote {
    /// The finalizer casting the vote.
    pub finalizer: Address,

    /// Justified epoch the link starts from.
    pub source: Epoch,

    /// Epoch the vote attempts to justify.
    pub target: Epoch,
}

impl Vote {
    /// Creates a new vote.
    pub const fn new(finalizer: Address, source: Epoch, target: Epoch) -> Self {
        Self {
            finalizer,
            source,
            target,
        }
    }
}

impl Write for Vote {
    fn write(&self, buf: &mut impl BufMut) {
        self.finalizer.write(buf);
        self.source.write(buf);
        self.target.write(buf);
    }
}

impl Read for Vote {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let finalizer = Address::read(buf)?;
        let source = Epoch::read(buf)?;
        let target = Epoch::read(buf)?;
        if source >= target {
            return Err(Error::Invalid("Vote", "source must precede target"));
        }
        Ok(Self {
            finalizer,
            source,
            target,
        })
    }
}

impl EncodeSize for Vote {
    fn encode_size(&self) -> usize {
        self.finalizer.encode_size() + self.source.encode_size() + self.target.encode_size()
    }
}
