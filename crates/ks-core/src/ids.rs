use core::fmt;
use core::num::NonZeroU8;

use crate::{KsError, KsResult};

/// Number of sub-channels on one 8:1 analog multiplexer.
pub const MUX_WIDTH: u8 = 8;

/// Logical channels addressable through the two-level cascade.
pub const MAX_CHANNELS: usize = 2 * MUX_WIDTH as usize;

/// Identifier of a switched power output.
///
/// - stored 1-based, the way operators and the command protocol number relays
/// - `NonZero` keeps `Option<OutputId>` the same size as `OutputId`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(NonZeroU8);

impl OutputId {
    /// Create an id from a 0-based index by storing index+1.
    pub fn from_index(index: usize) -> KsResult<Self> {
        u8::try_from(index + 1)
            .ok()
            .and_then(NonZeroU8::new)
            .map(Self)
            .ok_or(KsError::IndexOob {
                what: "output index",
                index,
                len: u8::MAX as usize,
            })
    }

    /// Create an id from the 1-based number used on the wire.
    pub fn from_number(number: u8) -> Option<Self> {
        NonZeroU8::new(number).map(Self)
    }

    /// Recover the 0-based index.
    pub fn index(self) -> usize {
        usize::from(self.0.get() - 1)
    }

    /// The 1-based relay number.
    pub fn number(self) -> u8 {
        self.0.get()
    }
}

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputId({})", self.number())
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Logical analog channel in `0..MAX_CHANNELS`.
///
/// Ids below [`MUX_WIDTH`] are primary multiplexer inputs; the rest are
/// secondary inputs reached through the cascade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct ChannelId(u8);

impl ChannelId {
    pub fn new(raw: u8) -> KsResult<Self> {
        if usize::from(raw) < MAX_CHANNELS {
            Ok(Self(raw))
        } else {
            Err(KsError::IndexOob {
                what: "analog channel",
                index: usize::from(raw),
                len: MAX_CHANNELS,
            })
        }
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn is_secondary(self) -> bool {
        self.0 >= MUX_WIDTH
    }

    /// Sub-channel on whichever multiplexer carries this id.
    pub fn sub_channel(self) -> u8 {
        self.0 % MUX_WIDTH
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = KsError;

    fn try_from(raw: u8) -> KsResult<Self> {
        Self::new(raw)
    }
}

impl From<ChannelId> for u8 {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}
