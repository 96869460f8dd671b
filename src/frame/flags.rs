//! Frame flag bits.
//!
//! The low ten bits of the frame-type halfword carry flags. Only `METADATA`
//! and `IGNORE` are common to all kinds; the rest are reused per kind, so the
//! constants below name the per-kind meaning where bits overlap.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Flags bitset carried in a frame header.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FrameFlags(u16);

impl FrameFlags {
    /// No flags set.
    pub const EMPTY: Self = Self(0);
    /// Frame can be ignored if not understood.
    pub const IGNORE: Self = Self(0x200);
    /// Metadata is present in the payload section.
    pub const METADATA: Self = Self(0x100);
    /// SETUP: the client wants a resumable session.
    pub const RESUME_ENABLE: Self = Self(0x080);
    /// SETUP: the client honors LEASE frames.
    pub const LEASE: Self = Self(0x040);
    /// KEEPALIVE: the receiver must echo this frame back.
    pub const RESPOND: Self = Self(0x080);
    /// REQUEST_* / PAYLOAD: more fragments of this frame follow.
    pub const FOLLOWS: Self = Self(0x080);
    /// PAYLOAD / REQUEST_CHANNEL: the sending side is complete.
    pub const COMPLETE: Self = Self(0x040);
    /// PAYLOAD: the frame carries a next payload.
    pub const NEXT: Self = Self(0x020);

    /// Construct from the raw ten-bit wire value.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self { Self(bits & 0x3ff) }

    /// The raw wire value.
    #[must_use]
    pub const fn bits(self) -> u16 { self.0 }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }
}

impl BitOr for FrameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

impl BitOrAssign for FrameFlags {
    fn bitor_assign(&mut self, rhs: Self) { self.0 |= rhs.0; }
}

impl BitAnd for FrameFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self { Self(self.0 & rhs.0) }
}

impl fmt::Debug for FrameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameFlags({:#05x})", self.0)
    }
}
