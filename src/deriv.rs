//! Derivative capability set.
//!
//! Which derivative arrays a network carries ("substrates") is fixed at allocation time;
//! which of them a given propagation actually fills is chosen per call. Both are a
//! [`DerivFlags`] bit-set, and the per-call request must be a subset of the allocation.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DerivFlags(u8);

impl DerivFlags {
    pub const NONE: DerivFlags = DerivFlags(0);
    /// First derivative of every unit w.r.t. each network input.
    pub const D1: DerivFlags = DerivFlags(1);
    /// Second (diagonal) derivative w.r.t. each network input.
    pub const D2: DerivFlags = DerivFlags(1 << 1);
    /// First derivative w.r.t. each tracked parameter.
    pub const VD1: DerivFlags = DerivFlags(1 << 2);
    /// Derivative of `D1` w.r.t. each tracked parameter.
    pub const CROSS1: DerivFlags = DerivFlags(1 << 3);
    /// Derivative of `D2` w.r.t. each tracked parameter.
    pub const CROSS2: DerivFlags = DerivFlags(1 << 4);
    pub const ALL: DerivFlags = DerivFlags(0b1_1111);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        DerivFlags(bits & Self::ALL.0)
    }

    #[inline]
    pub const fn contains(self, other: DerivFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: DerivFlags) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flags in `self` that are not in `other`.
    #[inline]
    pub const fn difference(self, other: DerivFlags) -> Self {
        DerivFlags(self.0 & !other.0)
    }

    /// Adds every capability the recurrences of `self` read from.
    ///
    /// `D2 => D1`, `CROSS1 => D1 | VD1`, `CROSS2 => D2 | CROSS1`.
    pub const fn closure(self) -> Self {
        let mut bits = self.0;
        if bits & Self::CROSS2.0 != 0 {
            bits |= Self::D2.0 | Self::CROSS1.0;
        }
        if bits & Self::CROSS1.0 != 0 {
            bits |= Self::D1.0 | Self::VD1.0;
        }
        if bits & Self::D2.0 != 0 {
            bits |= Self::D1.0;
        }
        DerivFlags(bits)
    }

    /// Highest activation derivative order the flagged recurrences need.
    pub const fn activation_order(self) -> u8 {
        if self.0 & Self::CROSS2.0 != 0 {
            3
        } else if self.0 & (Self::D2.0 | Self::CROSS1.0) != 0 {
            2
        } else if self.0 & (Self::D1.0 | Self::VD1.0) != 0 {
            1
        } else {
            0
        }
    }
}

impl BitOr for DerivFlags {
    type Output = DerivFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        DerivFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for DerivFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for DerivFlags {
    type Output = DerivFlags;

    fn bitand(self, rhs: Self) -> Self::Output {
        DerivFlags(self.0 & rhs.0)
    }
}

impl fmt::Display for DerivFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(DerivFlags, &str); 5] = [
            (DerivFlags::D1, "d1"),
            (DerivFlags::D2, "d2"),
            (DerivFlags::VD1, "vd1"),
            (DerivFlags::CROSS1, "cross1"),
            (DerivFlags::CROSS2, "cross2"),
        ];
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Which parameters the variational substrate differentiates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParamTracking {
    /// Every parameter of every non-input layer.
    #[default]
    All,
    /// Only the parameters of the last hidden layer and the output layer.
    LastTwoLayers,
}

/// Per-propagation settings shared by every layer of one sweep.
#[derive(Debug, Clone)]
pub(crate) struct Sweep {
    pub flags: DerivFlags,
    pub order: u8,
    pub tracked: Range<usize>,
}

impl Sweep {
    pub fn new(flags: DerivFlags, tracked: Range<usize>) -> Self {
        Self {
            flags,
            order: flags.activation_order(),
            tracked,
        }
    }

    #[inline]
    pub fn ntracked(&self) -> usize {
        self.tracked.len()
    }

    /// Local tracked index of global parameter `p`, if tracked.
    #[inline]
    pub fn local(&self, p: usize) -> Option<usize> {
        if self.tracked.contains(&p) {
            Some(p - self.tracked.start)
        } else {
            None
        }
    }

    /// Number of leading tracked parameters that belong to layers below `layer_start`.
    #[inline]
    pub fn upstream_len(&self, layer_start: usize) -> usize {
        layer_start.clamp(self.tracked.start, self.tracked.end) - self.tracked.start
    }
}
