// Snapshot sequence numbers with wraparound

use std::fmt;

/// Default ceiling: the counter runs 0..=50_000 and then wraps back to 0
pub const DEFAULT_SEQUENCE_CEILING: u16 = 50_000;

/// A tick counter in `0..=ceiling` that wraps to zero after the ceiling
///
/// Ordering is circular: `incoming` is newer than `last` when it is strictly
/// ahead by less than half the value space. With the default ceiling that is
/// 1..=24_999 steps ahead; anything else (equal, behind, or too far ahead) is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sequence {
    value: u16,
    ceiling: u16,
}

impl Sequence {
    pub fn new(value: u16, ceiling: u16) -> Self {
        debug_assert!(ceiling >= 1);
        Self {
            value: value.min(ceiling),
            ceiling,
        }
    }

    pub fn zero(ceiling: u16) -> Self {
        Self::new(0, ceiling)
    }

    pub fn value(self) -> u16 {
        self.value
    }

    pub fn ceiling(self) -> u16 {
        self.ceiling
    }

    fn modulus(self) -> u32 {
        self.ceiling as u32 + 1
    }

    /// Next value, wrapping past the ceiling back to zero
    pub fn next(self) -> Self {
        let value = if self.value >= self.ceiling { 0 } else { self.value + 1 };
        Self { value, ..self }
    }

    /// Steps from `earlier` forward to `self` on the circle, in `0..=ceiling`
    pub fn forward_distance(self, earlier: Sequence) -> u32 {
        let m = self.modulus();
        (self.value as u32 + m - earlier.value as u32) % m
    }

    /// Whether `self` is logically newer than `last`
    pub fn is_newer_than(self, last: Sequence) -> bool {
        let d = self.forward_distance(last);
        d > 0 && d < self.modulus() / 2
    }

    /// Signed circular distance from `other` to `self`, in (-m/2, m/2]
    pub fn signed_distance(self, other: Sequence) -> i32 {
        let m = self.modulus() as i32;
        let d = self.forward_distance(other) as i32;
        if d > m / 2 {
            d - m
        } else {
            d
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
