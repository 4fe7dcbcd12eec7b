// Simulated actors and their input flags

use serde::{Deserialize, Serialize};

/// Server-assigned entity identity, unique for the lifetime of a world
pub type EntityId = u16;

/// The four directional input flags of an entity
///
/// On the wire this is a 4-bit mask: bit0 = left, bit1 = right, bit2 = up, bit3 = down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controls {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl Controls {
    pub const LEFT: u16 = 1 << 0;
    pub const RIGHT: u16 = 1 << 1;
    pub const UP: u16 = 1 << 2;
    pub const DOWN: u16 = 1 << 3;

    /// Decode a control mask; bits above bit3 are ignored
    pub fn from_bits(bits: u16) -> Self {
        Self {
            left: bits & Self::LEFT != 0,
            right: bits & Self::RIGHT != 0,
            up: bits & Self::UP != 0,
            down: bits & Self::DOWN != 0,
        }
    }

    pub fn bits(self) -> u16 {
        let mut bits = 0;
        if self.left {
            bits |= Self::LEFT;
        }
        if self.right {
            bits |= Self::RIGHT;
        }
        if self.up {
            bits |= Self::UP;
        }
        if self.down {
            bits |= Self::DOWN;
        }
        bits
    }

    pub fn any(self) -> bool {
        self.left || self.right || self.up || self.down
    }
}

/// Direction an entity last faced horizontally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Facing {
    Left,
    #[default]
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    /// Appearance type, opaque to the simulation
    pub kind: u8,
    pub controls: Controls,
    /// Derived by the integrator: whether the last step tried to move
    pub moving: bool,
    /// Derived by the integrator
    pub facing: Facing,
}

impl Entity {
    pub fn new(id: EntityId, x: f32, y: f32, kind: u8) -> Self {
        Self {
            id,
            x,
            y,
            kind,
            controls: Controls::default(),
            moving: false,
            facing: Facing::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_bit_layout() {
        let left = Controls { left: true, ..Default::default() };
        let down = Controls { down: true, ..Default::default() };
        assert_eq!(left.bits(), 0b0001);
        assert_eq!(down.bits(), 0b1000);

        let all = Controls::from_bits(0b1111);
        assert!(all.left && all.right && all.up && all.down);
    }

    #[test]
    fn test_high_control_bits_ignored() {
        let controls = Controls::from_bits(0xFFF0 | Controls::UP);
        assert_eq!(controls, Controls { up: true, ..Default::default() });
        assert_eq!(controls.bits(), Controls::UP);
    }
}
