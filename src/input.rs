// Input sources for the local entity
// The runtime only ever sees four direction flags per tick

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::world::Controls;

/// Something that decides which directions are held each tick
pub trait InputSource {
    /// Flags to apply to the local entity for this tick
    fn poll(&mut self) -> Controls;

    /// Name for logging
    fn name(&self) -> &str;
}

/// Input source selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum InputKind {
    /// Random walk, holding each direction for a while
    Wander,
    /// Never presses anything
    Idle,
}

pub fn create_input(kind: InputKind) -> Box<dyn InputSource> {
    match kind {
        InputKind::Wander => Box::new(Wander::new(StdRng::from_entropy())),
        InputKind::Idle => Box::new(Idle),
    }
}

pub struct Idle;

impl InputSource for Idle {
    fn poll(&mut self) -> Controls {
        Controls::default()
    }

    fn name(&self) -> &str {
        "idle"
    }
}

/// Headless stand-in for a player: picks a direction, holds it, picks again
pub struct Wander {
    rng: StdRng,
    current: Controls,
    ticks_left: u32,
    min_hold: u32,
    max_hold: u32,
}

impl Wander {
    pub fn new(rng: StdRng) -> Self {
        Self::with_hold(rng, 10, 60)
    }

    /// Hold each choice for `min_hold..=max_hold` ticks
    pub fn with_hold(rng: StdRng, min_hold: u32, max_hold: u32) -> Self {
        let min_hold = min_hold.max(1);
        Self {
            rng,
            current: Controls::default(),
            ticks_left: 0,
            min_hold,
            max_hold: max_hold.max(min_hold),
        }
    }

    fn choose(&mut self) -> Controls {
        // a quarter of the time stand still
        if self.rng.gen_bool(0.25) {
            return Controls::default();
        }
        let horizontal = self.rng.gen_range(0..3);
        let vertical = self.rng.gen_range(0..3);
        Controls {
            left: horizontal == 1,
            right: horizontal == 2,
            up: vertical == 1,
            down: vertical == 2,
        }
    }
}

impl InputSource for Wander {
    fn poll(&mut self) -> Controls {
        if self.ticks_left == 0 {
            self.current = self.choose();
            self.ticks_left = self.rng.gen_range(self.min_hold..=self.max_hold);
        }
        self.ticks_left -= 1;
        self.current
    }

    fn name(&self) -> &str {
        "wander"
    }
}
