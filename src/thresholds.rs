//! Enter/exit threshold pair and the store that owns it.
//!
//! Edits are clamped and re-balanced rather than rejected: the store backs a
//! pair of sliders, so every value a user can produce maps to a valid pair.
//! `enter` lives in 1..=255 and `exit` in 0..=254 so that `enter > exit`
//! always has room.

use serde::{Deserialize, Serialize};

pub const DEFAULT_ENTER_RSSI: u8 = 120;
pub const DEFAULT_EXIT_RSSI: u8 = 100;

const ENTER_MIN: i64 = 1;
const ENTER_MAX: i64 = 255;
const EXIT_MIN: i64 = 0;
const EXIT_MAX: i64 = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub enter: u8,
    pub exit: u8,
}

impl ThresholdPair {
    /// Build a valid pair from arbitrary values, the same way two slider edits would.
    pub fn normalized(enter: i64, exit: i64) -> Self {
        let mut store = ThresholdStore::default();
        store.set_enter(enter);
        store.set_exit(exit);
        store.get()
    }

    pub fn is_valid(&self) -> bool {
        self.enter > self.exit
    }
}

impl Default for ThresholdPair {
    fn default() -> Self {
        Self {
            enter: DEFAULT_ENTER_RSSI,
            exit: DEFAULT_EXIT_RSSI,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThresholdStore {
    pair: ThresholdPair,
}

impl ThresholdStore {
    pub fn new(initial: ThresholdPair) -> Self {
        let mut store = Self::default();
        store.apply(initial);
        store
    }

    pub fn get(&self) -> ThresholdPair {
        self.pair
    }

    /// Set `enter`; pulls `exit` down to `enter - 1` if it would no longer sit below.
    pub fn set_enter(&mut self, value: i64) {
        let enter = value.clamp(ENTER_MIN, ENTER_MAX) as u8;
        self.pair.enter = enter;
        if enter <= self.pair.exit {
            self.pair.exit = enter - 1;
        }
    }

    /// Set `exit`; pushes `enter` up to `exit + 1` if it would no longer sit above.
    pub fn set_exit(&mut self, value: i64) {
        let exit = value.clamp(EXIT_MIN, EXIT_MAX) as u8;
        self.pair.exit = exit;
        if exit >= self.pair.enter {
            self.pair.enter = exit + 1;
        }
    }

    /// Write both fields, enter first.
    pub fn apply(&mut self, pair: ThresholdPair) {
        self.set_enter(pair.enter as i64);
        self.set_exit(pair.exit as i64);
    }
}
