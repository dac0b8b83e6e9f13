use crate::thresholds::ThresholdPair;
use crate::types::{CrossingEvent, CrossingKind, Sample};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingState {
    #[default]
    Outside,
    Inside,
}

/// Hysteresis classifier over the RSSI stream.
///
/// Goes `Inside` when strength rises strictly above `enter` and back `Outside`
/// when it falls strictly below `exit`. Anything in between keeps the current
/// state, so a signal hovering near one boundary cannot chatter.
#[derive(Debug, Clone, Default)]
pub struct CrossingDetector {
    state: CrossingState,
}

impl CrossingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CrossingState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = CrossingState::Outside;
    }

    /// Feed one sample, in arrival order. Returns the transition it caused, if any.
    pub fn process(&mut self, sample: Sample, thresholds: ThresholdPair) -> Option<CrossingEvent> {
        let kind = match self.state {
            CrossingState::Outside if sample.strength > thresholds.enter => {
                self.state = CrossingState::Inside;
                CrossingKind::Enter
            }
            CrossingState::Inside if sample.strength < thresholds.exit => {
                self.state = CrossingState::Outside;
                CrossingKind::Exit
            }
            _ => return None,
        };
        Some(CrossingEvent { kind, sample })
    }
}
