use serde::{Deserialize, Serialize};

// ---------- Telemetry ----------

/// One RSSI reading pushed by the telemetry source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds on the source's clock
    pub timestamp: i64,
    pub strength: u8,
}

impl Sample {
    pub fn new(timestamp: i64, strength: u8) -> Self {
        Self { timestamp, strength }
    }
}

// ---------- Crossing events ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingKind {
    Enter,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossingEvent {
    pub kind: CrossingKind,
    pub sample: Sample,
}

// ---------- Laps ----------

/// Identifies whose laps are being counted: pilot name plus the video channel they fly on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PilotKey {
    pub pilot: String,
    pub channel: u16,
}

impl PilotKey {
    pub fn new(pilot: impl Into<String>, channel: u16) -> Self {
        Self {
            pilot: pilot.into(),
            channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    /// 0 is the opening lap (race start to first gate entry)
    pub index: u32,
    pub duration_seconds: f64,
    pub cumulative_seconds: f64,
}

impl LapRecord {
    pub fn is_opening(&self) -> bool {
        self.index == 0
    }
}
