//! Gate-size aware ratios used to turn a noise/peak measurement into thresholds.
//!
//! Smaller gates need a sharper, higher-confidence excursion before a crossing
//! is trusted, so both the minimum delta and the ratio correction grow as the
//! diameter shrinks.

use serde::{Deserialize, Serialize};

/// Reference diameter (m) that the correction factor is normalized against
const REFERENCE_DIAMETER_M: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub enum DroneSize {
    /// 2" class, flown through the 1 m gate
    Small,
    /// 5" class, flown through the 2 m gate
    #[default]
    Large,
}

impl DroneSize {
    pub fn code(self) -> u8 {
        match self {
            DroneSize::Small => 2,
            DroneSize::Large => 5,
        }
    }

    pub fn gate_diameter_mm(self) -> u32 {
        match self {
            DroneSize::Small => 1000,
            DroneSize::Large => 2000,
        }
    }
}

// Unknown codes, including out-of-range ones, fall back to the 5" class.
impl From<i64> for DroneSize {
    fn from(code: i64) -> Self {
        match code {
            2 => DroneSize::Small,
            _ => DroneSize::Large,
        }
    }
}

impl From<DroneSize> for u8 {
    fn from(size: DroneSize) -> Self {
        size.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GateConfig {
    pub drone_size: DroneSize,
}

impl GateConfig {
    pub fn new(drone_size: DroneSize) -> Self {
        Self { drone_size }
    }

    pub fn diameter_mm(&self) -> u32 {
        self.drone_size.gate_diameter_mm()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TuningParameters {
    pub enter_ratio: f64,
    pub exit_ratio: f64,
    pub min_delta: u32,
    pub estimated_delta: u32,
}

/// Derive threshold ratios for a gate of `diameter_mm` and a drop fraction (0.3 = 30%).
pub fn tune(diameter_mm: u32, drop_percentage: f64) -> TuningParameters {
    let diameter_m = diameter_mm as f64 / 1000.0;
    let diameter_ratio = diameter_m / REFERENCE_DIAMETER_M;

    let enter_base = (1.0 - drop_percentage * 0.7).clamp(0.55, 0.8);
    let exit_base = (1.0 - drop_percentage * 1.3).clamp(0.2, 0.7);

    let correction = 1.0 + (1.0 - diameter_ratio) * 0.3;
    let enter_ratio = (enter_base * correction).clamp(0.65, 0.9);
    let exit_ratio = (exit_base * correction).clamp(0.3, 0.8);

    let min_delta = round_half_up(25.0 * (REFERENCE_DIAMETER_M / diameter_m)).clamp(10, 35) as u32;
    let estimated_delta = (min_delta + 15).clamp(20, 50);

    TuningParameters {
        enter_ratio,
        exit_ratio,
        min_delta,
        estimated_delta,
    }
}

/// Round to the nearest integer with .5 going up (towards +inf), also for negatives.
pub fn round_half_up(v: f64) -> i64 {
    (v + 0.5).floor() as i64
}
