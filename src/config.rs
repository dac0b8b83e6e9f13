use crate::calibration::{
    clamp_target_samples, CalibrationSettings, DEFAULT_CALIB_SAMPLES, DEFAULT_DROP_DURATION_S,
};
use crate::error::ConfigError;
use crate::thresholds::{ThresholdPair, DEFAULT_ENTER_RSSI, DEFAULT_EXIT_RSSI};
use crate::tuning::{DroneSize, GateConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Persisted timer settings, in the device's JSON shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerConfig {
    /// Receiver frequency, MHz
    pub freq: u16,
    /// Minimum lap time in tenths of a second; 0 disables
    pub min_lap: u16,
    pub enter_rssi: u8,
    pub exit_rssi: u8,
    pub drone_size: DroneSize,
    pub calib_samples: u32,
    pub name: String,
    /// Channel used together with `name` as the lap key
    pub channel: u16,
    /// Expected drop on gate exit, percent
    pub drop_percentage: f64,
    /// Expected drop duration, seconds
    pub drop_duration: f64,
    /// Derived from `drone_size`; written for the dashboard, ignored on read
    #[serde(skip_deserializing)]
    pub gate_diameter_mm: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            freq: 1111,
            min_lap: 100,
            enter_rssi: DEFAULT_ENTER_RSSI,
            exit_rssi: DEFAULT_EXIT_RSSI,
            drone_size: DroneSize::Large,
            calib_samples: DEFAULT_CALIB_SAMPLES,
            name: String::new(),
            channel: 0,
            drop_percentage: 30.0,
            drop_duration: DEFAULT_DROP_DURATION_S,
            gate_diameter_mm: DroneSize::Large.gate_diameter_mm(),
        }
    }
}

impl TimerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let cfg: TimerConfig = serde_json::from_str(data)?;
        Ok(cfg.sanitized())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(&self.clone().sanitized())?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Clamp sample count, re-balance thresholds and refresh derived fields.
    pub fn sanitized(mut self) -> Self {
        self.calib_samples = clamp_target_samples(self.calib_samples);
        let pair = ThresholdPair::normalized(self.enter_rssi as i64, self.exit_rssi as i64);
        self.enter_rssi = pair.enter;
        self.exit_rssi = pair.exit;
        if !(0.0..=100.0).contains(&self.drop_percentage) {
            self.drop_percentage = 30.0;
        }
        if !(self.drop_duration.is_finite() && self.drop_duration >= 0.0) {
            self.drop_duration = DEFAULT_DROP_DURATION_S;
        }
        self.gate_diameter_mm = self.drone_size.gate_diameter_mm();
        self
    }

    pub fn thresholds(&self) -> ThresholdPair {
        ThresholdPair::normalized(self.enter_rssi as i64, self.exit_rssi as i64)
    }

    pub fn gate(&self) -> GateConfig {
        GateConfig::new(self.drone_size)
    }

    pub fn min_lap_ms(&self) -> u32 {
        self.min_lap as u32 * 100
    }

    pub fn calibration_settings(&self) -> CalibrationSettings {
        CalibrationSettings {
            drop_percentage: self.drop_percentage / 100.0,
            drop_duration_s: self.drop_duration,
            ..CalibrationSettings::default()
        }
        .with_target_samples(self.calib_samples)
    }

    /// Copy the live thresholds and gate back in before saving.
    pub fn update_from(&mut self, thresholds: ThresholdPair, gate: GateConfig) {
        self.enter_rssi = thresholds.enter;
        self.exit_rssi = thresholds.exit;
        self.drone_size = gate.drone_size;
        self.gate_diameter_mm = gate.diameter_mm();
    }
}
