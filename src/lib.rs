//! Decision core of an RF-proximity race-gate timer.
//!
//! Turns a stream of RSSI samples into gate `Enter`/`Exit` events and lap
//! times, and turns calibration samples into enter/exit thresholds.
//!
//! ```text
//! telemetry ─► CrossingDetector ─► LapTimer ─► laps / stats
//!     │              ▲
//!     └─► CalibrationEngine ─► ThresholdStore
//! ```
//!
//! Everything mutable lives in [`timer::GateTimer`]; [`runtime::run`] drives
//! it from a command stream.

pub mod calibration;
pub mod config;
pub mod crossing;
pub mod error;
pub mod lap_timer;
pub mod runtime;
pub mod scorer;
pub mod thresholds;
pub mod timer;
pub mod tuning;
pub mod types;

pub use calibration::{recommend, CalibrationEngine, CalibrationPhase, ControlAck, ThresholdRecommendation};
pub use config::TimerConfig;
pub use crossing::{CrossingDetector, CrossingState};
pub use error::{CalibrationError, ConfigError};
pub use lap_timer::{LapTimer, PilotStats};
pub use scorer::find_best_combination;
pub use thresholds::{ThresholdPair, ThresholdStore};
pub use timer::{Command, GateTimer, TimerEvent};
pub use tuning::{tune, DroneSize, GateConfig, TuningParameters};
pub use types::{CrossingEvent, CrossingKind, LapRecord, PilotKey, Sample};
