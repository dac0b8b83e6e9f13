//! The single context that owns every piece of mutable timer state.
//!
//! Samples, manual threshold edits and calibration commands all go through
//! `GateTimer`, one at a time, so the calibration engine's live threshold
//! writes can never interleave with a manual edit.

use crate::calibration::{CalibrationEngine, CalibrationPhase, CalibrationUpdate, ControlAck};
use crate::config::TimerConfig;
use crate::crossing::{CrossingDetector, CrossingState};
use crate::error::CalibrationError;
use crate::lap_timer::{LapTimer, PilotStats};
use crate::thresholds::{ThresholdPair, ThresholdStore};
use crate::tuning::{DroneSize, GateConfig};
use crate::types::{CrossingEvent, LapRecord, PilotKey, Sample};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------- Input / output vocabulary ----------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Sample(Sample),
    SetEnter {
        value: i64,
    },
    SetExit {
        value: i64,
    },
    ApplyThresholds {
        enter: i64,
        exit: i64,
    },
    SetDroneSize {
        drone_size: DroneSize,
    },
    StartRace {
        #[serde(default)]
        pilot: Option<String>,
        #[serde(default)]
        channel: Option<u16>,
    },
    StopRace,
    ClearLaps,
    StartNoise,
    StopNoise {
        #[serde(default)]
        ack: Option<ControlAck>,
    },
    StartCrossing,
    StopCrossing {
        #[serde(default)]
        ack: Option<ControlAck>,
    },
    CancelCalibration,
    ResetCalibration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TimerEvent {
    Crossing(CrossingEvent),
    Lap {
        pilot: PilotKey,
        lap: LapRecord,
        stats: PilotStats,
    },
    Thresholds(ThresholdPair),
    RaceStarted(PilotKey),
    RaceStopped,
    LapsCleared(PilotKey),
    Calibration(CalibrationUpdate),
    CalibrationCancelled,
    Warning(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub thresholds: ThresholdPair,
    pub crossing_state: CrossingState,
    pub race_active: bool,
    pub active_pilot: Option<PilotKey>,
    pub calibration_phase: CalibrationPhase,
}

// ---------- Context ----------

pub struct GateTimer {
    store: ThresholdStore,
    detector: CrossingDetector,
    laps: LapTimer,
    calibration: CalibrationEngine,
    gate: GateConfig,
    race_active: bool,
    last_timestamp: Option<i64>,
    config: TimerConfig,
}

impl GateTimer {
    pub fn new(config: TimerConfig) -> Self {
        let config = config.sanitized();
        let gate = config.gate();
        Self {
            store: ThresholdStore::new(config.thresholds()),
            detector: CrossingDetector::new(),
            laps: LapTimer::with_min_lap_ms(config.min_lap_ms()),
            calibration: CalibrationEngine::new(config.calibration_settings(), gate),
            gate,
            race_active: false,
            last_timestamp: None,
            config,
        }
    }

    pub fn handle(&mut self, cmd: Command) -> Vec<TimerEvent> {
        match cmd {
            Command::Sample(sample) => self.handle_sample(sample),
            Command::SetEnter { value } => self.set_enter(value),
            Command::SetExit { value } => self.set_exit(value),
            Command::ApplyThresholds { enter, exit } => {
                self.apply_thresholds(ThresholdPair::normalized(enter, exit))
            }
            Command::SetDroneSize { drone_size } => self.set_drone_size(drone_size),
            Command::StartRace { pilot, channel } => {
                let key = PilotKey::new(
                    pilot.unwrap_or_else(|| self.config.name.clone()),
                    channel.unwrap_or(self.config.channel),
                );
                self.start_race(key)
            }
            Command::StopRace => self.stop_race(),
            Command::ClearLaps => self.clear_laps(),
            Command::StartNoise => self.start_noise(),
            Command::StopNoise { ack } => self.stop_noise(ack),
            Command::StartCrossing => self.start_crossing(),
            Command::StopCrossing { ack } => self.stop_crossing(ack),
            Command::CancelCalibration => self.cancel_calibration(),
            Command::ResetCalibration => {
                let was_active = self.calibration.phase().is_active();
                self.calibration.reset();
                if was_active {
                    vec![TimerEvent::CalibrationCancelled]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Run one telemetry sample through detection, lap timing and calibration, in that order.
    pub fn handle_sample(&mut self, sample: Sample) -> Vec<TimerEvent> {
        if let Some(last) = self.last_timestamp {
            if sample.timestamp <= last {
                tracing::debug!("dropping stale sample ts={} last={}", sample.timestamp, last);
                return Vec::new();
            }
        }
        self.last_timestamp = Some(sample.timestamp);

        let mut events = Vec::new();
        if let Some(crossing) = self.detector.process(sample, self.store.get()) {
            tracing::debug!("{:?} at ts={} rssi={}", crossing.kind, sample.timestamp, sample.strength);
            events.push(TimerEvent::Crossing(crossing));
            if let Some(lap) = self.laps.on_crossing(&crossing, self.race_active) {
                events.push(self.lap_event(lap));
            }
        }
        if let Some(update) = self.calibration.on_sample(sample.strength, &mut self.store) {
            events.push(TimerEvent::Calibration(update));
        }
        events
    }

    fn lap_event(&self, lap: LapRecord) -> TimerEvent {
        let pilot = self.laps.active_pilot().cloned().unwrap_or_else(|| PilotKey::new("", 0));
        let stats = self.laps.stats(&pilot).cloned().unwrap_or_default();
        if lap.is_opening() {
            tracing::info!("pilot={} channel={} opening lap", pilot.pilot, pilot.channel);
        } else {
            tracing::info!(
                "pilot={} channel={} lap={} time={:.2}s total={:.2}s",
                pilot.pilot, pilot.channel, lap.index, lap.duration_seconds, lap.cumulative_seconds
            );
        }
        TimerEvent::Lap { pilot, lap, stats }
    }

    // ---------- Thresholds ----------

    pub fn set_enter(&mut self, value: i64) -> Vec<TimerEvent> {
        self.store.set_enter(value);
        vec![TimerEvent::Thresholds(self.store.get())]
    }

    pub fn set_exit(&mut self, value: i64) -> Vec<TimerEvent> {
        self.store.set_exit(value);
        vec![TimerEvent::Thresholds(self.store.get())]
    }

    pub fn apply_thresholds(&mut self, pair: ThresholdPair) -> Vec<TimerEvent> {
        self.store.apply(pair);
        vec![TimerEvent::Thresholds(self.store.get())]
    }

    pub fn set_drone_size(&mut self, drone_size: DroneSize) -> Vec<TimerEvent> {
        self.gate = GateConfig::new(drone_size);
        self.calibration.set_gate(self.gate);
        tracing::info!("gate set to {:?} ({}mm)", drone_size, self.gate.diameter_mm());
        Vec::new()
    }

    // ---------- Race ----------

    pub fn start_race(&mut self, pilot: PilotKey) -> Vec<TimerEvent> {
        tracing::info!("race started pilot={} channel={}", pilot.pilot, pilot.channel);
        self.laps.start_race(pilot.clone());
        self.race_active = true;
        vec![TimerEvent::RaceStarted(pilot)]
    }

    pub fn stop_race(&mut self) -> Vec<TimerEvent> {
        if !self.race_active {
            return Vec::new();
        }
        tracing::info!("race stopped");
        self.race_active = false;
        vec![TimerEvent::RaceStopped]
    }

    pub fn clear_laps(&mut self) -> Vec<TimerEvent> {
        if !self.laps.clear_laps() {
            return Vec::new();
        }
        match self.laps.active_pilot() {
            Some(pilot) => vec![TimerEvent::LapsCleared(pilot.clone())],
            None => Vec::new(),
        }
    }

    // ---------- Calibration ----------

    pub fn start_noise(&mut self) -> Vec<TimerEvent> {
        match self.calibration.start_noise() {
            Ok(_) => Vec::new(),
            Err(e) => warning(e),
        }
    }

    pub fn stop_noise(&mut self, ack: Option<ControlAck>) -> Vec<TimerEvent> {
        self.calibration
            .finish_noise(ack, &mut self.store)
            .map(|r| vec![TimerEvent::Calibration(CalibrationUpdate::Finished(r))])
            .unwrap_or_default()
    }

    pub fn start_crossing(&mut self) -> Vec<TimerEvent> {
        match self.calibration.start_crossing() {
            Ok(_) => Vec::new(),
            Err(e) => warning(e),
        }
    }

    pub fn stop_crossing(&mut self, ack: Option<ControlAck>) -> Vec<TimerEvent> {
        match self.calibration.finish_crossing(ack, &mut self.store) {
            Ok(Some(r)) => vec![TimerEvent::Calibration(CalibrationUpdate::Finished(r))],
            Ok(None) => Vec::new(),
            Err(e) => warning(e),
        }
    }

    pub fn cancel_calibration(&mut self) -> Vec<TimerEvent> {
        if self.calibration.phase().is_active() && self.calibration.cancel() {
            vec![TimerEvent::CalibrationCancelled]
        } else {
            Vec::new()
        }
    }

    pub fn calibration_timeout(&mut self) -> Vec<TimerEvent> {
        match self.calibration.on_timeout(&mut self.store) {
            Ok(Some(r)) => vec![TimerEvent::Calibration(CalibrationUpdate::Finished(r))],
            Ok(None) => Vec::new(),
            Err(e) => {
                let mut events = warning(e);
                events.push(TimerEvent::CalibrationCancelled);
                events
            }
        }
    }

    /// Timeout of the running calibration phase, `None` when nothing is pending.
    pub fn phase_timeout(&self) -> Option<(CalibrationPhase, Duration)> {
        self.calibration
            .phase_timeout()
            .map(|timeout| (self.calibration.phase(), timeout))
    }

    // ---------- Queries ----------

    pub fn thresholds(&self) -> ThresholdPair {
        self.store.get()
    }

    pub fn gate(&self) -> GateConfig {
        self.gate
    }

    pub fn race_active(&self) -> bool {
        self.race_active
    }

    pub fn lap_timer(&self) -> &LapTimer {
        &self.laps
    }

    pub fn calibration(&self) -> &CalibrationEngine {
        &self.calibration
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            thresholds: self.store.get(),
            crossing_state: self.detector.state(),
            race_active: self.race_active,
            active_pilot: self.laps.active_pilot().cloned(),
            calibration_phase: self.calibration.phase(),
        }
    }

    /// Current thresholds and gate folded into the loaded config, ready to persist.
    pub fn to_config(&self) -> TimerConfig {
        let mut cfg = self.config.clone();
        cfg.update_from(self.store.get(), self.gate);
        cfg
    }
}

fn warning(e: CalibrationError) -> Vec<TimerEvent> {
    tracing::warn!("calibration: {}", e);
    vec![TimerEvent::Warning(e.to_string())]
}
