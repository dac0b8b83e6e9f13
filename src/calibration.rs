//! Two-phase threshold calibration.
//!
//! The noise phase samples the empty gate, tracks the noise floor and keeps
//! the thresholds following a live recommendation while it runs. The
//! optional crossing phase samples while a drone flies through and tracks
//! the in-gate peak. Each phase ends with a recommendation written to the
//! threshold store; a control-surface acknowledgement, when it carries
//! values, overrides the locally measured ones field by field.
//!
//! A noise phase that reaches its sample target stops collecting and waits
//! for the stop acknowledgement, so the device's own samples can still be
//! used. If none arrives within the acknowledgement timeout it finalizes from
//! the local buffer.

use crate::error::CalibrationError;
use crate::scorer::find_best_combination;
use crate::thresholds::{ThresholdPair, ThresholdStore};
use crate::tuning::{round_half_up, tune, GateConfig, TuningParameters};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_CALIB_SAMPLES: u32 = 10;
pub const MAX_CALIB_SAMPLES: u32 = 200;
pub const DEFAULT_CALIB_SAMPLES: u32 = 20;
pub const DEFAULT_DROP_PERCENTAGE: f64 = 0.3;
pub const DEFAULT_DROP_DURATION_S: f64 = 10.0;
/// Slowest expected telemetry cadence; phase timeouts scale with the target by this much
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);
/// Slack on top of the sample-paced phase timeout, also the wait for a stop acknowledgement
pub const DEFAULT_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Samples must clear the noise floor by more than this to count as peak readings
const PEAK_MARGIN: i64 = 5;
/// Gap forced between enter and exit when the ratios collapse them together
const MIN_ENTER_EXIT_GAP: i64 = 10;

// ---------- Settings ----------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSettings {
    pub target_samples: u32,
    /// Expected signal drop on exit, as a fraction (0.3 = 30%)
    pub drop_percentage: f64,
    /// Expected time the signal stays dropped after exit, seconds
    pub drop_duration_s: f64,
    pub timeout_margin: Duration,
}

impl CalibrationSettings {
    pub fn with_target_samples(mut self, target: u32) -> Self {
        self.target_samples = clamp_target_samples(target);
        self
    }

    /// Wall-clock bound of a measuring phase: one sample interval per target sample, plus the margin.
    pub fn phase_timeout(&self) -> Duration {
        SAMPLE_INTERVAL * self.target_samples + self.timeout_margin
    }

    pub fn ack_timeout(&self) -> Duration {
        self.timeout_margin
    }
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            target_samples: DEFAULT_CALIB_SAMPLES,
            drop_percentage: DEFAULT_DROP_PERCENTAGE,
            drop_duration_s: DEFAULT_DROP_DURATION_S,
            timeout_margin: DEFAULT_TIMEOUT_MARGIN,
        }
    }
}

pub fn clamp_target_samples(target: u32) -> u32 {
    target.clamp(MIN_CALIB_SAMPLES, MAX_CALIB_SAMPLES)
}

// ---------- Recommendation formula ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThresholdRecommendation {
    pub enter: u8,
    pub exit: u8,
    pub delta: i64,
    pub min_delta: u32,
}

impl ThresholdRecommendation {
    pub fn pair(&self) -> ThresholdPair {
        ThresholdPair::normalized(self.enter as i64, self.exit as i64)
    }
}

/// Thresholds for a measured noise floor and, when known, the in-gate peak.
///
/// Without a peak the tuning's estimated delta stands in. The delta used is
/// never below the gate's minimum delta.
pub fn recommend(noise: i64, peak: Option<i64>, tuning: &TuningParameters) -> ThresholdRecommendation {
    let delta_raw = match peak {
        Some(p) => (p - noise).max(0),
        None => tuning.estimated_delta as i64,
    };
    let effective = delta_raw.max(tuning.min_delta as i64) as f64;

    let exit = round_half_up(noise as f64 + effective * tuning.exit_ratio).clamp(0, 255);
    let mut enter = round_half_up(noise as f64 + effective * tuning.enter_ratio).clamp(0, 255);
    if enter <= exit {
        enter = (exit + MIN_ENTER_EXIT_GAP).clamp(0, 255);
    }

    ThresholdRecommendation {
        enter: enter as u8,
        exit: exit as u8,
        delta: peak.map(|p| p - noise).unwrap_or(delta_raw),
        min_delta: tuning.min_delta,
    }
}

// ---------- Session ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    #[default]
    Idle,
    MeasuringNoise,
    /// Noise target reached; samples are no longer collected until the stop acknowledgement
    AwaitingNoiseAck,
    NoiseComplete,
    MeasuringCrossing,
    Done,
}

impl CalibrationPhase {
    pub fn is_measuring(self) -> bool {
        matches!(self, CalibrationPhase::MeasuringNoise | CalibrationPhase::MeasuringCrossing)
    }

    /// Measuring, or holding a finished noise buffer for its acknowledgement.
    pub fn is_active(self) -> bool {
        self.is_measuring() || self == CalibrationPhase::AwaitingNoiseAck
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationSession {
    pub phase: CalibrationPhase,
    pub samples_seen: u32,
    pub target_samples: u32,
    pub max_noise: u8,
    pub max_peak: u8,
    pub collected_samples: Vec<u8>,
}

impl CalibrationSession {
    fn start(phase: CalibrationPhase, target_samples: u32, max_noise: u8) -> Self {
        Self {
            phase,
            target_samples,
            max_noise,
            collected_samples: Vec::with_capacity(target_samples as usize),
            ..Self::default()
        }
    }

    fn finished(phase: CalibrationPhase) -> Self {
        Self {
            phase,
            ..Self::default()
        }
    }
}

// ---------- Control surface acknowledgement ----------

/// Reply of the device to a "stop phase" command. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlAck {
    pub max_noise: Option<u8>,
    pub max_peak: Option<u8>,
    pub samples: Option<Vec<u8>>,
    pub rec_enter: Option<u8>,
    pub rec_exit: Option<u8>,
    pub delta: Option<i64>,
    pub min_delta: Option<u32>,
    pub ok: Option<bool>,
    pub snr_ok: Option<bool>,
}

// ---------- Results ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStage {
    Noise,
    Crossing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Combination,
    Formula,
    Device,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationResult {
    pub stage: CalibrationStage,
    pub max_noise: u8,
    pub max_peak: u8,
    /// Mean of the above-noise samples; noise phase only
    pub avg_peak: Option<u8>,
    pub delta: i64,
    pub min_delta: u32,
    /// Pair as written to the threshold store
    pub thresholds: ThresholdPair,
    pub source: RecommendationSource,
    /// Set when the measured delta is below the gate's minimum
    pub low_confidence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalibrationUpdate {
    Live {
        stage: CalibrationStage,
        samples_seen: u32,
        target_samples: u32,
        recommendation: ThresholdRecommendation,
        /// Whether the recommendation was written to the threshold store
        applied: bool,
    },
    /// Noise target reached; the last live recommendation has been applied
    TargetReached {
        stage: CalibrationStage,
        samples_seen: u32,
        recommendation: ThresholdRecommendation,
    },
    Finished(CalibrationResult),
}

// ---------- Engine ----------

#[derive(Debug, Clone, Default)]
pub struct CalibrationEngine {
    session: CalibrationSession,
    settings: CalibrationSettings,
    gate: GateConfig,
    /// Noise floor of the last completed noise phase, carried into the crossing phase
    last_noise: Option<u8>,
}

impl CalibrationEngine {
    pub fn new(settings: CalibrationSettings, gate: GateConfig) -> Self {
        Self {
            settings: settings.with_target_samples(settings.target_samples),
            gate,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.session.phase
    }

    pub fn session(&self) -> &CalibrationSession {
        &self.session
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    /// Takes effect at the next phase start.
    pub fn set_settings(&mut self, settings: CalibrationSettings) {
        self.settings = settings.with_target_samples(settings.target_samples);
    }

    pub fn set_gate(&mut self, gate: GateConfig) {
        self.gate = gate;
    }

    pub fn last_noise(&self) -> Option<u8> {
        self.last_noise
    }

    pub fn tuning(&self) -> TuningParameters {
        tune(self.gate.diameter_mm(), self.settings.drop_percentage)
    }

    /// Timeout of the current phase, `None` when nothing is running.
    pub fn phase_timeout(&self) -> Option<Duration> {
        match self.session.phase {
            CalibrationPhase::AwaitingNoiseAck => Some(self.settings.ack_timeout()),
            phase if phase.is_measuring() => Some(self.settings.phase_timeout()),
            _ => None,
        }
    }

    /// Begin the noise phase. `Ok(false)` if it is already running.
    pub fn start_noise(&mut self) -> Result<bool, CalibrationError> {
        match self.session.phase {
            CalibrationPhase::MeasuringNoise | CalibrationPhase::AwaitingNoiseAck => return Ok(false),
            CalibrationPhase::MeasuringCrossing => {
                return Err(CalibrationError::Busy {
                    current: self.session.phase,
                })
            }
            _ => {}
        }
        self.session = CalibrationSession::start(
            CalibrationPhase::MeasuringNoise,
            self.settings.target_samples,
            0,
        );
        tracing::info!("noise calibration started target_samples={}", self.settings.target_samples);
        Ok(true)
    }

    /// Begin the crossing phase. `Ok(false)` if it is already running.
    pub fn start_crossing(&mut self) -> Result<bool, CalibrationError> {
        match self.session.phase {
            CalibrationPhase::MeasuringCrossing => return Ok(false),
            CalibrationPhase::MeasuringNoise | CalibrationPhase::AwaitingNoiseAck => {
                return Err(CalibrationError::Busy {
                    current: self.session.phase,
                })
            }
            _ => {}
        }
        let noise = self.last_noise.unwrap_or(0);
        self.session = CalibrationSession::start(
            CalibrationPhase::MeasuringCrossing,
            self.settings.target_samples,
            noise,
        );
        tracing::info!(
            "crossing calibration started target_samples={} noise={}",
            self.settings.target_samples, noise
        );
        Ok(true)
    }

    /// Feed one RSSI reading. Does nothing outside a measuring phase.
    ///
    /// The sample that completes the noise target yields `TargetReached`; the
    /// phase then waits for `finish_noise`.
    pub fn on_sample(&mut self, strength: u8, store: &mut ThresholdStore) -> Option<CalibrationUpdate> {
        let tuning = self.tuning();
        let session = &mut self.session;
        let stage = match session.phase {
            CalibrationPhase::MeasuringNoise => CalibrationStage::Noise,
            CalibrationPhase::MeasuringCrossing => CalibrationStage::Crossing,
            _ => return None,
        };

        session.collected_samples.push(strength);
        session.samples_seen = session.samples_seen.saturating_add(1);

        let update = match stage {
            CalibrationStage::Noise => {
                session.max_noise = session.max_noise.max(strength);
                let rec = recommend(session.max_noise as i64, None, &tuning);
                store.apply(rec.pair());
                if session.samples_seen >= session.target_samples {
                    session.phase = CalibrationPhase::AwaitingNoiseAck;
                    tracing::debug!("noise target reached after {} samples", session.samples_seen);
                    return Some(CalibrationUpdate::TargetReached {
                        stage,
                        samples_seen: session.samples_seen,
                        recommendation: rec,
                    });
                }
                CalibrationUpdate::Live {
                    stage,
                    samples_seen: session.samples_seen,
                    target_samples: session.target_samples,
                    recommendation: rec,
                    applied: true,
                }
            }
            CalibrationStage::Crossing => {
                session.max_peak = session.max_peak.max(strength);
                let rec = recommend(session.max_noise as i64, Some(session.max_peak as i64), &tuning);
                CalibrationUpdate::Live {
                    stage,
                    samples_seen: session.samples_seen,
                    target_samples: session.target_samples,
                    recommendation: rec,
                    applied: false,
                }
            }
        };
        Some(update)
    }

    /// Finalize the noise phase, before or after its target. `None` if it is not running.
    pub fn finish_noise(&mut self, ack: Option<ControlAck>, store: &mut ThresholdStore) -> Option<CalibrationResult> {
        if !matches!(
            self.session.phase,
            CalibrationPhase::MeasuringNoise | CalibrationPhase::AwaitingNoiseAck
        ) {
            return None;
        }
        let ack = ack.unwrap_or_default();
        let session = std::mem::replace(
            &mut self.session,
            CalibrationSession::finished(CalibrationPhase::NoiseComplete),
        );

        let max_noise = ack.max_noise.unwrap_or(session.max_noise);
        // Device samples win whenever present; there is no freshness check.
        let samples = ack.samples.unwrap_or(session.collected_samples);
        let floor = max_noise as i64 + PEAK_MARGIN;
        let filtered: Vec<u8> = samples.into_iter().filter(|&s| s as i64 > floor).collect();

        let max_peak = filtered.iter().copied().max().unwrap_or(max_noise);
        let avg_peak = if filtered.is_empty() {
            max_noise
        } else {
            let sum: i64 = filtered.iter().map(|&s| s as i64).sum();
            round_half_up(sum as f64 / filtered.len() as f64).clamp(0, 255) as u8
        };
        let delta = max_peak as i64 - max_noise as i64;
        let tuning = self.tuning();

        let combination = find_best_combination(
            &filtered,
            max_noise as i64,
            max_peak as i64,
            self.settings.drop_percentage,
            self.settings.drop_duration_s,
            session.target_samples as usize,
        );
        let (pair, source) = match combination {
            Some(c) => {
                tracing::debug!(
                    "best combination drop={:.2} enter={} exit={} score={}",
                    c.drop_percentage, c.enter, c.exit, c.score
                );
                (ThresholdPair::normalized(c.enter, c.exit), RecommendationSource::Combination)
            }
            None => {
                let rec = recommend(max_noise as i64, Some(max_peak as i64), &tuning);
                (rec.pair(), RecommendationSource::Formula)
            }
        };
        store.apply(pair);
        self.last_noise = Some(max_noise);

        let result = CalibrationResult {
            stage: CalibrationStage::Noise,
            max_noise,
            max_peak,
            avg_peak: Some(avg_peak),
            delta,
            min_delta: tuning.min_delta,
            thresholds: store.get(),
            source,
            low_confidence: delta < tuning.min_delta as i64,
        };
        log_result(&result, session.samples_seen);
        Some(result)
    }

    /// Finalize the crossing phase. `Ok(None)` if it is not running; refused while
    /// fewer than the target number of samples have been seen.
    pub fn finish_crossing(
        &mut self,
        ack: Option<ControlAck>,
        store: &mut ThresholdStore,
    ) -> Result<Option<CalibrationResult>, CalibrationError> {
        if self.session.phase != CalibrationPhase::MeasuringCrossing {
            return Ok(None);
        }
        if self.session.samples_seen < self.session.target_samples {
            return Err(CalibrationError::InsufficientSamples {
                seen: self.session.samples_seen,
                target: self.session.target_samples,
            });
        }
        Ok(Some(self.finalize_crossing(ack.unwrap_or_default(), store)))
    }

    fn finalize_crossing(&mut self, ack: ControlAck, store: &mut ThresholdStore) -> CalibrationResult {
        let session = std::mem::replace(&mut self.session, CalibrationSession::finished(CalibrationPhase::Done));

        let max_peak = ack.max_peak.unwrap_or(session.max_peak);
        let max_noise = ack.max_noise.unwrap_or(session.max_noise);
        let computed = recommend(max_noise as i64, Some(max_peak as i64), &self.tuning());

        let source = if ack.rec_enter.is_some() || ack.rec_exit.is_some() {
            RecommendationSource::Device
        } else {
            RecommendationSource::Formula
        };
        let enter = ack.rec_enter.unwrap_or(computed.enter);
        let exit = ack.rec_exit.unwrap_or(computed.exit);
        let delta = ack.delta.unwrap_or(max_peak as i64 - max_noise as i64);
        let min_delta = ack.min_delta.unwrap_or(computed.min_delta);
        let device_flagged = ack.ok == Some(false) || ack.snr_ok == Some(false);

        store.apply(ThresholdPair::normalized(enter as i64, exit as i64));
        self.last_noise = Some(max_noise);

        let result = CalibrationResult {
            stage: CalibrationStage::Crossing,
            max_noise,
            max_peak,
            avg_peak: None,
            delta,
            min_delta,
            thresholds: store.get(),
            source,
            low_confidence: device_flagged || delta < min_delta as i64,
        };
        log_result(&result, session.samples_seen);
        result
    }

    /// Called when a phase outlives its timeout. Finalizes with what was collected
    /// when that is enough, otherwise cancels and reports why.
    pub fn on_timeout(&mut self, store: &mut ThresholdStore) -> Result<Option<CalibrationResult>, CalibrationError> {
        let seen = self.session.samples_seen;
        let target = self.session.target_samples;
        let phase = self.session.phase;
        match phase {
            CalibrationPhase::MeasuringNoise if seen > 0 => Ok(self.finish_noise(None, store)),
            CalibrationPhase::AwaitingNoiseAck => {
                tracing::info!("no noise acknowledgement; finalizing from {} local samples", seen);
                Ok(self.finish_noise(None, store))
            }
            CalibrationPhase::MeasuringCrossing if seen >= target => {
                Ok(Some(self.finalize_crossing(ControlAck::default(), store)))
            }
            _ if phase.is_active() => {
                tracing::warn!("{:?} timed out with {} of {} samples; cancelling", phase, seen, target);
                self.cancel();
                Err(CalibrationError::InsufficientSamples { seen, target })
            }
            _ => Ok(None),
        }
    }

    /// Drop the running session. Thresholds keep their last written value.
    pub fn cancel(&mut self) -> bool {
        if self.session.phase == CalibrationPhase::Idle {
            return false;
        }
        tracing::info!("calibration cancelled in {:?} after {} samples", self.session.phase, self.session.samples_seen);
        self.session = CalibrationSession::default();
        true
    }

    /// Cancel and forget the measured noise floor.
    pub fn reset(&mut self) {
        self.cancel();
        self.last_noise = None;
    }
}

fn log_result(result: &CalibrationResult, samples_seen: u32) {
    tracing::info!(
        "{:?} calibration done samples={} noise={} peak={} delta={} min_delta={} enter={} exit={} source={:?}",
        result.stage,
        samples_seen,
        result.max_noise,
        result.max_peak,
        result.delta,
        result.min_delta,
        result.thresholds.enter,
        result.thresholds.exit,
        result.source
    );
    if result.low_confidence {
        tracing::warn!(
            "signal delta {} below required {}; adjust gate position/antenna or recalibrate",
            result.delta, result.min_delta
        );
    }
}
