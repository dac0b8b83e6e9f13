//! Lap timing from gate `Enter` events.
//!
//! The first entry after a race starts is the opening lap (index 0): it marks
//! when the pilot first crossed the gate and carries no duration. Every entry
//! after that closes a lap measured from the previous entry.

use crate::types::{CrossingEvent, CrossingKind, LapRecord, PilotKey};
use serde::Serialize;
use std::collections::HashMap;

/// Running statistics for one pilot/channel, built by folding lap records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PilotStats {
    pub lap_count: u32,
    pub lap_times: Vec<f64>,
    pub total: f64,
    pub average: f64,
    pub fastest: Option<f64>,
    pub consecutive_count: u32,
}

impl PilotStats {
    /// Fold one lap in. Opening laps are ignored.
    pub fn record(&mut self, lap: &LapRecord) {
        if lap.is_opening() {
            return;
        }
        let duration = lap.duration_seconds;
        self.lap_count += 1;
        self.lap_times.push(duration);
        self.total += duration;
        self.average = round3(self.total / self.lap_count as f64);
        self.fastest = Some(match self.fastest {
            Some(best) => best.min(duration),
            None => duration,
        });
        self.consecutive_count += 1;
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Default)]
struct PilotLaps {
    last_enter_ms: Option<i64>,
    laps: Vec<LapRecord>,
    stats: PilotStats,
}

impl PilotLaps {
    fn is_empty(&self) -> bool {
        self.last_enter_ms.is_none() && self.laps.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LapTimer {
    pilots: HashMap<PilotKey, PilotLaps>,
    active: Option<PilotKey>,
    /// Entries closer than this to the previous one are ignored; 0 disables
    min_lap_ms: u32,
}

impl LapTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_lap_ms(min_lap_ms: u32) -> Self {
        Self {
            min_lap_ms,
            ..Self::default()
        }
    }

    pub fn min_lap_ms(&self) -> u32 {
        self.min_lap_ms
    }

    pub fn set_min_lap_ms(&mut self, min_lap_ms: u32) {
        self.min_lap_ms = min_lap_ms;
    }

    pub fn active_pilot(&self) -> Option<&PilotKey> {
        self.active.as_ref()
    }

    /// Make `key` the active pilot and wipe its previous laps.
    pub fn start_race(&mut self, key: PilotKey) {
        self.pilots.insert(key.clone(), PilotLaps::default());
        self.active = Some(key);
    }

    /// Drop the active pilot's laps and opening marker. Returns false when there was nothing to clear.
    pub fn clear_laps(&mut self) -> bool {
        let Some(key) = self.active.as_ref() else {
            return false;
        };
        match self.pilots.get_mut(key) {
            Some(entry) if !entry.is_empty() => {
                *entry = PilotLaps::default();
                true
            }
            _ => false,
        }
    }

    /// Handle a crossing event. Only `Enter` while `race_active` produces a lap.
    pub fn on_crossing(&mut self, event: &CrossingEvent, race_active: bool) -> Option<LapRecord> {
        if !race_active || event.kind != CrossingKind::Enter {
            return None;
        }
        let key = self.active.as_ref()?;
        let entry = self.pilots.entry(key.clone()).or_default();
        let ts = event.sample.timestamp;

        let record = match entry.last_enter_ms {
            None => LapRecord {
                index: 0,
                duration_seconds: 0.0,
                cumulative_seconds: 0.0,
            },
            Some(last) => {
                let elapsed_ms = ts.saturating_sub(last);
                if elapsed_ms <= 0 {
                    tracing::debug!("ignoring enter at {}ms: not after previous enter at {}ms", ts, last);
                    return None;
                }
                if self.min_lap_ms > 0 && elapsed_ms < self.min_lap_ms as i64 {
                    tracing::debug!(
                        "ignoring enter at {}ms: {}ms since last enter is under min lap {}ms",
                        ts, elapsed_ms, self.min_lap_ms
                    );
                    return None;
                }
                let duration = elapsed_ms as f64 / 1000.0;
                LapRecord {
                    index: entry.laps.len() as u32,
                    duration_seconds: duration,
                    cumulative_seconds: entry.stats.total + duration,
                }
            }
        };

        entry.last_enter_ms = Some(ts);
        entry.stats.record(&record);
        entry.laps.push(record);
        Some(record)
    }

    pub fn laps(&self, key: &PilotKey) -> &[LapRecord] {
        self.pilots.get(key).map(|p| p.laps.as_slice()).unwrap_or(&[])
    }

    pub fn stats(&self, key: &PilotKey) -> Option<&PilotStats> {
        self.pilots.get(key).map(|p| &p.stats)
    }
}
