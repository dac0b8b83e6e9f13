//! Search around the configured drop percentage for the enter/exit pair whose
//! exit level best reproduces the expected signal-drop duration.

use crate::tuning::round_half_up;
use serde::Serialize;

/// Telemetry is polled every 200 ms during calibration
pub const CALIBRATION_SAMPLES_PER_SECOND: f64 = 5.0;

const MAX_CANDIDATES: usize = 20;
const DROP_STEP: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Combination {
    pub enter: i64,
    pub exit: i64,
    pub drop_percentage: f64,
    pub score: u32,
}

/// Returns `None` when fewer than `sample_count` samples are available.
///
/// Otherwise always returns a candidate, even when every score is zero; the
/// first generated candidate wins in that case.
pub fn find_best_combination(
    samples: &[u8],
    noise: i64,
    peak: i64,
    drop_percentage: f64,
    drop_duration_s: f64,
    sample_count: usize,
) -> Option<Combination> {
    if samples.len() < sample_count {
        return None;
    }

    let delta = (peak - noise) as f64;
    let count = sample_count.min(MAX_CANDIDATES);
    let half = (count / 2) as i64;

    let mut best: Option<Combination> = None;
    for i in 0..count {
        let offset = (i as i64 - half) as f64 * DROP_STEP;
        let drop = (drop_percentage + offset).clamp(0.1, 0.9);
        let enter = round_half_up(noise as f64 + delta * (1.0 - drop * 0.7));
        let exit = round_half_up(noise as f64 + delta * (1.0 - drop * 1.3));
        let score = evaluate_combination(samples, enter, exit, drop_duration_s);

        let candidate = Combination {
            enter,
            exit,
            drop_percentage: drop,
            score,
        };
        tracing::debug!("candidate drop={:.2} enter={} exit={} score={}", drop, enter, exit, score);
        match best {
            Some(b) if b.score >= score => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Score one enter/exit pair against the recorded samples.
pub fn evaluate_combination(samples: &[u8], enter: i64, exit: i64, drop_duration_s: f64) -> u32 {
    let mut score = 0;

    if enter > exit {
        score += 10;
    }
    // Bounds carried over from dBm-style readings; never hit by 0..=255 RSSI.
    if enter > -100 && enter < 0 {
        score += 5;
    }
    if exit > -100 && exit < 0 {
        score += 5;
    }

    let longest = longest_run_below(samples, exit) as f64;
    let required = drop_duration_s * CALIBRATION_SAMPLES_PER_SECOND;
    if longest >= required {
        score += 15;
    } else if longest >= required * 0.8 {
        score += 10;
    } else if longest >= required * 0.5 {
        score += 5;
    }

    score
}

fn longest_run_below(samples: &[u8], level: i64) -> usize {
    let mut run = 0;
    let mut longest = 0;
    for &s in samples {
        if (s as i64) < level {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest
}
