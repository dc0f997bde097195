// Experience -> level curve.
//
// Two asymptotic envelopes bound the level. A cosine staircase blends from the
// lower envelope towards the upper one in `cycles` eased steps, so early levels
// come quickly and later ones slow down with small plateaus in between.
//
// The continuous curve is only evaluated once per level at construction: for
// every level we binary-search the smallest experience that reaches it and keep
// the results in a table. Lookups are a partition point on that table, so the
// mapping is non-decreasing even where float rounding is not.

use super::leveling_config::{Envelope, LevelCurveConfig};
use std::f64::consts::PI;

#[derive(Debug, Clone)]
pub struct LevelCurve {
    config: LevelCurveConfig,
    /// `thresholds[i]` = minimum experience for level `i + 1`.
    thresholds: Vec<u64>,
}

impl LevelCurve {
    pub fn new(config: LevelCurveConfig) -> Self {
        let mut thresholds = Vec::new();
        let mut floor = 1u64;
        let mut level = 1u32;
        while (level as f64) < config.upper.y_limit {
            let Some(min_xp) = smallest_experience_for(&config, level as f64, floor) else {
                break;
            };
            thresholds.push(min_xp);
            floor = min_xp;
            level += 1;
        }
        Self { config, thresholds }
    }

    pub fn level_from_experience(&self, experience: u64) -> u32 {
        self.thresholds.partition_point(|&min_xp| min_xp <= experience) as u32
    }

    /// Minimum experience for `level`, `None` past the last reachable level.
    pub fn experience_for_level(&self, level: u32) -> Option<u64> {
        match level {
            0 => Some(0),
            n => self.thresholds.get(n as usize - 1).copied(),
        }
    }

    pub fn max_level(&self) -> u32 {
        self.thresholds.len() as u32
    }
}

fn envelope(e: &Envelope, x: f64) -> f64 {
    let span = e.y_limit - e.x_intercept;
    span * (1.0 - 1.0 / (span * x + 1.0).powf(e.approach)) + e.x_intercept
}

/// Non-decreasing staircase in [0, 1]: each of the `cycles` steps is a
/// half-cosine ease from one plateau to the next.
fn blend(config: &LevelCurveConfig, x: f64) -> f64 {
    let progress = (x / (x + 1.0)).powf(config.skew);
    let phase = progress * config.cycles as f64;
    let step = phase.floor();
    let within = phase - step;
    let eased = (1.0 - (PI * within).cos()) / 2.0;
    ((step + eased) / config.cycles as f64).clamp(0.0, 1.0)
}

fn raw_level(config: &LevelCurveConfig, experience: u64) -> f64 {
    if experience == 0 {
        return 0.0;
    }
    let x = experience as f64 / config.experience_scale;
    let lower = envelope(&config.lower, x);
    let upper = envelope(&config.upper, x).max(lower);
    lower + blend(config, x) * (upper - lower)
}

fn smallest_experience_for(config: &LevelCurveConfig, level: f64, floor: u64) -> Option<u64> {
    let mut hi = config.max_experience;
    if hi < floor || raw_level(config, hi) < level {
        return None;
    }
    let mut lo = floor;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if raw_level(config, mid) >= level {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Some(lo)
}
