// Leveling configuration.
//
// One explicit struct per curve instead of free-form settings blobs. Every
// field has a serde default so older files keep loading; `migrate` bumps the
// version and `validate` rejects values the curves cannot work with.

use super::leveling_store::LevelingError;
use super::scoreboard::TableStyle;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperienceCurveConfig {
    /// Reward once the decay has run out.
    pub base_reward: u64,
    /// The first message after a reset earns `base_reward * bonus_multiplier`.
    pub bonus_multiplier: u64,
    /// Message count at which the reward reaches `base_reward`.
    pub messages_until_base: u64,
    pub decay_exponent: f64,
}

impl Default for ExperienceCurveConfig {
    fn default() -> Self {
        Self {
            base_reward: 1,
            bonus_multiplier: 20,
            messages_until_base: 77,
            decay_exponent: 2.0,
        }
    }
}

/// `(y_limit - x_intercept) * (1 - 1/((y_limit - x_intercept)*x + 1)^approach) + x_intercept`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub x_intercept: f64,
    pub y_limit: f64,
    pub approach: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelCurveConfig {
    /// Experience that maps to x = 1.0 on the envelopes.
    pub experience_scale: f64,
    /// Number of cosine steps between the lower and upper envelope.
    pub cycles: u32,
    /// Exponent on the blend progress. Below 1 front-loads the steps.
    pub skew: f64,
    pub lower: Envelope,
    pub upper: Envelope,
    /// Levels not reached by this much experience are never handed out.
    pub max_experience: u64,
}

impl Default for LevelCurveConfig {
    fn default() -> Self {
        Self {
            experience_scale: 2_000_000.0,
            cycles: 8,
            skew: 0.5,
            lower: Envelope {
                x_intercept: 0.0,
                y_limit: 100.0,
                approach: 0.5,
            },
            upper: Envelope {
                x_intercept: 2.0,
                y_limit: 120.0,
                approach: 0.6,
            },
            max_experience: 1_000_000_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelingConfig {
    pub version: u32,
    pub experience: ExperienceCurveConfig,
    pub level_curve: LevelCurveConfig,
    pub cooldown_secs: u64,
    /// Idle time after which the decay curve starts over.
    pub message_count_reset_secs: u64,
    pub leaderboard_window: usize,
    pub table: TableStyle,
    pub reconcile_interval_secs: u64,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            experience: ExperienceCurveConfig::default(),
            level_curve: LevelCurveConfig::default(),
            cooldown_secs: 60,
            message_count_reset_secs: 60 * 60 * 24,
            leaderboard_window: 5,
            table: TableStyle::default(),
            reconcile_interval_secs: 60 * 60 * 6,
        }
    }
}

impl LevelingConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn message_count_reset(&self) -> Duration {
        Duration::from_secs(self.message_count_reset_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Bring a config written by an older build up to the current version.
    /// Fields that did not exist yet were already defaulted by serde.
    pub fn migrate(mut self) -> Result<Self, LevelingError> {
        if self.version > CONFIG_VERSION {
            return Err(LevelingError::ConfigError(format!(
                "config version {} is newer than supported version {}",
                self.version, CONFIG_VERSION
            )));
        }
        if self.version < CONFIG_VERSION {
            tracing::info!(
                from = self.version,
                to = CONFIG_VERSION,
                "Migrating leveling config"
            );
            self.version = CONFIG_VERSION;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), LevelingError> {
        let exp = &self.experience;
        if exp.base_reward == 0 || exp.bonus_multiplier == 0 {
            return Err(config_error("base_reward and bonus_multiplier must be positive"));
        }
        if exp.messages_until_base == 0 {
            return Err(config_error("messages_until_base must be positive"));
        }
        if !(exp.decay_exponent.is_finite() && exp.decay_exponent > 0.0) {
            return Err(config_error("decay_exponent must be a positive number"));
        }

        let curve = &self.level_curve;
        if !(curve.experience_scale.is_finite() && curve.experience_scale > 0.0) {
            return Err(config_error("experience_scale must be positive"));
        }
        if curve.cycles == 0 {
            return Err(config_error("cycles must be at least 1"));
        }
        if !(curve.skew.is_finite() && curve.skew > 0.0) {
            return Err(config_error("skew must be positive"));
        }
        if curve.lower.x_intercept != 0.0 {
            return Err(config_error("lower envelope must start at 0"));
        }
        for envelope in [curve.lower, curve.upper] {
            if !(envelope.approach.is_finite() && envelope.approach > 0.0) {
                return Err(config_error("envelope approach must be positive"));
            }
            if envelope.y_limit <= envelope.x_intercept {
                return Err(config_error("envelope y_limit must exceed its x_intercept"));
            }
        }
        if curve.upper.x_intercept < curve.lower.x_intercept
            || curve.upper.y_limit < curve.lower.y_limit
        {
            return Err(config_error("upper envelope must lie above the lower envelope"));
        }

        if self.leaderboard_window == 0 || self.leaderboard_window % 2 == 0 {
            return Err(config_error("leaderboard_window must be a positive odd number"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> LevelingError {
    LevelingError::ConfigError(message.to_string())
}
