// Message reward curve.
//
// The first message after a reset is worth `base * bonus`. The reward stays
// near that peak at first, falls off towards `messages_until_base` and is
// exactly `base` from then on:
//
//   reward(c) = base + (peak - base) * (1 - (c / until)^decay)

use super::leveling_config::ExperienceCurveConfig;
use super::leveling_store::LevelingError;

#[derive(Debug, Clone)]
pub struct ExperienceCurve {
    config: ExperienceCurveConfig,
    /// `cumulative[n]` = experience earned by the first `n` messages after a reset.
    cumulative: Vec<u64>,
}

impl ExperienceCurve {
    pub fn new(config: ExperienceCurveConfig) -> Self {
        let until = config.messages_until_base;
        let mut cumulative = Vec::with_capacity(until as usize + 1);
        cumulative.push(0);
        let mut total = 0u64;
        for count in 0..until {
            total = total.saturating_add(Self::reward_at(&config, count));
            cumulative.push(total);
        }
        Self { config, cumulative }
    }

    /// Reward for a message given how many messages were rewarded before it.
    pub fn reward_for_message(&self, message_count: i64) -> Result<u64, LevelingError> {
        if message_count < 0 {
            return Err(LevelingError::InvalidArgument(format!(
                "message count must not be negative, got {message_count}"
            )));
        }
        let count = message_count as u64;
        if count >= self.config.messages_until_base {
            return Ok(self.config.base_reward);
        }
        Ok(self.total_after(count + 1) - self.total_after(count))
    }

    /// Experience earned by the first `messages` messages after a reset.
    pub fn total_after(&self, messages: u64) -> u64 {
        match self.cumulative.get(messages as usize) {
            Some(total) => *total,
            None => {
                let tail = messages - self.config.messages_until_base;
                let last = self.cumulative.last().copied().unwrap_or(0);
                last.saturating_add(tail.saturating_mul(self.config.base_reward))
            }
        }
    }

    fn reward_at(config: &ExperienceCurveConfig, count: u64) -> u64 {
        let base = config.base_reward;
        if count >= config.messages_until_base {
            return base;
        }
        let peak = base.saturating_mul(config.bonus_multiplier).max(base);
        let progress = count as f64 / config.messages_until_base as f64;
        let eased = 1.0 - progress.powf(config.decay_exponent);
        let reward = base as f64 + (peak - base) as f64 * eased;
        (reward.round() as u64).clamp(base, peak)
    }
}
