// Leveling domain models.
//
// Pure data, no Discord types. Ids are raw u64 snowflakes so the same types
// work for the SQLite store, the in-memory store and the tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Where a chunk of experience came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceSource {
    Message,
    FrogCapture,
    /// Granted by an administrator command.
    Manual,
}

impl ExperienceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceSource::Message => "message",
            ExperienceSource::FrogCapture => "frog_capture",
            ExperienceSource::Manual => "manual",
        }
    }
}

impl fmt::Display for ExperienceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable row of the experience ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceEvent {
    pub guild_id: u64,
    pub member_id: u64,
    pub amount: u64,
    pub occurred_at: DateTime<Utc>,
    pub source: ExperienceSource,
}

/// Cached per-member counters.
///
/// `lifetime_xp` must equal the sum of the member's ledger rows; reconciliation
/// overwrites it from the ledger when the two drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberExperienceState {
    pub guild_id: u64,
    pub member_id: u64,
    pub lifetime_xp: u64,
    /// Messages rewarded since the count last reset. Drives the decay curve.
    pub message_count: u64,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl MemberExperienceState {
    pub fn new(guild_id: u64, member_id: u64) -> Self {
        Self {
            guild_id,
            member_id,
            lifetime_xp: 0,
            message_count: 0,
            cooldown_until: None,
            last_message_at: None,
        }
    }
}

/// Aggregation scope for experience, levels and rank roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// The current calendar quarter (UTC).
    Seasonal,
    Lifetime,
}

impl WindowMode {
    pub const ALL: [WindowMode; 2] = [WindowMode::Seasonal, WindowMode::Lifetime];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowMode::Seasonal => "seasonal",
            WindowMode::Lifetime => "lifetime",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "seasonal" => Some(WindowMode::Seasonal),
            "lifetime" => Some(WindowMode::Lifetime),
            _ => None,
        }
    }
}

impl fmt::Display for WindowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrator-configured "reach level N, get role R" rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankThreshold {
    pub guild_id: u64,
    pub role_id: u64,
    pub level: u32,
    pub mode: WindowMode,
}

/// One row of a ranked aggregation. Ties share `rank`; the next rank skips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedTotal {
    pub rank: u32,
    pub member_id: u64,
    pub total_xp: u64,
}

/// Before/after levels for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub old_level: u32,
    pub new_level: u32,
}

impl LevelChange {
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }
}

/// Returned after experience has been written.
#[derive(Debug, Clone)]
pub struct ExperienceGrant {
    pub event: ExperienceEvent,
    pub lifetime_xp: u64,
    pub seasonal_xp: u64,
    pub lifetime: LevelChange,
    pub seasonal: LevelChange,
}

impl ExperienceGrant {
    pub fn change_for(&self, mode: WindowMode) -> LevelChange {
        match mode {
            WindowMode::Seasonal => self.seasonal,
            WindowMode::Lifetime => self.lifetime,
        }
    }
}

/// What happened to a single message.
#[derive(Debug, Clone)]
pub enum MessageOutcome {
    Granted(ExperienceGrant),
    OnCooldown { remaining: Duration },
}

/// Snapshot used by the `/rank` command.
#[derive(Debug, Clone)]
pub struct MemberProgress {
    pub guild_id: u64,
    pub member_id: u64,
    pub lifetime_xp: u64,
    pub seasonal_xp: u64,
    pub lifetime_level: u32,
    pub seasonal_level: u32,
    pub lifetime_rank_role: Option<u64>,
    pub seasonal_rank_role: Option<u64>,
    pub next_level_xp: Option<u64>,
}
