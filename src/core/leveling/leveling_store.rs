// Ports for the leveling system.
//
// The core says WHAT it needs from storage and from the chat platform; the
// infra and discord layers decide HOW.

use super::leveling_models::{
    ExperienceEvent, MemberExperienceState, RankThreshold, RankedTotal, WindowMode,
};
use super::seasons::TimeWindow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LevelingError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("A rank threshold for role {role_id} or level {level} already exists")]
    DuplicateThreshold { role_id: u64, level: u32 },

    #[error("No rank threshold configured for role {0}")]
    ThresholdNotFound(u64),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Role {0} no longer exists in the guild")]
    RoleNotFound(u64),

    #[error("Invalid member or guild ID")]
    InvalidId,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Chat platform error: {0}")]
    PlatformError(String),
}

// ============================================================================
// STORAGE TRAITS
// ============================================================================

/// Append-only experience ledger plus the cached member counters.
#[async_trait]
pub trait ExperienceStore: Send + Sync {
    /// Append one ledger row. Never overwrites.
    async fn append_event(&self, event: &ExperienceEvent) -> Result<(), LevelingError>;

    /// Append a ledger row and write the member's new cached state atomically.
    async fn record_grant(
        &self,
        event: &ExperienceEvent,
        state: &MemberExperienceState,
    ) -> Result<(), LevelingError>;

    /// Sum of a member's ledger rows inside `window`.
    async fn sum_events(
        &self,
        guild_id: u64,
        member_id: u64,
        window: TimeWindow,
    ) -> Result<u64, LevelingError>;

    /// Per-member totals inside `window`, highest first, with competition ranks.
    /// A window without events yields an empty vec.
    async fn ranked_totals(
        &self,
        guild_id: u64,
        window: TimeWindow,
    ) -> Result<Vec<RankedTotal>, LevelingError>;

    async fn get_member_state(
        &self,
        guild_id: u64,
        member_id: u64,
    ) -> Result<Option<MemberExperienceState>, LevelingError>;

    async fn put_member_state(&self, state: &MemberExperienceState) -> Result<(), LevelingError>;

    /// Every member with either cached state or ledger rows in the guild.
    async fn guild_members(&self, guild_id: u64) -> Result<Vec<u64>, LevelingError>;

    /// Every guild the store knows about.
    async fn known_guilds(&self) -> Result<Vec<u64>, LevelingError>;
}

/// Rank threshold configuration. Uniqueness is enforced by the service before
/// writes, the store only persists.
#[async_trait]
pub trait ThresholdStore: Send + Sync {
    /// Thresholds for one window mode, ascending by level.
    async fn list_thresholds(
        &self,
        guild_id: u64,
        mode: WindowMode,
    ) -> Result<Vec<RankThreshold>, LevelingError>;

    async fn add_threshold(&self, threshold: &RankThreshold) -> Result<(), LevelingError>;

    /// Returns false when nothing was removed.
    async fn remove_threshold(&self, guild_id: u64, role_id: u64) -> Result<bool, LevelingError>;
}

/// Persisted "last run" timestamps for periodic jobs.
#[async_trait]
pub trait JobLedger: Send + Sync {
    async fn last_run(&self, job: &str) -> Result<Option<DateTime<Utc>>, LevelingError>;

    async fn set_last_run(&self, job: &str, at: DateTime<Utc>) -> Result<(), LevelingError>;
}

/// Everything the leveling service needs from one backing store.
pub trait LevelingStore: ExperienceStore + ThresholdStore + JobLedger {}

impl<T: ExperienceStore + ThresholdStore + JobLedger> LevelingStore for T {}

// ============================================================================
// ROLE GATEWAY
// ============================================================================

/// Role mutation on the chat platform. Adding a held role or removing an
/// unheld one is a no-op.
#[async_trait]
pub trait RoleGateway: Send + Sync {
    async fn current_roles(
        &self,
        guild_id: u64,
        member_id: u64,
    ) -> Result<HashSet<u64>, LevelingError>;

    /// Roles that still exist in the guild.
    async fn guild_roles(&self, guild_id: u64) -> Result<HashSet<u64>, LevelingError>;

    async fn add_role(
        &self,
        guild_id: u64,
        member_id: u64,
        role_id: u64,
    ) -> Result<(), LevelingError>;

    async fn remove_role(
        &self,
        guild_id: u64,
        member_id: u64,
        role_id: u64,
    ) -> Result<(), LevelingError>;
}
