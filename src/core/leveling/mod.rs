// Leveling: experience, levels, rank roles and leaderboards.
// Pure business logic - no serenity or poise imports below this point.

pub mod experience_curve;
pub mod level_curve;
pub mod leveling_config;
pub mod leveling_models;
pub mod leveling_service;
pub mod leveling_store;
pub mod maintenance;
pub mod rank_thresholds;
pub mod role_sync;
pub mod scoreboard;
pub mod seasons;

pub use experience_curve::ExperienceCurve;
pub use level_curve::LevelCurve;
pub use leveling_config::{LevelingConfig, CONFIG_VERSION};
pub use leveling_models::{
    ExperienceEvent, ExperienceGrant, ExperienceSource, LevelChange, MemberExperienceState,
    MemberProgress, MessageOutcome, RankThreshold, RankedTotal, WindowMode,
};
pub use leveling_service::{GuildResyncReport, LevelingService, ReconcileOutcome};
pub use leveling_store::{
    ExperienceStore, JobLedger, LevelingError, LevelingStore, RoleGateway, ThresholdStore,
};
pub use maintenance::{JobOutcome, MaintenanceJobs, SkipReason};
pub use role_sync::{RankUp, RoleSyncReport};
pub use scoreboard::{RenderedLeaderboard, TableStyle};
pub use seasons::{Season, TimeWindow};
