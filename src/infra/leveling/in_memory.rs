// In-memory implementation of the leveling ports.
//
// Used by the tests and handy for running the bot without a database file.
// Nothing survives a restart.

use crate::core::leveling::{
    ExperienceEvent, ExperienceStore, JobLedger, LevelingError, MemberExperienceState,
    RankThreshold, RankedTotal, ThresholdStore, TimeWindow, WindowMode,
};
use crate::core::leveling::rank_thresholds::{check_new_threshold, sort_thresholds};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};

/// Ledger rows and cached counters for one member, kept under one map entry
/// so a grant updates both while holding a single shard lock.
#[derive(Debug, Default)]
struct MemberRecord {
    state: Option<MemberExperienceState>,
    events: Vec<ExperienceEvent>,
}

/// **DashMap:** a concurrent HashMap, so every port method takes `&self`
/// without an outer Mutex.
pub struct InMemoryLevelingStore {
    /// (guild_id, member_id) -> record
    members: DashMap<(u64, u64), MemberRecord>,
    /// guild_id -> every threshold of that guild, both modes
    thresholds: DashMap<u64, Vec<RankThreshold>>,
    job_runs: DashMap<String, DateTime<Utc>>,
}

impl InMemoryLevelingStore {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            thresholds: DashMap::new(),
            job_runs: DashMap::new(),
        }
    }
}

impl Default for InMemoryLevelingStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort totals highest first and assign competition ranks: equal totals share
/// a rank and the next distinct total skips ahead (1, 2, 2, 4).
pub(crate) fn competition_ranked(mut totals: Vec<(u64, u64)>) -> Vec<RankedTotal> {
    totals.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut ranked = Vec::with_capacity(totals.len());
    let mut previous: Option<(u64, u32)> = None;
    for (position, (member_id, total_xp)) in totals.into_iter().enumerate() {
        let rank = match previous {
            Some((prev_total, prev_rank)) if prev_total == total_xp => prev_rank,
            _ => position as u32 + 1,
        };
        previous = Some((total_xp, rank));
        ranked.push(RankedTotal {
            rank,
            member_id,
            total_xp,
        });
    }
    ranked
}

#[async_trait]
impl ExperienceStore for InMemoryLevelingStore {
    async fn append_event(&self, event: &ExperienceEvent) -> Result<(), LevelingError> {
        self.members
            .entry((event.guild_id, event.member_id))
            .or_default()
            .events
            .push(event.clone());
        Ok(())
    }

    async fn record_grant(
        &self,
        event: &ExperienceEvent,
        state: &MemberExperienceState,
    ) -> Result<(), LevelingError> {
        if (event.guild_id, event.member_id) != (state.guild_id, state.member_id) {
            return Err(LevelingError::InvalidArgument(
                "event and state belong to different members".to_string(),
            ));
        }
        let mut record = self
            .members
            .entry((event.guild_id, event.member_id))
            .or_default();
        record.events.push(event.clone());
        record.state = Some(state.clone());
        Ok(())
    }

    async fn sum_events(
        &self,
        guild_id: u64,
        member_id: u64,
        window: TimeWindow,
    ) -> Result<u64, LevelingError> {
        Ok(self
            .members
            .get(&(guild_id, member_id))
            .map(|record| {
                record
                    .events
                    .iter()
                    .filter(|e| window.contains(e.occurred_at))
                    .fold(0u64, |sum, e| sum.saturating_add(e.amount))
            })
            .unwrap_or(0))
    }

    async fn ranked_totals(
        &self,
        guild_id: u64,
        window: TimeWindow,
    ) -> Result<Vec<RankedTotal>, LevelingError> {
        let mut totals: HashMap<u64, u64> = HashMap::new();
        for entry in self.members.iter().filter(|e| e.key().0 == guild_id) {
            for event in entry.events.iter().filter(|e| window.contains(e.occurred_at)) {
                let total = totals.entry(entry.key().1).or_default();
                *total = total.saturating_add(event.amount);
            }
        }
        Ok(competition_ranked(totals.into_iter().collect()))
    }

    async fn get_member_state(
        &self,
        guild_id: u64,
        member_id: u64,
    ) -> Result<Option<MemberExperienceState>, LevelingError> {
        Ok(self
            .members
            .get(&(guild_id, member_id))
            .and_then(|record| record.state.clone()))
    }

    async fn put_member_state(&self, state: &MemberExperienceState) -> Result<(), LevelingError> {
        self.members
            .entry((state.guild_id, state.member_id))
            .or_default()
            .state = Some(state.clone());
        Ok(())
    }

    async fn guild_members(&self, guild_id: u64) -> Result<Vec<u64>, LevelingError> {
        let members: BTreeSet<u64> = self
            .members
            .iter()
            .filter(|e| e.key().0 == guild_id)
            .map(|e| e.key().1)
            .collect();
        Ok(members.into_iter().collect())
    }

    async fn known_guilds(&self) -> Result<Vec<u64>, LevelingError> {
        let guilds: BTreeSet<u64> = self
            .members
            .iter()
            .map(|e| e.key().0)
            .chain(
                self.thresholds
                    .iter()
                    .filter(|e| !e.value().is_empty())
                    .map(|e| *e.key()),
            )
            .collect();
        Ok(guilds.into_iter().collect())
    }
}

#[async_trait]
impl ThresholdStore for InMemoryLevelingStore {
    async fn list_thresholds(
        &self,
        guild_id: u64,
        mode: WindowMode,
    ) -> Result<Vec<RankThreshold>, LevelingError> {
        let mut thresholds: Vec<RankThreshold> = self
            .thresholds
            .get(&guild_id)
            .map(|ladder| ladder.iter().filter(|t| t.mode == mode).cloned().collect())
            .unwrap_or_default();
        sort_thresholds(&mut thresholds);
        Ok(thresholds)
    }

    async fn add_threshold(&self, threshold: &RankThreshold) -> Result<(), LevelingError> {
        // The entry guard holds the shard lock, so check and insert are one step.
        let mut ladder = self.thresholds.entry(threshold.guild_id).or_default();
        check_new_threshold(&ladder, threshold)?;
        ladder.push(threshold.clone());
        Ok(())
    }

    async fn remove_threshold(&self, guild_id: u64, role_id: u64) -> Result<bool, LevelingError> {
        let Some(mut ladder) = self.thresholds.get_mut(&guild_id) else {
            return Ok(false);
        };
        let before = ladder.len();
        ladder.retain(|t| t.role_id != role_id);
        Ok(ladder.len() != before)
    }
}

#[async_trait]
impl JobLedger for InMemoryLevelingStore {
    async fn last_run(&self, job: &str) -> Result<Option<DateTime<Utc>>, LevelingError> {
        Ok(self.job_runs.get(job).map(|at| *at))
    }

    async fn set_last_run(&self, job: &str, at: DateTime<Utc>) -> Result<(), LevelingError> {
        // Keep the latest timestamp even if runs finish out of order.
        self.job_runs
            .entry(job.to_string())
            .and_modify(|last| *last = (*last).max(at))
            .or_insert(at);
        Ok(())
    }
}
