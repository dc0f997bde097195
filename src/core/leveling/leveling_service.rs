// This is the leveling service - it ties the curves, the ledger and the rank
// ladder together. Like the rest of core/, it has NO Discord-specific code:
// ids are plain u64 and role changes go through the `RoleGateway` port.

use super::experience_curve::ExperienceCurve;
use super::level_curve::LevelCurve;
use super::leveling_config::LevelingConfig;
use super::leveling_models::{
    ExperienceEvent, ExperienceGrant, ExperienceSource, LevelChange, MemberExperienceState,
    MemberProgress, MessageOutcome, RankThreshold, RankedTotal, WindowMode,
};
use super::leveling_store::{LevelingError, LevelingStore, RoleGateway};
use super::rank_thresholds::{check_new_threshold, resolve_rank};
use super::role_sync::{compute_role_delta, RankUp, RoleDelta, RoleSyncReport};
use super::scoreboard::{render_leaderboard, LeaderboardEntry, RenderedLeaderboard};
use super::seasons::TimeWindow;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Result of comparing a member's cached total with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub member_id: u64,
    pub cached_xp: u64,
    pub ledger_xp: u64,
}

impl ReconcileOutcome {
    pub fn repaired(&self) -> bool {
        self.cached_xp != self.ledger_xp
    }
}

/// Totals for a guild-wide `/resync`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildResyncReport {
    pub repaired: usize,
    pub members: usize,
    pub roles_added: usize,
    pub roles_removed: usize,
    pub missing_roles: BTreeSet<u64>,
}

type MemberLocks = DashMap<(u64, u64), Arc<Mutex<()>>>;

/// One member's lock. Dropping it also drops the map entry when no other
/// task is waiting on the same member.
struct MemberGuard<'a> {
    locks: &'a MemberLocks,
    key: (u64, u64),
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for MemberGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// The main service for leveling operations.
///
/// Generic over the store so tests run against the in-memory implementation
/// and production against SQLite.
pub struct LevelingService<S: LevelingStore> {
    store: S,
    config: LevelingConfig,
    experience_curve: ExperienceCurve,
    level_curve: LevelCurve,
    /// Serializes read-modify-write of one member's counters.
    member_locks: MemberLocks,
}

impl<S: LevelingStore> LevelingService<S> {
    pub fn new(store: S, config: LevelingConfig) -> Self {
        Self {
            experience_curve: ExperienceCurve::new(config.experience.clone()),
            level_curve: LevelCurve::new(config.level_curve.clone()),
            store,
            config,
            member_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LevelingConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn level_curve(&self) -> &LevelCurve {
        &self.level_curve
    }

    pub fn level_from_experience(&self, experience: u64) -> u32 {
        self.level_curve.level_from_experience(experience)
    }

    fn validate_ids(guild_id: u64, member_id: u64) -> Result<(), LevelingError> {
        if guild_id == 0 || member_id == 0 {
            Err(LevelingError::InvalidId)
        } else {
            Ok(())
        }
    }

    async fn lock_member(&self, guild_id: u64, member_id: u64) -> MemberGuard<'_> {
        let key = (guild_id, member_id);
        let lock = self.member_locks.entry(key).or_default().clone();
        MemberGuard {
            locks: &self.member_locks,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn load_state(
        &self,
        guild_id: u64,
        member_id: u64,
    ) -> Result<MemberExperienceState, LevelingError> {
        Ok(self
            .store
            .get_member_state(guild_id, member_id)
            .await?
            .unwrap_or_else(|| MemberExperienceState::new(guild_id, member_id)))
    }

    /// Handle one chat message.
    ///
    /// **Returns:**
    /// - `Granted` once the ledger row and new counters are written
    /// - `OnCooldown` if the member earned experience too recently
    /// - `Err(...)` for invalid ids and storage failures
    pub async fn process_message(
        &self,
        guild_id: u64,
        member_id: u64,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome, LevelingError> {
        Self::validate_ids(guild_id, member_id)?;
        let _guard = self.lock_member(guild_id, member_id).await;

        let mut state = self.load_state(guild_id, member_id).await?;
        if let Some(until) = state.cooldown_until {
            if until > now {
                let remaining = (until - now).to_std().unwrap_or_default();
                return Ok(MessageOutcome::OnCooldown { remaining });
            }
        }

        let reset_after = chrono_duration(self.config.message_count_reset());
        let idle_too_long = state
            .last_message_at
            .map_or(true, |last| now - last >= reset_after);
        if idle_too_long {
            state.message_count = 0;
        }

        let count = i64::try_from(state.message_count).unwrap_or(i64::MAX);
        let reward = self.experience_curve.reward_for_message(count)?;

        state.message_count = state.message_count.saturating_add(1);
        state.cooldown_until = Some(now + chrono_duration(self.config.cooldown()));
        state.last_message_at = Some(now);

        let grant = self
            .write_grant(state, reward, ExperienceSource::Message, now)
            .await?;
        Ok(MessageOutcome::Granted(grant))
    }

    /// Grant experience outside the message flow (frog captures, admin
    /// grants). Ignores the cooldown and leaves the decay counter alone.
    pub async fn award_experience(
        &self,
        guild_id: u64,
        member_id: u64,
        amount: u64,
        source: ExperienceSource,
        now: DateTime<Utc>,
    ) -> Result<ExperienceGrant, LevelingError> {
        Self::validate_ids(guild_id, member_id)?;
        if amount == 0 {
            return Err(LevelingError::InvalidArgument(
                "awarded experience must be positive".to_string(),
            ));
        }
        let _guard = self.lock_member(guild_id, member_id).await;

        let state = self.load_state(guild_id, member_id).await?;
        self.write_grant(state, amount, source, now).await
    }

    /// Append the ledger row, bump the cached total and compute level changes.
    /// The caller holds the member lock.
    async fn write_grant(
        &self,
        mut state: MemberExperienceState,
        amount: u64,
        source: ExperienceSource,
        now: DateTime<Utc>,
    ) -> Result<ExperienceGrant, LevelingError> {
        let (guild_id, member_id) = (state.guild_id, state.member_id);
        let season = TimeWindow::for_mode(WindowMode::Seasonal, now);
        let seasonal_before = self.store.sum_events(guild_id, member_id, season).await?;

        let lifetime_before = state.lifetime_xp;
        state.lifetime_xp = state.lifetime_xp.saturating_add(amount);

        let event = ExperienceEvent {
            guild_id,
            member_id,
            amount,
            occurred_at: now,
            source,
        };
        self.store.record_grant(&event, &state).await?;

        let seasonal_after = seasonal_before.saturating_add(amount);
        let grant = ExperienceGrant {
            lifetime_xp: state.lifetime_xp,
            seasonal_xp: seasonal_after,
            lifetime: LevelChange {
                old_level: self.level_from_experience(lifetime_before),
                new_level: self.level_from_experience(state.lifetime_xp),
            },
            seasonal: LevelChange {
                old_level: self.level_from_experience(seasonal_before),
                new_level: self.level_from_experience(seasonal_after),
            },
            event,
        };

        tracing::debug!(
            guild_id,
            member_id,
            amount,
            source = %source,
            lifetime_xp = grant.lifetime_xp,
            seasonal_xp = grant.seasonal_xp,
            "Experience granted"
        );
        Ok(grant)
    }

    /// Lifetime total from the cached counters. May briefly drift from the
    /// ledger; reconciliation repairs that.
    pub async fn lifetime_total(&self, guild_id: u64, member_id: u64) -> Result<u64, LevelingError> {
        Self::validate_ids(guild_id, member_id)?;
        Ok(self
            .store
            .get_member_state(guild_id, member_id)
            .await?
            .map_or(0, |state| state.lifetime_xp))
    }

    pub async fn member_progress(
        &self,
        guild_id: u64,
        member_id: u64,
        now: DateTime<Utc>,
    ) -> Result<MemberProgress, LevelingError> {
        let lifetime_xp = self.lifetime_total(guild_id, member_id).await?;
        let seasonal_xp = self
            .store
            .sum_events(
                guild_id,
                member_id,
                TimeWindow::for_mode(WindowMode::Seasonal, now),
            )
            .await?;
        let lifetime_level = self.level_from_experience(lifetime_xp);
        let seasonal_level = self.level_from_experience(seasonal_xp);

        let lifetime_ladder = self.thresholds(guild_id, WindowMode::Lifetime).await?;
        let seasonal_ladder = self.thresholds(guild_id, WindowMode::Seasonal).await?;

        Ok(MemberProgress {
            guild_id,
            member_id,
            lifetime_xp,
            seasonal_xp,
            lifetime_level,
            seasonal_level,
            lifetime_rank_role: resolve_rank(lifetime_level, &lifetime_ladder).map(|r| r.role_id),
            seasonal_rank_role: resolve_rank(seasonal_level, &seasonal_ladder).map(|r| r.role_id),
            next_level_xp: self.level_curve.experience_for_level(lifetime_level + 1),
        })
    }

    /// Ranked totals for the window a mode covers at `now`.
    pub async fn ranked_totals(
        &self,
        guild_id: u64,
        mode: WindowMode,
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedTotal>, LevelingError> {
        if guild_id == 0 {
            return Err(LevelingError::InvalidId);
        }
        self.store
            .ranked_totals(guild_id, TimeWindow::for_mode(mode, now))
            .await
    }

    /// Leaderboard text centered on `focus_member`.
    pub async fn leaderboard(
        &self,
        guild_id: u64,
        mode: WindowMode,
        focus_member: Option<u64>,
        now: DateTime<Utc>,
        name_of: impl Fn(u64) -> String,
    ) -> Result<RenderedLeaderboard, LevelingError> {
        let entries: Vec<LeaderboardEntry> = self
            .ranked_totals(guild_id, mode, now)
            .await?
            .into_iter()
            .map(|row| LeaderboardEntry {
                rank: row.rank,
                member_id: row.member_id,
                total_xp: row.total_xp,
                level: self.level_from_experience(row.total_xp),
            })
            .collect();

        Ok(render_leaderboard(
            &entries,
            focus_member,
            self.config.leaderboard_window,
            &self.config.table,
            name_of,
        ))
    }

    // ------------------------------------------------------------------------
    // Rank ladder administration
    // ------------------------------------------------------------------------

    pub async fn thresholds(
        &self,
        guild_id: u64,
        mode: WindowMode,
    ) -> Result<Vec<RankThreshold>, LevelingError> {
        self.store.list_thresholds(guild_id, mode).await
    }

    async fn all_thresholds(&self, guild_id: u64) -> Result<Vec<RankThreshold>, LevelingError> {
        let mut all = Vec::new();
        for mode in WindowMode::ALL {
            all.extend(self.store.list_thresholds(guild_id, mode).await?);
        }
        Ok(all)
    }

    pub async fn add_threshold(
        &self,
        guild_id: u64,
        role_id: u64,
        level: u32,
        mode: WindowMode,
    ) -> Result<RankThreshold, LevelingError> {
        Self::validate_ids(guild_id, role_id)?;
        let threshold = RankThreshold {
            guild_id,
            role_id,
            level,
            mode,
        };
        check_new_threshold(&self.all_thresholds(guild_id).await?, &threshold)?;
        self.store.add_threshold(&threshold).await?;

        tracing::info!(guild_id, role_id, level, mode = %mode, "Rank threshold added");
        Ok(threshold)
    }

    pub async fn remove_threshold(&self, guild_id: u64, role_id: u64) -> Result<(), LevelingError> {
        Self::validate_ids(guild_id, role_id)?;
        if !self.store.remove_threshold(guild_id, role_id).await? {
            return Err(LevelingError::ThresholdNotFound(role_id));
        }
        tracing::info!(guild_id, role_id, "Rank threshold removed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Role synchronization
    // ------------------------------------------------------------------------

    /// Bring the member's rank roles in line after a grant.
    ///
    /// Levels are read again under the member lock, so a sync that runs after
    /// a newer grant applies the newer levels. The grant only supplies the
    /// starting level used to detect promotions.
    pub async fn sync_after_grant<R: RoleGateway>(
        &self,
        roles: &R,
        grant: &ExperienceGrant,
    ) -> Result<RoleSyncReport, LevelingError> {
        let (guild_id, member_id) = (grant.event.guild_id, grant.event.member_id);
        let _guard = self.lock_member(guild_id, member_id).await;

        let mut changes = self
            .current_levels(guild_id, member_id, &WindowMode::ALL, grant.event.occurred_at)
            .await?;
        for (mode, change) in &mut changes {
            change.old_level = grant.change_for(*mode).old_level.min(change.new_level);
        }
        self.sync_rank_roles(roles, guild_id, member_id, &changes)
            .await
    }

    /// Re-derive the member's current levels and converge their roles for
    /// the given modes. Used by `/resync` and the seasonal rollover.
    pub async fn sync_member<R: RoleGateway>(
        &self,
        roles: &R,
        guild_id: u64,
        member_id: u64,
        modes: &[WindowMode],
        now: DateTime<Utc>,
    ) -> Result<RoleSyncReport, LevelingError> {
        let _guard = self.lock_member(guild_id, member_id).await;
        let changes = self.current_levels(guild_id, member_id, modes, now).await?;
        self.sync_rank_roles(roles, guild_id, member_id, &changes)
            .await
    }

    /// Ledger-derived level per mode at `now`, as an unchanged `LevelChange`.
    async fn current_levels(
        &self,
        guild_id: u64,
        member_id: u64,
        modes: &[WindowMode],
        now: DateTime<Utc>,
    ) -> Result<Vec<(WindowMode, LevelChange)>, LevelingError> {
        let mut changes = Vec::with_capacity(modes.len());
        for &mode in modes {
            let xp = self
                .store
                .sum_events(guild_id, member_id, TimeWindow::for_mode(mode, now))
                .await?;
            let level = self.level_from_experience(xp);
            changes.push((
                mode,
                LevelChange {
                    old_level: level,
                    new_level: level,
                },
            ));
        }
        Ok(changes)
    }

    /// Compute one delta per window mode, merge them and apply the result.
    ///
    /// Deleted roles and individual add/remove failures are logged and
    /// reported, never returned as errors: experience is already recorded.
    async fn sync_rank_roles<R: RoleGateway>(
        &self,
        roles: &R,
        guild_id: u64,
        member_id: u64,
        changes: &[(WindowMode, LevelChange)],
    ) -> Result<RoleSyncReport, LevelingError> {
        let mut ladders = Vec::with_capacity(changes.len());
        for (mode, change) in changes {
            let ladder = self.store.list_thresholds(guild_id, *mode).await?;
            if !ladder.is_empty() {
                ladders.push((*mode, *change, ladder));
            }
        }
        let mut report = RoleSyncReport::default();
        if ladders.is_empty() {
            return Ok(report);
        }

        let held = roles.current_roles(guild_id, member_id).await?;
        let existing = roles.guild_roles(guild_id).await?;

        let mut delta = RoleDelta::default();
        for (mode, change, ladder) in &ladders {
            let transition =
                compute_role_delta(change.old_level, change.new_level, ladder, &held);
            if let Some(rank) = transition.ranked_up() {
                if existing.contains(&rank.role_id) {
                    report.ranked_up.push(RankUp {
                        mode: *mode,
                        role_id: rank.role_id,
                        level: change.new_level,
                    });
                }
            }
            delta = delta.merge(transition.delta);
        }

        report.missing_roles = delta.retain_existing(&existing);
        for role_id in &report.missing_roles {
            tracing::warn!(
                guild_id,
                member_id,
                role_id,
                "{}",
                LevelingError::RoleNotFound(*role_id)
            );
        }
        if delta.is_empty() {
            return Ok(report);
        }

        for role_id in delta.add {
            match roles.add_role(guild_id, member_id, role_id).await {
                Ok(()) => report.added.push(role_id),
                Err(e) => {
                    tracing::warn!(guild_id, member_id, role_id, "Failed to add rank role: {e}");
                    report.failures.push((role_id, e.to_string()));
                }
            }
        }
        for role_id in delta.remove {
            match roles.remove_role(guild_id, member_id, role_id).await {
                Ok(()) => report.removed.push(role_id),
                Err(e) => {
                    tracing::warn!(
                        guild_id,
                        member_id,
                        role_id,
                        "Failed to remove rank role: {e}"
                    );
                    report.failures.push((role_id, e.to_string()));
                }
            }
        }

        if !report.added.is_empty() || !report.removed.is_empty() {
            tracing::info!(
                guild_id,
                member_id,
                added = ?report.added,
                removed = ?report.removed,
                "Rank roles synchronized"
            );
        }
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Drift repair
    // ------------------------------------------------------------------------

    /// Overwrite the cached lifetime total with the ledger sum. Idempotent.
    pub async fn reconcile_member(
        &self,
        guild_id: u64,
        member_id: u64,
    ) -> Result<ReconcileOutcome, LevelingError> {
        Self::validate_ids(guild_id, member_id)?;
        let _guard = self.lock_member(guild_id, member_id).await;

        let ledger_xp = self
            .store
            .sum_events(guild_id, member_id, TimeWindow::unbounded())
            .await?;
        let mut state = self.load_state(guild_id, member_id).await?;
        let outcome = ReconcileOutcome {
            member_id,
            cached_xp: state.lifetime_xp,
            ledger_xp,
        };

        if outcome.repaired() {
            tracing::warn!(
                guild_id,
                member_id,
                cached_xp = outcome.cached_xp,
                ledger_xp,
                "Cached experience drifted from the ledger, repairing"
            );
            state.lifetime_xp = ledger_xp;
            self.store.put_member_state(&state).await?;
        }
        Ok(outcome)
    }

    /// Reconcile every member of a guild. Returns how many were repaired.
    pub async fn reconcile_guild(&self, guild_id: u64) -> Result<usize, LevelingError> {
        let mut repaired = 0;
        for member_id in self.store.guild_members(guild_id).await? {
            if self.reconcile_member(guild_id, member_id).await?.repaired() {
                repaired += 1;
            }
        }
        tracing::info!(guild_id, repaired, "Guild reconciliation finished");
        Ok(repaired)
    }

    /// Repair drift, then converge every member's rank roles in both modes.
    pub async fn resync_guild<R: RoleGateway>(
        &self,
        roles: &R,
        guild_id: u64,
        now: DateTime<Utc>,
    ) -> Result<GuildResyncReport, LevelingError> {
        let mut report = GuildResyncReport {
            repaired: self.reconcile_guild(guild_id).await?,
            ..GuildResyncReport::default()
        };
        for member_id in self.store.guild_members(guild_id).await? {
            let synced = self
                .sync_member(roles, guild_id, member_id, &WindowMode::ALL, now)
                .await?;
            report.members += 1;
            report.roles_added += synced.added.len();
            report.roles_removed += synced.removed.len();
            report.missing_roles.extend(synced.missing_roles);
        }
        Ok(report)
    }
}

fn chrono_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::leveling::ExperienceStore;
    use crate::infra::leveling::InMemoryLevelingStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    const GUILD: u64 = 10;
    const MEMBER: u64 = 20;

    /// Role gateway that records calls against an in-memory member.
    #[derive(Default)]
    struct MockRoles {
        held: StdMutex<HashSet<u64>>,
        guild: StdMutex<HashSet<u64>>,
        failing: StdMutex<HashSet<u64>>,
    }

    impl MockRoles {
        fn with_guild_roles(roles: &[u64]) -> Self {
            let mock = Self::default();
            mock.guild.lock().unwrap().extend(roles.iter().copied());
            mock
        }

        fn held(&self) -> HashSet<u64> {
            self.held.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RoleGateway for MockRoles {
        async fn current_roles(&self, _: u64, _: u64) -> Result<HashSet<u64>, LevelingError> {
            Ok(self.held())
        }

        async fn guild_roles(&self, _: u64) -> Result<HashSet<u64>, LevelingError> {
            Ok(self.guild.lock().unwrap().clone())
        }

        async fn add_role(&self, _: u64, _: u64, role_id: u64) -> Result<(), LevelingError> {
            if self.failing.lock().unwrap().contains(&role_id) {
                return Err(LevelingError::StorageError("http 500".into()));
            }
            self.held.lock().unwrap().insert(role_id);
            Ok(())
        }

        async fn remove_role(&self, _: u64, _: u64, role_id: u64) -> Result<(), LevelingError> {
            self.held.lock().unwrap().remove(&role_id);
            Ok(())
        }
    }

    fn service() -> LevelingService<InMemoryLevelingStore> {
        LevelingService::new(InMemoryLevelingStore::new(), LevelingConfig::default())
    }

    fn noon(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, day, 12, 0, 0).unwrap()
    }

    fn granted(outcome: MessageOutcome) -> ExperienceGrant {
        match outcome {
            MessageOutcome::Granted(grant) => grant,
            MessageOutcome::OnCooldown { .. } => panic!("expected a grant"),
        }
    }

    #[tokio::test]
    async fn first_message_earns_the_bonus_and_starts_cooldown() {
        let service = service();
        let now = noon(5, 1);

        let grant = granted(service.process_message(GUILD, MEMBER, now).await.unwrap());
        assert_eq!(grant.event.amount, 20);
        assert_eq!(grant.lifetime_xp, 20);
        assert_eq!(grant.seasonal_xp, 20);

        let outcome = service
            .process_message(GUILD, MEMBER, now + chrono::Duration::seconds(10))
            .await
            .unwrap();
        match outcome {
            MessageOutcome::OnCooldown { remaining } => assert_eq!(remaining.as_secs(), 50),
            MessageOutcome::Granted(_) => panic!("cooldown ignored"),
        }
    }

    #[tokio::test]
    async fn rewards_decay_then_reset_after_idle() {
        let service = service();
        let mut now = noon(5, 1);
        let mut rewards = Vec::new();
        for _ in 0..3 {
            rewards.push(
                granted(service.process_message(GUILD, MEMBER, now).await.unwrap())
                    .event
                    .amount,
            );
            now += chrono::Duration::seconds(61);
        }
        assert!(rewards[0] >= rewards[1] && rewards[1] >= rewards[2]);
        assert_eq!(
            rewards.iter().sum::<u64>(),
            service.experience_curve.total_after(3)
        );

        let later = now + chrono::Duration::days(2);
        let grant = granted(service.process_message(GUILD, MEMBER, later).await.unwrap());
        assert_eq!(grant.event.amount, 20);
    }

    #[tokio::test]
    async fn seasonal_total_restarts_each_quarter() {
        let service = service();
        granted(service.process_message(GUILD, MEMBER, noon(3, 30)).await.unwrap());
        let grant = granted(service.process_message(GUILD, MEMBER, noon(4, 2)).await.unwrap());

        assert_eq!(grant.seasonal_xp, grant.event.amount);
        assert!(grant.lifetime_xp > grant.seasonal_xp);
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected() {
        let service = service();
        assert!(matches!(
            service.process_message(0, MEMBER, noon(1, 1)).await,
            Err(LevelingError::InvalidId)
        ));
        assert!(matches!(
            service
                .award_experience(GUILD, MEMBER, 0, ExperienceSource::Manual, noon(1, 1))
                .await,
            Err(LevelingError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn frog_captures_skip_the_cooldown() {
        let service = service();
        let now = noon(6, 1);
        granted(service.process_message(GUILD, MEMBER, now).await.unwrap());
        let grant = service
            .award_experience(GUILD, MEMBER, 50, ExperienceSource::FrogCapture, now)
            .await
            .unwrap();

        assert_eq!(grant.lifetime_xp, 70);
        assert_eq!(grant.event.source, ExperienceSource::FrogCapture);
        assert_eq!(service.lifetime_total(GUILD, MEMBER).await.unwrap(), 70);
    }

    #[tokio::test]
    async fn ledger_sum_matches_recorded_events() {
        let service = service();
        let now = noon(8, 8);
        let amounts = [5u64, 17, 1, 230];
        for amount in amounts {
            service
                .award_experience(GUILD, MEMBER, amount, ExperienceSource::Manual, now)
                .await
                .unwrap();
        }
        let sum = service
            .store()
            .sum_events(GUILD, MEMBER, TimeWindow::for_mode(WindowMode::Seasonal, now))
            .await
            .unwrap();
        assert_eq!(sum, amounts.iter().sum::<u64>());
    }

    #[tokio::test]
    async fn concurrent_grants_are_not_lost() {
        let service = Arc::new(service());
        let now = noon(2, 2);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service
                    .award_experience(GUILD, MEMBER, 3, ExperienceSource::FrogCapture, now)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(service.lifetime_total(GUILD, MEMBER).await.unwrap(), 60);
        assert!(service.member_locks.is_empty());
    }

    #[tokio::test]
    async fn threshold_administration_enforces_uniqueness() {
        let service = service();
        service
            .add_threshold(GUILD, 1, 5, WindowMode::Lifetime)
            .await
            .unwrap();
        service
            .add_threshold(GUILD, 2, 10, WindowMode::Lifetime)
            .await
            .unwrap();

        assert!(matches!(
            service.add_threshold(GUILD, 3, 10, WindowMode::Lifetime).await,
            Err(LevelingError::DuplicateThreshold { .. })
        ));
        assert!(matches!(
            service.add_threshold(GUILD, 1, 30, WindowMode::Seasonal).await,
            Err(LevelingError::DuplicateThreshold { .. })
        ));
        assert!(matches!(
            service.remove_threshold(GUILD, 99).await,
            Err(LevelingError::ThresholdNotFound(99))
        ));

        service.remove_threshold(GUILD, 1).await.unwrap();
        let ladder = service.thresholds(GUILD, WindowMode::Lifetime).await.unwrap();
        assert_eq!(ladder.len(), 1);
        assert_eq!(ladder[0].role_id, 2);
    }

    #[tokio::test]
    async fn grant_promotes_and_cleans_rank_roles() {
        let service = service();
        let curve = service.level_curve().clone();
        service
            .add_threshold(GUILD, 101, 1, WindowMode::Lifetime)
            .await
            .unwrap();
        service
            .add_threshold(GUILD, 102, 3, WindowMode::Lifetime)
            .await
            .unwrap();

        let roles = MockRoles::with_guild_roles(&[101, 102]);
        roles.held.lock().unwrap().insert(101);

        let needed = curve.experience_for_level(3).unwrap();
        let grant = service
            .award_experience(GUILD, MEMBER, needed, ExperienceSource::Manual, noon(5, 5))
            .await
            .unwrap();
        let report = service.sync_after_grant(&roles, &grant).await.unwrap();

        assert_eq!(report.added, vec![102]);
        assert_eq!(report.removed, vec![101]);
        assert_eq!(report.ranked_up.len(), 1);
        assert_eq!(report.ranked_up[0].role_id, 102);
        assert_eq!(roles.held(), HashSet::from([102]));

        let again = service.sync_after_grant(&roles, &grant).await.unwrap();
        assert!(again.added.is_empty() && again.removed.is_empty());
    }

    #[tokio::test]
    async fn late_sync_of_an_older_grant_keeps_the_newer_rank() {
        let service = service();
        let curve = service.level_curve().clone();
        service
            .add_threshold(GUILD, 101, 1, WindowMode::Lifetime)
            .await
            .unwrap();
        service
            .add_threshold(GUILD, 102, 3, WindowMode::Lifetime)
            .await
            .unwrap();
        let roles = MockRoles::with_guild_roles(&[101, 102]);

        let level_one = curve.experience_for_level(1).unwrap();
        let older = service
            .award_experience(GUILD, MEMBER, level_one, ExperienceSource::Manual, noon(5, 5))
            .await
            .unwrap();
        let top_up = curve.experience_for_level(3).unwrap() - level_one;
        let newer = service
            .award_experience(GUILD, MEMBER, top_up, ExperienceSource::Manual, noon(5, 5))
            .await
            .unwrap();

        service.sync_after_grant(&roles, &newer).await.unwrap();
        assert_eq!(roles.held(), HashSet::from([102]));

        let stale = service.sync_after_grant(&roles, &older).await.unwrap();
        assert!(stale.added.is_empty() && stale.removed.is_empty());
        assert_eq!(roles.held(), HashSet::from([102]));
        assert!(service.member_locks.is_empty());
    }

    #[tokio::test]
    async fn deleted_rank_role_degrades_to_a_report() {
        let service = service();
        service
            .add_threshold(GUILD, 555, 1, WindowMode::Seasonal)
            .await
            .unwrap();
        let roles = MockRoles::with_guild_roles(&[]);

        let needed = service.level_curve().experience_for_level(1).unwrap();
        let grant = service
            .award_experience(GUILD, MEMBER, needed, ExperienceSource::Manual, noon(5, 5))
            .await
            .unwrap();
        let report = service.sync_after_grant(&roles, &grant).await.unwrap();

        assert_eq!(report.missing_roles, vec![555]);
        assert!(report.added.is_empty());
        assert!(report.ranked_up.is_empty());
        assert_eq!(service.lifetime_total(GUILD, MEMBER).await.unwrap(), needed);
    }

    #[tokio::test]
    async fn failed_role_calls_do_not_abort_the_sync() {
        let service = service();
        service
            .add_threshold(GUILD, 301, 1, WindowMode::Seasonal)
            .await
            .unwrap();
        service
            .add_threshold(GUILD, 302, 1, WindowMode::Lifetime)
            .await
            .unwrap();
        let roles = MockRoles::with_guild_roles(&[301, 302]);
        roles.failing.lock().unwrap().insert(301);

        let needed = service.level_curve().experience_for_level(1).unwrap();
        let grant = service
            .award_experience(GUILD, MEMBER, needed, ExperienceSource::Manual, noon(5, 5))
            .await
            .unwrap();
        let report = service.sync_after_grant(&roles, &grant).await.unwrap();

        assert_eq!(report.added, vec![302]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, 301);
    }

    #[tokio::test]
    async fn reconciliation_repairs_drift_and_is_idempotent() {
        let service = service();
        let now = noon(9, 9);
        service
            .award_experience(GUILD, MEMBER, 40, ExperienceSource::Manual, now)
            .await
            .unwrap();

        let mut state = service
            .store()
            .get_member_state(GUILD, MEMBER)
            .await
            .unwrap()
            .unwrap();
        state.lifetime_xp = 999;
        service.store().put_member_state(&state).await.unwrap();

        let first = service.reconcile_member(GUILD, MEMBER).await.unwrap();
        assert!(first.repaired());
        assert_eq!(service.lifetime_total(GUILD, MEMBER).await.unwrap(), 40);

        let second = service.reconcile_member(GUILD, MEMBER).await.unwrap();
        assert!(!second.repaired());
        assert_eq!(service.lifetime_total(GUILD, MEMBER).await.unwrap(), 40);
        assert_eq!(service.reconcile_guild(GUILD).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn guild_resync_heals_roles_after_ladder_edits() {
        let service = service();
        let now = noon(7, 7);
        let level_two = service.level_curve().experience_for_level(2).unwrap();
        service
            .award_experience(GUILD, MEMBER, level_two, ExperienceSource::Manual, now)
            .await
            .unwrap();
        service
            .add_threshold(GUILD, 41, 1, WindowMode::Lifetime)
            .await
            .unwrap();
        service
            .add_threshold(GUILD, 42, 2, WindowMode::Lifetime)
            .await
            .unwrap();
        let roles = MockRoles::with_guild_roles(&[41, 42]);
        roles.held.lock().unwrap().insert(41);

        let report = service.resync_guild(&roles, GUILD, now).await.unwrap();
        assert_eq!(report.members, 1);
        assert_eq!((report.roles_added, report.roles_removed), (1, 1));
        assert_eq!(roles.held(), HashSet::from([42]));

        let again = service.resync_guild(&roles, GUILD, now).await.unwrap();
        assert_eq!((again.roles_added, again.roles_removed), (0, 0));
    }

    #[tokio::test]
    async fn leaderboard_ranks_ties_and_highlights_the_caller() {
        let service = service();
        let now = noon(11, 11);
        for (member, amount) in [(1u64, 300u64), (2, 500), (3, 300), (4, 100)] {
            service
                .award_experience(GUILD, member, amount, ExperienceSource::Manual, now)
                .await
                .unwrap();
        }

        let totals = service
            .ranked_totals(GUILD, WindowMode::Lifetime, now)
            .await
            .unwrap();
        let ranks: Vec<u32> = totals.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4]);

        let board = service
            .leaderboard(GUILD, WindowMode::Seasonal, Some(4), now, |id| format!("user{id}"))
            .await
            .unwrap();
        let focus = board.focus_line.unwrap();
        assert!(board.lines[focus].starts_with('@'));
        assert!(board.lines[focus].contains("user4"));

        let empty = service
            .leaderboard(77, WindowMode::Lifetime, None, now, |id| id.to_string())
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn member_progress_reports_both_windows() {
        let service = service();
        service
            .add_threshold(GUILD, 900, 1, WindowMode::Lifetime)
            .await
            .unwrap();
        let needed = service.level_curve().experience_for_level(2).unwrap();
        service
            .award_experience(GUILD, MEMBER, needed, ExperienceSource::Manual, noon(1, 10))
            .await
            .unwrap();

        let progress = service
            .member_progress(GUILD, MEMBER, noon(4, 10))
            .await
            .unwrap();
        assert_eq!(progress.lifetime_level, 2);
        assert_eq!(progress.seasonal_xp, 0);
        assert_eq!(progress.seasonal_level, 0);
        assert_eq!(progress.lifetime_rank_role, Some(900));
        assert_eq!(progress.seasonal_rank_role, None);
        assert_eq!(
            progress.next_level_xp,
            service.level_curve().experience_for_level(3)
        );
    }
}
