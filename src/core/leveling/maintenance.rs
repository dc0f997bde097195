// Periodic jobs: ledger reconciliation and the seasonal role rollover.
//
// Each job holds its own guard, so a tick that fires while the previous run
// is still going is skipped instead of stacking up. The last successful run
// is persisted through the JobLedger port and survives restarts.

use super::leveling_models::WindowMode;
use super::leveling_service::LevelingService;
use super::leveling_store::{LevelingError, LevelingStore, RoleGateway};
use super::seasons::Season;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const RECONCILE_JOB: &str = "reconcile";
pub const SEASON_ROLLOVER_JOB: &str = "season_rollover";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    NotDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Number of members touched.
    Ran(usize),
    Skipped(SkipReason),
}

pub struct MaintenanceJobs<S: LevelingStore> {
    leveling: Arc<LevelingService<S>>,
    reconcile_guard: Mutex<()>,
    rollover_guard: Mutex<()>,
}

impl<S: LevelingStore> MaintenanceJobs<S> {
    pub fn new(leveling: Arc<LevelingService<S>>) -> Self {
        Self {
            leveling,
            reconcile_guard: Mutex::new(()),
            rollover_guard: Mutex::new(()),
        }
    }

    /// Reconcile every known guild if the configured interval has passed.
    pub async fn run_reconciliation(&self, now: DateTime<Utc>) -> Result<JobOutcome, LevelingError> {
        let Ok(_guard) = self.reconcile_guard.try_lock() else {
            tracing::debug!("Reconciliation already running, skipping tick");
            return Ok(JobOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        let store = self.leveling.store();
        let interval = chrono::Duration::from_std(self.leveling.config().reconcile_interval())
            .unwrap_or_else(|_| chrono::Duration::zero());
        if let Some(last) = store.last_run(RECONCILE_JOB).await? {
            if now - last < interval {
                return Ok(JobOutcome::Skipped(SkipReason::NotDue));
            }
        }

        let mut repaired = 0;
        for guild_id in store.known_guilds().await? {
            match self.leveling.reconcile_guild(guild_id).await {
                Ok(count) => repaired += count,
                Err(e) => tracing::error!(guild_id, "Reconciliation failed: {e}"),
            }
        }

        store.set_last_run(RECONCILE_JOB, now).await?;
        tracing::info!(repaired, "Reconciliation pass complete");
        Ok(JobOutcome::Ran(repaired))
    }

    /// Once per season, re-sync every member's seasonal rank role. Seasonal
    /// totals start from zero, so most seasonal roles come off here.
    pub async fn run_season_rollover<R: RoleGateway>(
        &self,
        roles: &R,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome, LevelingError> {
        let Ok(_guard) = self.rollover_guard.try_lock() else {
            tracing::debug!("Season rollover already running, skipping tick");
            return Ok(JobOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        let store = self.leveling.store();
        let season = Season::containing(now);
        if let Some(last) = store.last_run(SEASON_ROLLOVER_JOB).await? {
            if Season::containing(last) >= season {
                return Ok(JobOutcome::Skipped(SkipReason::NotDue));
            }
        }

        let mut synced = 0;
        for guild_id in store.known_guilds().await? {
            if store
                .list_thresholds(guild_id, WindowMode::Seasonal)
                .await?
                .is_empty()
            {
                continue;
            }
            for member_id in store.guild_members(guild_id).await? {
                match self
                    .leveling
                    .sync_member(roles, guild_id, member_id, &[WindowMode::Seasonal], now)
                    .await
                {
                    Ok(_) => synced += 1,
                    Err(e) => tracing::warn!(guild_id, member_id, "Seasonal resync failed: {e}"),
                }
            }
        }

        store.set_last_run(SEASON_ROLLOVER_JOB, now).await?;
        tracing::info!(season = %season, synced, "Season rollover complete");
        Ok(JobOutcome::Ran(synced))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::leveling::{ExperienceSource, ExperienceStore, LevelingConfig};
    use crate::infra::leveling::InMemoryLevelingStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    const GUILD: u64 = 5;
    const MEMBER: u64 = 6;
    const SEASON_ROLE: u64 = 700;

    struct Roles(StdMutex<HashSet<u64>>);

    #[async_trait]
    impl RoleGateway for Roles {
        async fn current_roles(&self, _: u64, _: u64) -> Result<HashSet<u64>, LevelingError> {
            Ok(self.0.lock().unwrap().clone())
        }

        async fn guild_roles(&self, _: u64) -> Result<HashSet<u64>, LevelingError> {
            Ok(HashSet::from([SEASON_ROLE]))
        }

        async fn add_role(&self, _: u64, _: u64, role_id: u64) -> Result<(), LevelingError> {
            self.0.lock().unwrap().insert(role_id);
            Ok(())
        }

        async fn remove_role(&self, _: u64, _: u64, role_id: u64) -> Result<(), LevelingError> {
            self.0.lock().unwrap().remove(&role_id);
            Ok(())
        }
    }

    fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, day, hour, 0, 0).unwrap()
    }

    fn jobs() -> (Arc<LevelingService<InMemoryLevelingStore>>, MaintenanceJobs<InMemoryLevelingStore>) {
        let service = Arc::new(LevelingService::new(
            InMemoryLevelingStore::new(),
            LevelingConfig::default(),
        ));
        let jobs = MaintenanceJobs::new(Arc::clone(&service));
        (service, jobs)
    }

    #[tokio::test]
    async fn reconciliation_respects_the_interval() {
        let (service, jobs) = jobs();
        service
            .award_experience(GUILD, MEMBER, 10, ExperienceSource::Manual, at(1, 1, 0))
            .await
            .unwrap();
        let mut state = service
            .store()
            .get_member_state(GUILD, MEMBER)
            .await
            .unwrap()
            .unwrap();
        state.lifetime_xp = 3;
        service.store().put_member_state(&state).await.unwrap();

        assert_eq!(
            jobs.run_reconciliation(at(1, 1, 1)).await.unwrap(),
            JobOutcome::Ran(1)
        );
        assert_eq!(
            jobs.run_reconciliation(at(1, 1, 2)).await.unwrap(),
            JobOutcome::Skipped(SkipReason::NotDue)
        );
        assert_eq!(
            jobs.run_reconciliation(at(1, 2, 2)).await.unwrap(),
            JobOutcome::Ran(0)
        );
    }

    #[tokio::test]
    async fn concurrent_run_is_skipped() {
        let (_service, jobs) = jobs();
        let _held = jobs.reconcile_guard.lock().await;
        assert_eq!(
            jobs.run_reconciliation(at(1, 1, 0)).await.unwrap(),
            JobOutcome::Skipped(SkipReason::AlreadyRunning)
        );
    }

    #[tokio::test]
    async fn rollover_strips_last_seasons_roles_once() {
        let (service, jobs) = jobs();
        service
            .add_threshold(GUILD, SEASON_ROLE, 1, WindowMode::Seasonal)
            .await
            .unwrap();
        let needed = service.level_curve().experience_for_level(1).unwrap();
        service
            .award_experience(GUILD, MEMBER, needed, ExperienceSource::Manual, at(3, 20, 0))
            .await
            .unwrap();
        let roles = Roles(StdMutex::new(HashSet::from([SEASON_ROLE])));

        // Same quarter: the member keeps the role.
        jobs.run_season_rollover(&roles, at(3, 25, 0)).await.unwrap();
        assert!(roles.0.lock().unwrap().contains(&SEASON_ROLE));

        // New quarter: seasonal total is zero, the role comes off.
        assert_eq!(
            jobs.run_season_rollover(&roles, at(4, 1, 1)).await.unwrap(),
            JobOutcome::Ran(1)
        );
        assert!(roles.0.lock().unwrap().is_empty());

        assert_eq!(
            jobs.run_season_rollover(&roles, at(4, 20, 0)).await.unwrap(),
            JobOutcome::Skipped(SkipReason::NotDue)
        );
    }
}
