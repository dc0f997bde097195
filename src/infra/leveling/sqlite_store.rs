use crate::core::leveling::rank_thresholds::sort_thresholds;
use crate::core::leveling::{
    ExperienceEvent, ExperienceStore, JobLedger, LevelingError, MemberExperienceState,
    RankThreshold, RankedTotal, ThresholdStore, TimeWindow, WindowMode,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

/// SQLite-backed store. Timestamps are INTEGER epoch milliseconds so window
/// filters compare numbers, not strings.
pub struct SqliteLevelingStore {
    pool: Pool<Sqlite>,
}

impl SqliteLevelingStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(database = %database_url, "Leveling store ready");
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS experience_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                member_id INTEGER NOT NULL,
                amount INTEGER NOT NULL CHECK (amount >= 0),
                occurred_at INTEGER NOT NULL,
                source TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_events_guild_time
                ON experience_events (guild_id, occurred_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_events_member
                ON experience_events (guild_id, member_id, occurred_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS member_state (
                guild_id INTEGER NOT NULL,
                member_id INTEGER NOT NULL,
                lifetime_xp INTEGER NOT NULL DEFAULT 0,
                message_count INTEGER NOT NULL DEFAULT 0,
                cooldown_until INTEGER,
                last_message_at INTEGER,
                PRIMARY KEY (guild_id, member_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rank_thresholds (
                guild_id INTEGER NOT NULL,
                role_id INTEGER NOT NULL,
                level INTEGER NOT NULL,
                mode TEXT NOT NULL,
                PRIMARY KEY (guild_id, role_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One role per level within a mode, so every ladder is strictly increasing.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_thresholds_level
                ON rank_thresholds (guild_id, mode, level);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_runs (
                job TEXT PRIMARY KEY,
                last_run INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn storage(e: sqlx::Error) -> LevelingError {
    LevelingError::StorageError(e.to_string())
}

fn to_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(|at| at.timestamp_millis())
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

fn row_to_state(row: &SqliteRow) -> Result<MemberExperienceState, LevelingError> {
    Ok(MemberExperienceState {
        guild_id: row.try_get::<i64, _>("guild_id").map_err(storage)? as u64,
        member_id: row.try_get::<i64, _>("member_id").map_err(storage)? as u64,
        lifetime_xp: row.try_get::<i64, _>("lifetime_xp").map_err(storage)? as u64,
        message_count: row.try_get::<i64, _>("message_count").map_err(storage)? as u64,
        cooldown_until: from_millis(row.try_get("cooldown_until").map_err(storage)?),
        last_message_at: from_millis(row.try_get("last_message_at").map_err(storage)?),
    })
}

fn row_to_threshold(row: &SqliteRow) -> Result<RankThreshold, LevelingError> {
    let mode: String = row.try_get("mode").map_err(storage)?;
    Ok(RankThreshold {
        guild_id: row.try_get::<i64, _>("guild_id").map_err(storage)? as u64,
        role_id: row.try_get::<i64, _>("role_id").map_err(storage)? as u64,
        level: row.try_get::<i64, _>("level").map_err(storage)? as u32,
        mode: WindowMode::parse(&mode)
            .ok_or_else(|| LevelingError::StorageError(format!("unknown window mode {mode}")))?,
    })
}

const INSERT_EVENT: &str = r#"
    INSERT INTO experience_events (guild_id, member_id, amount, occurred_at, source)
    VALUES (?, ?, ?, ?, ?)
"#;

const UPSERT_STATE: &str = r#"
    INSERT INTO member_state (
        guild_id, member_id, lifetime_xp, message_count, cooldown_until, last_message_at
    ) VALUES (?, ?, ?, ?, ?, ?)
    ON CONFLICT(guild_id, member_id) DO UPDATE SET
        lifetime_xp = excluded.lifetime_xp,
        message_count = excluded.message_count,
        cooldown_until = excluded.cooldown_until,
        last_message_at = excluded.last_message_at
"#;

fn insert_event(
    event: &ExperienceEvent,
) -> sqlx::query::Query<'static, Sqlite, sqlx::sqlite::SqliteArguments<'static>> {
    sqlx::query(INSERT_EVENT)
        .bind(event.guild_id as i64)
        .bind(event.member_id as i64)
        .bind(event.amount as i64)
        .bind(event.occurred_at.timestamp_millis())
        .bind(event.source.as_str())
}

fn upsert_state(
    state: &MemberExperienceState,
) -> sqlx::query::Query<'static, Sqlite, sqlx::sqlite::SqliteArguments<'static>> {
    sqlx::query(UPSERT_STATE)
        .bind(state.guild_id as i64)
        .bind(state.member_id as i64)
        .bind(state.lifetime_xp as i64)
        .bind(state.message_count as i64)
        .bind(to_millis(state.cooldown_until))
        .bind(to_millis(state.last_message_at))
}

#[async_trait]
impl ExperienceStore for SqliteLevelingStore {
    async fn append_event(&self, event: &ExperienceEvent) -> Result<(), LevelingError> {
        insert_event(event)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn record_grant(
        &self,
        event: &ExperienceEvent,
        state: &MemberExperienceState,
    ) -> Result<(), LevelingError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        insert_event(event).execute(&mut *tx).await.map_err(storage)?;
        upsert_state(state).execute(&mut *tx).await.map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn sum_events(
        &self,
        guild_id: u64,
        member_id: u64,
        window: TimeWindow,
    ) -> Result<u64, LevelingError> {
        let (start, end) = window.millis_bounds();
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) FROM experience_events
            WHERE guild_id = ? AND member_id = ? AND occurred_at >= ? AND occurred_at < ?
            "#,
        )
        .bind(guild_id as i64)
        .bind(member_id as i64)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.try_get::<i64, _>(0).map_err(storage)? as u64)
    }

    async fn ranked_totals(
        &self,
        guild_id: u64,
        window: TimeWindow,
    ) -> Result<Vec<RankedTotal>, LevelingError> {
        let (start, end) = window.millis_bounds();
        let rows = sqlx::query(
            r#"
            SELECT member_id, total, RANK() OVER (ORDER BY total DESC) AS rank
            FROM (
                SELECT member_id, SUM(amount) AS total FROM experience_events
                WHERE guild_id = ? AND occurred_at >= ? AND occurred_at < ?
                GROUP BY member_id
            )
            ORDER BY total DESC, member_id ASC
            "#,
        )
        .bind(guild_id as i64)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                Ok(RankedTotal {
                    rank: row.try_get::<i64, _>("rank").map_err(storage)? as u32,
                    member_id: row.try_get::<i64, _>("member_id").map_err(storage)? as u64,
                    total_xp: row.try_get::<i64, _>("total").map_err(storage)? as u64,
                })
            })
            .collect()
    }

    async fn get_member_state(
        &self,
        guild_id: u64,
        member_id: u64,
    ) -> Result<Option<MemberExperienceState>, LevelingError> {
        let row = sqlx::query("SELECT * FROM member_state WHERE guild_id = ? AND member_id = ?")
            .bind(guild_id as i64)
            .bind(member_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(row_to_state).transpose()
    }

    async fn put_member_state(&self, state: &MemberExperienceState) -> Result<(), LevelingError> {
        upsert_state(state)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn guild_members(&self, guild_id: u64) -> Result<Vec<u64>, LevelingError> {
        let rows = sqlx::query(
            r#"
            SELECT member_id FROM member_state WHERE guild_id = ?
            UNION
            SELECT member_id FROM experience_events WHERE guild_id = ?
            ORDER BY member_id
            "#,
        )
        .bind(guild_id as i64)
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| Ok(row.try_get::<i64, _>(0).map_err(storage)? as u64))
            .collect()
    }

    async fn known_guilds(&self) -> Result<Vec<u64>, LevelingError> {
        let rows = sqlx::query(
            r#"
            SELECT guild_id FROM member_state
            UNION
            SELECT guild_id FROM experience_events
            UNION
            SELECT guild_id FROM rank_thresholds
            ORDER BY guild_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| Ok(row.try_get::<i64, _>(0).map_err(storage)? as u64))
            .collect()
    }
}

#[async_trait]
impl ThresholdStore for SqliteLevelingStore {
    async fn list_thresholds(
        &self,
        guild_id: u64,
        mode: WindowMode,
    ) -> Result<Vec<RankThreshold>, LevelingError> {
        let rows = sqlx::query("SELECT * FROM rank_thresholds WHERE guild_id = ? AND mode = ?")
            .bind(guild_id as i64)
            .bind(mode.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        let mut thresholds = rows
            .iter()
            .map(row_to_threshold)
            .collect::<Result<Vec<_>, _>>()?;
        sort_thresholds(&mut thresholds);
        Ok(thresholds)
    }

    async fn add_threshold(&self, threshold: &RankThreshold) -> Result<(), LevelingError> {
        sqlx::query(
            r#"
            INSERT INTO rank_thresholds (guild_id, role_id, level, mode)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(threshold.guild_id as i64)
        .bind(threshold.role_id as i64)
        .bind(threshold.level as i64)
        .bind(threshold.mode.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                LevelingError::DuplicateThreshold {
                    role_id: threshold.role_id,
                    level: threshold.level,
                }
            }
            other => storage(other),
        })?;
        Ok(())
    }

    async fn remove_threshold(&self, guild_id: u64, role_id: u64) -> Result<bool, LevelingError> {
        let result = sqlx::query("DELETE FROM rank_thresholds WHERE guild_id = ? AND role_id = ?")
            .bind(guild_id as i64)
            .bind(role_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl JobLedger for SqliteLevelingStore {
    async fn last_run(&self, job: &str) -> Result<Option<DateTime<Utc>>, LevelingError> {
        let row = sqlx::query("SELECT last_run FROM job_runs WHERE job = ?")
            .bind(job)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        match row {
            Some(row) => Ok(from_millis(Some(
                row.try_get::<i64, _>("last_run").map_err(storage)?,
            ))),
            None => Ok(None),
        }
    }

    async fn set_last_run(&self, job: &str, at: DateTime<Utc>) -> Result<(), LevelingError> {
        sqlx::query(
            r#"
            INSERT INTO job_runs (job, last_run) VALUES (?, ?)
            ON CONFLICT(job) DO UPDATE SET last_run = MAX(last_run, excluded.last_run)
            "#,
        )
        .bind(job)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}
