//! SQLite backend.

use std::str::FromStr;

use {
    async_trait::async_trait,
    bulkwa_common::{Campaign, CampaignStatus, InvalidRecord, SessionRecord, SessionStatus},
    chrono::{DateTime, Utc},
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    },
    tracing::{debug, info},
};

use crate::{
    campaign::CampaignStore,
    error::{StoreError, StoreResult},
    heartbeat::{Heartbeat, HeartbeatStore},
    session::SessionStore,
};

const CAMPAIGN_COLUMNS: &str = "id, account_id, recipients, body, media_ref, pacing_ms, \
                                schedule_at, status, sent_count, failed_count, progress, \
                                started_at, completed_at, last_error, created_at";

/// Store backed by a SQLite database (WAL mode), migrated on connect.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and run migrations.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("sqlite store ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| InvalidRecord(format!("timestamp out of range: {ms}")).into())
}

fn opt_from_millis(ms: Option<i64>) -> StoreResult<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn count_from(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

fn session_from_row(row: &SqliteRow) -> StoreResult<SessionRecord> {
    let status: String = row.try_get("status")?;
    Ok(SessionRecord::restore(
        row.try_get("account_id")?,
        SessionStatus::from_str(&status)?,
        row.try_get("pairing_code")?,
        row.try_get("identity")?,
        from_millis(row.try_get("updated_at")?)?,
    )?)
}

fn campaign_from_row(row: &SqliteRow) -> StoreResult<Campaign> {
    let recipients: String = row.try_get("recipients")?;
    let status: String = row.try_get("status")?;
    let pacing_ms: i64 = row.try_get("pacing_ms")?;
    let progress: i64 = row.try_get("progress")?;
    Ok(Campaign {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        recipients: serde_json::from_str(&recipients)?,
        body: row.try_get("body")?,
        media_ref: row.try_get("media_ref")?,
        pacing_ms: u64::try_from(pacing_ms.max(0)).unwrap_or_default(),
        schedule_at: opt_from_millis(row.try_get("schedule_at")?)?,
        status: CampaignStatus::from_str(&status)?,
        sent_count: count_from(row.try_get("sent_count")?),
        failed_count: count_from(row.try_get("failed_count")?),
        progress: u8::try_from(progress.clamp(0, 100)).unwrap_or(100),
        started_at: opt_from_millis(row.try_get("started_at")?)?,
        completed_at: opt_from_millis(row.try_get("completed_at")?)?,
        last_error: row.try_get("last_error")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn upsert_session(&self, record: &SessionRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO whatsapp_sessions (account_id, status, pairing_code, identity, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(account_id) DO UPDATE SET
                 status = excluded.status,
                 pairing_code = excluded.pairing_code,
                 identity = excluded.identity,
                 updated_at = excluded.updated_at",
        )
        .bind(record.account_id())
        .bind(record.status().as_str())
        .bind(record.pairing_code())
        .bind(record.identity())
        .bind(to_millis(record.updated_at()))
        .execute(&self.pool)
        .await?;
        debug!(account_id = record.account_id(), status = %record.status(), "session row upserted");
        Ok(())
    }

    async fn get_session(&self, account_id: &str) -> StoreResult<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT account_id, status, pairing_code, identity, updated_at
             FROM whatsapp_sessions WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }
}

#[async_trait]
impl CampaignStore for SqliteStore {
    async fn insert_campaign(&self, campaign: &Campaign) -> StoreResult<()> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO campaigns ({CAMPAIGN_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO NOTHING"
        ))
        .bind(&campaign.id)
        .bind(&campaign.account_id)
        .bind(serde_json::to_string(&campaign.recipients)?)
        .bind(&campaign.body)
        .bind(&campaign.media_ref)
        .bind(clamp_i64(campaign.pacing_ms))
        .bind(campaign.schedule_at.map(to_millis))
        .bind(campaign.status.as_str())
        .bind(i64::from(campaign.sent_count))
        .bind(i64::from(campaign.failed_count))
        .bind(i64::from(campaign.progress))
        .bind(campaign.started_at.map(to_millis))
        .bind(campaign.completed_at.map(to_millis))
        .bind(&campaign.last_error)
        .bind(to_millis(campaign.created_at))
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::campaign_exists(&campaign.id));
        }
        Ok(())
    }

    async fn get_campaign(&self, id: &str) -> StoreResult<Option<Campaign>> {
        let row = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(campaign_from_row).transpose()
    }

    async fn list_pending(&self, limit: usize) -> StoreResult<Vec<Campaign>> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE status = 'pending'
             ORDER BY created_at ASC LIMIT ?"
        ))
        .bind(clamp_i64(limit as u64))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(campaign_from_row).collect()
    }

    async fn list_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Campaign>> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE status = 'scheduled' AND schedule_at <= ?
             ORDER BY schedule_at ASC LIMIT ?"
        ))
        .bind(to_millis(now))
        .bind(clamp_i64(limit as u64))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(campaign_from_row).collect()
    }

    async fn claim_campaign(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
    ) -> StoreResult<Option<Campaign>> {
        let claimed = sqlx::query(
            "UPDATE campaigns
             SET status = 'processing', started_at = COALESCE(started_at, ?)
             WHERE id = ? AND status IN ('pending', 'scheduled')",
        )
        .bind(to_millis(started_at))
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if claimed == 0 {
            return Ok(None);
        }
        self.get_campaign(id).await
    }

    async fn record_progress(
        &self,
        id: &str,
        sent_count: u32,
        failed_count: u32,
        progress: u8,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE campaigns SET sent_count = ?, failed_count = ?, progress = ? WHERE id = ?",
        )
        .bind(i64::from(sent_count))
        .bind(i64::from(failed_count))
        .bind(i64::from(progress))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_campaign(
        &self,
        id: &str,
        sent_count: u32,
        failed_count: u32,
        progress: u8,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE campaigns
             SET status = 'completed', sent_count = ?, failed_count = ?, progress = ?,
                 completed_at = ?
             WHERE id = ?",
        )
        .bind(i64::from(sent_count))
        .bind(i64::from(failed_count))
        .bind(i64::from(progress))
        .bind(to_millis(completed_at))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_campaign(
        &self,
        id: &str,
        error: &str,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE campaigns SET status = 'failed', last_error = ?, completed_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(to_millis(completed_at))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_campaign(&self, id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE campaigns SET status = 'pending' WHERE id = ? AND status = 'processing'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn requeue_interrupted(&self) -> StoreResult<u64> {
        let requeued =
            sqlx::query("UPDATE campaigns SET status = 'pending' WHERE status = 'processing'")
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(requeued)
    }
}

#[async_trait]
impl HeartbeatStore for SqliteStore {
    async fn record_heartbeat(&self, heartbeat: &Heartbeat) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO engine_status (id, status, active_sessions, last_heartbeat)
             VALUES (1, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 active_sessions = excluded.active_sessions,
                 last_heartbeat = excluded.last_heartbeat",
        )
        .bind(&heartbeat.status)
        .bind(clamp_i64(heartbeat.active_sessions as u64))
        .bind(to_millis(heartbeat.last_heartbeat))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_heartbeat(&self) -> StoreResult<Option<Heartbeat>> {
        let row = sqlx::query(
            "SELECT status, active_sessions, last_heartbeat FROM engine_status WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let active: i64 = row.try_get("active_sessions")?;
        Ok(Some(Heartbeat {
            status: row.try_get("status")?,
            active_sessions: usize::try_from(active.max(0)).unwrap_or_default(),
            last_heartbeat: from_millis(row.try_get("last_heartbeat")?)?,
        }))
    }
}
