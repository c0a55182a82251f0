//! Durable storage backend on SQLite.
//!
//! Timestamps are stored as Unix milliseconds. Every write transaction opens with
//! an `INSERT`, so the connection takes the write lock up front and never has to
//! upgrade a read lock mid-transaction.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::traits::{LogStore, ProbeRegistry, ReportStore};
use crate::storage::types::{LogChunk, LogSaveOutcome, ProbeRecord, ReportSnapshot, StoredReport};

/// SQLite-backed store implementing all three storage traits.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url`, apply migrations and return the store.
    pub async fn open(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = SqlitePool::connect_with(url, max_connections).await?;
        pool.migrate().await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn from_millis(ms: i64, field: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::InvalidData(format!("{field} out of range: {ms}")))
}

fn to_db_int(value: u64, field: &str) -> Result<i64, StorageError> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("{field} out of range: {value}")))
}

fn from_db_int(value: i64, field: &str) -> Result<u64, StorageError> {
    u64::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("{field} is negative: {value}")))
}

// =============================================================================
// Row mappings
// =============================================================================

#[derive(FromRow)]
struct ProbeRow {
    probe_id: String,
    display_name: String,
    registered_at: i64,
    last_contact_at: i64,
}

impl TryFrom<ProbeRow> for ProbeRecord {
    type Error = StorageError;

    fn try_from(row: ProbeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            registered_at: from_millis(row.registered_at, "registered_at")?,
            last_contact_at: from_millis(row.last_contact_at, "last_contact_at")?,
            probe_id: row.probe_id,
            display_name: row.display_name,
        })
    }
}

#[derive(FromRow)]
struct ReportRow {
    id: i64,
    received_at: i64,
    body: String,
}

impl TryFrom<ReportRow> for StoredReport {
    type Error = StorageError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            received_at: from_millis(row.received_at, "received_at")?,
            report: serde_json::from_str(&row.body)?,
        })
    }
}

#[derive(FromRow)]
struct LogChunkRow {
    probe_id: String,
    uploaded_at: Option<i64>,
    received_at: i64,
    total_lines_at_source: i64,
    sent_lines: i64,
    sequence: Option<i64>,
    content: String,
}

impl TryFrom<LogChunkRow> for LogChunk {
    type Error = StorageError;

    fn try_from(row: LogChunkRow) -> Result<Self, Self::Error> {
        Ok(Self {
            uploaded_at: row
                .uploaded_at
                .map(|ms| from_millis(ms, "uploaded_at"))
                .transpose()?,
            received_at: from_millis(row.received_at, "received_at")?,
            total_lines_at_source: from_db_int(row.total_lines_at_source, "total_lines_at_source")?,
            sent_lines: from_db_int(row.sent_lines, "sent_lines")?,
            sequence: row
                .sequence
                .map(|s| from_db_int(s, "sequence"))
                .transpose()?,
            probe_id: row.probe_id,
            content: row.content,
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

#[async_trait::async_trait]
impl ProbeRegistry for SqliteStore {
    async fn register(
        &self,
        probe_id: &str,
        display_name: &str,
        at: DateTime<Utc>,
    ) -> Result<ProbeRecord, StorageError> {
        let at = at.timestamp_millis();
        let row: ProbeRow = sqlx::query_as(
            r#"
            INSERT INTO probes (probe_id, display_name, registered_at, last_contact_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(probe_id) DO UPDATE SET
                display_name = excluded.display_name,
                last_contact_at = MAX(probes.last_contact_at, excluded.last_contact_at)
            RETURNING probe_id, display_name, registered_at, last_contact_at
            "#,
        )
        .bind(probe_id)
        .bind(display_name)
        .bind(at)
        .bind(at)
        .fetch_one(self.pool.inner())
        .await?;

        row.try_into()
    }

    async fn touch(
        &self,
        probe_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ProbeRecord>, StorageError> {
        let row: Option<ProbeRow> = sqlx::query_as(
            r#"
            UPDATE probes
            SET last_contact_at = MAX(last_contact_at, ?)
            WHERE probe_id = ?
            RETURNING probe_id, display_name, registered_at, last_contact_at
            "#,
        )
        .bind(at.timestamp_millis())
        .bind(probe_id)
        .fetch_optional(self.pool.inner())
        .await?;

        row.map(ProbeRecord::try_from).transpose()
    }

    async fn get(&self, probe_id: &str) -> Result<Option<ProbeRecord>, StorageError> {
        let row: Option<ProbeRow> = sqlx::query_as(
            "SELECT probe_id, display_name, registered_at, last_contact_at \
             FROM probes WHERE probe_id = ?",
        )
        .bind(probe_id)
        .fetch_optional(self.pool.inner())
        .await?;

        row.map(ProbeRecord::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<ProbeRecord>, StorageError> {
        let rows: Vec<ProbeRow> = sqlx::query_as(
            "SELECT probe_id, display_name, registered_at, last_contact_at \
             FROM probes ORDER BY display_name, probe_id",
        )
        .fetch_all(self.pool.inner())
        .await?;

        rows.into_iter().map(ProbeRecord::try_from).collect()
    }
}

// =============================================================================
// Reports
// =============================================================================

#[async_trait::async_trait]
impl ReportStore for SqliteStore {
    async fn save(
        &self,
        probe_id: &str,
        mut report: ReportSnapshot,
        received_at: DateTime<Utc>,
    ) -> Result<StoredReport, StorageError> {
        report.probe_id = probe_id.to_string();
        let body = serde_json::to_string(&report)?;

        let mut tx = self.pool.inner().begin().await?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO report_history (probe_id, received_at, body) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(probe_id)
        .bind(received_at.timestamp_millis())
        .bind(&body)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO report_latest (probe_id, report_id) VALUES (?, ?)
            ON CONFLICT(probe_id) DO UPDATE SET report_id = excluded.report_id
            "#,
        )
        .bind(probe_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(StoredReport {
            id,
            received_at,
            report,
        })
    }

    async fn latest(&self, probe_id: &str) -> Result<Option<StoredReport>, StorageError> {
        let row: Option<ReportRow> = sqlx::query_as(
            r#"
            SELECT h.id, h.received_at, h.body
            FROM report_latest l
            JOIN report_history h ON h.id = l.report_id
            WHERE l.probe_id = ?
            "#,
        )
        .bind(probe_id)
        .fetch_optional(self.pool.inner())
        .await?;

        row.map(StoredReport::try_from).transpose()
    }

    async fn history(
        &self,
        probe_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<StoredReport>, StorageError> {
        // LIMIT -1 means unbounded in SQLite.
        let limit = limit.map(i64::from).unwrap_or(-1);
        let rows: Vec<ReportRow> = sqlx::query_as(
            r#"
            SELECT id, received_at, body FROM (
                SELECT id, received_at, body FROM report_history
                WHERE probe_id = ?
                ORDER BY id DESC
                LIMIT ?
            )
            ORDER BY id ASC
            "#,
        )
        .bind(probe_id)
        .bind(limit)
        .fetch_all(self.pool.inner())
        .await?;

        rows.into_iter().map(StoredReport::try_from).collect()
    }
}

// =============================================================================
// Logs
// =============================================================================

#[async_trait::async_trait]
impl LogStore for SqliteStore {
    async fn save_chunk(&self, chunk: LogChunk) -> Result<LogSaveOutcome, StorageError> {
        let sequence = chunk
            .sequence
            .map(|s| to_db_int(s, "sequence"))
            .transpose()?;

        let mut tx = self.pool.inner().begin().await?;

        let (chunk_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO log_chunks
                (probe_id, uploaded_at, received_at, total_lines_at_source, sent_lines, sequence, content)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&chunk.probe_id)
        .bind(chunk.uploaded_at.map(|t| t.timestamp_millis()))
        .bind(chunk.received_at.timestamp_millis())
        .bind(to_db_int(chunk.total_lines_at_source, "total_lines_at_source")?)
        .bind(to_db_int(chunk.sent_lines, "sent_lines")?)
        .bind(sequence)
        .bind(&chunk.content)
        .fetch_one(&mut *tx)
        .await?;

        let swapped = sqlx::query(
            r#"
            INSERT INTO log_latest (probe_id, chunk_id, sequence) VALUES (?, ?, ?)
            ON CONFLICT(probe_id) DO UPDATE SET
                chunk_id = excluded.chunk_id,
                sequence = excluded.sequence
            WHERE excluded.sequence IS NULL
               OR log_latest.sequence IS NULL
               OR excluded.sequence >= log_latest.sequence
            "#,
        )
        .bind(&chunk.probe_id)
        .bind(chunk_id)
        .bind(sequence)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if swapped == 0 {
            let (current,): (Option<i64>,) =
                sqlx::query_as("SELECT sequence FROM log_latest WHERE probe_id = ?")
                    .bind(&chunk.probe_id)
                    .fetch_one(&mut *tx)
                    .await?;
            // Dropping the transaction rolls back the chunk insert.
            drop(tx);
            let current = current.map(|c| from_db_int(c, "sequence")).transpose()?;
            return Ok(LogSaveOutcome::Stale {
                current: current.unwrap_or_default(),
            });
        }

        tx.commit().await?;
        Ok(LogSaveOutcome::Stored)
    }

    async fn latest(&self, probe_id: &str) -> Result<Option<LogChunk>, StorageError> {
        let row: Option<LogChunkRow> = sqlx::query_as(
            r#"
            SELECT c.probe_id, c.uploaded_at, c.received_at, c.total_lines_at_source,
                   c.sent_lines, c.sequence, c.content
            FROM log_latest l
            JOIN log_chunks c ON c.id = l.chunk_id
            WHERE l.probe_id = ?
            "#,
        )
        .bind(probe_id)
        .fetch_optional(self.pool.inner())
        .await?;

        row.map(LogChunk::try_from).transpose()
    }
}
