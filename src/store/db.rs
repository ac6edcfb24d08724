use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::StoreError;

/// One persisted URL Metrics record as read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub slug: String,
    pub url: String,
    pub etag: String,
    pub revision: i64,
    pub url_metrics: Vec<Value>,
    pub latest_timestamp: f64,
}

/// The record a writer wants persisted; the revision is assigned on write.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub slug: String,
    pub url: String,
    pub etag: String,
    pub url_metrics: Vec<Value>,
    pub latest_timestamp: f64,
}

/// Key-value persistence for URL Metrics records.
pub trait RecordStorage: Send + Sync {
    fn get(&self, slug: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Writes `record` only if the stored revision still equals
    /// `expected_revision` (`None`: the record must not exist yet).
    /// Returns `false` when another writer got there first.
    fn compare_and_set(
        &self,
        expected_revision: Option<i64>,
        record: &NewRecord,
    ) -> Result<bool, StoreError>;

    /// Slugs of records whose newest URL Metric is older than `cutoff`.
    fn stale_slugs(&self, cutoff: f64) -> Result<Vec<String>, StoreError>;

    /// Deletes the record only while its newest URL Metric is still older
    /// than `cutoff`, so a record refreshed after listing survives.
    fn delete_if_stale(&self, slug: &str, cutoff: f64) -> Result<bool, StoreError>;
}

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS url_metrics_records (
                slug TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                etag TEXT NOT NULL,
                revision INTEGER NOT NULL,
                url_metrics TEXT NOT NULL,
                latest_timestamp REAL NOT NULL,
                modified_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_umr_latest ON url_metrics_records(latest_timestamp);
        ",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordStorage for SqliteStorage {
    fn get(&self, slug: &str) -> Result<Option<StoredRecord>, StoreError> {
        let row = {
            let conn = self.conn();
            conn.query_row(
                "SELECT slug, url, etag, revision, url_metrics, latest_timestamp
                 FROM url_metrics_records WHERE slug = ?1",
                [slug],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, f64>(5)?,
                    ))
                },
            )
            .optional()?
        };

        let Some((slug, url, etag, revision, url_metrics, latest_timestamp)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredRecord {
            slug,
            url,
            etag,
            revision,
            url_metrics: serde_json::from_str(&url_metrics)?,
            latest_timestamp,
        }))
    }

    fn compare_and_set(
        &self,
        expected_revision: Option<i64>,
        record: &NewRecord,
    ) -> Result<bool, StoreError> {
        let url_metrics = serde_json::to_string(&record.url_metrics)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();

        let changed = match expected_revision {
            None => conn.execute(
                "INSERT INTO url_metrics_records
                    (slug, url, etag, revision, url_metrics, latest_timestamp, modified_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)
                 ON CONFLICT(slug) DO NOTHING",
                params![
                    record.slug,
                    record.url,
                    record.etag,
                    url_metrics,
                    record.latest_timestamp,
                    now
                ],
            )?,
            Some(revision) => conn.execute(
                "UPDATE url_metrics_records
                 SET url = ?2, etag = ?3, revision = revision + 1, url_metrics = ?4,
                     latest_timestamp = ?5, modified_at = ?6
                 WHERE slug = ?1 AND revision = ?7",
                params![
                    record.slug,
                    record.url,
                    record.etag,
                    url_metrics,
                    record.latest_timestamp,
                    now,
                    revision
                ],
            )?,
        };
        Ok(changed == 1)
    }

    fn stale_slugs(&self, cutoff: f64) -> Result<Vec<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT slug FROM url_metrics_records WHERE latest_timestamp < ?1 ORDER BY latest_timestamp",
        )?;
        let slugs = stmt
            .query_map([cutoff], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(slugs)
    }

    fn delete_if_stale(&self, slug: &str, cutoff: f64) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "DELETE FROM url_metrics_records WHERE slug = ?1 AND latest_timestamp < ?2",
            params![slug, cutoff],
        )?;
        Ok(changed == 1)
    }
}
