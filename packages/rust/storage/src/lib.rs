//! libSQL storage for job records.
//!
//! The [`Storage`] struct wraps a local libSQL database holding the `jobs`
//! table. Status transitions that must not race (claiming a job, re-arming
//! a failed one) are single conditional `UPDATE`s, so two workers can never
//! both win.

mod migrations;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use tracing::debug;

use tubewiki_shared::{JobId, JobRecord, JobStatus, Result, TubeWikiError};

const JOB_COLUMNS: &str = "id, owner_id, source_ref, status, content, title, error_message, \
                           document_url, created_at, updated_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TubeWikiError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` for inspection only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TubeWikiError::Storage(format!(
                "no job database at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        TubeWikiError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(TubeWikiError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Create a `pending` job and return it with its assigned id.
    pub async fn insert_job(&self, owner_id: &str, source_ref: &str) -> Result<JobRecord> {
        self.check_writable()?;
        let now = Utc::now();
        let now_s = timestamp(&now);
        self.conn
            .execute(
                "INSERT INTO jobs (owner_id, source_ref, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    owner_id,
                    source_ref,
                    JobStatus::Pending.as_str(),
                    now_s.as_str(),
                    now_s.as_str()
                ],
            )
            .await
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?;

        let id = JobId(self.conn.last_insert_rowid());
        debug!(job_id = %id, "job inserted");

        let mut record = JobRecord::pending(id, owner_id, source_ref);
        record.created_at = now;
        record.updated_at = now;
        Ok(record)
    }

    /// Load a job by id.
    pub async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.0],
            )
            .await
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(TubeWikiError::Storage(e.to_string())),
        }
    }

    /// Write every field of `record`, inserting it if the id is new.
    pub async fn save_job(&self, record: &JobRecord) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO jobs (id, owner_id, source_ref, status, content, title, error_message,
                                   document_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                   owner_id = excluded.owner_id,
                   source_ref = excluded.source_ref,
                   status = excluded.status,
                   content = excluded.content,
                   title = excluded.title,
                   error_message = excluded.error_message,
                   document_url = excluded.document_url,
                   updated_at = excluded.updated_at",
                params![
                    record.id.0,
                    record.owner_id.as_str(),
                    record.source_ref.as_str(),
                    record.status.as_str(),
                    record.content.as_deref(),
                    record.title.as_deref(),
                    record.error_message.as_deref(),
                    record.document_url.as_deref(),
                    timestamp(&record.created_at),
                    timestamp(&record.updated_at),
                ],
            )
            .await
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Move a job to `processing` if it is `pending`, or `processing` but
    /// last touched before `stale_before`. Returns whether this caller won.
    pub async fn claim_job(&self, id: JobId, stale_before: DateTime<Utc>) -> Result<bool> {
        self.check_writable()?;
        let now = timestamp(&Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET status = 'processing', updated_at = ?1
                 WHERE id = ?2
                   AND (status = 'pending'
                        OR (status = 'processing' AND updated_at < ?3))",
                params![now.as_str(), id.0, timestamp(&stale_before)],
            )
            .await
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?;

        debug!(job_id = %id, claimed = changed == 1, "claim attempted");
        Ok(changed == 1)
    }

    /// Refresh `updated_at` of a job still in `processing`, keeping a live
    /// claim out of the stale window. Returns whether the job was touched.
    pub async fn touch_job(&self, id: JobId) -> Result<bool> {
        self.check_writable()?;
        let now = timestamp(&Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET updated_at = ?1 WHERE id = ?2 AND status = 'processing'",
                params![now.as_str(), id.0],
            )
            .await
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?;
        Ok(changed == 1)
    }

    /// Reset a `failed` job to `pending`, clearing its error. Returns whether
    /// the job was in `failed`.
    pub async fn rearm_job(&self, id: JobId) -> Result<bool> {
        self.check_writable()?;
        let now = timestamp(&Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET status = 'pending', error_message = NULL, updated_at = ?1
                 WHERE id = ?2 AND status = 'failed'",
                params![now.as_str(), id.0],
            )
            .await
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?;
        Ok(changed == 1)
    }

    /// Most recent jobs first, optionally restricted to one status.
    pub async fn list_jobs(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<JobRecord>> {
        let mut rows = match status {
            Some(status) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY id DESC LIMIT ?2"
                        ),
                        params![status.as_str(), i64::from(limit)],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id DESC LIMIT ?1"),
                        params![i64::from(limit)],
                    )
                    .await
            }
        }
        .map_err(|e| TubeWikiError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_job(&row)?);
        }
        Ok(results)
    }
}

/// Fixed-width UTC timestamps so text comparison matches time order.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TubeWikiError::Storage(format!("invalid date: {e}")))
}

fn row_to_job(row: &libsql::Row) -> Result<JobRecord> {
    let status: String = row
        .get(3)
        .map_err(|e| TubeWikiError::Storage(e.to_string()))?;
    let created_at: String = row
        .get(8)
        .map_err(|e| TubeWikiError::Storage(e.to_string()))?;
    let updated_at: String = row
        .get(9)
        .map_err(|e| TubeWikiError::Storage(e.to_string()))?;

    Ok(JobRecord {
        id: JobId(
            row.get::<i64>(0)
                .map_err(|e| TubeWikiError::Storage(e.to_string()))?,
        ),
        owner_id: row
            .get::<String>(1)
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?,
        source_ref: row
            .get::<String>(2)
            .map_err(|e| TubeWikiError::Storage(e.to_string()))?,
        status: status
            .parse()
            .map_err(|e: TubeWikiError| TubeWikiError::Storage(e.to_string()))?,
        content: row.get::<String>(4).ok(),
        title: row.get::<String>(5).ok(),
        error_message: row.get::<String>(6).ok(),
        document_url: row.get::<String>(7).ok(),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("tw_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("tw_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn insert_and_get() {
        let storage = test_storage().await;
        let job = storage
            .insert_job("user-1", "https://youtu.be/abc12345678")
            .await
            .expect("insert");
        assert_eq!(job.status, JobStatus::Pending);

        let loaded = storage.get_job(job.id).await.unwrap().expect("present");
        assert_eq!(loaded.owner_id, "user-1");
        assert_eq!(loaded.source_ref, "https://youtu.be/abc12345678");
        assert_eq!(loaded.status, JobStatus::Pending);
        assert!(loaded.content.is_none());

        assert!(storage.get_job(JobId(9999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_overwrites_fields() {
        let storage = test_storage().await;
        let mut job = storage.insert_job("u", "https://youtu.be/abc12345678").await.unwrap();

        job.status = JobStatus::Completed;
        job.content = Some("# Guide".into());
        job.title = Some("Guide".into());
        job.document_url = Some("https://www.notion.so/x".into());
        job.updated_at = Utc::now();
        storage.save_job(&job).await.unwrap();

        let loaded = storage.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.content.as_deref(), Some("# Guide"));
        assert_eq!(loaded.document_url.as_deref(), Some("https://www.notion.so/x"));
    }

    #[tokio::test]
    async fn save_inserts_unknown_id() {
        let storage = test_storage().await;
        let record = JobRecord::pending(JobId(42), "u", "https://youtu.be/abc12345678");
        storage.save_job(&record).await.unwrap();
        let loaded = storage.get_job(JobId(42)).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn only_one_claim_wins() {
        let storage = test_storage().await;
        let job = storage.insert_job("u", "src").await.unwrap();
        let stale_before = Utc::now() - Duration::minutes(15);

        assert!(storage.claim_job(job.id, stale_before).await.unwrap());
        assert!(!storage.claim_job(job.id, stale_before).await.unwrap());

        let loaded = storage.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn stale_processing_can_be_reclaimed() {
        let storage = test_storage().await;
        let mut job = storage.insert_job("u", "src").await.unwrap();
        job.status = JobStatus::Processing;
        job.updated_at = Utc::now() - Duration::hours(1);
        storage.save_job(&job).await.unwrap();

        let stale_before = Utc::now() - Duration::minutes(15);
        assert!(storage.claim_job(job.id, stale_before).await.unwrap());
    }

    #[tokio::test]
    async fn terminal_jobs_are_not_claimed() {
        let storage = test_storage().await;
        let mut job = storage.insert_job("u", "src").await.unwrap();
        job.status = JobStatus::Completed;
        job.updated_at = Utc::now() - Duration::hours(1);
        storage.save_job(&job).await.unwrap();

        assert!(!storage.claim_job(job.id, Utc::now()).await.unwrap());
        assert!(!storage.claim_job(JobId(777), Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn touch_keeps_claim_fresh() {
        let storage = test_storage().await;
        let mut job = storage.insert_job("u", "src").await.unwrap();
        assert!(!storage.touch_job(job.id).await.unwrap());

        job.status = JobStatus::Processing;
        job.updated_at = Utc::now() - Duration::hours(1);
        storage.save_job(&job).await.unwrap();

        assert!(storage.touch_job(job.id).await.unwrap());
        let stale_before = Utc::now() - Duration::minutes(15);
        assert!(!storage.claim_job(job.id, stale_before).await.unwrap());
    }

    #[tokio::test]
    async fn rearm_only_failed() {
        let storage = test_storage().await;
        let mut job = storage.insert_job("u", "src").await.unwrap();
        assert!(!storage.rearm_job(job.id).await.unwrap());

        job.status = JobStatus::Failed;
        job.error_message = Some("boom".into());
        storage.save_job(&job).await.unwrap();

        assert!(storage.rearm_job(job.id).await.unwrap());
        let loaded = storage.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert!(loaded.error_message.is_none());
    }

    #[tokio::test]
    async fn list_newest_first_with_filter() {
        let storage = test_storage().await;
        let a = storage.insert_job("u", "a").await.unwrap();
        let b = storage.insert_job("u", "b").await.unwrap();
        let mut c = storage.insert_job("u", "c").await.unwrap();
        c.status = JobStatus::Failed;
        storage.save_job(&c).await.unwrap();

        let all = storage.list_jobs(None, 10).await.unwrap();
        let ids: Vec<JobId> = all.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);

        let failed = storage.list_jobs(Some(JobStatus::Failed), 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source_ref, "c");

        assert_eq!(storage.list_jobs(None, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("tw_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_job("u", "src").await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_jobs(None, 10).await.unwrap().len(), 1);
        let result = ro.insert_job("u", "src2").await;
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_database() {
        let tmp = std::env::temp_dir().join(format!("tw_test_{}.db", Uuid::now_v7()));
        let err = Storage::open_readonly(&tmp).await.err().expect("missing db rejected");
        assert!(err.to_string().contains("no job database"));
        assert!(!tmp.exists());
    }
}
