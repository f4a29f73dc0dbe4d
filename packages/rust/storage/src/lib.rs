//! libSQL job queue, template store, and object storage for posterpress.
//!
//! The [`JobDatabase`] struct wraps a libSQL database holding the `jobs`
//! and `templates` tables and implements [`JobQueue`] and [`TemplateStore`].
//! Objects (input bundles, figures, published artifacts) go through the
//! [`ObjectStore`] trait.
//!
//! **Access rules:**
//! - Worker / submission commands: read-write via [`JobDatabase::open`]
//! - Status inspection: read-only via [`JobDatabase::open_readonly`]

mod gateway;
mod migrations;
mod objects;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, OpenFlags, Value, params};
use uuid::Uuid;

use posterpress_shared::{
    ClaimToken, ErrorCode, Job, JobId, JobPatch, JobStatus, OutputPaths, PosterPressError,
    RenderMode, Result, Template,
};

pub use gateway::{JobQueue, ObjectStore, TemplateStore};
pub use objects::{FsObjectStore, MemoryObjectStore, StoredObject};

/// How long a connection waits on another writer before giving up.
const BUSY_TIMEOUT_MS: u32 = 5000;

const JOB_COLUMNS: &str = "id, project_id, template_id, mode, status, error_code, error_detail, \
                           output_paths_json, attempts, created_at, updated_at, claim_token";

/// Job queue and template store handle wrapping a libSQL database.
pub struct JobDatabase {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl JobDatabase {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PosterPressError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| PosterPressError::Database(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| PosterPressError::Database(e.to_string()))?;

        let database = Self {
            db,
            conn,
            readonly: false,
        };
        database.configure_connection().await?;
        database.run_migrations().await?;
        Ok(database)
    }

    /// Open an existing database at `path` in read-only mode.
    ///
    /// The connection itself is opened read-only, and no migrations or
    /// journal changes are attempted.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .flags(OpenFlags::SQLITE_OPEN_READ_ONLY)
            .build()
            .await
            .map_err(|e| PosterPressError::Database(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| PosterPressError::Database(e.to_string()))?;

        let database = Self {
            db,
            conn,
            readonly: true,
        };
        database.configure_connection().await?;
        Ok(database)
    }

    /// Let concurrent workers wait on each other's write locks instead of failing.
    ///
    /// Switching the journal mode is a write, so read-only handles only set
    /// the busy timeout.
    async fn configure_connection(&self) -> Result<()> {
        let mut pragmas = vec![format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}")];
        if !self.readonly {
            pragmas.push("PRAGMA journal_mode = WAL".to_string());
        }
        for pragma in pragmas {
            // Both pragmas report their new value as a row.
            let mut rows = self
                .conn
                .query(&pragma, params![])
                .await
                .map_err(|e| PosterPressError::Database(format!("{pragma}: {e}")))?;
            while let Ok(Some(_)) = rows.next().await {}
        }
        Ok(())
    }

    /// Run pending schema migrations.
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
                        PosterPressError::Database(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
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
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PosterPressError::Database(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Insert a new queued job. Returns the generated job ID.
    pub async fn enqueue_job(
        &self,
        project_id: &str,
        template_id: &str,
        mode: RenderMode,
    ) -> Result<JobId> {
        self.check_writable()?;
        let id = JobId::new();
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO jobs (id, project_id, template_id, mode, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'queued', ?5, ?5)",
                params![
                    id.to_string(),
                    project_id,
                    template_id,
                    mode.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| PosterPressError::Database(e.to_string()))?;
        Ok(id)
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| PosterPressError::Database(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(PosterPressError::Database(e.to_string())),
        }
    }

    /// List the most recent jobs, optionally filtered by status.
    pub async fn list_jobs(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<Job>> {
        let mut rows = match status {
            Some(status) => {
                self.conn
                    .query(
                        &format!(
                            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1
                             ORDER BY created_at DESC LIMIT ?2"
                        ),
                        params![status.as_str(), i64::from(limit)],
                    )
                    .await
            }
            None => {
                self.conn
                    .query(
                        &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ?1"),
                        params![i64::from(limit)],
                    )
                    .await
            }
        }
        .map_err(|e| PosterPressError::Database(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_job(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Template operations
    // -----------------------------------------------------------------------

    /// Insert or replace a template.
    pub async fn upsert_template(&self, id: &str, source: &str) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO templates (id, source, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                   source = excluded.source,
                   updated_at = excluded.updated_at",
                params![id, source, now],
            )
            .await
            .map_err(|e| PosterPressError::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for JobDatabase {
    async fn claim_next(&self) -> Result<Option<Job>> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        let token = ClaimToken::new();

        // Select and mark in one statement: SQLite holds the write lock for the
        // whole UPDATE, so concurrent claimers serialize on it.
        let mut rows = self
            .conn
            .query(
                &format!(
                    "UPDATE jobs
                     SET status = 'claimed', attempts = attempts + 1, claim_token = ?2,
                         claimed_at = ?1, updated_at = ?1
                     WHERE id = (
                       SELECT id FROM jobs WHERE status = 'queued'
                       ORDER BY created_at, id LIMIT 1
                     ) AND status = 'queued'
                     RETURNING {JOB_COLUMNS}"
                ),
                params![now, token.to_string()],
            )
            .await
            .map_err(|e| PosterPressError::Database(e.to_string()))?;

        let job = match rows.next().await {
            Ok(Some(row)) => Some(row_to_job(&row)?),
            Ok(None) => None,
            Err(e) => return Err(PosterPressError::Database(e.to_string())),
        };

        if let Some(job) = &job {
            tracing::debug!(job_id = %job.id, attempts = job.attempts, "claimed job");
        }
        Ok(job)
    }

    async fn update_job(&self, id: &JobId, claim: ClaimToken, patch: &JobPatch) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        let output_paths_json = patch
            .output_paths
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| PosterPressError::validation(format!("output paths: {e}")))?;

        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET
                   status = COALESCE(?1, status),
                   error_code = CASE WHEN ?7 = 1 THEN NULL ELSE COALESCE(?2, error_code) END,
                   error_detail = CASE WHEN ?7 = 1 THEN NULL ELSE COALESCE(?3, error_detail) END,
                   output_paths_json = COALESCE(?4, output_paths_json),
                   updated_at = ?5
                 WHERE id = ?6 AND status = 'claimed' AND claim_token = ?8",
                params![
                    patch.status.map(|s| s.as_str()),
                    patch.error_code.map(|c| c.as_str()),
                    patch.error_detail.as_deref(),
                    output_paths_json,
                    now,
                    id.to_string(),
                    i64::from(patch.clear_error),
                    claim.to_string()
                ],
            )
            .await
            .map_err(|e| PosterPressError::Database(e.to_string()))?;

        if changed == 0 {
            if self.get_job(id).await?.is_none() {
                return Err(PosterPressError::JobNotFound(id.to_string()));
            }
            return Err(PosterPressError::ClaimLost {
                job_id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn requeue_stale(&self, lease: Duration) -> Result<u64> {
        self.check_writable()?;
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| PosterPressError::validation(format!("invalid lease: {e}")))?;
        let cutoff = timestamp(now - lease);

        let requeued = self
            .conn
            .execute(
                "UPDATE jobs SET status = 'queued', claim_token = NULL, claimed_at = NULL,
                   updated_at = ?1
                 WHERE status = 'claimed' AND claimed_at < ?2",
                params![timestamp(now), cutoff],
            )
            .await
            .map_err(|e| PosterPressError::Database(e.to_string()))?;

        if requeued > 0 {
            tracing::warn!(requeued, "requeued jobs with expired claims");
        }
        Ok(requeued)
    }
}

#[async_trait]
impl TemplateStore for JobDatabase {
    async fn get_template(&self, id: &str) -> Result<Option<Template>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source FROM templates WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| PosterPressError::Database(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(Template {
                id: row
                    .get::<String>(0)
                    .map_err(|e| PosterPressError::Database(e.to_string()))?,
                source: row
                    .get::<String>(1)
                    .map_err(|e| PosterPressError::Database(e.to_string()))?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(PosterPressError::Database(e.to_string())),
        }
    }
}

/// Fixed-width UTC timestamps so that string comparison orders by time.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PosterPressError::Database(format!("invalid date: {e}")))
}

/// Convert a database row (in [`JOB_COLUMNS`] order) to a [`Job`].
///
/// Records are validated here so nothing loosely typed reaches the pipeline.
fn row_to_job(row: &libsql::Row) -> Result<Job> {
    let text = |idx: i32| {
        optional_text(row, idx)?
            .ok_or_else(|| PosterPressError::Database(format!("column {idx} is NULL")))
    };

    let id: JobId = text(0)?
        .parse()
        .map_err(|e| PosterPressError::Database(format!("invalid job id: {e}")))?;
    let output_paths = match optional_text(row, 7)? {
        Some(json) => Some(serde_json::from_str::<OutputPaths>(&json).map_err(|e| {
            PosterPressError::Database(format!("invalid output paths for job {id}: {e}"))
        })?),
        None => None,
    };

    Ok(Job {
        project_id: text(1)?,
        template_id: text(2)?,
        mode: text(3)?.parse()?,
        status: text(4)?.parse()?,
        error_code: optional_text(row, 5)?
            .map(|c| c.parse::<ErrorCode>())
            .transpose()?,
        error_detail: optional_text(row, 6)?,
        output_paths,
        attempts: match column_value(row, 8)? {
            Value::Integer(n) => u32::try_from(n)
                .map_err(|_| PosterPressError::Database(format!("attempts out of range: {n}")))?,
            other => {
                return Err(PosterPressError::Database(format!(
                    "column 8: expected integer, found {other:?}"
                )));
            }
        },
        created_at: parse_timestamp(&text(9)?)?,
        updated_at: parse_timestamp(&text(10)?)?,
        claim_token: optional_text(row, 11)?
            .map(|t| {
                Uuid::parse_str(&t)
                    .map(ClaimToken)
                    .map_err(|e| PosterPressError::Database(format!("invalid claim token: {e}")))
            })
            .transpose()?,
        id,
    })
}

/// A nullable TEXT column. NULL is `None`; any other non-text value is an error.
fn optional_text(row: &libsql::Row, idx: i32) -> Result<Option<String>> {
    match column_value(row, idx)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(PosterPressError::Database(format!(
            "column {idx}: expected text or NULL, found {other:?}"
        ))),
    }
}

fn column_value(row: &libsql::Row, idx: i32) -> Result<Value> {
    row.get_value(idx)
        .map_err(|e| PosterPressError::Database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use uuid::Uuid;

    use super::*;

    fn temp_db_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("pp_test_{}.db", Uuid::now_v7()))
    }

    /// Create a temp file database for testing.
    async fn test_db() -> JobDatabase {
        JobDatabase::open(&temp_db_path()).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let db = test_db().await;
        assert_eq!(db.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = temp_db_path();
        let first = JobDatabase::open(&tmp).await.expect("first open");
        drop(first);
        let second = JobDatabase::open(&tmp).await.expect("second open");
        assert_eq!(second.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn claim_returns_oldest_queued_job() {
        let db = test_db().await;
        let first = db.enqueue_job("p1", "t1", RenderMode::Final).await.unwrap();
        let second = db.enqueue_job("p2", "t1", RenderMode::Preview).await.unwrap();

        let claimed = db.claim_next().await.unwrap().expect("a job");
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.status, JobStatus::Claimed);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.mode, RenderMode::Final);
        assert!(claimed.claim_token.is_some());

        let claimed = db.claim_next().await.unwrap().expect("a job");
        assert_eq!(claimed.id, second);

        assert!(db.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_on_empty_queue_is_none() {
        let db = test_db().await;
        assert!(db.claim_next().await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn concurrent_claimers_never_share_a_job() {
        let path = temp_db_path();
        let a = JobDatabase::open(&path).await.unwrap();
        let b = JobDatabase::open(&path).await.unwrap();

        let mut enqueued = HashSet::new();
        for i in 0..20 {
            let id = a
                .enqueue_job(&format!("p{i}"), "t1", RenderMode::Final)
                .await
                .unwrap();
            enqueued.insert(id);
        }

        async fn drain(db: &JobDatabase) -> Vec<JobId> {
            let mut ids = Vec::new();
            while let Some(job) = db.claim_next().await.expect("claim") {
                ids.push(job.id);
                tokio::task::yield_now().await;
            }
            ids
        }

        let (from_a, from_b) = tokio::join!(drain(&a), drain(&b));

        let mut seen = HashSet::new();
        for id in from_a.iter().chain(from_b.iter()) {
            assert!(seen.insert(id.clone()), "job {id} claimed twice");
        }
        assert_eq!(seen, enqueued);
    }

    #[tokio::test]
    async fn update_applies_partial_patch() {
        let db = test_db().await;
        let id = db.enqueue_job("p1", "t1", RenderMode::Paid).await.unwrap();
        let claim = db.claim_next().await.unwrap().unwrap().claim_token.unwrap();

        let paths = OutputPaths {
            pdf: "projects/p1/poster/final.pdf".into(),
            source_archive: Some("projects/p1/poster/poster_source.zip".into()),
        };
        db.update_job(&id, claim, &JobPatch::succeeded(paths.clone()))
            .await
            .expect("update");

        let job = db.get_job(&id).await.unwrap().expect("job exists");
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.output_paths, Some(paths));
        assert_eq!(job.error_code, None);
        assert!(job.updated_at >= job.created_at);
    }

    #[tokio::test]
    async fn failed_patch_records_code_and_detail() {
        let db = test_db().await;
        let id = db.enqueue_job("p1", "t1", RenderMode::Final).await.unwrap();
        let claim = db.claim_next().await.unwrap().unwrap().claim_token.unwrap();
        db.update_job(
            &id,
            claim,
            &JobPatch::failed(ErrorCode::TemplateNotFound, "no template t1"),
        )
        .await
        .unwrap();

        let job = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_code, Some(ErrorCode::TemplateNotFound));
        assert_eq!(job.error_detail.as_deref(), Some("no template t1"));
        assert_eq!(job.output_paths, None);
    }

    #[tokio::test]
    async fn update_unknown_job_fails() {
        let db = test_db().await;
        let err = db
            .update_job(&JobId::new(), ClaimToken::new(), &JobPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PosterPressError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn stale_claims_are_requeued() {
        let db = test_db().await;
        let id = db.enqueue_job("p1", "t1", RenderMode::Final).await.unwrap();
        db.claim_next().await.unwrap().expect("claimed");

        // A generous lease leaves the fresh claim alone.
        assert_eq!(db.requeue_stale(Duration::from_secs(3600)).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(db.requeue_stale(Duration::from_millis(1)).await.unwrap(), 1);

        let reclaimed = db.claim_next().await.unwrap().expect("claimable again");
        assert_eq!(reclaimed.id, id);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn stale_owner_cannot_overwrite_a_reclaimed_job() {
        let path = temp_db_path();
        let a = JobDatabase::open(&path).await.unwrap();
        let b = JobDatabase::open(&path).await.unwrap();
        let id = a.enqueue_job("p1", "t1", RenderMode::Final).await.unwrap();

        let first = a.claim_next().await.unwrap().expect("claimed by a");
        let stale = first.claim_token.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(b.requeue_stale(Duration::from_millis(1)).await.unwrap(), 1);
        let second = b.claim_next().await.unwrap().expect("reclaimed by b");
        assert_eq!(second.id, id);
        let current = second.claim_token.unwrap();
        assert_ne!(current, stale);

        let err = a
            .update_job(&id, stale, &JobPatch::failed(ErrorCode::CompileFailed, "late"))
            .await
            .unwrap_err();
        assert!(err.is_claim_lost(), "unexpected error: {err}");

        let job = b.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Claimed);
        assert_eq!(job.claim_token, Some(current));
        assert_eq!(job.error_code, None);

        let paths = OutputPaths {
            pdf: "projects/p1/poster/final.pdf".into(),
            source_archive: None,
        };
        b.update_job(&id, current, &JobPatch::succeeded(paths))
            .await
            .unwrap();
        assert_eq!(
            a.get_job(&id).await.unwrap().unwrap().status,
            JobStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn terminal_job_rejects_a_second_update() {
        let db = test_db().await;
        let id = db.enqueue_job("p1", "t1", RenderMode::Final).await.unwrap();
        let claim = db.claim_next().await.unwrap().unwrap().claim_token.unwrap();
        db.update_job(&id, claim, &JobPatch::failed(ErrorCode::CompileFailed, "boom"))
            .await
            .unwrap();

        let err = db
            .update_job(&id, claim, &JobPatch::failed(ErrorCode::UploadFailed, "again"))
            .await
            .unwrap_err();
        assert!(err.is_claim_lost());
        let job = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.error_code, Some(ErrorCode::CompileFailed));
    }

    #[tokio::test]
    async fn success_clears_earlier_error_fields() {
        let db = test_db().await;
        let id = db.enqueue_job("p1", "t1", RenderMode::Final).await.unwrap();
        let claim = db.claim_next().await.unwrap().unwrap().claim_token.unwrap();

        let partial = JobPatch {
            error_code: Some(ErrorCode::UploadFailed),
            error_detail: Some("transient".into()),
            ..JobPatch::default()
        };
        db.update_job(&id, claim, &partial).await.unwrap();
        let job = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Claimed);
        assert_eq!(job.error_code, Some(ErrorCode::UploadFailed));

        let paths = OutputPaths {
            pdf: "projects/p1/poster/final.pdf".into(),
            source_archive: None,
        };
        db.update_job(&id, claim, &JobPatch::succeeded(paths))
            .await
            .unwrap();

        let job = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.error_code, None);
        assert_eq!(job.error_detail, None);
    }

    #[tokio::test]
    async fn mistyped_column_is_a_database_error() {
        let db = test_db().await;
        let id = db.enqueue_job("p1", "t1", RenderMode::Final).await.unwrap();
        db.conn
            .execute(
                "UPDATE jobs SET error_detail = X'2A' WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .unwrap();

        let err = db.get_job(&id).await.unwrap_err();
        assert!(matches!(err, PosterPressError::Database(_)));
        assert!(err.to_string().contains("expected text"), "{err}");
    }

    #[tokio::test]
    async fn terminal_jobs_are_never_requeued() {
        let db = test_db().await;
        let id = db.enqueue_job("p1", "t1", RenderMode::Final).await.unwrap();
        let claim = db.claim_next().await.unwrap().unwrap().claim_token.unwrap();
        db.update_job(&id, claim, &JobPatch::failed(ErrorCode::CompileFailed, "boom"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(db.requeue_stale(Duration::from_millis(1)).await.unwrap(), 0);
        assert!(db.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_jobs_filters_by_status() {
        let db = test_db().await;
        db.enqueue_job("p1", "t1", RenderMode::Final).await.unwrap();
        db.enqueue_job("p2", "t1", RenderMode::Final).await.unwrap();
        db.claim_next().await.unwrap();

        let queued = db.list_jobs(Some(JobStatus::Queued), 10).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].project_id, "p2");
        assert_eq!(db.list_jobs(None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn template_upsert_and_lookup() {
        let db = test_db().await;
        assert!(db.get_template("poster-a0").await.unwrap().is_none());

        db.upsert_template("poster-a0", "v1").await.unwrap();
        db.upsert_template("poster-a0", "v2").await.unwrap();

        let template = db.get_template("poster-a0").await.unwrap().expect("exists");
        assert_eq!(template.source, "v2");
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = temp_db_path();
        let rw = JobDatabase::open(&tmp).await.unwrap();
        rw.enqueue_job("p1", "t1", RenderMode::Final).await.unwrap();
        drop(rw);

        let ro = JobDatabase::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_jobs(None, 10).await.unwrap().len(), 1);
        let result = ro.claim_next().await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_connection_cannot_write_directly() {
        let tmp = temp_db_path();
        let rw = JobDatabase::open(&tmp).await.unwrap();
        rw.enqueue_job("p1", "t1", RenderMode::Final).await.unwrap();
        drop(rw);

        let ro = JobDatabase::open_readonly(&tmp).await.unwrap();
        let result = ro
            .conn
            .execute("UPDATE jobs SET status = 'failed'", params![])
            .await;
        assert!(result.is_err());
        assert_eq!(
            ro.list_jobs(Some(JobStatus::Queued), 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn readonly_open_does_not_create_a_database() {
        let tmp = temp_db_path();
        assert!(JobDatabase::open_readonly(&tmp).await.is_err());
        assert!(!tmp.exists());
    }
}
