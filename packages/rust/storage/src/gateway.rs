//! Gateway traits the pipeline depends on.
//!
//! The orchestrator only talks to these traits; [`crate::JobDatabase`],
//! [`crate::FsObjectStore`] and [`crate::MemoryObjectStore`] are the
//! implementations shipped with the worker.

use std::time::Duration;

use async_trait::async_trait;

use posterpress_shared::{ClaimToken, Job, JobId, JobPatch, Result, Template};

/// Atomic claim and status updates against the job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Atomically move the oldest queued job to `claimed` and return it with
    /// a fresh [`ClaimToken`].
    ///
    /// No two callers, in this process or any other sharing the database,
    /// ever receive the same job from one queued period. Returns `None`
    /// when nothing is queued.
    async fn claim_next(&self) -> Result<Option<Job>>;

    /// Apply a partial update to a job the caller holds and stamp `updated_at`.
    ///
    /// The update applies only while the job is `claimed` under `claim`.
    /// Otherwise nothing is written and the result is
    /// [`posterpress_shared::PosterPressError::ClaimLost`] (or `JobNotFound`
    /// for an unknown id).
    async fn update_job(&self, id: &JobId, claim: ClaimToken, patch: &JobPatch) -> Result<()>;

    /// Return jobs claimed longer ago than `lease` to the queue.
    ///
    /// A worker that died, or whose terminal status update failed, leaves its
    /// job `claimed`; this makes such jobs claimable again and revokes the
    /// old claim token. Returns the number of jobs requeued.
    async fn requeue_stale(&self, lease: Duration) -> Result<u64>;
}

/// Lookup of document templates by identifier.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_template(&self, id: &str) -> Result<Option<Template>>;
}

/// Keyed blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. A missing object is [`posterpress_shared::PosterPressError::NotFound`].
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Store an object, replacing any previous version. Either the whole
    /// object becomes visible or nothing does.
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;
}
