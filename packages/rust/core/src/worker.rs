//! Worker loop: claim, process, repeat.
//!
//! One job at a time. When the queue is empty the worker returns stale
//! claims to the queue and sleeps for the poll interval, waking early on
//! shutdown. A job in flight always runs to a reported outcome before the
//! loop observes shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use posterpress_shared::{Result, WorkerConfig};
use posterpress_storage::JobQueue;

use crate::pipeline::{JobReport, Pipeline};

/// Counters accumulated over a worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Terminal statuses that could not be written.
    pub unrecorded: u64,
    pub claim_errors: u64,
    pub requeued: u64,
}

impl WorkerSummary {
    fn record(&mut self, report: &JobReport) {
        self.processed += 1;
        if report.succeeded() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        if !report.status_recorded {
            self.unrecorded += 1;
        }
    }
}

/// Drives a [`Pipeline`] from a [`JobQueue`].
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    pipeline: Pipeline,
    poll_interval: Duration,
    claim_lease: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        pipeline: Pipeline,
        poll_interval: Duration,
        claim_lease: Duration,
    ) -> Self {
        Self {
            queue,
            pipeline,
            poll_interval,
            claim_lease,
        }
    }

    /// Build a worker using the `[worker]` timing settings.
    pub fn from_config(queue: Arc<dyn JobQueue>, pipeline: Pipeline, config: &WorkerConfig) -> Self {
        Self::new(
            queue,
            pipeline,
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_secs(config.claim_lease_secs),
        )
    }

    /// Claim and process at most one job.
    ///
    /// Errors only when the claim itself fails; a processed job always yields
    /// a report.
    pub async fn run_once(&self) -> Result<Option<JobReport>> {
        let Some(job) = self.queue.claim_next().await? else {
            return Ok(None);
        };
        Ok(Some(self.pipeline.process(&job).await))
    }

    /// Process jobs until the queue is empty, then return.
    pub async fn drain(&self) -> Result<WorkerSummary> {
        let mut summary = WorkerSummary::default();
        while let Some(report) = self.run_once().await? {
            summary.record(&report);
        }
        Ok(summary)
    }

    /// Run until `shutdown` carries `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        info!(
            poll_interval_ms = self.poll_interval.as_millis(),
            claim_lease_secs = self.claim_lease.as_secs(),
            "worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(Some(report)) => {
                    summary.record(&report);
                    continue;
                }
                Ok(None) => {
                    summary.requeued += self.recover_stale().await;
                }
                Err(e) => {
                    summary.claim_errors += 1;
                    warn!(error = %e, "failed to claim job");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "worker stopped"
        );
        summary
    }

    async fn recover_stale(&self) -> u64 {
        match self.queue.requeue_stale(self.claim_lease).await {
            Ok(0) => {
                debug!("queue idle");
                0
            }
            Ok(n) => {
                info!(requeued = n, "returned stale claims to the queue");
                n
            }
            Err(e) => {
                warn!(error = %e, "failed to requeue stale claims");
                0
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use posterpress_shared::{ErrorCode, JobStatus, RenderMode};

    use super::*;
    use crate::compiler::tests::{FAKE_COMPILER_FAIL, FAKE_COMPILER_OK};
    use crate::pipeline::tests::{PROJECT, TEMPLATE_ID, pipeline, seeded_objects, test_db};

    #[tokio::test]
    async fn run_once_on_empty_queue_does_nothing() {
        let db = test_db().await;
        let objects = seeded_objects();
        let worker = Worker::new(
            db.clone(),
            pipeline(&db, &objects, FAKE_COMPILER_OK),
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        assert!(worker.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drain_processes_jobs_in_submission_order() {
        let db = test_db().await;
        let objects = seeded_objects();
        let first = db.enqueue_job(PROJECT, TEMPLATE_ID, RenderMode::Final).await.unwrap();
        let second = db.enqueue_job(PROJECT, "missing", RenderMode::Final).await.unwrap();

        let worker = Worker::new(
            db.clone(),
            pipeline(&db, &objects, FAKE_COMPILER_OK),
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        let summary = worker.drain().await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);

        let first = db.get_job(&first).await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Succeeded);
        let second = db.get_job(&second).await.unwrap().unwrap();
        assert_eq!(second.error_code, Some(ErrorCode::TemplateNotFound));
    }

    #[tokio::test]
    async fn failed_job_does_not_stop_the_loop() {
        let db = test_db().await;
        let objects = seeded_objects();
        for _ in 0..3 {
            db.enqueue_job(PROJECT, TEMPLATE_ID, RenderMode::Final).await.unwrap();
        }
        let worker = Worker::new(
            db.clone(),
            pipeline(&db, &objects, FAKE_COMPILER_FAIL),
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        let summary = worker.drain().await.unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 3);
        assert!(db.list_jobs(Some(JobStatus::Queued), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let db = test_db().await;
        let objects = seeded_objects();
        let job = db.enqueue_job(PROJECT, TEMPLATE_ID, RenderMode::Final).await.unwrap();

        let worker = Worker::new(
            db.clone(),
            pipeline(&db, &objects, FAKE_COMPILER_OK),
            Duration::from_millis(20),
            Duration::from_secs(60),
        );
        let (tx, rx) = watch::channel(false);
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(true).unwrap();
        };

        let (summary, ()) = tokio::join!(worker.run(rx), stopper);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.succeeded, 1);

        let job = db.get_job(&job).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn idle_worker_requeues_stale_claims() {
        let db = test_db().await;
        let objects = seeded_objects();
        let id = db.enqueue_job(PROJECT, TEMPLATE_ID, RenderMode::Final).await.unwrap();
        // Simulate a worker that claimed the job and died.
        db.claim_next().await.unwrap().unwrap();

        let worker = Worker::new(
            db.clone(),
            pipeline(&db, &objects, FAKE_COMPILER_OK),
            Duration::from_millis(20),
            Duration::ZERO,
        );
        let (tx, rx) = watch::channel(false);
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(true).unwrap();
        };
        let (summary, ()) = tokio::join!(worker.run(rx), stopper);

        assert!(summary.requeued >= 1);
        let job = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempts, 2);
    }
}
