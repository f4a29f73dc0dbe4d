//! Per-job pipeline: fetch → render → stage → compile → publish → package → report.
//!
//! Every step failure is classified once, here, into a [`StepError`] and
//! recorded on the job. Nothing is published before the compiler succeeds.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use sha2::{Digest, Sha256};
use tracing::{error, info, instrument, warn};

use posterpress_shared::{
    AppConfig, ClaimToken, ErrorCode, InputBundle, Job, JobId, JobPatch, OutputPaths, RenderMode,
};
use posterpress_storage::{JobQueue, ObjectStore, TemplateStore};

use crate::compiler::{CompileError, CompilerInvoker};
use crate::package::build_source_archive;
use crate::workdir::WorkDir;

const PDF_CONTENT_TYPE: &str = "application/pdf";
const ZIP_CONTENT_TYPE: &str = "application/zip";

// ---------------------------------------------------------------------------
// Storage keys
// ---------------------------------------------------------------------------

/// `projects/<project_id>/poster/input.json`
pub fn input_bundle_key(project_id: &str) -> String {
    format!("projects/{project_id}/poster/input.json")
}

/// `projects/<project_id>/poster/{preview,final}.pdf`
pub fn document_key(project_id: &str, mode: RenderMode) -> String {
    format!("projects/{project_id}/poster/{}", mode.document_file_name())
}

/// `projects/<project_id>/poster/poster_source.zip`
pub fn source_archive_key(project_id: &str) -> String {
    format!("projects/{project_id}/poster/poster_source.zip")
}

// ---------------------------------------------------------------------------
// Steps, errors, reports
// ---------------------------------------------------------------------------

/// A pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    FetchInputs,
    Render,
    StageAssets,
    Compile,
    PublishArtifact,
    PackageSources,
    Report,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchInputs => "fetch_inputs",
            Self::Render => "render",
            Self::StageAssets => "stage_assets",
            Self::Compile => "compile",
            Self::PublishArtifact => "publish_artifact",
            Self::PackageSources => "package_sources",
            Self::Report => "report",
        }
    }
}

/// A classified step failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StepError {
    pub code: ErrorCode,
    pub message: String,
}

impl StepError {
    pub fn new(code: ErrorCode, message: impl std::fmt::Display) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }
}

/// How a job run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(OutputPaths),
    Failed(StepError),
}

/// Result of processing one claimed job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: JobId,
    pub outcome: JobOutcome,
    /// Whether the terminal status reached the queue. When false the job
    /// stays `claimed` until its lease expires.
    pub status_recorded: bool,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, JobOutcome::Succeeded(_))
    }
}

/// Callback for observing pipeline progress.
pub trait ProgressReporter: Send + Sync {
    /// Called when a job enters a step.
    fn step(&self, job_id: &JobId, step: Step);
    /// Called once the job's outcome has been reported.
    fn finished(&self, report: &JobReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn step(&self, _job_id: &JobId, _step: Step) {}
    fn finished(&self, _report: &JobReport) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Buckets and working-directory settings for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_bucket: String,
    pub output_bucket: String,
    pub work_root: PathBuf,
    pub keep_workdirs: bool,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            input_bucket: config.storage.input_bucket.clone(),
            output_bucket: config.storage.output_bucket.clone(),
            work_root: config.worker.work_root.clone(),
            keep_workdirs: config.worker.keep_workdirs,
        }
    }
}

/// Runs claimed jobs to a terminal status.
pub struct Pipeline {
    queue: Arc<dyn JobQueue>,
    templates: Arc<dyn TemplateStore>,
    objects: Arc<dyn ObjectStore>,
    compiler: CompilerInvoker,
    config: PipelineConfig,
    reporter: Arc<dyn ProgressReporter>,
}

impl Pipeline {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        templates: Arc<dyn TemplateStore>,
        objects: Arc<dyn ObjectStore>,
        compiler: CompilerInvoker,
        config: PipelineConfig,
    ) -> Self {
        Self {
            queue,
            templates,
            objects,
            compiler,
            config,
            reporter: Arc::new(SilentProgress),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run a claimed job and record its terminal status.
    ///
    /// Never fails: step errors and panics become a failed outcome, and a
    /// failed status update is logged and reflected in
    /// [`JobReport::status_recorded`].
    #[instrument(skip_all, fields(job_id = %job.id, project_id = %job.project_id, mode = %job.mode))]
    pub async fn process(&self, job: &Job) -> JobReport {
        let start = Instant::now();
        info!(template_id = %job.template_id, attempt = job.attempts, "processing job");

        let outcome = match AssertUnwindSafe(self.execute(job)).catch_unwind().await {
            Ok(Ok(paths)) => JobOutcome::Succeeded(paths),
            Ok(Err(e)) => JobOutcome::Failed(e),
            Err(panic) => JobOutcome::Failed(StepError::new(
                ErrorCode::InternalError,
                format!("pipeline panicked: {}", panic_message(panic.as_ref())),
            )),
        };

        self.reporter.step(&job.id, Step::Report);
        let patch = match &outcome {
            JobOutcome::Succeeded(paths) => JobPatch::succeeded(paths.clone()),
            JobOutcome::Failed(e) => {
                error!(error_code = %e.code, error = %e.message, "job failed");
                JobPatch::failed(e.code, &e.message)
            }
        };

        let status_recorded = match job.claim_token {
            Some(claim) => self.record(job, claim, &patch).await,
            None => {
                warn!("job carries no claim token, outcome not recorded");
                false
            }
        };

        let report = JobReport {
            job_id: job.id.clone(),
            outcome,
            status_recorded,
            elapsed: start.elapsed(),
        };
        if report.succeeded() {
            info!(elapsed_ms = report.elapsed.as_millis(), "job succeeded");
        }
        self.reporter.finished(&report);
        report
    }

    /// Write the terminal patch under `claim`. Returns whether it was stored.
    async fn record(&self, job: &Job, claim: ClaimToken, patch: &JobPatch) -> bool {
        match self.queue.update_job(&job.id, claim, patch).await {
            Ok(()) => true,
            Err(e) if e.is_claim_lost() => {
                warn!(error = %e, "claim lost to another worker, outcome discarded");
                false
            }
            Err(e) => {
                warn!(
                    error_code = %ErrorCode::StatusUpdateFailed,
                    error = %e,
                    "failed to record job outcome, job stays claimed until its lease expires"
                );
                false
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<OutputPaths, StepError> {
        // --- Step 1: Fetch inputs ---
        self.enter(job, Step::FetchInputs);
        let template = self
            .templates
            .get_template(&job.template_id)
            .await
            .map_err(|e| StepError::new(ErrorCode::ReadInputFailed, e))?
            .ok_or_else(|| {
                StepError::new(
                    ErrorCode::TemplateNotFound,
                    format!("template '{}' not found", job.template_id),
                )
            })?;
        let bundle_bytes = self
            .objects
            .get(&self.config.input_bucket, &input_bundle_key(&job.project_id))
            .await
            .map_err(|e| StepError::new(ErrorCode::ReadInputFailed, e))?;
        let bundle = InputBundle::from_json(&bundle_bytes)
            .map_err(|e| StepError::new(ErrorCode::ReadInputFailed, e))?;

        // --- Step 2: Render ---
        self.enter(job, Step::Render);
        let source = posterpress_render::render(&template.source, &bundle, job.mode)
            .map_err(|e| StepError::new(ErrorCode::RenderFailed, e))?;

        // --- Step 3: Stage assets ---
        self.enter(job, Step::StageAssets);
        let workdir = WorkDir::create(&self.config.work_root, &job.id, self.config.keep_workdirs)
            .await
            .map_err(|e| StepError::new(ErrorCode::InternalError, e))?;
        let source_path = workdir
            .write_source(&source)
            .await
            .map_err(|e| StepError::new(ErrorCode::InternalError, e))?;
        self.stage_figures(&bundle, &workdir).await?;

        // --- Step 4: Compile ---
        self.enter(job, Step::Compile);
        let artifact = self
            .compiler
            .compile(&source_path, &workdir.output_dir())
            .await
            .map_err(|e| match e {
                CompileError::Failed { diagnostic, .. } => {
                    StepError::new(ErrorCode::CompileFailed, diagnostic)
                }
                other => StepError::new(ErrorCode::CompileFailed, other),
            })?;
        let pdf = tokio::fs::read(&artifact)
            .await
            .map_err(|e| StepError::new(ErrorCode::InternalError, e))?;

        // --- Step 5: Publish artifact ---
        self.enter(job, Step::PublishArtifact);
        let pdf_key = document_key(&job.project_id, job.mode);
        self.objects
            .put(&self.config.output_bucket, &pdf_key, &pdf, PDF_CONTENT_TYPE)
            .await
            .map_err(|e| StepError::new(ErrorCode::UploadFailed, e))?;
        info!(key = %pdf_key, size = pdf.len(), sha256 = %sha256_hex(&pdf), "published document");

        let mut paths = OutputPaths {
            pdf: pdf_key,
            source_archive: None,
        };

        // --- Step 6: Package sources ---
        if job.mode.includes_sources() {
            self.enter(job, Step::PackageSources);
            let archive = build_source_archive(&workdir)
                .await
                .map_err(|e| StepError::new(ErrorCode::PackageFailed, e))?;
            let archive_key = source_archive_key(&job.project_id);
            self.objects
                .put(
                    &self.config.output_bucket,
                    &archive_key,
                    &archive,
                    ZIP_CONTENT_TYPE,
                )
                .await
                .map_err(|e| StepError::new(ErrorCode::UploadFailed, e))?;
            info!(key = %archive_key, size = archive.len(), "published source archive");
            paths.source_archive = Some(archive_key);
        }

        Ok(paths)
    }

    /// Download the slotted figures into the assets directory.
    async fn stage_figures(&self, bundle: &InputBundle, workdir: &WorkDir) -> Result<(), StepError> {
        for (idx, figure) in bundle.slotted_figures().iter().enumerate() {
            let slot = idx + 1;
            let (Some(key), Some(file_name)) =
                (figure.file_path.as_deref(), figure.asset_file_name(slot))
            else {
                warn!(slot, "figure has no usable file path, skipped");
                continue;
            };

            let bytes = self
                .objects
                .get(&self.config.input_bucket, key)
                .await
                .map_err(|e| StepError::new(ErrorCode::DownloadFailed, e))?;
            workdir
                .write_asset(&file_name, &bytes)
                .await
                .map_err(|e| StepError::new(ErrorCode::InternalError, e))?;
        }
        Ok(())
    }

    fn enter(&self, job: &Job, step: Step) {
        info!(step = step.as_str(), "entering step");
        self.reporter.step(&job.id, step);
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
