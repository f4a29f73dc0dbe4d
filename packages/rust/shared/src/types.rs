//! Core domain types for poster rendering jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PosterPressError, Result};

/// Upper bound on stored error detail text, in characters.
pub const MAX_ERROR_DETAIL_CHARS: usize = 4000;

/// Number of figure slots a poster template exposes.
pub const MAX_FIGURES: usize = 2;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Fencing token handed out with each claim.
///
/// A claimed job accepts updates only from the holder of its current token;
/// requeueing a stale claim invalidates the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimToken(pub Uuid);

impl ClaimToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Status, mode, error classification
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Claimed,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Column value in the jobs table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = PosterPressError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "claimed" => Ok(Self::Claimed),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(PosterPressError::validation(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}

/// Rendering variant requested for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Watermarked draft.
    Preview,
    /// Clean output without sources.
    Final,
    /// Clean output plus a source archive.
    Paid,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Final => "final",
            Self::Paid => "paid",
        }
    }

    /// Whether the rendered document carries the preview watermark.
    pub fn is_watermarked(&self) -> bool {
        matches!(self, Self::Preview)
    }

    /// Whether the requester is entitled to a source archive.
    pub fn includes_sources(&self) -> bool {
        matches!(self, Self::Paid)
    }

    /// File name of the published document for this mode.
    pub fn document_file_name(&self) -> &'static str {
        match self {
            Self::Preview => "preview.pdf",
            Self::Final | Self::Paid => "final.pdf",
        }
    }
}

impl std::fmt::Display for RenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RenderMode {
    type Err = PosterPressError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preview" => Ok(Self::Preview),
            "final" => Ok(Self::Final),
            "paid" => Ok(Self::Paid),
            other => Err(PosterPressError::validation(format!(
                "unknown render mode '{other}'"
            ))),
        }
    }
}

/// Classification stored on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TemplateNotFound,
    ReadInputFailed,
    RenderFailed,
    DownloadFailed,
    CompileFailed,
    UploadFailed,
    PackageFailed,
    StatusUpdateFailed,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            Self::ReadInputFailed => "READ_INPUT_FAILED",
            Self::RenderFailed => "RENDER_FAILED",
            Self::DownloadFailed => "DOWNLOAD_FAILED",
            Self::CompileFailed => "COMPILE_FAILED",
            Self::UploadFailed => "UPLOAD_FAILED",
            Self::PackageFailed => "PACKAGE_FAILED",
            Self::StatusUpdateFailed => "STATUS_UPDATE_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = PosterPressError;

    fn from_str(s: &str) -> Result<Self> {
        let code = match s {
            "TEMPLATE_NOT_FOUND" => Self::TemplateNotFound,
            "READ_INPUT_FAILED" => Self::ReadInputFailed,
            "RENDER_FAILED" => Self::RenderFailed,
            "DOWNLOAD_FAILED" => Self::DownloadFailed,
            "COMPILE_FAILED" => Self::CompileFailed,
            "UPLOAD_FAILED" => Self::UploadFailed,
            "PACKAGE_FAILED" => Self::PackageFailed,
            "STATUS_UPDATE_FAILED" => Self::StatusUpdateFailed,
            "INTERNAL_ERROR" => Self::InternalError,
            other => {
                return Err(PosterPressError::validation(format!(
                    "unknown error code '{other}'"
                )));
            }
        };
        Ok(code)
    }
}

// ---------------------------------------------------------------------------
// Job records
// ---------------------------------------------------------------------------

/// Storage keys of the artifacts published for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPaths {
    /// Compiled document.
    pub pdf: String,
    /// Source archive, only for modes that include sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_archive: Option<String>,
}

/// One rendering request as stored in the jobs table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: String,
    pub template_id: String,
    pub mode: RenderMode,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_paths: Option<OutputPaths>,
    /// Number of times the job has been claimed.
    pub attempts: u32,
    /// Token of the most recent claim, `None` until first claimed or after
    /// the claim was requeued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_token: Option<ClaimToken>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied to a job. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub error_code: Option<ErrorCode>,
    pub error_detail: Option<String>,
    pub output_paths: Option<OutputPaths>,
    /// Reset `error_code` and `error_detail` to NULL. Takes precedence over
    /// the two error fields above.
    pub clear_error: bool,
}

impl JobPatch {
    /// Terminal success with the published artifact paths. Any error fields
    /// left from earlier writes are cleared.
    pub fn succeeded(output_paths: OutputPaths) -> Self {
        Self {
            status: Some(JobStatus::Succeeded),
            output_paths: Some(output_paths),
            clear_error: true,
            ..Default::default()
        }
    }

    /// Terminal failure. The detail is bounded to [`MAX_ERROR_DETAIL_CHARS`].
    pub fn failed(code: ErrorCode, detail: &str) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_code: Some(code),
            error_detail: Some(truncate_chars(detail, MAX_ERROR_DETAIL_CHARS)),
            ..Default::default()
        }
    }
}

/// A document-source skeleton with placeholder tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: String,
    pub source: String,
}

// ---------------------------------------------------------------------------
// Input bundle
// ---------------------------------------------------------------------------

/// Narrative sections of a poster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sections {
    pub introduction: String,
    pub methods: String,
    pub results: String,
    pub discussion: String,
    pub conclusion: String,
}

/// A figure reference in the input bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Figure {
    /// Storage key of the image in the input bucket.
    pub file_path: Option<String>,
    pub caption: String,
}

impl Figure {
    /// Final path component of the storage key, if any.
    ///
    /// Directory components are dropped so a figure can never address
    /// anything outside the assets directory.
    pub fn asset_name(&self) -> Option<&str> {
        let path = self.file_path.as_deref()?;
        let name = path.rsplit(['/', '\\']).next()?;
        match name {
            "" | "." | ".." => None,
            name => Some(name),
        }
    }

    /// File name under `assets/` for the figure in slot `slot` (1-based).
    ///
    /// Characters outside `[A-Za-z0-9._-]` become `_` so the name is inert
    /// when spliced into document source; the slot prefix keeps two figures
    /// with the same basename apart.
    pub fn asset_file_name(&self, slot: usize) -> Option<String> {
        let name: String = self
            .asset_name()?
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Some(format!("fig{slot}_{name}"))
    }
}

/// Structured poster content for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputBundle {
    pub title: String,
    pub authors: Vec<String>,
    pub affiliations: Vec<String>,
    pub sections: Sections,
    pub figures: Vec<Figure>,
}

impl InputBundle {
    /// Parse and validate an input bundle document.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PosterPressError::validation(format!("invalid input bundle: {e}")))
    }

    /// The figures that fit in the template's figure slots.
    pub fn slotted_figures(&self) -> &[Figure] {
        &self.figures[..self.figures.len().min(MAX_FIGURES)]
    }
}

/// Truncate `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
