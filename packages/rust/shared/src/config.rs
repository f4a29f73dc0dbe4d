//! Application configuration for posterpress.
//!
//! Worker config lives at `~/.posterpress/posterpress.toml` unless a path is
//! given explicitly. CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PosterPressError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "posterpress.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".posterpress";

// ---------------------------------------------------------------------------
// Config structs (matching posterpress.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub compiler: CompilerConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// libSQL database file holding jobs and templates.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("var").join("posterpress.db")
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the filesystem object store.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Bucket holding input bundles and figure assets.
    #[serde(default = "default_input_bucket")]
    pub input_bucket: String,

    /// Bucket receiving published artifacts.
    #[serde(default = "default_output_bucket")]
    pub output_bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            input_bucket: default_input_bucket(),
            output_bucket: default_output_bucket(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("var").join("objects")
}
fn default_input_bucket() -> String {
    "project-files".into()
}
fn default_output_bucket() -> String {
    "project-outputs".into()
}

/// `[compiler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Compiler executable.
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the standard synctex/keep-logs/outdir arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Hard limit on a single compiler run.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum characters of compiler diagnostics kept for a failed job.
    #[serde(default = "default_diagnostic_limit")]
    pub diagnostic_limit: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            extra_args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            diagnostic_limit: default_diagnostic_limit(),
        }
    }
}

fn default_program() -> String {
    "tectonic".into()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_diagnostic_limit() -> usize {
    crate::types::MAX_ERROR_DETAIL_CHARS
}

/// `[worker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sleep between claim attempts when the queue is empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Parent directory for per-job working directories.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// A claim older than this is considered abandoned and requeued.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,

    /// Leave working directories on disk after a run.
    #[serde(default)]
    pub keep_workdirs: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            work_root: default_work_root(),
            claim_lease_secs: default_claim_lease_secs(),
            keep_workdirs: false,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_work_root() -> PathBuf {
    std::env::temp_dir().join("posterpress")
}
fn default_claim_lease_secs() -> u64 {
    900
}

impl AppConfig {
    /// Reject combinations the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker.poll_interval_ms == 0 {
            return Err(PosterPressError::config("worker.poll_interval_ms must be > 0"));
        }
        if self.compiler.timeout_secs == 0 {
            return Err(PosterPressError::config("compiler.timeout_secs must be > 0"));
        }
        if self.compiler.diagnostic_limit == 0 {
            return Err(PosterPressError::config("compiler.diagnostic_limit must be > 0"));
        }
        // A live compile must never outlast its own claim.
        if self.worker.claim_lease_secs <= self.compiler.timeout_secs {
            return Err(PosterPressError::config(format!(
                "worker.claim_lease_secs ({}) must exceed compiler.timeout_secs ({})",
                self.worker.claim_lease_secs, self.compiler.timeout_secs
            )));
        }
        if self.storage.input_bucket.is_empty() || self.storage.output_bucket.is_empty() {
            return Err(PosterPressError::config("storage bucket names must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.posterpress/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PosterPressError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.posterpress/posterpress.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PosterPressError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PosterPressError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PosterPressError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PosterPressError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PosterPressError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
