//! Shared types, error model, and configuration for posterpress.
//!
//! This crate is the foundation depended on by all other posterpress crates.
//! It provides:
//! - The unified error type ([`PosterPressError`])
//! - Domain types ([`Job`], [`JobPatch`], [`InputBundle`], [`Template`], [`RenderMode`])
//! - Configuration ([`AppConfig`] and config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CompilerConfig, DatabaseConfig, StorageConfig, WorkerConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{PosterPressError, Result};
pub use types::{
    ClaimToken, ErrorCode, Figure, InputBundle, Job, JobId, JobPatch, JobStatus,
    MAX_ERROR_DETAIL_CHARS, MAX_FIGURES, OutputPaths, RenderMode, Sections, Template,
    truncate_chars,
};
