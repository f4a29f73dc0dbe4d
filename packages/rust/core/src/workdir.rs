//! Job-scoped working directories.
//!
//! Layout:
//! ```text
//! <work_root>/<job_id>-<run uuid>/
//! ├── main.tex
//! ├── assets/
//! └── out/
//! ```
//! The directory is removed when the [`WorkDir`] is dropped, whatever the
//! outcome of the run.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use posterpress_render::ASSETS_DIR;
use posterpress_shared::{JobId, PosterPressError, Result};

/// File name of the rendered document source.
pub const SOURCE_FILE_NAME: &str = "main.tex";

const OUTPUT_DIR: &str = "out";

/// An exclusively owned, uniquely named directory for one pipeline run.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    /// Create a fresh directory tree under `work_root`.
    ///
    /// The run uuid makes the name unique even when the same job is run twice
    /// or several workers share a work root.
    pub async fn create(work_root: &Path, job_id: &JobId, keep: bool) -> Result<Self> {
        let work_root =
            std::path::absolute(work_root).map_err(|e| PosterPressError::io(work_root, e))?;
        let path = work_root.join(format!("{job_id}-{}", Uuid::now_v7()));

        for dir in [path.join(ASSETS_DIR), path.join(OUTPUT_DIR)] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| PosterPressError::io(&dir, e))?;
        }
        debug!(path = %path.display(), "created working directory");

        Ok(Self { path, keep })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_path(&self) -> PathBuf {
        self.path.join(SOURCE_FILE_NAME)
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.path.join(ASSETS_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path.join(OUTPUT_DIR)
    }

    /// Write the rendered source and return its path.
    pub async fn write_source(&self, source: &str) -> Result<PathBuf> {
        let path = self.source_path();
        tokio::fs::write(&path, source)
            .await
            .map_err(|e| PosterPressError::io(&path, e))?;
        Ok(path)
    }

    /// Write a staged asset. `file_name` must be a bare file name.
    pub async fn write_asset(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        if file_name.is_empty()
            || file_name.contains(['/', '\\'])
            || file_name == "."
            || file_name == ".."
        {
            return Err(PosterPressError::validation(format!(
                "invalid asset file name '{file_name}'"
            )));
        }
        let path = self.assets_dir().join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PosterPressError::io(&path, e))?;
        Ok(path)
    }
}

// Drop cannot await, so removal is the one synchronous filesystem call.
impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            debug!(path = %self.path.display(), "keeping working directory");
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove working directory");
        }
    }
}
