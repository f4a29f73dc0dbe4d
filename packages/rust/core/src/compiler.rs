//! Document compiler invoker.
//!
//! Runs the external compiler as a subprocess against a rendered source file
//! and reports pass/fail. Diagnostics are not interpreted, only captured and
//! bounded.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use posterpress_shared::{CompilerConfig, truncate_chars};

/// Failure of a compiler run. Diagnostic text is already bounded.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The compiler could not be started or waited on.
    #[error("failed to run compiler `{program}`: {message}")]
    Io { program: String, message: String },

    /// The compiler exited unsuccessfully.
    #[error("compiler exited with {status}: {diagnostic}")]
    Failed { status: String, diagnostic: String },

    /// The compiler exceeded its time budget and was killed.
    #[error("compiler timed out after {}s", .timeout.as_secs())]
    TimedOut { timeout: Duration },

    /// The compiler reported success but the expected artifact is missing.
    #[error("compiler produced no artifact at {}", .expected.display())]
    MissingArtifact { expected: PathBuf },
}

/// Settings for invoking the external compiler.
#[derive(Debug, Clone)]
pub struct CompilerInvoker {
    /// Executable to run.
    pub program: String,
    /// Arguments placed before the standard ones.
    pub extra_args: Vec<String>,
    /// Hard limit on one run.
    pub timeout: Duration,
    /// Maximum characters of diagnostic text kept.
    pub diagnostic_limit: usize,
}

impl From<&CompilerConfig> for CompilerInvoker {
    fn from(config: &CompilerConfig) -> Self {
        Self {
            program: config.program.clone(),
            extra_args: config.extra_args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            diagnostic_limit: config.diagnostic_limit,
        }
    }
}

impl CompilerInvoker {
    /// Compile `source` into `out_dir`, returning the path of the produced PDF.
    ///
    /// The working directory is the source's parent, so relative asset paths
    /// in the source resolve against it. The child is killed if the timeout
    /// elapses.
    #[instrument(skip_all, fields(program = %self.program, source = %source.display()))]
    pub async fn compile(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, CompileError> {
        let work_dir = source.parent().unwrap_or_else(|| Path::new("."));
        let start = Instant::now();

        let child = Command::new(&self.program)
            .args(&self.extra_args)
            .arg("--synctex")
            .arg("--keep-logs")
            .arg("--outdir")
            .arg(out_dir)
            .arg(source)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CompileError::Io {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CompileError::Io {
                    program: self.program.clone(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "compiler timed out, killed");
                return Err(CompileError::TimedOut {
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            let diagnostic = self.diagnostic(&output.stderr, &output.stdout);
            debug!(status = %output.status, chars = diagnostic.chars().count(), "compiler failed");
            return Err(CompileError::Failed {
                status: output.status.to_string(),
                diagnostic,
            });
        }

        let expected = artifact_path(source, out_dir);
        if !expected.is_file() {
            return Err(CompileError::MissingArtifact { expected });
        }

        info!(
            artifact = %expected.display(),
            elapsed_ms = start.elapsed().as_millis(),
            "compile succeeded"
        );
        Ok(expected)
    }

    /// Stderr followed by stdout, bounded to `diagnostic_limit` characters.
    fn diagnostic(&self, stderr: &[u8], stdout: &[u8]) -> String {
        let stderr = String::from_utf8_lossy(stderr);
        let stdout = String::from_utf8_lossy(stdout);
        let combined = match (stderr.trim().is_empty(), stdout.trim().is_empty()) {
            (false, false) => format!("{}\n{}", stderr.trim_end(), stdout.trim_end()),
            (false, true) => stderr.trim_end().to_string(),
            (true, false) => stdout.trim_end().to_string(),
            (true, true) => "compiler produced no output".to_string(),
        };
        truncate_chars(&combined, self.diagnostic_limit)
    }
}

/// `<out_dir>/<source stem>.pdf`
pub fn artifact_path(source: &Path, out_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string());
    out_dir.join(format!("{stem}.pdf"))
}
