//! Job processing for posterpress.
//!
//! This crate turns claimed jobs into published artifacts: it stages a
//! working directory, runs the document compiler, packages sources, and
//! drives the whole thing from the queue (see [`worker::Worker`]).

pub mod compiler;
pub mod package;
pub mod pipeline;
pub mod workdir;
pub mod worker;

pub use compiler::{CompileError, CompilerInvoker};
pub use pipeline::{
    JobOutcome, JobReport, Pipeline, PipelineConfig, ProgressReporter, SilentProgress, Step,
    StepError,
};
pub use workdir::WorkDir;
pub use worker::{Worker, WorkerSummary};
