//! Failure values surfaced by the pipeline and its stages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::stylesheet::StylesheetError;

/// Errors surfaced synchronously to the caller of a pipeline run.
///
/// A non-zero analyzer exit code is not an error unless the pipeline runs
/// with [`ExitPolicy::FailOnNonZero`](crate::core::types::ExitPolicy).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("tool directory '{}' does not exist", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("executable '{}' was not found", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("failed to launch '{}'", program.display())]
    ProcessLaunch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to capture output of '{}'", program.display())]
    OutputCapture {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{}' timed out after {secs}s", program.display())]
    TimedOut { program: PathBuf, secs: u64 },

    #[error("run cancelled")]
    Cancelled,

    #[error("'{}' exited with status {code:?}", program.display())]
    ToolFailed {
        program: PathBuf,
        code: Option<i32>,
    },

    #[error("failed to load transform definition '{}'", path.display())]
    TransformLoad {
        path: PathBuf,
        #[source]
        source: StylesheetError,
    },

    #[error("failed to read report '{}'", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: SourceError,
    },

    #[error("failed to write artifact '{}'", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open '{}' in a viewer", path.display())]
    ViewerLaunch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("another run is already in progress")]
    Busy,
}

/// Why a report could not be loaded.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Xml(#[from] roxmltree::Error),
}
