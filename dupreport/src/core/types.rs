//! Transient values that flow through a single pipeline run.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Inputs for one pipeline run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Directory that contains the analyzer executable.
    pub tool_directory: PathBuf,
    /// Folder the analyzer scans.
    pub source_folder: PathBuf,
    /// Where the analyzer writes its XML report.
    pub report_path: PathBuf,
    /// XSLT stylesheet used to render the report.
    pub transform_definition_path: PathBuf,
}

/// A validated, fully resolved analyzer command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Absolute path to the analyzer executable.
    pub program: PathBuf,
    /// Discrete argument tokens; never joined or shell-split.
    pub args: Vec<OsString>,
    /// Absolute report path, as passed through `-o=`.
    pub report_path: PathBuf,
    pub source_folder: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stdout,
    Stderr,
}

impl Channel {
    /// Severity prefix consumers key off.
    pub fn tag(self) -> &'static str {
        match self {
            Channel::Stdout => "[INFO] : ",
            Channel::Stderr => "[ERROR]: ",
        }
    }
}

/// One line captured from the analyzer. `text == None` marks end of stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub channel: Channel,
    pub text: Option<String>,
}

impl OutputLine {
    pub fn line(channel: Channel, text: impl Into<String>) -> Self {
        Self {
            channel,
            text: Some(text.into()),
        }
    }

    pub fn end_of_stream(channel: Channel) -> Self {
        Self {
            channel,
            text: None,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.text.is_none()
    }

    /// Render as `[INFO] : <text>` / `[ERROR]: <text>`; the end-of-stream
    /// marker renders with empty text.
    pub fn tagged(&self) -> String {
        format!("{}{}", self.channel.tag(), self.text.as_deref().unwrap_or(""))
    }
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tagged())
    }
}

/// How the analyzer process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    /// `None` when the process was terminated without an exit code.
    pub code: Option<i32>,
}

impl ToolExit {
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Outcome of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// True when the analyzer exited with status 0.
    pub exit_observed_successfully: bool,
    pub artifact_path: PathBuf,
    pub exit: ToolExit,
}

/// Pipeline state machine positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Resolving,
    Running,
    Transforming,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Resolving => "resolving",
            Stage::Running => "running",
            Stage::Transforming => "transforming",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

/// The single event stream a pipeline run exposes to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Stage(Stage),
    Line(OutputLine),
}

/// What to do when the analyzer exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitPolicy {
    /// Proceed to the transform stage regardless of the exit code.
    #[default]
    Tolerate,
    /// Abort with `ToolFailed` and skip the transform.
    FailOnNonZero,
}

/// Cooperative cancellation shared between the caller, the process waiter,
/// and the transformer.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
