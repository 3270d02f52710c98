//! Validate a run request and build the analyzer command line.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::core::types::{RunRequest, ToolInvocation};
use crate::error::PipelineError;

/// Analyzer binary looked up inside the tool directory.
pub const DEFAULT_EXECUTABLE: &str = if cfg!(windows) {
    "dupfinder.exe"
} else {
    "dupfinder"
};

/// Resolves a [`RunRequest`] into a [`ToolInvocation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    executable_name: String,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(DEFAULT_EXECUTABLE)
    }
}

impl PathResolver {
    pub fn new(executable_name: impl Into<String>) -> Self {
        Self {
            executable_name: executable_name.into(),
        }
    }

    pub fn executable_name(&self) -> &str {
        &self.executable_name
    }

    /// Check that the tool directory and executable exist, then return the
    /// absolute program path and its argument tokens.
    ///
    /// Nothing is spawned here; a request that fails validation never
    /// reaches the process runner.
    #[instrument(skip_all, fields(tool_directory = %request.tool_directory.display()))]
    pub fn resolve(&self, request: &RunRequest) -> Result<ToolInvocation, PipelineError> {
        let tool_directory = make_absolute(&request.tool_directory);
        if !tool_directory.is_dir() {
            return Err(PipelineError::DirectoryNotFound(tool_directory));
        }

        let program = tool_directory.join(&self.executable_name);
        if !program.is_file() {
            return Err(PipelineError::ExecutableNotFound(program));
        }

        let report_path = make_absolute(&request.report_path);
        let source_folder = make_absolute(&request.source_folder);
        let args = tool_args(&report_path, &source_folder);
        debug!(program = %program.display(), ?args, "resolved invocation");

        Ok(ToolInvocation {
            program,
            args,
            report_path,
            source_folder,
        })
    }
}

/// `--show-text -o=<report> <source>`, one token each.
pub fn tool_args(report_path: &Path, source_folder: &Path) -> Vec<OsString> {
    let mut output = OsString::from("-o=");
    output.push(report_path);
    vec![
        OsString::from("--show-text"),
        output,
        source_folder.as_os_str().to_os_string(),
    ]
}

/// Absolute without touching the filesystem; symlinks are kept. An empty
/// path stays empty and fails the existence checks.
fn make_absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
