//! Tool-level configuration stored in `dupreport.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::ExitPolicy;
use crate::io::paths::DEFAULT_EXECUTABLE;
use crate::io::process::DEFAULT_QUEUE_CAPACITY;
use crate::io::transform::DEFAULT_ARTIFACT_EXTENSION;
use crate::io::{beside_executable, write_atomic};

pub const CONFIG_FILE_NAME: &str = "dupreport.toml";

/// Pipeline configuration (TOML).
///
/// Intended to be edited by hand. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Analyzer binary looked up inside the tool directory.
    pub executable_name: String,

    /// Extension of the rendered artifact, without the dot.
    pub artifact_extension: String,

    /// Kill the analyzer after this many seconds. Unset means no limit.
    pub timeout_secs: Option<u64>,

    /// Treat a non-zero analyzer exit as a failed run.
    pub fail_on_nonzero_exit: bool,

    /// Hand the artifact to the system viewer when the run completes.
    pub open_viewer: bool,

    /// Lines buffered between the output readers and the consumer.
    pub line_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            executable_name: DEFAULT_EXECUTABLE.to_string(),
            artifact_extension: DEFAULT_ARTIFACT_EXTENSION.to_string(),
            timeout_secs: None,
            fail_on_nonzero_exit: false,
            open_viewer: true,
            line_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        let name = self.executable_name.trim();
        if name.is_empty() {
            return Err(anyhow!("executable_name must not be empty"));
        }
        if name.contains(['/', '\\']) {
            return Err(anyhow!("executable_name must be a file name, not a path"));
        }
        let ext = self.artifact_extension.trim();
        if ext.is_empty() || ext.starts_with('.') || ext.contains(['/', '\\']) {
            return Err(anyhow!(
                "artifact_extension must be a bare extension such as \"html\""
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(anyhow!("timeout_secs must be > 0 when set"));
        }
        if self.line_queue_capacity == 0 {
            return Err(anyhow!("line_queue_capacity must be > 0"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn exit_policy(&self) -> ExitPolicy {
        if self.fail_on_nonzero_exit {
            ExitPolicy::FailOnNonZero
        } else {
            ExitPolicy::Tolerate
        }
    }
}

/// `dupreport.toml` next to the running binary.
pub fn default_config_path() -> Result<PathBuf> {
    beside_executable(CONFIG_FILE_NAME)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
