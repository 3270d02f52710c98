//! Hand the rendered artifact to something that displays it.

use std::path::Path;

use tracing::{debug, instrument};

use crate::error::PipelineError;

pub trait Viewer {
    fn open(&self, artifact: &Path) -> Result<(), PipelineError>;
}

/// Opens the artifact with the platform's default application.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemViewer;

impl Viewer for SystemViewer {
    #[instrument(skip_all, fields(artifact = %artifact.display()))]
    fn open(&self, artifact: &Path) -> Result<(), PipelineError> {
        match open::that(artifact) {
            Ok(()) => {
                debug!("artifact handed to system viewer");
                Ok(())
            }
            Err(source) => Err(PipelineError::ViewerLaunch {
                path: artifact.to_path_buf(),
                source,
            }),
        }
    }
}

/// Does nothing; for headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoViewer;

impl Viewer for NoViewer {
    fn open(&self, artifact: &Path) -> Result<(), PipelineError> {
        debug!(artifact = %artifact.display(), "viewer disabled");
        Ok(())
    }
}
