//! Render the analyzer's XML report through an XSLT stylesheet.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::core::stylesheet::{RenderError, Stylesheet, StylesheetError};
use crate::core::types::CancellationToken;
use crate::error::{PipelineError, SourceError};

/// Extension given to the rendered artifact.
pub const DEFAULT_ARTIFACT_EXTENSION: &str = "html";

/// Abstraction over report rendering. Tests substitute recording doubles.
pub trait Transformer {
    /// Render `report_path` with the stylesheet at `definition_path` and
    /// return the path of the written artifact.
    fn transform(
        &self,
        report_path: &Path,
        definition_path: &Path,
    ) -> Result<PathBuf, PipelineError>;
}

/// Compiles the stylesheet on every call and writes the artifact next to the
/// report, replacing its extension.
#[derive(Debug, Clone)]
pub struct ReportTransformer {
    extension: String,
    cancel: CancellationToken,
}

impl Default for ReportTransformer {
    fn default() -> Self {
        Self {
            extension: DEFAULT_ARTIFACT_EXTENSION.to_string(),
            cancel: CancellationToken::new(),
        }
    }
}

impl ReportTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// A cancelled token discards the rendered output instead of publishing it.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// `report.xml` becomes `report.<extension>`; the directory is unchanged.
    pub fn artifact_path(&self, report_path: &Path) -> PathBuf {
        report_path.with_extension(&self.extension)
    }

    fn publish(
        &self,
        stylesheet: &Stylesheet,
        doc: &roxmltree::Document<'_>,
        definition_path: &Path,
        artifact: &Path,
        tmp: &Path,
    ) -> Result<(), PipelineError> {
        let write_error = |source| PipelineError::Write {
            path: artifact.to_path_buf(),
            source,
        };

        let file = File::create(tmp).map_err(write_error)?;
        let writer = stylesheet
            .transform(doc, BufWriter::new(file))
            .map_err(|err| match err {
                RenderError::Io(source) => write_error(source),
                other => PipelineError::TransformLoad {
                    path: definition_path.to_path_buf(),
                    source: StylesheetError::Render(other),
                },
            })?;
        let file = writer
            .into_inner()
            .map_err(|err| write_error(err.into_error()))?;
        file.sync_all().map_err(write_error)?;
        drop(file);

        if self.cancel.is_cancelled() {
            debug!("cancelled before publishing artifact");
            return Err(PipelineError::Cancelled);
        }
        fs::rename(tmp, artifact).map_err(write_error)
    }
}

impl Transformer for ReportTransformer {
    #[instrument(skip_all, fields(report = %report_path.display(), definition = %definition_path.display()))]
    fn transform(
        &self,
        report_path: &Path,
        definition_path: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let stylesheet = load_stylesheet(definition_path)?;
        let source = read_report(report_path)?;
        let doc = roxmltree::Document::parse(&source).map_err(|err| PipelineError::SourceRead {
            path: report_path.to_path_buf(),
            source: SourceError::Xml(err),
        })?;

        let artifact = self.artifact_path(report_path);
        let tmp = tmp_path(&artifact);
        debug!(artifact = %artifact.display(), "rendering report");

        if let Err(err) = self.publish(&stylesheet, &doc, definition_path, &artifact, &tmp) {
            if tmp.exists()
                && let Err(cleanup) = fs::remove_file(&tmp)
            {
                warn!(path = %tmp.display(), err = %cleanup, "failed to remove temporary artifact");
            }
            return Err(err);
        }

        info!(artifact = %artifact.display(), "report rendered");
        Ok(artifact)
    }
}

fn load_stylesheet(path: &Path) -> Result<Stylesheet, PipelineError> {
    let load_error = |source| PipelineError::TransformLoad {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(|err| load_error(StylesheetError::Io(err)))?;
    Stylesheet::from_reader(BufReader::new(file)).map_err(load_error)
}

fn read_report(path: &Path) -> Result<String, PipelineError> {
    let read_error = |err| PipelineError::SourceRead {
        path: path.to_path_buf(),
        source: SourceError::Io(err),
    };
    let file = File::open(path).map_err(read_error)?;
    let mut source = String::new();
    BufReader::new(file)
        .read_to_string(&mut source)
        .map_err(read_error)?;
    Ok(source)
}

fn tmp_path(artifact: &Path) -> PathBuf {
    let mut name = OsString::from(artifact.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{DEFAULT_STYLESHEET, SAMPLE_REPORT};

    struct Fixture {
        _temp: tempfile::TempDir,
        report: PathBuf,
        stylesheet: PathBuf,
    }

    fn fixture(report: &str, stylesheet: &str) -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let report_path = temp.path().join("out").join("report.xml");
        fs::create_dir_all(report_path.parent().expect("parent")).expect("mkdir");
        fs::write(&report_path, report).expect("write report");
        let stylesheet_path = temp.path().join("report.xslt");
        fs::write(&stylesheet_path, stylesheet).expect("write stylesheet");
        Fixture {
            _temp: temp,
            report: report_path,
            stylesheet: stylesheet_path,
        }
    }

    fn leftover_tmp(dir: &Path) -> bool {
        fs::read_dir(dir)
            .expect("read dir")
            .filter_map(Result::ok)
            .any(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
    }

    #[test]
    fn writes_artifact_next_to_report() {
        let fx = fixture(SAMPLE_REPORT, DEFAULT_STYLESHEET);
        let artifact = ReportTransformer::new()
            .transform(&fx.report, &fx.stylesheet)
            .expect("transform");

        assert_eq!(artifact, fx.report.with_file_name("report.html"));
        let html = fs::read_to_string(&artifact).expect("read artifact");
        assert!(html.starts_with("<!DOCTYPE html"));
        assert!(html.contains("Solution/Orders/OrderService.cs"));
        assert!(!leftover_tmp(fx.report.parent().expect("parent")));
    }

    #[test]
    fn custom_extension_is_applied() {
        let fx = fixture(SAMPLE_REPORT, DEFAULT_STYLESHEET);
        let artifact = ReportTransformer::new()
            .with_extension("htm")
            .transform(&fx.report, &fx.stylesheet)
            .expect("transform");
        assert_eq!(artifact.extension().and_then(|e| e.to_str()), Some("htm"));
        assert!(artifact.is_file());
    }

    #[test]
    fn missing_stylesheet_is_a_load_error() {
        let fx = fixture(SAMPLE_REPORT, DEFAULT_STYLESHEET);
        let missing = fx.stylesheet.with_file_name("missing.xslt");
        let err = ReportTransformer::new()
            .transform(&fx.report, &missing)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TransformLoad { source: StylesheetError::Io(_), .. }
        ));
    }

    #[test]
    fn malformed_stylesheet_is_a_load_error() {
        let fx = fixture(SAMPLE_REPORT, "<xsl:stylesheet");
        let err = ReportTransformer::new()
            .transform(&fx.report, &fx.stylesheet)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TransformLoad { source: StylesheetError::Xml(_), .. }
        ));
    }

    #[test]
    fn missing_report_is_a_source_error() {
        let fx = fixture(SAMPLE_REPORT, DEFAULT_STYLESHEET);
        let missing = fx.report.with_file_name("absent.xml");
        let err = ReportTransformer::new()
            .transform(&missing, &fx.stylesheet)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SourceRead { source: SourceError::Io(_), .. }
        ));
    }

    #[test]
    fn malformed_report_is_a_source_error() {
        let fx = fixture("<DuplicatesReport><Duplicates>", DEFAULT_STYLESHEET);
        let err = ReportTransformer::new()
            .transform(&fx.report, &fx.stylesheet)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SourceRead { source: SourceError::Xml(_), .. }
        ));
        assert!(!fx.report.with_extension("html").exists());
    }

    #[test]
    fn terminating_stylesheet_is_a_load_error_and_leaves_no_tmp() {
        let fx = fixture(
            SAMPLE_REPORT,
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                 <xsl:template match="/"><xsl:message terminate="yes">stop</xsl:message></xsl:template>
               </xsl:stylesheet>"#,
        );
        let err = ReportTransformer::new()
            .transform(&fx.report, &fx.stylesheet)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TransformLoad { source: StylesheetError::Render(RenderError::Terminated(_)), .. }
        ));
        let dir = fx.report.parent().expect("parent");
        assert!(!leftover_tmp(dir));
        assert!(!fx.report.with_extension("html").exists());
    }

    #[test]
    fn unwritable_artifact_is_a_write_error() {
        let fx = fixture(SAMPLE_REPORT, DEFAULT_STYLESHEET);
        let blocked = fx.report.with_extension("html");
        fs::create_dir(&blocked).expect("mkdir");
        fs::write(blocked.join("keep"), "").expect("write");

        let err = ReportTransformer::new()
            .transform(&fx.report, &fx.stylesheet)
            .unwrap_err();

        assert!(matches!(err, PipelineError::Write { path, .. } if path == blocked));
        assert!(!leftover_tmp(fx.report.parent().expect("parent")));
    }

    #[test]
    fn cancellation_discards_output() {
        let fx = fixture(SAMPLE_REPORT, DEFAULT_STYLESHEET);
        let token = CancellationToken::new();
        token.cancel();
        let err = ReportTransformer::new()
            .with_cancellation(token)
            .transform(&fx.report, &fx.stylesheet)
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert!(!fx.report.with_extension("html").exists());
        assert!(!leftover_tmp(fx.report.parent().expect("parent")));
    }

    #[test]
    fn existing_artifact_is_replaced() {
        let fx = fixture(SAMPLE_REPORT, DEFAULT_STYLESHEET);
        let artifact = fx.report.with_extension("html");
        fs::write(&artifact, "stale").expect("write");
        ReportTransformer::new()
            .transform(&fx.report, &fx.stylesheet)
            .expect("transform");
        assert_ne!(fs::read_to_string(&artifact).expect("read"), "stale");
    }
}
