//! Test-only helpers: fake analyzer scripts, scripted pipeline stages and
//! fixture documents.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::core::types::{Channel, OutputLine, ToolExit, ToolInvocation};
use crate::error::PipelineError;
use crate::io::paths::DEFAULT_EXECUTABLE;
use crate::io::process::ToolRunner;
use crate::io::transform::Transformer;
use crate::io::viewer::Viewer;

/// The stylesheet shipped for dupFinder reports.
pub const DEFAULT_STYLESHEET: &str = include_str!("../assets/dupfinder-report.xslt");

/// A small dupFinder report with two duplicates.
pub const SAMPLE_REPORT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<DuplicatesReport ToolsVersion="2023.1">
  <Statistics>
    <CodebaseCost>1520</CodebaseCost>
    <TotalDuplicatesCost>212</TotalDuplicatesCost>
    <TotalFragmentsCost>424</TotalFragmentsCost>
  </Statistics>
  <Duplicates>
    <Duplicate Cost="74">
      <Fragment>
        <FileName>Solution/Billing/InvoiceService.cs</FileName>
        <OffsetRange Start="1024" End="1980" />
        <LineRange Start="40" End="71" />
        <Text>if (order == null) throw new ArgumentNullException(nameof(order));</Text>
      </Fragment>
      <Fragment>
        <FileName>Solution/Orders/OrderService.cs</FileName>
        <OffsetRange Start="2048" End="3004" />
        <LineRange Start="88" End="119" />
        <Text>if (order == null) throw new ArgumentNullException(nameof(order));</Text>
      </Fragment>
    </Duplicate>
    <Duplicate Cost="138">
      <Fragment>
        <FileName>Solution/Shared/Retry.cs</FileName>
        <OffsetRange Start="10" End="900" />
        <LineRange Start="3" End="30" />
        <Text>for (var attempt = 0; attempt &lt; max; attempt++) { }</Text>
      </Fragment>
      <Fragment>
        <FileName>Solution/Shared/Backoff.cs</FileName>
        <OffsetRange Start="55" End="945" />
        <LineRange Start="5" End="32" />
        <Text>for (var attempt = 0; attempt &lt; max; attempt++) { }</Text>
      </Fragment>
    </Duplicate>
  </Duplicates>
</DuplicatesReport>
"#;

/// Ordered record of stage calls shared between test doubles.
pub type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: Option<&Journal>, entry: impl Into<String>) {
    if let Some(journal) = journal {
        journal.lock().expect("journal lock").push(entry.into());
    }
}

/// An executable shell script standing in for the analyzer, in its own
/// temporary directory.
pub struct FakeTool {
    dir: tempfile::TempDir,
    program: PathBuf,
}

impl FakeTool {
    /// Script named like the real analyzer; `body` follows `#!/bin/sh`.
    #[cfg(unix)]
    pub fn script(body: &str) -> Self {
        Self::script_named(DEFAULT_EXECUTABLE, body)
    }

    #[cfg(unix)]
    pub fn script_named(name: &str, body: &str) -> Self {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let program = dir.path().join(name);
        std::fs::write(&program, format!("#!/bin/sh\n{body}")).expect("write script");
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        Self { dir, program }
    }

    /// A script that behaves like dupFinder: writes [`SAMPLE_REPORT`] to the
    /// `-o=` path, chats on both channels, and exits with `exit_code`.
    #[cfg(unix)]
    pub fn writing_report(exit_code: i32) -> Self {
        Self::script(&format!(
            r#"report=""
for arg in "$@"; do
  case "$arg" in
    -o=*) report="${{arg#-o=}}" ;;
  esac
done
echo "Analyzing $3"
echo "warning: sample warning" >&2
cat > "$report" <<'REPORT_EOF'
{report}REPORT_EOF
echo "Report written"
exit {exit_code}
"#,
            report = SAMPLE_REPORT,
        ))
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn invocation(&self, args: Vec<OsString>) -> ToolInvocation {
        ToolInvocation {
            program: self.program.clone(),
            args,
            report_path: self.dir.path().join("report.xml"),
            source_folder: self.dir.path().to_path_buf(),
        }
    }
}

/// Replays fixed output lines and an exit code without spawning anything.
#[derive(Default)]
pub struct ScriptedRunner {
    lines: Vec<OutputLine>,
    exit_code: i32,
    failure: Option<fn(&ToolInvocation) -> PipelineError>,
    invocations: Mutex<Vec<ToolInvocation>>,
    journal: Option<Journal>,
}

impl ScriptedRunner {
    pub fn exiting(code: i32, lines: Vec<OutputLine>) -> Self {
        Self {
            lines,
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn failing(failure: fn(&ToolInvocation) -> PipelineError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().expect("invocations lock").clone()
    }
}

impl ToolRunner for ScriptedRunner {
    fn run(
        &self,
        invocation: &ToolInvocation,
        on_line: &mut dyn FnMut(&OutputLine),
    ) -> Result<ToolExit, PipelineError> {
        self.invocations
            .lock()
            .expect("invocations lock")
            .push(invocation.clone());
        note(self.journal.as_ref(), "run:start");
        if let Some(failure) = self.failure {
            return Err(failure(invocation));
        }
        for line in &self.lines {
            on_line(line);
        }
        on_line(&OutputLine::end_of_stream(Channel::Stdout));
        on_line(&OutputLine::end_of_stream(Channel::Stderr));
        note(self.journal.as_ref(), "run:exit");
        Ok(ToolExit::from_code(self.exit_code))
    }
}

/// Records transform calls and returns `<report>.html` without rendering.
#[derive(Default)]
pub struct RecordingTransformer {
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    failure: Option<fn(&Path) -> PipelineError>,
    journal: Option<Journal>,
}

impl RecordingTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failure: fn(&Path) -> PipelineError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// `(report, definition)` pairs in call order.
    pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl Transformer for RecordingTransformer {
    fn transform(
        &self,
        report_path: &Path,
        definition_path: &Path,
    ) -> Result<PathBuf, PipelineError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((report_path.to_path_buf(), definition_path.to_path_buf()));
        note(self.journal.as_ref(), "transform");
        match self.failure {
            Some(failure) => Err(failure(definition_path)),
            None => Ok(report_path.with_extension("html")),
        }
    }
}

/// Records opened artifacts; optionally fails like an unavailable viewer.
#[derive(Default)]
pub struct RecordingViewer {
    opened: Mutex<Vec<PathBuf>>,
    fail: bool,
    journal: Option<Journal>,
}

impl RecordingViewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().expect("opened lock").clone()
    }
}

impl Viewer for RecordingViewer {
    fn open(&self, artifact: &Path) -> Result<(), PipelineError> {
        self.opened
            .lock()
            .expect("opened lock")
            .push(artifact.to_path_buf());
        note(self.journal.as_ref(), "open");
        if self.fail {
            return Err(PipelineError::ViewerLaunch {
                path: artifact.to_path_buf(),
                source: io::Error::other("no viewer available"),
            });
        }
        Ok(())
    }
}
