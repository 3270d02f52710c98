//! Orchestration for a single `dupreport run`.
//!
//! Resolve the request, run the analyzer while forwarding its output, render
//! the report, then hand the artifact to the viewer. Stages never overlap and
//! the first failure ends the run.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, instrument, warn};

use crate::core::types::{
    ExitPolicy, OutputLine, PipelineEvent, RunRequest, RunResult, Stage, ToolExit,
    ToolInvocation,
};
use crate::error::PipelineError;
use crate::io::paths::PathResolver;
use crate::io::process::ToolRunner;
use crate::io::transform::Transformer;
use crate::io::viewer::Viewer;

/// The assembled stages. Built once by the caller and reused across runs.
pub struct Pipeline<R, T, V> {
    resolver: PathResolver,
    runner: R,
    transformer: T,
    viewer: V,
    policy: ExitPolicy,
    busy: AtomicBool,
}

/// Clears the busy flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: ToolRunner, T: Transformer, V: Viewer> Pipeline<R, T, V> {
    pub fn new(
        resolver: PathResolver,
        runner: R,
        transformer: T,
        viewer: V,
        policy: ExitPolicy,
    ) -> Self {
        Self {
            resolver,
            runner,
            transformer,
            viewer,
            policy,
            busy: AtomicBool::new(false),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn transformer(&self) -> &T {
        &self.transformer
    }

    pub fn viewer(&self) -> &V {
        &self.viewer
    }

    /// Run every stage once. Stage transitions and output lines are passed to
    /// `on_event` in the order they happen.
    ///
    /// Fails fast with [`PipelineError::Busy`] if another run on this
    /// pipeline has not finished yet.
    #[instrument(skip_all, fields(source = %request.source_folder.display()))]
    pub fn execute(
        &self,
        request: &RunRequest,
        on_event: &mut dyn FnMut(&PipelineEvent),
    ) -> Result<RunResult, PipelineError> {
        let Some(_guard) = RunGuard::acquire(&self.busy) else {
            warn!("rejected run: pipeline busy");
            return Err(PipelineError::Busy);
        };

        let outcome = self.run_stages(request, on_event);
        match &outcome {
            Ok(result) => {
                info!(artifact = %result.artifact_path.display(), "run complete");
                emit_stage(on_event, Stage::Done);
            }
            Err(e) => {
                warn!(err = %e, "run failed");
                emit_stage(on_event, Stage::Failed);
            }
        }
        outcome
    }

    fn run_stages(
        &self,
        request: &RunRequest,
        on_event: &mut dyn FnMut(&PipelineEvent),
    ) -> Result<RunResult, PipelineError> {
        emit_stage(on_event, Stage::Resolving);
        let invocation = self.resolver.resolve(request)?;

        emit_stage(on_event, Stage::Running);
        let exit = self.runner.run(&invocation, &mut |line: &OutputLine| {
            on_event(&PipelineEvent::Line(line.clone()));
        })?;
        self.check_exit(&invocation, exit)?;

        emit_stage(on_event, Stage::Transforming);
        let artifact_path = self
            .transformer
            .transform(&invocation.report_path, &request.transform_definition_path)?;
        self.viewer.open(&artifact_path)?;

        Ok(RunResult {
            exit_observed_successfully: exit.success(),
            artifact_path,
            exit,
        })
    }

    fn check_exit(
        &self,
        invocation: &ToolInvocation,
        exit: ToolExit,
    ) -> Result<(), PipelineError> {
        if exit.success() {
            return Ok(());
        }
        warn!(
            code = ?exit.code,
            program = %invocation.program.display(),
            "analyzer exited non-zero"
        );
        match self.policy {
            ExitPolicy::Tolerate => Ok(()),
            ExitPolicy::FailOnNonZero => Err(PipelineError::ToolFailed {
                program: invocation.program.clone(),
                code: exit.code,
            }),
        }
    }
}

fn emit_stage(on_event: &mut dyn FnMut(&PipelineEvent), stage: Stage) {
    info!(stage = stage.as_str(), "stage");
    on_event(&PipelineEvent::Stage(stage));
}
