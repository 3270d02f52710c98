//! dupreport: run dupFinder over a source folder and open its report as HTML.
//!
//! Analyzer output is streamed to stdout as tagged lines while the tool runs.
//! The last-used inputs are remembered in `Settings.json` next to the binary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use dupreport::core::types::{CancellationToken, PipelineEvent, RunRequest, RunResult};
use dupreport::error::PipelineError;
use dupreport::exit_codes;
use dupreport::io::config::{PipelineConfig, default_config_path, load_config};
use dupreport::io::paths::PathResolver;
use dupreport::io::process::ProcessRunner;
use dupreport::io::settings::{Settings, default_settings_path, load_settings, save_settings};
use dupreport::io::transform::{ReportTransformer, Transformer};
use dupreport::io::viewer::{NoViewer, SystemViewer, Viewer};
use dupreport::logging;
use dupreport::pipeline::Pipeline;

#[derive(Parser)]
#[command(
    name = "dupreport",
    version,
    about = "Run dupFinder and render its duplicate-code report"
)]
struct Cli {
    /// Settings file [default: Settings.json next to the binary].
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Config file [default: dupreport.toml next to the binary].
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze the source folder, render the report and open it.
    Run(RunArgs),
    /// Render an existing report without running the analyzer.
    Transform {
        /// XML report written by dupFinder.
        #[arg(long)]
        report: PathBuf,
        /// XSLT stylesheet.
        #[arg(long)]
        transform: PathBuf,
        /// Do not open the rendered report.
        #[arg(long)]
        no_open: bool,
    },
    /// Print the stored settings as JSON.
    Settings,
}

/// Overrides for the stored settings; unset flags keep the stored value.
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Directory containing the dupFinder executable.
    #[arg(long)]
    tool_dir: Option<String>,
    /// Folder to analyze.
    #[arg(long)]
    source: Option<String>,
    /// Path of the XML report.
    #[arg(long)]
    output: Option<String>,
    /// XSLT stylesheet used to render the report.
    #[arg(long)]
    transform: Option<String>,
    /// Do not open the rendered report.
    #[arg(long)]
    no_open: bool,
    /// Do not write the inputs back to the settings file.
    #[arg(long)]
    no_save: bool,
}

impl RunArgs {
    fn apply(&self, settings: &mut Settings) {
        let overrides = [
            (&self.tool_dir, &mut settings.tool_path),
            (&self.source, &mut settings.source_folder),
            (&self.output, &mut settings.output_file),
            (&self.transform, &mut settings.transform_file),
        ];
        for (value, field) in overrides {
            if let Some(value) = value {
                field.clone_from(value);
            }
        }
    }
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match dispatch(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<()> {
    let settings_path = match cli.settings {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    match cli.command {
        Command::Run(args) => cmd_run(&settings_path, &config_path, &args),
        Command::Transform {
            report,
            transform,
            no_open,
        } => cmd_transform(&config_path, &report, &transform, no_open),
        Command::Settings => cmd_settings(&settings_path),
    }
}

/// Pipeline failures keep their own codes; anything else is bad input.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::Cancelled) => exit_codes::CANCELLED,
        Some(PipelineError::ToolFailed { .. }) => exit_codes::TOOL_FAILED,
        Some(_) => exit_codes::FAILURE,
        None => exit_codes::INVALID,
    }
}

fn cmd_run(settings_path: &Path, config_path: &Path, args: &RunArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let mut settings = load_settings(settings_path)?;
    args.apply(&mut settings);

    let missing = settings.missing_fields();
    if !missing.is_empty() {
        bail!(
            "missing settings: {} (pass them as flags or set them in {})",
            missing.join(", "),
            settings_path.display()
        );
    }
    if !args.no_save {
        save_settings(settings_path, &settings)?;
    }

    let cancel = CancellationToken::new();
    install_interrupt_handler(&cancel)?;
    let runner = ProcessRunner::new()
        .with_timeout(config.timeout())
        .with_cancellation(cancel.clone())
        .with_queue_capacity(config.line_queue_capacity);
    let transformer = ReportTransformer::new()
        .with_extension(config.artifact_extension.trim())
        .with_cancellation(cancel);

    let request = settings.to_request();
    let open = config.open_viewer && !args.no_open;
    let result = if open {
        execute(&config, runner, transformer, SystemViewer, &request)?
    } else {
        execute(&config, runner, transformer, NoViewer, &request)?
    };

    if !result.exit_observed_successfully {
        eprintln!("warning: dupFinder exited with status {:?}", result.exit.code);
    }
    eprintln!("report: {}", result.artifact_path.display());
    Ok(())
}

fn execute<V: Viewer>(
    config: &PipelineConfig,
    runner: ProcessRunner,
    transformer: ReportTransformer,
    viewer: V,
    request: &RunRequest,
) -> Result<RunResult, PipelineError> {
    let pipeline = Pipeline::new(
        PathResolver::new(config.executable_name.trim()),
        runner,
        transformer,
        viewer,
        config.exit_policy(),
    );
    pipeline.execute(request, &mut |event: &PipelineEvent| print_event(event))
}

fn print_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Line(line) if !line.is_end_of_stream() => println!("{line}"),
        PipelineEvent::Line(_) => {}
        PipelineEvent::Stage(stage) => debug!(stage = stage.as_str(), "pipeline stage"),
    }
}

fn install_interrupt_handler(cancel: &CancellationToken) -> Result<()> {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || cancel.cancel()).context("install Ctrl-C handler")
}

fn cmd_transform(
    config_path: &Path,
    report: &Path,
    transform: &Path,
    no_open: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let transformer = ReportTransformer::new().with_extension(config.artifact_extension.trim());
    let artifact = transformer.transform(report, transform)?;
    if config.open_viewer && !no_open {
        SystemViewer.open(&artifact)?;
    }
    println!("{}", artifact.display());
    Ok(())
}

fn cmd_settings(settings_path: &Path) -> Result<()> {
    let settings = load_settings(settings_path)?;
    let json = serde_json::to_string_pretty(&settings).context("serialize settings json")?;
    println!("{json}");
    Ok(())
}
