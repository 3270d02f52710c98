//! CLI tests for `dupreport run`, `transform` and `settings`.
//!
//! Spawns the dupreport binary against a fake analyzer and verifies stdout,
//! the persisted settings file and the exit codes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use dupreport::exit_codes;
use dupreport::io::settings::{Settings, load_settings, save_settings};
use dupreport::test_support::{DEFAULT_STYLESHEET, SAMPLE_REPORT};

struct Home {
    temp: tempfile::TempDir,
}

impl Home {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("src")).expect("source dir");
        fs::write(temp.path().join("report.xslt"), DEFAULT_STYLESHEET).expect("stylesheet");
        Self { temp }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    fn settings_path(&self) -> PathBuf {
        self.path("Settings.json")
    }

    fn dupreport(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_dupreport"))
            .arg("--settings")
            .arg(self.settings_path())
            .arg("--config")
            .arg(self.path("dupreport.toml"))
            .args(args)
            .output()
            .expect("spawn dupreport")
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(unix)]
#[test]
fn run_prints_tagged_lines_and_saves_settings() {
    use dupreport::test_support::FakeTool;

    let home = Home::new();
    let tool = FakeTool::writing_report(0);
    let tool_dir = arg(tool.dir());
    let source = arg(&home.path("src"));
    let report = arg(&home.path("report.xml"));
    let stylesheet = arg(&home.path("report.xslt"));

    let output = home.dupreport(&[
        "run",
        "--tool-dir",
        &tool_dir,
        "--source",
        &source,
        "--output",
        &report,
        "--transform",
        &stylesheet,
        "--no-open",
    ]);

    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", text(&output.stderr));
    let stdout = text(&output.stdout);
    let info: Vec<&str> = stdout
        .lines()
        .filter(|line| line.starts_with("[INFO] : "))
        .collect();
    assert_eq!(
        info,
        [
            format!("[INFO] : Analyzing {source}").as_str(),
            "[INFO] : Report written"
        ]
    );
    let errors: Vec<&str> = stdout
        .lines()
        .filter(|line| line.starts_with("[ERROR]: "))
        .collect();
    assert_eq!(errors, ["[ERROR]: warning: sample warning"]);
    assert!(home.path("report.html").exists());

    let saved = load_settings(&home.settings_path()).expect("settings");
    assert_eq!(
        saved,
        Settings {
            tool_path: tool_dir,
            transform_file: stylesheet,
            source_folder: source,
            output_file: report,
        }
    );
}

#[cfg(unix)]
#[test]
fn run_uses_stored_settings_and_no_save_keeps_them() {
    use dupreport::test_support::FakeTool;

    let home = Home::new();
    let tool = FakeTool::writing_report(0);
    let stored = Settings {
        tool_path: arg(tool.dir()),
        transform_file: arg(&home.path("report.xslt")),
        source_folder: arg(&home.path("src")),
        output_file: arg(&home.path("report.xml")),
    };
    save_settings(&home.settings_path(), &stored).expect("seed settings");
    let elsewhere = arg(&home.path("elsewhere.xml"));

    let output = home.dupreport(&["run", "--output", &elsewhere, "--no-open", "--no-save"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", text(&output.stderr));
    assert!(home.path("elsewhere.html").exists());
    assert_eq!(load_settings(&home.settings_path()).expect("settings"), stored);
}

#[cfg(unix)]
#[test]
fn strict_config_turns_nonzero_exit_into_tool_failed() {
    use dupreport::test_support::FakeTool;

    let home = Home::new();
    fs::write(home.path("dupreport.toml"), "fail_on_nonzero_exit = true\n").expect("config");
    let tool = FakeTool::writing_report(5);
    let tool_dir = arg(tool.dir());
    let source = arg(&home.path("src"));
    let report = arg(&home.path("report.xml"));
    let stylesheet = arg(&home.path("report.xslt"));

    let output = home.dupreport(&[
        "run",
        "--tool-dir",
        &tool_dir,
        "--source",
        &source,
        "--output",
        &report,
        "--transform",
        &stylesheet,
        "--no-open",
    ]);

    assert_eq!(output.status.code(), Some(exit_codes::TOOL_FAILED));
    assert!(text(&output.stderr).contains("error: "));
    assert!(!home.path("report.html").exists());
}

#[test]
fn run_with_blank_settings_is_invalid() {
    let home = Home::new();

    let output = home.dupreport(&["run", "--no-open"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = text(&output.stderr);
    assert!(stderr.contains("error: missing settings"), "{stderr}");
    assert!(stderr.contains("DupFinderPath"), "{stderr}");
    assert!(!home.settings_path().exists());
}

#[test]
fn run_with_missing_tool_directory_fails() {
    let home = Home::new();
    let missing = arg(&home.path("no-such-tools"));
    let source = arg(&home.path("src"));
    let report = arg(&home.path("report.xml"));
    let stylesheet = arg(&home.path("report.xslt"));

    let output = home.dupreport(&[
        "run",
        "--tool-dir",
        &missing,
        "--source",
        &source,
        "--output",
        &report,
        "--transform",
        &stylesheet,
        "--no-open",
    ]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILURE));
    let stderr = text(&output.stderr);
    assert!(stderr.contains("does not exist"), "{stderr}");
    assert!(text(&output.stdout).is_empty());
}

#[test]
fn transform_renders_existing_report() {
    let home = Home::new();
    let report = home.path("report.xml");
    fs::write(&report, SAMPLE_REPORT).expect("report");

    let output = home.dupreport(&[
        "transform",
        "--report",
        &arg(&report),
        "--transform",
        &arg(&home.path("report.xslt")),
        "--no-open",
    ]);

    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", text(&output.stderr));
    assert_eq!(text(&output.stdout).trim_end(), arg(&home.path("report.html")));
    let html = fs::read_to_string(home.path("report.html")).expect("artifact");
    assert!(html.contains("Solution/Shared/Retry.cs"));
}

#[test]
fn settings_prints_stored_json() {
    let home = Home::new();
    save_settings(
        &home.settings_path(),
        &Settings {
            tool_path: "/opt/dupfinder".to_string(),
            ..Settings::default()
        },
    )
    .expect("seed settings");

    let output = home.dupreport(&["settings"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let printed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("settings json");
    assert_eq!(printed["DupFinderPath"], "/opt/dupfinder");
    assert_eq!(printed["OutputFile"], "");
}
