//! The flat `Settings.json` record remembered between runs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::core::types::RunRequest;
use crate::io::{beside_executable, write_atomic};

pub const SETTINGS_FILE_NAME: &str = "Settings.json";

/// Last-used run inputs. Keys keep the PascalCase names of existing files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory containing the analyzer executable.
    #[serde(rename = "DupFinderPath", deserialize_with = "null_as_empty")]
    pub tool_path: String,
    #[serde(rename = "TransformFile", deserialize_with = "null_as_empty")]
    pub transform_file: String,
    #[serde(rename = "SourceFolder", deserialize_with = "null_as_empty")]
    pub source_folder: String,
    /// Report path handed to the analyzer.
    #[serde(rename = "OutputFile", deserialize_with = "null_as_empty")]
    pub output_file: String,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Settings {
    /// Keys whose values are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("DupFinderPath", &self.tool_path),
            ("TransformFile", &self.transform_file),
            ("SourceFolder", &self.source_folder),
            ("OutputFile", &self.output_file),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| key)
        .collect()
    }

    /// Build a run request. The tool path and source folder are trimmed of
    /// surrounding whitespace; the other paths are taken verbatim.
    pub fn to_request(&self) -> RunRequest {
        RunRequest {
            tool_directory: PathBuf::from(self.tool_path.trim()),
            source_folder: PathBuf::from(self.source_folder.trim()),
            report_path: PathBuf::from(&self.output_file),
            transform_definition_path: PathBuf::from(&self.transform_file),
        }
    }
}

/// `Settings.json` next to the running binary.
pub fn default_settings_path() -> Result<PathBuf> {
    beside_executable(SETTINGS_FILE_NAME)
}

/// Load settings. A missing file, or one holding `null`, yields defaults.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        debug!(path = %path.display(), "no settings file, using defaults");
        return Ok(Settings::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Option<Settings> =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(settings.unwrap_or_default())
}

/// Overwrite the settings file wholesale.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(settings).context("serialize settings json")?;
    buf.push('\n');
    write_atomic(path, &buf)?;
    debug!(path = %path.display(), "settings saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Settings {
        Settings {
            tool_path: "  /opt/dupfinder \n".to_string(),
            transform_file: "/opt/report.xslt".to_string(),
            source_folder: " /work/my src".to_string(),
            output_file: "/work/out/report.xml".to_string(),
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&temp.path().join(SETTINGS_FILE_NAME)).expect("load");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn null_document_yields_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "null").expect("write");
        assert_eq!(load_settings(&path).expect("load"), Settings::default());
    }

    #[test]
    fn null_and_absent_fields_load_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, r#"{"DupFinderPath": null, "SourceFolder": "/src"}"#).expect("write");
        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.tool_path, "");
        assert_eq!(settings.source_folder, "/src");
        assert_eq!(
            settings.missing_fields(),
            vec!["DupFinderPath", "TransformFile", "OutputFile"]
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "{ not json").expect("write");
        assert!(load_settings(&path).is_err());
    }

    #[test]
    fn save_uses_pascal_case_keys() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE_NAME);
        save_settings(&path, &sample()).expect("save");

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        let object = raw.as_object().expect("object");
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["DupFinderPath", "OutputFile", "SourceFolder", "TransformFile"]
        );
        assert_eq!(load_settings(&path).expect("load"), sample());
        assert!(!temp.path().join("Settings.json.tmp").exists());
    }

    #[test]
    fn save_overwrites_previous_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE_NAME);
        save_settings(&path, &sample()).expect("save");
        save_settings(&path, &Settings::default()).expect("save again");
        assert_eq!(load_settings(&path).expect("load"), Settings::default());
    }

    #[test]
    fn request_trims_tool_and_source_only() {
        let request = sample().to_request();
        assert_eq!(request.tool_directory, PathBuf::from("/opt/dupfinder"));
        assert_eq!(request.source_folder, PathBuf::from("/work/my src"));
        assert_eq!(request.report_path, PathBuf::from("/work/out/report.xml"));
        assert_eq!(
            request.transform_definition_path,
            PathBuf::from("/opt/report.xslt")
        );
    }
}
