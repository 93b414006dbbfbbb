//! Report serializers.
//!
//! Each writer consumes the same finished report and reports its own
//! outcome; one failing writer never stops the others.

use crate::config::ReportConfig;
use crate::error::ValidationError;
use crate::report::markdown::MarkdownWriter;
use crate::report::plot::PlotWriter;
use crate::report::tables::CsvWriter;
use crate::report::ValidationReport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const JSON_FILE: &str = "validation_report.json";

/// Writes one kind of report artifact into a directory.
pub trait ReportWriter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write the artifact(s) and return the paths written.
    fn write(&self, report: &ValidationReport, dir: &Path) -> Result<Vec<PathBuf>, ValidationError>;
}

/// Result of one writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactOutcome {
    pub writer: String,
    pub files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArtifactOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Full structured report as pretty-printed JSON.
pub struct JsonWriter;

impl JsonWriter {
    pub fn render(report: &ValidationReport) -> Result<String, ValidationError> {
        Ok(serde_json::to_string_pretty(report)?)
    }
}

impl ReportWriter for JsonWriter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn write(&self, report: &ValidationReport, dir: &Path) -> Result<Vec<PathBuf>, ValidationError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(JSON_FILE);
        std::fs::write(&path, Self::render(report)?)?;
        Ok(vec![path])
    }
}

/// The writers enabled in `config`.
pub fn default_writers(config: &ReportConfig) -> Vec<Box<dyn ReportWriter>> {
    let mut writers: Vec<Box<dyn ReportWriter>> = Vec::new();
    if config.json {
        writers.push(Box::new(JsonWriter));
    }
    if config.markdown {
        writers.push(Box::new(MarkdownWriter));
    }
    if config.csv {
        writers.push(Box::new(CsvWriter));
    }
    if config.plot {
        writers.push(Box::new(PlotWriter::default()));
    }
    writers
}

/// Run every writer against `report`, collecting each outcome.
pub fn write_all(
    report: &ValidationReport,
    dir: &Path,
    writers: &[Box<dyn ReportWriter>],
) -> Vec<ArtifactOutcome> {
    writers
        .iter()
        .map(|writer| match writer.write(report, dir) {
            Ok(files) => {
                tracing::info!(writer = writer.name(), files = files.len(), "Report artifact written");
                ArtifactOutcome {
                    writer: writer.name().to_string(),
                    files,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(writer = writer.name(), error = %e, "Report writer failed");
                ArtifactOutcome {
                    writer: writer.name().to_string(),
                    files: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::test_support::sample_report;

    struct Broken;

    impl ReportWriter for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn write(&self, _report: &ValidationReport, _dir: &Path) -> Result<Vec<PathBuf>, ValidationError> {
            Err(ValidationError::report("disk full"))
        }
    }

    #[test]
    fn test_failing_writer_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let writers: Vec<Box<dyn ReportWriter>> = vec![Box::new(Broken), Box::new(JsonWriter)];
        let outcomes = write_all(&sample_report(), dir.path(), &writers);
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].is_ok());
        assert!(outcomes[1].is_ok());
        assert!(dir.path().join(JSON_FILE).exists());
    }

    #[test]
    fn test_json_has_all_top_level_keys() {
        let json: serde_json::Value =
            serde_json::from_str(&JsonWriter::render(&sample_report()).unwrap()).unwrap();
        for key in [
            "run_metadata",
            "multi_city",
            "generalization",
            "forecasting",
            "benchmarks",
            "rankings",
            "skipped_cities",
            "summary",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["generalization"]["status"], "unavailable");
        assert_eq!(json["forecasting"]["status"], "available");
    }

    #[test]
    fn test_default_writers_respect_config() {
        let config = ReportConfig {
            plot: false,
            csv: false,
            ..ReportConfig::default()
        };
        let names: Vec<_> = default_writers(&config).iter().map(|w| w.name()).collect();
        assert_eq!(names, vec!["json", "markdown"]);
    }
}
