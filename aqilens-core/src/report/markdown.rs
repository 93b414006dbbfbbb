//! Human-readable Markdown rendering of a report.

use crate::error::ValidationError;
use crate::report::writer::ReportWriter;
use crate::report::{Section, ValidationReport, fmt_metric};
use crate::validation::record::{MetricRecord, RecordStatus};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const MARKDOWN_FILE: &str = "validation_report.md";

pub struct MarkdownWriter;

impl ReportWriter for MarkdownWriter {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn write(&self, report: &ValidationReport, dir: &Path) -> Result<Vec<PathBuf>, ValidationError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(MARKDOWN_FILE);
        std::fs::write(&path, render_markdown(report))?;
        Ok(vec![path])
    }
}

fn unavailable<T>(out: &mut String, section: &Section<T>) {
    if let Some(reason) = section.reason() {
        let _ = writeln!(out, "_Section unavailable: {reason}_\n");
    }
}

fn status_cell(record: &MetricRecord) -> String {
    let reason = record.failure_reason.as_deref().unwrap_or("");
    match record.status {
        RecordStatus::Ok => "ok".to_string(),
        RecordStatus::Skipped if reason.starts_with("skipped") => reason.to_string(),
        RecordStatus::Skipped => format!("skipped: {reason}"),
        RecordStatus::Failed => format!("failed: {reason}"),
    }
}

/// Render the report as Markdown, mirroring the JSON structure.
pub fn render_markdown(report: &ValidationReport) -> String {
    let meta = &report.run_metadata;
    let mut out = String::new();
    let _ = writeln!(out, "# AQI Model Validation Report\n");

    let _ = writeln!(out, "## Run metadata\n");
    let _ = writeln!(out, "- Run id: `{}`", meta.run_id);
    let _ = writeln!(out, "- Version: {}", meta.tool_version);
    let _ = writeln!(out, "- Started: {}", meta.started_at.to_rfc3339());
    let _ = writeln!(out, "- Finished: {}", meta.finished_at.to_rfc3339());
    let _ = writeln!(
        out,
        "- Dataset: {} ({} rows, {} observations, {} rejected rows)",
        meta.dataset.source, meta.dataset.rows_read, meta.dataset.observations, meta.dataset.row_error_count
    );
    let _ = writeln!(out, "- Cities: {}", meta.validation_cities.join(", "));
    let horizons: Vec<String> = meta.horizons.iter().map(|h| format!("{h}h")).collect();
    let _ = writeln!(out, "- Horizons: {}", horizons.join(", "));
    let _ = writeln!(out, "- Models: {}\n", meta.models.join(", "));

    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "{}\n", report.summary.line());
    if !report.summary.unavailable_sections.is_empty() {
        let _ = writeln!(
            out,
            "Unavailable sections: {}\n",
            report.summary.unavailable_sections.join(", ")
        );
    }
    if !report.summary.no_skill.is_empty() {
        let _ = writeln!(out, "**No skill over persistence:**\n");
        for entry in &report.summary.no_skill {
            let _ = writeln!(
                out,
                "- {} / {} / {}h (skill {})",
                entry.model_name,
                entry.city,
                entry.horizon_hours.unwrap_or(0),
                fmt_metric(entry.skill_score)
            );
        }
        out.push('\n');
    }

    let _ = writeln!(out, "## Model rankings\n");
    if let Some(rankings) = report.rankings.data() {
        let _ = writeln!(out, "| Rank | Model | Score | Mean R² | Mean forecast RMSE | Notes |");
        let _ = writeln!(out, "|---:|---|---:|---:|---:|---|");
        for e in rankings {
            let _ = writeln!(
                out,
                "| {} | {} | {:.4} | {} | {} | {} |",
                e.rank,
                e.model_name,
                e.combined_score,
                fmt_metric(e.mean_r2),
                fmt_metric(e.mean_forecast_rmse),
                e.notes.join("; ")
            );
        }
        out.push('\n');
    } else {
        unavailable(&mut out, &report.rankings);
    }

    let _ = writeln!(out, "## Multi-city validation\n");
    if let Some(section) = report.multi_city.data() {
        let _ = writeln!(out, "| Model | City | N | R² | RMSE | MAE | MAPE | Max error | Median AE | Status |");
        let _ = writeln!(out, "|---|---|---:|---:|---:|---:|---:|---:|---:|---|");
        for r in &section.records {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                r.model_name,
                r.city,
                r.n_samples,
                fmt_metric(r.r2),
                fmt_metric(r.rmse),
                fmt_metric(r.mae),
                fmt_metric(r.mape),
                fmt_metric(r.max_error),
                fmt_metric(r.median_absolute_error),
                status_cell(r)
            );
        }
        out.push('\n');
        for c in section.coverage.iter().filter(|c| !c.missing_from_test.is_empty()) {
            let missing: Vec<&str> = c.missing_from_test.iter().map(|m| m.label()).collect();
            let _ = writeln!(
                out,
                "- {}: categories without hold-out samples: {}",
                c.city,
                missing.join(", ")
            );
        }
        if section.coverage.iter().any(|c| !c.missing_from_test.is_empty()) {
            out.push('\n');
        }
    } else {
        unavailable(&mut out, &report.multi_city);
    }

    let _ = writeln!(out, "## Cross-city generalization\n");
    if let Some(records) = report.generalization.data() {
        let _ = writeln!(out, "| Model | Held-out city | Same-city RMSE | Leave-one-out RMSE | Gap | Note |");
        let _ = writeln!(out, "|---|---|---:|---:|---:|---|");
        for g in records {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                g.model_name,
                g.city,
                fmt_metric(g.same_city_rmse),
                fmt_metric(g.leave_one_out_rmse),
                fmt_metric(g.generalization_gap),
                g.failure_reason.as_deref().unwrap_or("")
            );
        }
        out.push('\n');
    } else {
        unavailable(&mut out, &report.generalization);
    }

    let _ = writeln!(out, "## Forecasting\n");
    if let Some(records) = report.forecasting.data() {
        let _ = writeln!(
            out,
            "| Model | City | Horizon | N | R² | RMSE | MAE | Directional acc. | Bias | Skill | Status |"
        );
        let _ = writeln!(out, "|---|---|---:|---:|---:|---:|---:|---:|---:|---:|---|");
        for r in records {
            let skill = if r.no_skill() {
                format!("{} (no skill)", fmt_metric(r.skill_score))
            } else {
                fmt_metric(r.skill_score)
            };
            let _ = writeln!(
                out,
                "| {} | {} | {}h | {} | {} | {} | {} | {} | {} | {} | {} |",
                r.model_name,
                r.city,
                r.horizon_hours.unwrap_or(0),
                r.n_samples,
                fmt_metric(r.r2),
                fmt_metric(r.rmse),
                fmt_metric(r.mae),
                fmt_metric(r.directional_accuracy),
                fmt_metric(r.bias),
                skill,
                status_cell(r)
            );
        }
        out.push('\n');
    } else {
        unavailable(&mut out, &report.forecasting);
    }

    let _ = writeln!(out, "## Benchmarks\n");
    if let Some(section) = report.benchmarks.data() {
        for s in &section.sources {
            match &s.reason {
                Some(reason) if !s.is_available() => {
                    let _ = writeln!(out, "- {}: _unavailable: {reason}_", s.source_name);
                }
                _ => {
                    let _ = writeln!(out, "- {}: {} references", s.source_name, s.references);
                }
            }
        }
        if !section.sources.is_empty() {
            out.push('\n');
        }
        if section.comparisons.is_empty() {
            let _ = writeln!(out, "No comparable metrics.\n");
        } else {
            let _ = writeln!(out, "| Model | Source | City | Metric | Horizon | Model | Benchmark | Improvement % | Beats |");
            let _ = writeln!(out, "|---|---|---|---|---:|---:|---:|---:|---|");
            for c in &section.comparisons {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} | {:.3} | {:.3} | {} | {} |",
                    c.model_name,
                    c.source_name,
                    c.city,
                    c.metric,
                    c.horizon_hours.map_or_else(|| "-".to_string(), |h| format!("{h}h")),
                    c.model_value,
                    c.benchmark_value,
                    fmt_metric(c.improvement_pct),
                    if c.beats_benchmark { "yes" } else { "no" }
                );
            }
            out.push('\n');
        }
    } else {
        unavailable(&mut out, &report.benchmarks);
    }

    let _ = writeln!(out, "## Skipped cities\n");
    if report.skipped_cities.is_empty() {
        let _ = writeln!(out, "None.");
    } else {
        for s in &report.skipped_cities {
            let _ = writeln!(out, "- {} ({} observations): {}", s.city, s.observations, s.reason);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::test_support::sample_report;

    #[test]
    fn test_markdown_sections_present() {
        let md = render_markdown(&sample_report());
        for heading in [
            "## Run metadata",
            "## Summary",
            "## Model rankings",
            "## Multi-city validation",
            "## Cross-city generalization",
            "## Forecasting",
            "## Benchmarks",
            "## Skipped cities",
        ] {
            assert!(md.contains(heading), "missing {heading}");
        }
        assert!(md.contains("_Section unavailable: leave-one-city-out check disabled_"));
        assert!(md.contains("(no skill)"));
        assert!(md.contains("- Goa (10 observations): skipped: insufficient data"));
    }
}
