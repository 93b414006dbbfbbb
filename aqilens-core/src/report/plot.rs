//! Multi-panel SVG chart: forecast RMSE by horizon, per-city R², ranking.

use crate::error::ValidationError;
use crate::report::writer::ReportWriter;
use crate::report::ValidationReport;
use crate::validation::record::MetricRecord;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::{Path, PathBuf};

pub const PLOT_FILE: &str = "validation_plots.svg";

type DrawResult = Result<(), Box<dyn std::error::Error>>;
type Panel<'a> = DrawingArea<SVGBackend<'a>, Shift>;

const FONT: &str = "sans-serif";
/// R² bars are clipped here so one disastrous model does not flatten the rest.
const R2_FLOOR: f64 = -1.0;

#[derive(Debug, Clone, Copy)]
pub struct PlotWriter {
    pub width: u32,
    pub panel_height: u32,
}

impl Default for PlotWriter {
    fn default() -> Self {
        Self {
            width: 1100,
            panel_height: 420,
        }
    }
}

impl ReportWriter for PlotWriter {
    fn name(&self) -> &'static str {
        "plot"
    }

    fn write(&self, report: &ValidationReport, dir: &Path) -> Result<Vec<PathBuf>, ValidationError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(PLOT_FILE);
        self.draw(report, &path)
            .map_err(|e| ValidationError::report(format!("plot rendering failed: {e}")))?;
        Ok(vec![path])
    }
}

impl PlotWriter {
    fn draw(&self, report: &ValidationReport, path: &Path) -> DrawResult {
        let root = SVGBackend::new(path, (self.width, self.panel_height * 3)).into_drawing_area();
        root.fill(&WHITE)?;
        let panels = root.split_evenly((3, 1));
        rmse_by_horizon(&panels[0], report.forecasting_records())?;
        r2_by_city(&panels[1], report.multi_city_records())?;
        ranking_bars(&panels[2], report)?;
        root.present()?;
        Ok(())
    }
}

fn no_data(area: &Panel<'_>, title: &str) -> DrawResult {
    area.titled(&format!("{title} (no data)"), (FONT, 22))?;
    Ok(())
}

fn first_seen<'r>(records: impl Iterator<Item = &'r str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in records {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

fn index_label(x: f64, labels: &[String]) -> String {
    let i = x.round();
    if (x - i).abs() > 1e-6 || i < 0.0 {
        return String::new();
    }
    labels.get(i as usize).cloned().unwrap_or_default()
}

fn rmse_by_horizon(area: &Panel<'_>, records: &[MetricRecord]) -> DrawResult {
    const TITLE: &str = "Forecast RMSE vs horizon";
    let ok: Vec<&MetricRecord> = records.iter().filter(|r| r.is_ok() && r.rmse.is_some()).collect();
    let models = first_seen(ok.iter().map(|r| r.model_name.as_str()));
    if models.is_empty() {
        return no_data(area, TITLE);
    }

    let mut series: Vec<(String, Vec<(f64, f64)>)> = Vec::with_capacity(models.len());
    for model in models {
        let mut horizons: Vec<u32> = ok
            .iter()
            .filter(|r| r.model_name == model)
            .filter_map(|r| r.horizon_hours)
            .collect();
        horizons.sort_unstable();
        horizons.dedup();
        let points = horizons
            .into_iter()
            .map(|h| {
                let values: Vec<f64> = ok
                    .iter()
                    .filter(|r| r.model_name == model && r.horizon_hours == Some(h))
                    .filter_map(|r| r.rmse)
                    .collect();
                (f64::from(h), values.iter().sum::<f64>() / values.len() as f64)
            })
            .collect();
        series.push((model, points));
    }

    let max_h = series
        .iter()
        .flat_map(|(_, p)| p.iter().map(|(h, _)| *h))
        .fold(1.0_f64, f64::max);
    let max_rmse = series
        .iter()
        .flat_map(|(_, p)| p.iter().map(|(_, v)| *v))
        .fold(1.0_f64, f64::max);

    let mut chart = ChartBuilder::on(area)
        .caption(TITLE, (FONT, 22))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..max_h * 1.05, 0f64..max_rmse * 1.1)?;
    chart
        .configure_mesh()
        .x_desc("Horizon (hours)")
        .y_desc("RMSE")
        .draw()?;

    for (i, (model, points)) in series.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))?
            .label(model.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        chart.draw_series(points.iter().map(|&p| Circle::new(p, 3, color.filled())))?;
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

fn r2_by_city(area: &Panel<'_>, records: &[MetricRecord]) -> DrawResult {
    const TITLE: &str = "Hold-out R² by city";
    let ok: Vec<&MetricRecord> = records.iter().filter(|r| r.is_ok() && r.r2.is_some()).collect();
    let models = first_seen(ok.iter().map(|r| r.model_name.as_str()));
    let cities = first_seen(ok.iter().map(|r| r.city.as_str()));
    if models.is_empty() {
        return no_data(area, TITLE);
    }

    let y_min = ok
        .iter()
        .filter_map(|r| r.r2)
        .fold(0.0_f64, f64::min)
        .max(R2_FLOOR);
    let mut chart = ChartBuilder::on(area)
        .caption(TITLE, (FONT, 22))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..cities.len() as f64 - 0.5, y_min..1.05f64)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(cities.len())
        .x_label_formatter(&|x| index_label(*x, &cities))
        .y_desc("R²")
        .draw()?;

    let width = 0.8 / models.len() as f64;
    for (j, model) in models.iter().enumerate() {
        let color = Palette99::pick(j).to_rgba();
        let bars: Vec<Rectangle<(f64, f64)>> = cities
            .iter()
            .enumerate()
            .filter_map(|(i, city)| {
                let r2 = ok
                    .iter()
                    .find(|r| &r.model_name == model && &r.city == city)
                    .and_then(|r| r.r2)?;
                let x0 = i as f64 - 0.4 + j as f64 * width;
                Some(Rectangle::new([(x0, 0.0), (x0 + width, r2.max(y_min))], color.filled()))
            })
            .collect();
        chart
            .draw_series(bars)?
            .label(model.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 12, y + 5)], color.filled()));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

fn ranking_bars(area: &Panel<'_>, report: &ValidationReport) -> DrawResult {
    const TITLE: &str = "Combined ranking score";
    let Some(entries) = report.rankings.data().filter(|e| !e.is_empty()) else {
        return no_data(area, TITLE);
    };
    let labels: Vec<String> = entries.iter().map(|e| e.model_name.clone()).collect();
    let y_min = entries.iter().map(|e| e.combined_score).fold(0.0_f64, f64::min);
    let y_max = entries.iter().map(|e| e.combined_score).fold(1.0_f64, f64::max);

    let mut chart = ChartBuilder::on(area)
        .caption(TITLE, (FONT, 22))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..labels.len() as f64 - 0.5, y_min..y_max * 1.05)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(labels.len())
        .x_label_formatter(&|x| index_label(*x, &labels))
        .y_desc("Score")
        .draw()?;

    chart.draw_series(entries.iter().enumerate().map(|(i, e)| {
        let color = Palette99::pick(i).to_rgba();
        Rectangle::new(
            [(i as f64 - 0.35, 0.0), (i as f64 + 0.35, e.combined_score)],
            color.filled(),
        )
    }))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::test_support::sample_report;

    #[test]
    fn test_index_label() {
        let labels = vec!["Delhi".to_string(), "Mumbai".to_string()];
        assert_eq!(index_label(1.0, &labels), "Mumbai");
        assert_eq!(index_label(0.5, &labels), "");
        assert_eq!(index_label(-1.0, &labels), "");
        assert_eq!(index_label(2.0, &labels), "");
    }

    #[test]
    fn test_writes_svg() {
        let dir = tempfile::tempdir().unwrap();
        let files = PlotWriter::default().write(&sample_report(), dir.path()).unwrap();
        let svg = std::fs::read_to_string(&files[0]).unwrap();
        assert!(svg.starts_with("<svg") || svg.starts_with("<?xml"));
        assert!(svg.contains("Forecast RMSE vs horizon"));
    }
}
