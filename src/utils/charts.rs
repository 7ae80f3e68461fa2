//! SVG Chart Generator for Training Curves
//!
//! Renders the accuracy and loss curves of a training history as standalone
//! SVG line charts.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::training::history::TrainingHistory;
use crate::utils::error::{HerbError, Result};

/// Chart styling constants
const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

const COLOR_TRAIN: &str = "#3498db";
const COLOR_VALIDATION: &str = "#e74c3c";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// Maximum number of x-axis tick labels before they are thinned out
const MAX_X_TICKS: usize = 20;

/// A data point for a line chart
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
}

/// A data series for charts
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<DataPoint>,
    pub color: String,
}

impl DataSeries {
    /// Series with x = 1..=len
    pub fn from_epochs(name: &str, values: &[f64], color: &str) -> Self {
        Self {
            name: name.to_string(),
            points: values
                .iter()
                .enumerate()
                .map(|(i, &y)| DataPoint {
                    x: (i + 1) as f64,
                    y,
                })
                .collect(),
            color: color.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// How y-axis tick values are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisFormat {
    /// Fractions in `[0, 1]` shown as percentages
    Percent,
    Decimal,
}

/// The four curves of a training history
#[derive(Debug, Clone)]
pub struct HistoryCurves {
    pub train_accuracy: DataSeries,
    pub val_accuracy: DataSeries,
    pub train_loss: DataSeries,
    pub val_loss: DataSeries,
}

/// Turn a history into plottable series, one point per epoch
pub fn history_curves(history: &TrainingHistory) -> HistoryCurves {
    HistoryCurves {
        train_accuracy: DataSeries::from_epochs(
            "Training accuracy",
            &history.train_accuracy,
            COLOR_TRAIN,
        ),
        val_accuracy: DataSeries::from_epochs(
            "Validation accuracy",
            &history.val_accuracy,
            COLOR_VALIDATION,
        ),
        train_loss: DataSeries::from_epochs("Training loss", &history.train_loss, COLOR_TRAIN),
        val_loss: DataSeries::from_epochs("Validation loss", &history.val_loss, COLOR_VALIDATION),
    }
}

/// Write `<prefix>_accuracy.svg` and `<prefix>_loss.svg` into `output_dir`
pub fn plot_history(
    history: &TrainingHistory,
    output_dir: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>> {
    if history.is_empty() {
        return Err(HerbError::Plot("History has no epochs to plot".to_string()));
    }
    fs::create_dir_all(output_dir)?;

    let curves = history_curves(history);

    let accuracy_path = output_dir.join(format!("{prefix}_accuracy.svg"));
    generate_line_chart(
        &format!("{prefix}: accuracy"),
        "Epoch",
        "Accuracy",
        &[curves.train_accuracy, curves.val_accuracy],
        AxisFormat::Percent,
        &accuracy_path,
    )?;

    let loss_path = output_dir.join(format!("{prefix}_loss.svg"));
    generate_line_chart(
        &format!("{prefix}: loss"),
        "Epoch",
        "Loss",
        &[curves.train_loss, curves.val_loss],
        AxisFormat::Decimal,
        &loss_path,
    )?;

    info!("Saved training curves to {:?} and {:?}", accuracy_path, loss_path);
    Ok(vec![accuracy_path, loss_path])
}

/// Generate a line chart SVG
///
/// NaN values leave a gap in their series.
pub fn generate_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[DataSeries],
    y_format: AxisFormat,
    output_path: &Path,
) -> Result<()> {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (x_min, x_max, y_min, y_max) = find_ranges(series, y_format)
        .ok_or_else(|| HerbError::Plot(format!("No finite values to plot for '{title}'")))?;

    let to_x = |x: f64| MARGIN_LEFT + ((x - x_min) / (x_max - x_min)) * plot_width;
    let to_y = |y: f64| MARGIN_TOP + plot_height - ((y - y_min) / (y_max - y_min)) * plot_height;

    let mut svg = String::new();

    // SVG header
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" width="{}" height="{}">"#,
        CHART_WIDTH, CHART_HEIGHT, CHART_WIDTH, CHART_HEIGHT
    ));

    // Background
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        CHART_WIDTH, CHART_HEIGHT
    ));

    // Title
    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2.0, COLOR_TEXT, escape_xml(title)
    ));

    // Grid lines
    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);
        let y = to_y(value);

        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT, y, MARGIN_LEFT + plot_width, y, COLOR_GRID
        ));

        let tick = match y_format {
            AxisFormat::Percent => format!("{:.0}%", value * 100.0),
            AxisFormat::Decimal => format!("{:.2}", value),
        };
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            MARGIN_LEFT - 10.0, y + 4.0, COLOR_TEXT, tick
        ));
    }

    // Axes
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP + plot_height, MARGIN_LEFT + plot_width, MARGIN_TOP + plot_height, COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP, MARGIN_LEFT, MARGIN_TOP + plot_height, COLOR_AXIS
    ));

    // Axis labels
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0, CHART_HEIGHT - 20.0, COLOR_TEXT, escape_xml(x_label)
    ));
    svg.push_str(&format!(
        r#"<text x="20" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {})">{}</text>"#,
        CHART_HEIGHT / 2.0, COLOR_TEXT, CHART_HEIGHT / 2.0, escape_xml(y_label)
    ));

    // Plot each series
    for series_data in series {
        let mut path = String::new();
        let mut pen_down = false;
        for point in &series_data.points {
            if !point.y.is_finite() {
                pen_down = false;
                continue;
            }
            let command = if pen_down { " L" } else { " M" };
            path.push_str(&format!("{} {:.2} {:.2}", command, to_x(point.x), to_y(point.y)));
            pen_down = true;
        }

        if !path.is_empty() {
            svg.push_str(&format!(
                r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
                path.trim_start(),
                series_data.color
            ));
        }

        for point in series_data.points.iter().filter(|p| p.y.is_finite()) {
            svg.push_str(&format!(
                r#"<circle cx="{:.2}" cy="{:.2}" r="4" fill="{}" stroke="white" stroke-width="2"/>"#,
                to_x(point.x),
                to_y(point.y),
                series_data.color
            ));
        }
    }

    // X-axis tick labels from the first series
    if let Some(first) = series.first() {
        let every = first.len().div_ceil(MAX_X_TICKS).max(1);
        for point in first.points.iter().step_by(every) {
            svg.push_str(&format!(
                r#"<text x="{:.2}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{:.0}</text>"#,
                to_x(point.x), MARGIN_TOP + plot_height + 20.0, COLOR_TEXT, point.x
            ));
        }
    }

    // Legend
    let mut legend_y = MARGIN_TOP + 10.0;
    for series_data in series {
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 160.0, legend_y, series_data.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 140.0, legend_y + 12.0, COLOR_TEXT, escape_xml(&series_data.name)
        ));
        legend_y += 25.0;
    }

    svg.push_str("</svg>");

    fs::write(output_path, svg)?;
    Ok(())
}

/// Axis ranges over the finite points. Accuracy charts always span `[0, 1]`;
/// other charts start at zero and leave 10% headroom.
fn find_ranges(series: &[DataSeries], y_format: AxisFormat) -> Option<(f64, f64, f64, f64)> {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for p in series.iter().flat_map(|s| &s.points).filter(|p| p.y.is_finite()) {
        x_min = x_min.min(p.x);
        x_max = x_max.max(p.x);
        y_min = y_min.min(p.y);
        y_max = y_max.max(p.y);
    }

    if !x_min.is_finite() {
        return None;
    }
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }

    let (y_min, y_max) = match y_format {
        AxisFormat::Percent => (0.0f64.min(y_min), 1.0f64.max(y_max)),
        AxisFormat::Decimal => {
            let low = 0.0f64.min(y_min);
            let high = if y_max > low { y_max * 1.1 } else { low + 1.0 };
            (low, high)
        }
    };

    Some((x_min, x_max, y_min, y_max))
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::history::EpochMetrics;
    use tempfile::TempDir;

    fn history(epochs: usize) -> TrainingHistory {
        let mut history = TrainingHistory::new();
        for e in 1..=epochs {
            history.push(&EpochMetrics {
                epoch: e,
                train_loss: 1.5 / e as f64,
                train_accuracy: 0.2 + 0.05 * e as f64,
                val_loss: 1.8 / e as f64,
                val_accuracy: 0.15 + 0.05 * e as f64,
                learning_rate: 1e-3,
            });
        }
        history
    }

    #[test]
    fn test_history_curves_have_one_point_per_epoch() {
        let curves = history_curves(&history(7));
        for series in [
            &curves.train_accuracy,
            &curves.val_accuracy,
            &curves.train_loss,
            &curves.val_loss,
        ] {
            assert_eq!(series.len(), 7);
            assert_eq!(series.points[0].x, 1.0);
            assert_eq!(series.points[6].x, 7.0);
        }
    }

    #[test]
    fn test_plot_history_writes_both_charts() {
        let dir = TempDir::new().unwrap();
        let paths = plot_history(&history(3), dir.path(), "baseline").unwrap();

        assert_eq!(paths.len(), 2);
        assert!(dir.path().join("baseline_accuracy.svg").exists());
        let loss_svg = fs::read_to_string(dir.path().join("baseline_loss.svg")).unwrap();
        assert!(loss_svg.starts_with("<svg"));
        assert!(loss_svg.contains("Validation loss"));
    }

    #[test]
    fn test_nan_validation_leaves_gap() {
        let dir = TempDir::new().unwrap();
        let mut history = history(2);
        history.val_loss = vec![f64::NAN, f64::NAN];
        history.val_accuracy = vec![f64::NAN, f64::NAN];

        plot_history(&history, dir.path(), "enhanced").unwrap();
        let svg = fs::read_to_string(dir.path().join("enhanced_loss.svg")).unwrap();
        assert!(!svg.contains("NaN"));
        // Only the training series draws a line
        assert_eq!(svg.matches("<path").count(), 1);
    }

    #[test]
    fn test_single_epoch_and_empty_history() {
        let dir = TempDir::new().unwrap();
        assert!(plot_history(&history(1), dir.path(), "one").is_ok());
        assert!(plot_history(&TrainingHistory::new(), dir.path(), "none").is_err());
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b & 'c'"), "a&lt;b &amp; &apos;c&apos;");
    }
}
