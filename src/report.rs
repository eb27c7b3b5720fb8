//! Training curves rendered as SVG charts.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use log::info;
use plotters::prelude::*;

use crate::{
    error::{PipelineError, Result},
    metrics::TrainingHistory,
};

/// One line on a chart; non-finite values are skipped when drawing.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: &'static str,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub file_name: &'static str,
    pub y_label: &'static str,
    pub series: [Series; 2],
}

impl Chart {
    pub fn accuracy(history: &TrainingHistory) -> Self {
        Self {
            file_name: "accuracy.svg",
            y_label: "Accuracy",
            series: [
                Series {
                    name: "Training accuracy",
                    values: history.series(|r| r.train_accuracy),
                },
                Series {
                    name: "Validation accuracy",
                    values: history.series(|r| r.val_accuracy),
                },
            ],
        }
    }

    pub fn loss(history: &TrainingHistory) -> Self {
        Self {
            file_name: "loss.svg",
            y_label: "Loss",
            series: [
                Series {
                    name: "Training loss",
                    values: history.series(|r| r.train_loss),
                },
                Series {
                    name: "Validation loss",
                    values: history.series(|r| r.val_loss),
                },
            ],
        }
    }

    /// Points as `(epoch, value)` with 1-based epochs, finite values only.
    pub fn points(values: &[f64]) -> Vec<(f64, f64)> {
        values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, v)| ((i + 1) as f64, *v))
            .collect()
    }

    /// Y range covering every finite point, never empty.
    pub fn y_range(&self) -> (f64, f64) {
        let finite = self
            .series
            .iter()
            .flat_map(|s| s.values.iter().copied())
            .filter(|v| v.is_finite());
        let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if lo > hi {
            return (0.0, 1.0);
        }
        let lo = lo.min(0.0);
        let pad = ((hi - lo) * 0.05).max(1e-3);
        (lo, hi + pad)
    }

    pub fn render(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.file_name);
        let epochs = self.series.iter().map(|s| s.values.len()).max().unwrap_or(0).max(1);
        let (y_min, y_max) = self.y_range();

        {
            let root = SVGBackend::new(&path, (800, 480)).into_drawing_area();
            root.fill(&WHITE).map_err(plot_error)?;

            let mut chart = ChartBuilder::on(&root)
                .margin(16)
                .x_label_area_size(40)
                .y_label_area_size(56)
                .build_cartesian_2d(1f64..(epochs as f64).max(2.0), y_min..y_max)
                .map_err(plot_error)?;

            chart
                .configure_mesh()
                .x_desc("Epochs")
                .y_desc(self.y_label)
                .draw()
                .map_err(plot_error)?;

            for (series, color) in self.series.iter().zip([BLUE, RED]) {
                chart
                    .draw_series(LineSeries::new(Self::points(&series.values), color.stroke_width(2)))
                    .map_err(plot_error)?
                    .label(series.name)
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
            }

            chart
                .configure_series_labels()
                .background_style(&WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw()
                .map_err(plot_error)?;

            root.present().map_err(plot_error)?;
        }
        Ok(path)
    }
}

fn plot_error(err: impl Display) -> PipelineError {
    PipelineError::Plot(err.to_string())
}

/// Renders the accuracy chart, then the loss chart, into `dir`.
pub fn render_history(history: &TrainingHistory, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|source| PipelineError::io(dir, source))?;

    let mut written = Vec::new();
    for chart in [Chart::accuracy(history), Chart::loss(history)] {
        let path = chart.render(dir)?;
        info!("{} curves written to {}", chart.y_label, path.display());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::EpochRecord;

    fn history() -> TrainingHistory {
        let mut history = TrainingHistory::new();
        for epoch in 1..=3 {
            history.add(EpochRecord {
                epoch,
                train_loss: 1.0 / epoch as f64,
                train_accuracy: 0.5 + 0.1 * epoch as f64,
                val_loss: if epoch == 2 { f64::NAN } else { 0.9 },
                val_accuracy: 0.6,
            });
        }
        history
    }

    #[test]
    fn charts_pair_training_and_validation_series() {
        let history = history();
        let accuracy = Chart::accuracy(&history);
        assert_eq!(accuracy.y_label, "Accuracy");
        assert_eq!(accuracy.series[0].values.len(), 3);
        assert_eq!(accuracy.series[1].values, vec![0.6, 0.6, 0.6]);

        let loss = Chart::loss(&history);
        assert_eq!(loss.file_name, "loss.svg");
        assert_eq!(loss.series[0].values[0], 1.0);
    }

    #[test]
    fn non_finite_points_are_dropped() {
        let points = Chart::points(&[0.9, f64::NAN, 0.7, f64::INFINITY]);
        assert_eq!(points, vec![(1.0, 0.9), (3.0, 0.7)]);
    }

    #[test]
    fn y_range_covers_all_finite_values() {
        let (lo, hi) = Chart::loss(&history()).y_range();
        assert_eq!(lo, 0.0);
        assert!(hi >= 1.0);

        let empty = Chart::loss(&TrainingHistory::new());
        assert_eq!(empty.y_range(), (0.0, 1.0));
    }
}
