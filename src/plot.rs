//! Live plot updates.
//!
//! The acquisition loop hands a [`PlotFrame`] to a [`LivePlot`] after every grid point
//! and once more when the sweep completes. Rendering is entirely up to the
//! implementation:
//!
//! - [`NoPlot`]: discards frames (headless runs, tests)
//! - [`FrameLog`]: keeps every frame in memory
//! - [`SvgPlot`]: redraws an SVG file on each update (`plotting` feature)

use crate::error::AppResult;
use ndarray::Array2;

/// One named line of a line plot.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Legend label
    pub name: String,
    /// y values, one per x point so far
    pub values: Vec<f64>,
}

impl Series {
    /// Named trace.
    pub fn new(name: &str, values: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            values,
        }
    }
}

/// Snapshot of the data accumulated so far.
#[derive(Debug, Clone, PartialEq)]
pub enum PlotFrame {
    /// One or more traces over a common x axis. Traces may be shorter than `x`
    /// while the sweep is running.
    Line {
        /// Caption
        title: String,
        /// x axis description
        x_label: String,
        /// y axis description
        y_label: String,
        /// Full x axis
        x: Vec<f64>,
        /// Traces drawn against `x`
        series: Vec<Series>,
    },
    /// `z[[row, col]]` over `y[row]` and `x[col]`; NaN cells are left blank.
    Heatmap {
        /// Caption
        title: String,
        /// Column axis description
        x_label: String,
        /// Row axis description
        y_label: String,
        /// Column coordinates
        x: Vec<f64>,
        /// Row coordinates
        y: Vec<f64>,
        /// Cell values, `[row, col]`
        z: Array2<f64>,
    },
}

impl PlotFrame {
    /// Title shown above the plot.
    pub fn title(&self) -> &str {
        match self {
            PlotFrame::Line { title, .. } | PlotFrame::Heatmap { title, .. } => title,
        }
    }
}

/// Receives plot frames from a running sweep.
pub trait LivePlot: Send {
    /// Called after every acquisition.
    fn update(&mut self, frame: &PlotFrame) -> AppResult<()>;

    /// Called once after the last acquisition of a successful sweep.
    fn finish(&mut self, frame: &PlotFrame) -> AppResult<()> {
        self.update(frame)
    }
}

/// Discards every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlot;

impl LivePlot for NoPlot {
    fn update(&mut self, _frame: &PlotFrame) -> AppResult<()> {
        Ok(())
    }
}

/// Keeps every frame in memory.
#[derive(Debug, Default, Clone)]
pub struct FrameLog {
    updates: Vec<PlotFrame>,
    finished: Option<PlotFrame>,
}

impl FrameLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames passed to `update`.
    pub fn updates(&self) -> &[PlotFrame] {
        &self.updates
    }

    /// Frame passed to `finish`, if the sweep completed.
    pub fn finished(&self) -> Option<&PlotFrame> {
        self.finished.as_ref()
    }
}

impl LivePlot for FrameLog {
    fn update(&mut self, frame: &PlotFrame) -> AppResult<()> {
        self.updates.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self, frame: &PlotFrame) -> AppResult<()> {
        self.finished = Some(frame.clone());
        Ok(())
    }
}

#[cfg(feature = "plotting")]
pub use svg::SvgPlot;

#[cfg(feature = "plotting")]
mod svg {
    use super::*;
    use crate::error::SweepError;
    use plotters::prelude::*;
    use std::path::{Path, PathBuf};

    fn plot_err(err: impl std::fmt::Display) -> SweepError {
        SweepError::Plot(err.to_string())
    }

    fn finite_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
        let (lo, hi) = values
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        if lo > hi {
            None
        } else if lo == hi {
            Some((lo - 0.5, hi + 0.5))
        } else {
            Some((lo, hi))
        }
    }

    const PALETTE: [RGBColor; 4] = [BLUE, RED, GREEN, MAGENTA];

    /// Redraws an SVG image after every update.
    ///
    /// With `every > 1` intermediate updates are skipped; `finish` always draws.
    #[derive(Debug, Clone)]
    pub struct SvgPlot {
        path: PathBuf,
        size: (u32, u32),
        every: usize,
        updates: usize,
    }

    impl SvgPlot {
        /// Plot written to `path`.
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                size: (1000, 700),
                every: 1,
                updates: 0,
            }
        }

        /// Only redraw every `n`th update.
        pub fn every(mut self, n: usize) -> Self {
            self.every = n.max(1);
            self
        }

        /// Output file.
        pub fn path(&self) -> &Path {
            &self.path
        }

        fn draw(&self, frame: &PlotFrame) -> AppResult<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let root = SVGBackend::new(&self.path, self.size).into_drawing_area();
            root.fill(&WHITE).map_err(plot_err)?;
            match frame {
                PlotFrame::Line {
                    title,
                    x_label,
                    y_label,
                    x,
                    series,
                } => {
                    let Some((x0, x1)) = finite_range(x.iter().copied()) else {
                        return root.present().map_err(plot_err);
                    };
                    let (y0, y1) = finite_range(
                        series.iter().flat_map(|s| s.values.iter().copied()),
                    )
                    .unwrap_or((0.0, 1.0));
                    let mut chart = ChartBuilder::on(&root)
                        .caption(title.as_str(), ("sans-serif", 20))
                        .margin(10)
                        .x_label_area_size(40)
                        .y_label_area_size(60)
                        .build_cartesian_2d(x0..x1, y0..y1)
                        .map_err(plot_err)?;
                    chart
                        .configure_mesh()
                        .x_desc(x_label.as_str())
                        .y_desc(y_label.as_str())
                        .draw()
                        .map_err(plot_err)?;
                    for (s, color) in series.iter().zip(PALETTE.iter().cycle()) {
                        let color = *color;
                        let points = x.iter().copied().zip(s.values.iter().copied());
                        chart
                            .draw_series(LineSeries::new(points, color))
                            .map_err(plot_err)?
                            .label(s.name.as_str())
                            .legend(move |(x, y)| {
                                PathElement::new(vec![(x, y), (x + 20, y)], color)
                            });
                    }
                    chart
                        .configure_series_labels()
                        .background_style(WHITE.mix(0.8))
                        .border_style(BLACK)
                        .draw()
                        .map_err(plot_err)?;
                }
                PlotFrame::Heatmap {
                    title,
                    x_label,
                    y_label,
                    x,
                    y,
                    z,
                } => {
                    let half_x = cell_half_width(x);
                    let half_y = cell_half_width(y);
                    let (Some((x0, x1)), Some((y0, y1))) = (
                        finite_range(x.iter().copied()),
                        finite_range(y.iter().copied()),
                    ) else {
                        return root.present().map_err(plot_err);
                    };
                    let (z0, z1) = finite_range(z.iter().copied()).unwrap_or((0.0, 1.0));
                    let mut chart = ChartBuilder::on(&root)
                        .caption(title.as_str(), ("sans-serif", 20))
                        .margin(10)
                        .x_label_area_size(40)
                        .y_label_area_size(60)
                        .build_cartesian_2d(
                            (x0 - half_x)..(x1 + half_x),
                            (y0 - half_y)..(y1 + half_y),
                        )
                        .map_err(plot_err)?;
                    chart
                        .configure_mesh()
                        .disable_mesh()
                        .x_desc(x_label.as_str())
                        .y_desc(y_label.as_str())
                        .draw()
                        .map_err(plot_err)?;
                    let cells = z.indexed_iter().filter_map(|((row, col), &v)| {
                        let (&xc, &yc) = (x.get(col)?, y.get(row)?);
                        if !v.is_finite() {
                            return None;
                        }
                        let t = (v - z0) / (z1 - z0);
                        let color = HSLColor((240.0 - 240.0 * t) / 360.0, 0.85, 0.22 + 0.50 * t);
                        Some(Rectangle::new(
                            [(xc - half_x, yc - half_y), (xc + half_x, yc + half_y)],
                            color.filled(),
                        ))
                    });
                    chart.draw_series(cells).map_err(plot_err)?;
                }
            }
            root.present().map_err(plot_err)
        }
    }

    fn cell_half_width(points: &[f64]) -> f64 {
        match points {
            [a, b, ..] => (b - a).abs() / 2.0,
            _ => 0.5,
        }
    }

    impl LivePlot for SvgPlot {
        fn update(&mut self, frame: &PlotFrame) -> AppResult<()> {
            self.updates += 1;
            if self.updates % self.every == 0 {
                self.draw(frame)?;
            }
            Ok(())
        }

        fn finish(&mut self, frame: &PlotFrame) -> AppResult<()> {
            self.draw(frame)?;
            tracing::info!(path = %self.path.display(), "Plot saved");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> PlotFrame {
        PlotFrame::Line {
            title: "Transmission".into(),
            x_label: "Cavity Frequency (MHz)".into(),
            y_label: "a.u.".into(),
            x: (0..10).map(|i| 6960.0 + i as f64 * 0.5).collect(),
            series: vec![Series::new("mag", (0..n).map(|i| i as f64).collect())],
        }
    }

    #[test]
    fn frame_log_tracks_updates_and_finish() {
        let mut log = FrameLog::new();
        log.update(&line(1)).unwrap();
        log.update(&line(2)).unwrap();
        assert!(log.finished().is_none());
        log.finish(&line(2)).unwrap();
        assert_eq!(log.updates().len(), 2);
        assert_eq!(log.finished().map(PlotFrame::title), Some("Transmission"));
    }

    #[test]
    fn no_plot_accepts_everything() {
        let mut plot = NoPlot;
        plot.update(&line(0)).unwrap();
        plot.finish(&line(10)).unwrap();
    }

    #[cfg(feature = "plotting")]
    #[test]
    fn svg_plot_writes_line_and_heatmap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plots/trans.svg");
        let mut plot = SvgPlot::new(&path);
        plot.update(&line(5)).unwrap();
        assert!(path.exists());

        let mut z = Array2::from_elem((3, 4), f64::NAN);
        z.row_mut(0).assign(&ndarray::arr1(&[0.1, 0.2, 0.3, 0.4]));
        let heat = PlotFrame::Heatmap {
            title: "Transmission vs attenuation".into(),
            x_label: "Cavity Frequency (MHz)".into(),
            y_label: "Attenuation (dB)".into(),
            x: vec![1.0, 2.0, 3.0, 4.0],
            y: vec![10.0, 20.0, 30.0],
            z,
        };
        plot.finish(&heat).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[cfg(feature = "plotting")]
    #[test]
    fn svg_plot_skips_intermediate_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trans.svg");
        let mut plot = SvgPlot::new(&path).every(3);
        plot.update(&line(1)).unwrap();
        plot.update(&line(2)).unwrap();
        assert!(!path.exists());
        plot.update(&line(3)).unwrap();
        assert!(path.exists());
    }
}
