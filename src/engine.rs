//! The sweep-and-acquire loop.
//!
//! For each set-point of a [`SweepAxis`] the loop
//!
//! 1. derives a new configuration record from the previous one with the set-point
//!    applied,
//! 2. binds a fresh [`Program`] to that record,
//! 3. awaits exactly one [`Sequencer::acquire`] call,
//! 4. appends the I/Q sample to a [`ResultMatrix`] and hands a frame to the live plot.
//!
//! Acquisitions never overlap. The first failing acquire ends the sweep with its error:
//! no further calls are made, the plot is not finished and nothing is persisted (the
//! caller only receives a [`SweepOutcome`] on success).
//!
//! ```text
//! cfg_0 ──apply(x_0)──▶ cfg_1 ──acquire──▶ row 0
//!                        │
//!                        └──apply(x_1)──▶ cfg_2 ──acquire──▶ row 1 ...
//! ```
//!
//! [`AcquisitionLoop::run_2d`] nests an inner sweep inside an outer set-point driven
//! through a configuration key or an instrument ([`OuterTarget`]) and fills a
//! [`Matrix2`] row by row.

use anyhow::Context;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{AppResult, SweepError};
use crate::grid::SweepAxis;
use crate::instrument::{Attenuator, IqSample, Program, Sequencer, VoltageSource};
use crate::params::{ExperimentConfig, FastFlux, ParamValue};
use crate::plot::{LivePlot, PlotFrame, Series};
use crate::progress::ProgressReporter;
use crate::results::{Matrix2, ResultMatrix};

/// Result of a completed one-dimensional sweep.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    /// Configuration of the final iteration
    pub config: ExperimentConfig,
    /// Set-points that were visited
    pub axis: SweepAxis,
    /// One row per set-point
    pub results: ResultMatrix,
}

/// Result of a completed nested sweep.
#[derive(Debug, Clone)]
pub struct Sweep2dOutcome {
    /// Configuration of the final inner iteration of the final row
    pub config: ExperimentConfig,
    /// Outer set-points, one per matrix row
    pub outer: SweepAxis,
    /// Inner set-points, one per matrix column
    pub inner: SweepAxis,
    /// I and Q planes, `[outer, inner]`
    pub matrix: Matrix2,
}

/// Set-point rule: `apply(&previous_config, value) -> next_config`.
pub type Apply<'a> = dyn FnMut(&ExperimentConfig, f64) -> AppResult<ExperimentConfig> + Send + 'a;

/// The default rule: store the set-point under `key`.
pub fn set_key(key: &str) -> impl FnMut(&ExperimentConfig, f64) -> AppResult<ExperimentConfig> + Send + '_ {
    move |cfg, value| Ok(cfg.with(key, value))
}

/// Like [`set_key`] but stores the set-point floored to an integer (DAC gains,
/// attenuator steps).
pub fn set_int_key(
    key: &str,
) -> impl FnMut(&ExperimentConfig, f64) -> AppResult<ExperimentConfig> + Send + '_ {
    move |cfg, value| Ok(cfg.with(key, ParamValue::Int(value.floor() as i64)))
}

/// What the outer axis of a nested sweep drives.
#[derive(Clone)]
pub enum OuterTarget {
    /// Store the set-point under a configuration key
    Config(String),
    /// Store the set-point floored to an integer under a configuration key
    ConfigInt(String),
    /// Step attenuator, set-point in dB (also stored under `atten` in the record)
    Attenuator(Arc<dyn Attenuator>),
    /// DC source, set-point in volts (also stored under `voltage` in the record)
    VoltageSource(Arc<dyn VoltageSource>),
}

impl std::fmt::Debug for OuterTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OuterTarget::Config(key) => write!(f, "Config({key})"),
            OuterTarget::ConfigInt(key) => write!(f, "ConfigInt({key})"),
            OuterTarget::Attenuator(_) => write!(f, "Attenuator"),
            OuterTarget::VoltageSource(_) => write!(f, "VoltageSource"),
        }
    }
}

impl OuterTarget {
    async fn apply(&self, cfg: &ExperimentConfig, value: f64) -> AppResult<ExperimentConfig> {
        match self {
            OuterTarget::Config(key) => Ok(cfg.with(key, value)),
            OuterTarget::ConfigInt(key) => Ok(cfg.with(key, ParamValue::Int(value.floor() as i64))),
            OuterTarget::Attenuator(atten) => {
                atten
                    .set_attenuation(value)
                    .await
                    .with_context(|| format!("setting attenuation to {value} dB"))
                    .map_err(SweepError::instrument)?;
                Ok(cfg.with("atten", value))
            }
            OuterTarget::VoltageSource(source) => {
                source
                    .set_voltage(value)
                    .await
                    .with_context(|| format!("setting voltage to {value} V"))
                    .map_err(SweepError::instrument)?;
                Ok(cfg.with("voltage", value))
            }
        }
    }
}

/// Drives a [`Sequencer`] across sweep axes.
#[derive(Clone)]
pub struct AcquisitionLoop {
    sequencer: Arc<dyn Sequencer>,
    load_pulses: bool,
    fast_flux: Option<FastFlux>,
}

impl AcquisitionLoop {
    /// Loop that reloads pulses on every acquire.
    pub fn new(sequencer: Arc<dyn Sequencer>) -> Self {
        Self {
            sequencer,
            load_pulses: true,
            fast_flux: None,
        }
    }

    /// Whether each acquire reloads the pulse memory.
    pub fn load_pulses(mut self, load: bool) -> Self {
        self.load_pulses = load;
        self
    }

    /// Attach a fast-flux schedule to every program built by this loop.
    pub fn with_fast_flux(mut self, fast_flux: FastFlux) -> Self {
        self.fast_flux = Some(fast_flux);
        self
    }

    /// Sequencer this loop acquires from.
    pub fn sequencer(&self) -> &Arc<dyn Sequencer> {
        &self.sequencer
    }

    /// Build the program for `cfg` and run exactly one acquisition.
    ///
    /// `point` only labels the error context.
    pub async fn acquire_one(
        &self,
        kind: &str,
        cfg: &ExperimentConfig,
        point: usize,
    ) -> AppResult<IqSample> {
        let mut program = Program::new(kind, Arc::new(cfg.clone()));
        if let Some(ff) = &self.fast_flux {
            program = program.with_fast_flux(ff);
        }
        let sample = self
            .sequencer
            .acquire(&program, self.load_pulses)
            .await
            .with_context(|| format!("{kind}: acquire failed at point {point}"))
            .map_err(SweepError::instrument)?;
        debug!(kind, point, version = cfg.version(), "Acquired");
        Ok(sample)
    }

    /// One-dimensional sweep.
    #[instrument(skip_all, fields(kind = kind, axis = axis.name(), points = axis.len()))]
    pub async fn run(
        &self,
        axis: &SweepAxis,
        base: &ExperimentConfig,
        apply: &mut Apply<'_>,
        kind: &str,
        plot: &mut dyn LivePlot,
    ) -> AppResult<SweepOutcome> {
        info!("Starting sweep");
        let mut results = ResultMatrix::new(self.sequencer.readout_channels());
        let mut cfg = base.clone();

        for (index, &value) in axis.points().iter().enumerate() {
            cfg = apply(&cfg, value)?;
            let sample = self.acquire_one(kind, &cfg, index).await?;
            results.push(&sample)?;
            plot.update(&line_frame(kind, axis, &results)?)?;
        }

        plot.finish(&line_frame(kind, axis, &results)?)?;
        info!(version = cfg.version(), "Sweep complete");
        Ok(SweepOutcome {
            config: cfg,
            axis: axis.clone(),
            results,
        })
    }

    /// Nested sweep: for every outer set-point, drive `outer_target` and run the inner
    /// axis through `inner_apply`. Readout channel 0 fills the matrix.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(kind = kind, outer = outer.name(), inner = inner.name()))]
    pub async fn run_2d(
        &self,
        outer: &SweepAxis,
        outer_target: &OuterTarget,
        inner: &SweepAxis,
        base: &ExperimentConfig,
        inner_apply: &mut Apply<'_>,
        kind: &str,
        plot: &mut dyn LivePlot,
        progress: &mut ProgressReporter,
    ) -> AppResult<Sweep2dOutcome> {
        info!(rows = outer.len(), cols = inner.len(), "Starting nested sweep");
        let mut matrix = Matrix2::new(outer.len(), inner.len());
        let mut cfg = base.clone();
        progress.start();

        for (row, &outer_value) in outer.points().iter().enumerate() {
            cfg = outer_target.apply(&cfg, outer_value).await?;
            let mut row_results = ResultMatrix::new(self.sequencer.readout_channels());
            for (col, &value) in inner.points().iter().enumerate() {
                cfg = inner_apply(&cfg, value)?;
                let point = row * inner.len() + col;
                let sample = self.acquire_one(kind, &cfg, point).await?;
                row_results.push(&sample)?;
            }
            let i = row_results.i_trace(0)?;
            let q = row_results.q_trace(0)?;
            matrix.set_row(row, &i.to_vec(), &q.to_vec())?;
            plot.update(&heatmap_frame(kind, outer, inner, &matrix))?;
            progress.row_finished(row);
            debug!(row, outer_value, "Row complete");
        }

        progress.finish();
        plot.finish(&heatmap_frame(kind, outer, inner, &matrix))?;
        info!(version = cfg.version(), "Nested sweep complete");
        Ok(Sweep2dOutcome {
            config: cfg,
            outer: outer.clone(),
            inner: inner.clone(),
            matrix,
        })
    }
}

/// Magnitude of every readout channel against the axis.
pub fn line_frame(title: &str, axis: &SweepAxis, results: &ResultMatrix) -> AppResult<PlotFrame> {
    let series = (0..results.channels())
        .map(|ch| {
            Ok(Series::new(
                &format!("ch{ch} magnitude"),
                results.magnitude(ch)?.to_vec(),
            ))
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(PlotFrame::Line {
        title: title.to_string(),
        x_label: format!("{} ({})", axis.name(), axis.unit()),
        y_label: "a.u.".to_string(),
        x: axis.points().to_vec(),
        series,
    })
}

/// Magnitude heat map of a nested sweep.
pub fn heatmap_frame(title: &str, outer: &SweepAxis, inner: &SweepAxis, matrix: &Matrix2) -> PlotFrame {
    PlotFrame::Heatmap {
        title: title.to_string(),
        x_label: format!("{} ({})", inner.name(), inner.unit()),
        y_label: format!("{} ({})", outer.name(), outer.unit()),
        x: inner.points().to_vec(),
        y: outer.points().to_vec(),
        z: matrix.magnitude(),
    }
}
