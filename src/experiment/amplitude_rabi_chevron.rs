//! Amplitude Rabi chevron.
//!
//! Outer axis: qubit drive frequency `qubit_freq = start_f + step_f * j` for
//! `j in 0..expts_f`. Inner axis: the integer drive gain
//! `qubit_gain = start_gain + step_gain * i` for `i in 0..expts_gain`. Every cell is one
//! amplitude-Rabi acquisition, so the I/Q planes trace the familiar chevron around the
//! qubit frequency. The record holds `xpts`, `freqpts` and the 2-D `avgi`, `avgq`,
//! `amps` and `phases`.

use async_trait::async_trait;
use tracing::info;

use super::{matrix_from, Experiment, RunContext};
use crate::engine::{set_int_key, OuterTarget};
use crate::error::AppResult;
use crate::grid::{GridSpec, SweepAxis};
use crate::params::ExperimentConfig;
use crate::plot::{LivePlot, PlotFrame};
use crate::record::{DataRecord, Dataset};

/// Qubit-frequency / drive-gain scan.
#[derive(Debug, Clone)]
pub struct AmplitudeRabiChevron {
    config: ExperimentConfig,
}

impl AmplitudeRabiChevron {
    /// Registry name.
    pub const NAME: &'static str = "amplitude_rabi_chevron";

    /// Chevron over `config`.
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    /// Qubit drive frequencies, MHz.
    pub fn frequency_axis(&self) -> AppResult<SweepAxis> {
        Ok(GridSpec::Stepped {
            start: self.config.get_f64("start_f")?,
            step: self.config.get_f64("step_f")?,
            count: self.config.get_usize("expts_f")?,
        }
        .axis("freqpts", "MHz"))
    }

    /// Drive gains, DAC units.
    pub fn gain_axis(&self) -> AppResult<SweepAxis> {
        Ok(GridSpec::Stepped {
            start: self.config.get_f64("start_gain")?,
            step: self.config.get_f64("step_gain")?,
            count: self.config.get_usize("expts_gain")?,
        }
        .axis("xpts", "DAC")
        .floored())
    }
}

#[async_trait]
impl Experiment for AmplitudeRabiChevron {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    async fn acquire(&self, ctx: &mut RunContext<'_>) -> AppResult<DataRecord> {
        let outer = self.frequency_axis()?;
        let inner = self.gain_axis()?;
        let mut progress = ctx.progress(outer.len());
        let outcome = ctx
            .engine()
            .run_2d(
                &outer,
                &OuterTarget::Config("qubit_freq".to_string()),
                &inner,
                &self.config,
                &mut set_int_key("qubit_gain"),
                Self::NAME,
                &mut *ctx.plot,
                &mut progress,
            )
            .await?;

        info!(
            rows = outcome.matrix.rows_filled(),
            cols = inner.len(),
            "Chevron complete"
        );
        Ok(DataRecord::builder(Self::NAME, outcome.config.clone())
            .dataset("xpts", Dataset::vector(inner.points().to_vec()).with_unit("DAC"))
            .dataset("freqpts", Dataset::vector(outer.points().to_vec()).with_unit("MHz"))
            .dataset("avgi", Dataset::from_array(outcome.matrix.i()))
            .dataset("avgq", Dataset::from_array(outcome.matrix.q()))
            .dataset("amps", Dataset::from_array(&outcome.matrix.magnitude()))
            .dataset(
                "phases",
                Dataset::from_array(&outcome.matrix.phase()).with_unit("rad"),
            )
            .build())
    }

    fn display(&self, record: &DataRecord, plot: &mut dyn LivePlot) -> AppResult<()> {
        plot.finish(&PlotFrame::Heatmap {
            title: "Amplitude Rabi (I)".to_string(),
            x_label: "Gain (DAC)".to_string(),
            y_label: "Frequency (MHz)".to_string(),
            x: record.dataset("xpts")?.values().to_vec(),
            y: record.dataset("freqpts")?.values().to_vec(),
            z: matrix_from(record, "avgi")?,
        })
    }
}
