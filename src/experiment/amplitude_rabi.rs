//! Amplitude Rabi oscillation.
//!
//! Steps the qubit drive gain `qubit_gain = start + step * i` for `i in 0..expts` at a
//! fixed readout and records the averaged I/Q response. The saved record carries
//! `xpts`, `avgi`, `avgq` and the derived `amps` and `phases`.

use async_trait::async_trait;
use tracing::info;

use super::{Experiment, RunContext};
use crate::engine::set_int_key;
use crate::error::AppResult;
use crate::grid::{GridSpec, SweepAxis};
use crate::params::ExperimentConfig;
use crate::plot::{LivePlot, PlotFrame, Series};
use crate::record::{DataRecord, Dataset};
use crate::results::argmax;

/// Drive-gain sweep of the qubit pulse.
#[derive(Debug, Clone)]
pub struct AmplitudeRabi {
    config: ExperimentConfig,
}

impl AmplitudeRabi {
    /// Registry name.
    pub const NAME: &'static str = "amplitude_rabi";

    /// Rabi sweep over `config`.
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    /// Drive gains to visit, DAC units.
    pub fn axis(&self) -> AppResult<SweepAxis> {
        Ok(GridSpec::Stepped {
            start: self.config.get_f64("start")?,
            step: self.config.get_f64("step")?,
            count: self.config.get_usize("expts")?,
        }
        .axis("xpts", "DAC")
        .floored())
    }
}

#[async_trait]
impl Experiment for AmplitudeRabi {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    async fn acquire(&self, ctx: &mut RunContext<'_>) -> AppResult<DataRecord> {
        let axis = self.axis()?;
        let outcome = ctx
            .engine()
            .run(
                &axis,
                &self.config,
                &mut set_int_key("qubit_gain"),
                Self::NAME,
                &mut *ctx.plot,
            )
            .await?;

        let amps = outcome.results.magnitude(0)?.to_vec();
        if let Some(best) = argmax(&amps) {
            info!(gain = axis.points()[best], "Largest Rabi response");
        }
        Ok(DataRecord::builder(Self::NAME, outcome.config)
            .dataset("xpts", Dataset::vector(axis.points().to_vec()).with_unit("DAC"))
            .dataset("avgi", Dataset::vector(outcome.results.i_trace(0)?.to_vec()))
            .dataset("avgq", Dataset::vector(outcome.results.q_trace(0)?.to_vec()))
            .dataset("amps", Dataset::vector(amps))
            .dataset(
                "phases",
                Dataset::vector(outcome.results.phase(0)?.to_vec()).with_unit("rad"),
            )
            .build())
    }

    fn display(&self, record: &DataRecord, plot: &mut dyn LivePlot) -> AppResult<()> {
        plot.finish(&PlotFrame::Line {
            title: "Amplitude Rabi".to_string(),
            x_label: "Qubit Gain (DAC)".to_string(),
            y_label: "a.u.".to_string(),
            x: record.dataset("xpts")?.values().to_vec(),
            series: vec![
                Series::new("I", record.dataset("avgi")?.values().to_vec()),
                Series::new("Q", record.dataset("avgq")?.values().to_vec()),
            ],
        })
    }
}
