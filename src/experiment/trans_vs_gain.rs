//! Transmission against readout gain.
//!
//! Outer axis: integer `linspace(trans_gain_start, trans_gain_stop, trans_gain_num)`
//! stored as `read_pulse_gain`. Inner axis: the readout-frequency linspace. The heat map
//! normalizes every row to `[0, 1]` so low-gain rows stay visible.

use async_trait::async_trait;

use super::{
    nested_display, nested_record, trans_frequency_axis, with_trans_reps, Experiment,
    RunContext,
};
use crate::engine::{set_key, OuterTarget};
use crate::error::AppResult;
use crate::grid::{GridSpec, SweepAxis};
use crate::params::ExperimentConfig;
use crate::plot::LivePlot;
use crate::record::DataRecord;

/// Nested readout-gain / frequency sweep.
#[derive(Debug, Clone)]
pub struct TransVsGain {
    config: ExperimentConfig,
}

impl TransVsGain {
    /// Registry name.
    pub const NAME: &'static str = "trans_vs_gain";

    /// Gain sweep over `config`.
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    /// Readout gains to visit, DAC units.
    pub fn gain_axis(&self) -> AppResult<SweepAxis> {
        Ok(GridSpec::Linspace {
            start: self.config.get_f64("trans_gain_start")?,
            stop: self.config.get_f64("trans_gain_stop")?,
            count: self.config.get_usize("trans_gain_num")?,
        }
        .axis("gainVec", "DAC")
        .floored())
    }
}

#[async_trait]
impl Experiment for TransVsGain {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    async fn acquire(&self, ctx: &mut RunContext<'_>) -> AppResult<DataRecord> {
        let outer = self.gain_axis()?;
        let inner = trans_frequency_axis(&self.config)?;
        let base = with_trans_reps(&self.config)?;
        let mut progress = ctx.progress(outer.len());
        let outcome = ctx
            .engine()
            .run_2d(
                &outer,
                &OuterTarget::ConfigInt("read_pulse_gain".to_string()),
                &inner,
                &base,
                &mut set_key("read_pulse_freq"),
                Self::NAME,
                &mut *ctx.plot,
                &mut progress,
            )
            .await?;

        Ok(nested_record(Self::NAME, "gainVec", outcome.config.clone(), &outcome).build())
    }

    fn display(&self, record: &DataRecord, plot: &mut dyn LivePlot) -> AppResult<()> {
        nested_display(
            record,
            "Cavity Transmission",
            "gainVec",
            "Cavity Gain (a.u.)",
            true,
            plot,
        )
    }
}
