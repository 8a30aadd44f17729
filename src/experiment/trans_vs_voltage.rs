//! Transmission against DC bias voltage.
//!
//! Outer axis: `linspace(volt_start, volt_stop, volt_num)` applied to the voltage source.
//! Inner axis: the readout-frequency linspace. The transmission minimum of every row is
//! kept as `peak_freqs`; the last one becomes `read_pulse_freq` of the saved
//! configuration. The source is returned to `volt_park` (0 V by default) afterwards.

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use super::{
    nested_display, nested_record, trans_frequency_axis, with_trans_reps, Experiment,
    RunContext,
};
use crate::engine::{set_key, OuterTarget};
use crate::error::{AppResult, SweepError};
use crate::grid::{GridSpec, SweepAxis};
use crate::params::ExperimentConfig;
use crate::plot::LivePlot;
use crate::record::{DataRecord, Dataset};
use crate::results::argmin;

/// Nested bias-voltage / frequency sweep.
#[derive(Debug, Clone)]
pub struct TransVsVoltage {
    config: ExperimentConfig,
}

impl TransVsVoltage {
    /// Registry name.
    pub const NAME: &'static str = "trans_vs_voltage";

    /// Voltage sweep over `config`.
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    /// Bias voltages to visit.
    pub fn voltage_axis(&self) -> AppResult<SweepAxis> {
        Ok(GridSpec::Linspace {
            start: self.config.get_f64("volt_start")?,
            stop: self.config.get_f64("volt_stop")?,
            count: self.config.get_usize("volt_num")?,
        }
        .axis("voltVec", "V"))
    }
}

#[async_trait]
impl Experiment for TransVsVoltage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    async fn acquire(&self, ctx: &mut RunContext<'_>) -> AppResult<DataRecord> {
        let outer = self.voltage_axis()?;
        let inner = trans_frequency_axis(&self.config)?;
        let source = ctx.instruments.voltage_source()?.clone();
        let base = with_trans_reps(&self.config)?;
        let mut progress = ctx.progress(outer.len());
        let outcome = ctx
            .engine()
            .run_2d(
                &outer,
                &OuterTarget::VoltageSource(source.clone()),
                &inner,
                &base,
                &mut set_key("read_pulse_freq"),
                Self::NAME,
                &mut *ctx.plot,
                &mut progress,
            )
            .await?;

        let park = if self.config.contains("volt_park") {
            self.config.get_f64("volt_park")?
        } else {
            0.0
        };
        source
            .set_voltage(park)
            .await
            .context("parking voltage source")
            .map_err(SweepError::instrument)?;

        let magnitude = outcome.matrix.magnitude();
        let peaks = magnitude
            .rows()
            .into_iter()
            .map(|row| {
                argmin(&row.to_vec())
                    .map(|col| inner.points()[col])
                    .ok_or_else(|| SweepError::Shape("voltage row has no points".into()))
            })
            .collect::<AppResult<Vec<f64>>>()?;

        let mut config = outcome.config.clone();
        if let Some(&last) = peaks.last() {
            config = config.with("read_pulse_freq", last);
            info!(peak = last, rows = peaks.len(), "Resonator tracked against voltage");
        }

        Ok(nested_record(Self::NAME, "voltVec", config, &outcome)
            .dataset("peak_freqs", Dataset::vector(peaks).with_unit("MHz"))
            .build())
    }

    fn display(&self, record: &DataRecord, plot: &mut dyn LivePlot) -> AppResult<()> {
        nested_display(
            record,
            "Cavity Transmission",
            "voltVec",
            "Bias Voltage (V)",
            true,
            plot,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Instruments;
    use crate::mock::{MockSequencer, MockVoltageSource};
    use crate::plot::NoPlot;
    use std::sync::Arc;

    fn config() -> ExperimentConfig {
        ExperimentConfig::new()
            .with("volt_start", -0.5)
            .with("volt_stop", 0.5)
            .with("volt_num", 3)
            .with("trans_freq_start", 6961.0)
            .with("trans_freq_stop", 6963.0)
            .with("TransNumPoints", 21)
    }

    #[tokio::test]
    async fn drives_source_and_parks_it() {
        let soc = Arc::new(MockSequencer::new());
        let source = Arc::new(MockVoltageSource::new());
        let instruments = Instruments::new(soc.clone()).with_voltage_source(source.clone());
        let mut plot = NoPlot;
        let mut ctx = RunContext::new(&instruments, &mut plot);

        let record = TransVsVoltage::new(config()).acquire(&mut ctx).await.unwrap();

        assert_eq!(soc.call_count(), 63);
        assert_eq!(source.history().await, vec![-0.5, 0.0, 0.5, 0.0]);
        let peaks = record.dataset("peak_freqs").unwrap().values().to_vec();
        assert_eq!(peaks.len(), 3);
        for peak in &peaks {
            assert!((peak - 6962.0).abs() < 1e-9);
        }
        assert_eq!(
            record.config().get_f64("read_pulse_freq").unwrap(),
            peaks[2]
        );
        assert_eq!(record.config().get_f64("voltage").unwrap(), 0.5);
    }

    #[tokio::test]
    async fn requires_a_voltage_source() {
        let instruments = Instruments::new(Arc::new(MockSequencer::new()));
        let mut plot = NoPlot;
        let mut ctx = RunContext::new(&instruments, &mut plot);
        assert!(TransVsVoltage::new(config()).acquire(&mut ctx).await.is_err());
    }
}
