//! Transmission against readout attenuation.
//!
//! Outer axis: `linspace(trans_attn_start, trans_attn_stop, trans_attn_num)` truncated to
//! whole dB. Inner axis: the readout-frequency linspace. The attenuator is first set to
//! `cav_Atten` when that key is present.

use async_trait::async_trait;
use anyhow::Context;

use super::{
    nested_display, nested_record, trans_frequency_axis, with_trans_reps, Experiment,
    RunContext,
};
use crate::engine::{set_key, OuterTarget};
use crate::error::{AppResult, SweepError};
use crate::grid::{GridSpec, SweepAxis};
use crate::params::ExperimentConfig;
use crate::plot::LivePlot;
use crate::record::DataRecord;

/// Nested attenuation / frequency sweep.
#[derive(Debug, Clone)]
pub struct TransVsAttenuation {
    config: ExperimentConfig,
}

impl TransVsAttenuation {
    /// Registry name.
    pub const NAME: &'static str = "trans_vs_atten";

    /// Attenuation sweep over `config`.
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    /// Attenuations to visit, whole dB.
    pub fn attenuation_axis(&self) -> AppResult<SweepAxis> {
        Ok(GridSpec::Linspace {
            start: self.config.get_f64("trans_attn_start")?,
            stop: self.config.get_f64("trans_attn_stop")?,
            count: self.config.get_usize("trans_attn_num")?,
        }
        .axis("AttenVec", "dB")
        .floored())
    }
}

#[async_trait]
impl Experiment for TransVsAttenuation {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    async fn acquire(&self, ctx: &mut RunContext<'_>) -> AppResult<DataRecord> {
        let outer = self.attenuation_axis()?;
        let inner = trans_frequency_axis(&self.config)?;
        let attenuator = ctx.instruments.attenuator()?.clone();
        if self.config.contains("cav_Atten") {
            let initial = self.config.get_f64("cav_Atten")?;
            attenuator
                .set_attenuation(initial)
                .await
                .context("setting initial cavity attenuation")
                .map_err(SweepError::instrument)?;
        }

        let base = with_trans_reps(&self.config)?;
        let mut progress = ctx.progress(outer.len());
        let outcome = ctx
            .engine()
            .run_2d(
                &outer,
                &OuterTarget::Attenuator(attenuator),
                &inner,
                &base,
                &mut set_key("read_pulse_freq"),
                Self::NAME,
                &mut *ctx.plot,
                &mut progress,
            )
            .await?;

        Ok(nested_record(Self::NAME, "AttenVec", outcome.config.clone(), &outcome).build())
    }

    fn display(&self, record: &DataRecord, plot: &mut dyn LivePlot) -> AppResult<()> {
        nested_display(
            record,
            "Cavity Transmission",
            "AttenVec",
            "Cavity Attenuation (dB)",
            false,
            plot,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Instruments;
    use crate::mock::{MockAttenuator, MockSequencer};
    use crate::plot::{FrameLog, NoPlot, PlotFrame};
    use std::sync::Arc;

    fn config() -> ExperimentConfig {
        ExperimentConfig::new()
            .with("trans_attn_start", 10)
            .with("trans_attn_stop", 20)
            .with("trans_attn_num", 4)
            .with("trans_freq_start", 6960.0)
            .with("trans_freq_stop", 6964.0)
            .with("TransNumPoints", 9)
            .with("cav_Atten", 35.0)
    }

    #[tokio::test]
    async fn sweeps_attenuator_rows() {
        let soc = Arc::new(MockSequencer::new());
        let atten = Arc::new(MockAttenuator::new(0.0));
        let instruments = Instruments::new(soc.clone()).with_attenuator(atten.clone());
        let mut plot = NoPlot;
        let mut ctx = RunContext::new(&instruments, &mut plot);

        let record = TransVsAttenuation::new(config()).acquire(&mut ctx).await.unwrap();

        assert_eq!(soc.call_count(), 36);
        assert_eq!(atten.history().await, vec![35.0, 10.0, 13.0, 16.0, 20.0]);
        assert_eq!(record.dataset("Imat").unwrap().shape(), &[4, 9]);
        assert_eq!(record.dataset("AttenVec").unwrap().values(), &[10.0, 13.0, 16.0, 20.0]);
        assert_eq!(record.dataset("trans_fpts").unwrap().values().len(), 9);
    }

    #[tokio::test]
    async fn requires_an_attenuator() {
        let instruments = Instruments::new(Arc::new(MockSequencer::new()));
        let mut plot = NoPlot;
        let mut ctx = RunContext::new(&instruments, &mut plot);
        let err = TransVsAttenuation::new(config()).acquire(&mut ctx).await.unwrap_err();
        assert!(matches!(err, SweepError::Configuration(_)));
    }

    #[tokio::test]
    async fn display_is_a_heatmap() {
        let instruments = Instruments::new(Arc::new(MockSequencer::new()))
            .with_attenuator(Arc::new(MockAttenuator::new(0.0)));
        let exp = TransVsAttenuation::new(config());
        let mut sweep_plot = FrameLog::new();
        let record = {
            let mut ctx = RunContext::new(&instruments, &mut sweep_plot);
            exp.acquire(&mut ctx).await.unwrap()
        };
        assert_eq!(sweep_plot.updates().len(), 4);

        let mut plot = FrameLog::new();
        exp.display(&record, &mut plot).unwrap();
        assert!(matches!(
            plot.finished(),
            Some(PlotFrame::Heatmap { z, .. }) if z.dim() == (4, 9)
        ));
    }
}
