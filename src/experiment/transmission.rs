//! Readout resonator transmission.
//!
//! Sweeps `read_pulse_freq` over `read_pulse_freq ± TransSpan` with `TransNumPoints`
//! points (inclusive) and locates the transmission minimum and maximum. The minimum is
//! written back as `read_pulse_freq` when `update_read_freq` is set, so follow-up
//! experiments built from the saved configuration start on resonance.

use async_trait::async_trait;
use tracing::info;

use super::{display_frequencies, results_dataset, with_trans_reps, Experiment, RunContext};
use crate::engine::set_key;
use crate::error::{AppResult, SweepError};
use crate::grid::{GridSpec, SweepAxis};
use crate::params::ExperimentConfig;
use crate::plot::{LivePlot, PlotFrame, Series};
use crate::record::{DataRecord, Dataset};
use crate::results::{argmax, argmin, ResultMatrix};

/// Frequency sweep of the readout tone.
#[derive(Debug, Clone)]
pub struct Transmission {
    config: ExperimentConfig,
}

impl Transmission {
    /// Registry name.
    pub const NAME: &'static str = "transmission";

    /// Transmission sweep over `config`.
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    /// Readout frequencies to visit.
    pub fn axis(&self) -> AppResult<SweepAxis> {
        Ok(GridSpec::CenterSpan {
            center: self.config.get_f64("read_pulse_freq")?,
            span: self.config.get_f64("TransSpan")?,
            count: self.config.get_usize("TransNumPoints")?,
        }
        .axis("fpts", "MHz"))
    }
}

/// Frequencies of the smallest and largest transmission magnitude on channel 0.
pub fn find_peaks(axis: &SweepAxis, results: &ResultMatrix) -> AppResult<(f64, f64)> {
    let mag = results.magnitude(0)?.to_vec();
    let (Some(lo), Some(hi)) = (argmin(&mag), argmax(&mag)) else {
        return Err(SweepError::Shape("transmission sweep has no points".into()));
    };
    Ok((axis.points()[lo], axis.points()[hi]))
}

#[async_trait]
impl Experiment for Transmission {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    async fn acquire(&self, ctx: &mut RunContext<'_>) -> AppResult<DataRecord> {
        let axis = self.axis()?;
        let base = with_trans_reps(&self.config)?;
        let outcome = ctx
            .engine()
            .run(&axis, &base, &mut set_key("read_pulse_freq"), Self::NAME, &mut *ctx.plot)
            .await?;

        let (peak_min, peak_max) = find_peaks(&axis, &outcome.results)?;
        info!(peak_min, peak_max, "Transmission peaks");
        let mut config = outcome
            .config
            .with_many([("peak_freq_min", peak_min), ("peak_freq_max", peak_max)]);
        if config.get_bool_or("update_read_freq", false)? {
            config = config.with("read_pulse_freq", peak_min);
        }

        Ok(DataRecord::builder(Self::NAME, config)
            .dataset("fpts", Dataset::vector(axis.points().to_vec()).with_unit("MHz"))
            .dataset("results", results_dataset(&outcome.results))
            .dataset("peak_freq_min", Dataset::scalar(peak_min).with_unit("MHz"))
            .dataset("peak_freq_max", Dataset::scalar(peak_max).with_unit("MHz"))
            .build())
    }

    fn display(&self, record: &DataRecord, plot: &mut dyn LivePlot) -> AppResult<()> {
        let fpts = record.dataset("fpts")?.values().to_vec();
        let results = super::matrix_components(record, "results")?;
        let (x, x_label) = display_frequencies(record.config(), &fpts);
        plot.finish(&PlotFrame::Line {
            title: "Transmission".to_string(),
            x_label,
            y_label: "a.u.".to_string(),
            x,
            series: vec![
                Series::new("I", results.i_trace(0)?.to_vec()),
                Series::new("Q", results.q_trace(0)?.to_vec()),
                Series::new("magnitude", results.magnitude(0)?.to_vec()),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Instruments;
    use crate::mock::MockSequencer;
    use crate::plot::FrameLog;
    use std::sync::Arc;

    fn config() -> ExperimentConfig {
        ExperimentConfig::new()
            .with("read_pulse_freq", 6962.0)
            .with("TransSpan", 1.5)
            .with("TransNumPoints", 61)
            .with("reps", 1000)
            .with("trans_reps", 20)
    }

    #[test]
    fn axis_matches_resonator_scan() {
        let axis = Transmission::new(config()).axis().unwrap();
        assert_eq!(axis.len(), 61);
        assert!((axis.points()[0] - 6960.5).abs() < 1e-9);
        assert!((axis.points()[60] - 6963.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn finds_the_dip_and_updates_readout() {
        let soc = Arc::new(MockSequencer::new().with_resonator(6962.3));
        let instruments = Instruments::new(soc.clone());
        let mut plot = FrameLog::new();
        let mut ctx = RunContext::new(&instruments, &mut plot);
        let exp = Transmission::new(config().with("update_read_freq", true));

        let record = exp.acquire(&mut ctx).await.unwrap();

        assert_eq!(soc.call_count(), 61);
        let peak = record.config().get_f64("peak_freq_min").unwrap();
        assert!((peak - 6962.3).abs() < 1e-6, "{peak}");
        assert_eq!(record.config().get_f64("read_pulse_freq").unwrap(), peak);
        assert_eq!(record.config().get_i64("reps").unwrap(), 20);
        assert_eq!(record.dataset("results").unwrap().shape(), &[2, 1, 61]);
        assert_eq!(exp.config().get_f64("read_pulse_freq").unwrap(), 6962.0);
    }

    #[tokio::test]
    async fn display_draws_three_traces() {
        let instruments = Instruments::new(Arc::new(MockSequencer::new()));
        let mut sweep_plot = FrameLog::new();
        let exp = Transmission::new(config().with("TransNumPoints", 5));
        let record = {
            let mut ctx = RunContext::new(&instruments, &mut sweep_plot);
            exp.acquire(&mut ctx).await.unwrap()
        };

        let mut plot = FrameLog::new();
        exp.display(&record, &mut plot).unwrap();
        match plot.finished().unwrap() {
            PlotFrame::Line { series, x, .. } => {
                assert_eq!(series.len(), 3);
                assert_eq!(x.len(), 5);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
