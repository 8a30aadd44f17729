//! Dispersive shift of the readout resonator.
//!
//! Sweeps `pulse_freq` over `pulse_freq - TransSpan` in steps of
//! `2 * TransSpan / TransNumPoints` and, at every frequency, measures the resonator with
//! the qubit in the ground state, after a 0-1 pulse and, when `pulse_expt.check_12` is
//! set, after 0-1 and 1-2 pulses. Each condition is selected through
//! `pulse_expt.pulse_01` / `pulse_expt.pulse_12` of the program's configuration.
//!
//! When `FF_list_readout` and `FF_list_exp` are configured every program carries the
//! fast-flux schedule including the negated compensation steps.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{display_frequencies, results_dataset, Experiment, RunContext};
use crate::engine::AcquisitionLoop;
use crate::error::AppResult;
use crate::grid::{GridSpec, SweepAxis};
use crate::params::{ExperimentConfig, FastFlux};
use crate::plot::{LivePlot, PlotFrame, Series};
use crate::record::{DataRecord, Dataset};
use crate::results::BranchedResults;

/// Branch measured with no qubit pulse.
pub const GROUND: &str = "ground";
/// Branch measured after a 0-1 pulse.
pub const EXCITED_01: &str = "01";
/// Branch measured after 0-1 and 1-2 pulses.
pub const EXCITED_12: &str = "12";

/// Result of a completed chi-shift sweep.
#[derive(Debug, Clone)]
pub struct ChiShiftOutcome {
    /// Configuration of the final measurement
    pub config: ExperimentConfig,
    /// Readout frequencies visited
    pub fpts: SweepAxis,
    /// One result matrix per enabled state
    pub branches: BranchedResults,
}

/// Readout frequency sweep with the qubit prepared in up to three states.
#[derive(Debug, Clone)]
pub struct ChiShift {
    config: ExperimentConfig,
}

impl ChiShift {
    /// Registry name.
    pub const NAME: &'static str = "chi_shift";

    /// Chi-shift sweep over `config`.
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    /// Readout frequencies to visit.
    pub fn axis(&self) -> AppResult<SweepAxis> {
        Ok(GridSpec::center_span_stepped(
            self.config.get_f64("pulse_freq")?,
            self.config.get_f64("TransSpan")?,
            self.config.get_usize("TransNumPoints")?,
        )
        .axis("fpts", "MHz"))
    }

    /// Branches in measurement order; `12` only with `pulse_expt.check_12`.
    pub fn branches(&self) -> AppResult<Vec<(&'static str, bool, bool)>> {
        let mut branches = vec![(GROUND, false, false), (EXCITED_01, true, false)];
        if self.config.get_bool_or("pulse_expt.check_12", false)? {
            branches.push((EXCITED_12, true, true));
        }
        Ok(branches)
    }

    fn engine(&self, ctx: &RunContext<'_>) -> AppResult<AcquisitionLoop> {
        let engine = ctx.engine();
        if self.config.contains("FF_list_readout") {
            Ok(engine.with_fast_flux(FastFlux::from_config(&self.config)?))
        } else {
            Ok(engine)
        }
    }

    /// Run the sweep and keep the per-branch results.
    pub async fn run(&self, ctx: &mut RunContext<'_>) -> AppResult<ChiShiftOutcome> {
        let axis = self.axis()?;
        let branches = self.branches()?;
        let engine = self.engine(ctx)?;
        let channels = ctx.instruments.sequencer.readout_channels();
        let mut results = BranchedResults::new(branches.iter().map(|(name, ..)| *name), channels);
        let mut cfg = self.config.clone();
        info!(
            points = axis.len(),
            branches = branches.len(),
            "Starting chi shift sweep"
        );

        for (index, &freq) in axis.points().iter().enumerate() {
            cfg = cfg.with("pulse_freq", freq);
            for &(name, pulse_01, pulse_12) in &branches {
                cfg = cfg.with_many([
                    ("pulse_expt.pulse_01", pulse_01),
                    ("pulse_expt.pulse_12", pulse_12),
                ]);
                let sample = engine.acquire_one(Self::NAME, &cfg, index).await?;
                results.push(name, &sample)?;
            }
            ctx.plot.update(&branch_frame(axis.points(), &results)?)?;
            debug!(index, freq, "Chi shift point done");
        }

        ctx.plot.finish(&branch_frame(axis.points(), &results)?)?;
        Ok(ChiShiftOutcome {
            config: cfg,
            fpts: axis,
            branches: results,
        })
    }
}

fn branch_frame(x: &[f64], results: &BranchedResults) -> AppResult<PlotFrame> {
    let series = results
        .iter()
        .map(|(name, matrix)| Ok(Series::new(name, matrix.magnitude(0)?.to_vec())))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(PlotFrame::Line {
        title: ChiShift::NAME.to_string(),
        x_label: "Cavity Frequency (MHz)".to_string(),
        y_label: "a.u.".to_string(),
        x: x.to_vec(),
        series,
    })
}

#[async_trait]
impl Experiment for ChiShift {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    async fn acquire(&self, ctx: &mut RunContext<'_>) -> AppResult<DataRecord> {
        let outcome = self.run(ctx).await?;
        let mut record = DataRecord::builder(Self::NAME, outcome.config).dataset(
            "fpts",
            Dataset::vector(outcome.fpts.points().to_vec()).with_unit("MHz"),
        );
        for (name, matrix) in outcome.branches.iter() {
            record = record.dataset(&format!("results_{name}"), results_dataset(matrix));
        }
        Ok(record.build())
    }

    fn display(&self, record: &DataRecord, plot: &mut dyn LivePlot) -> AppResult<()> {
        let fpts = record.dataset("fpts")?.values().to_vec();
        let (x, x_label) = display_frequencies(record.config(), &fpts);
        let mut series = Vec::new();
        for (label, name) in [("Ground", GROUND), ("01", EXCITED_01), ("12", EXCITED_12)] {
            let key = format!("results_{name}");
            if !record.data().contains_key(&key) {
                continue;
            }
            let matrix = super::matrix_components(record, &key)?;
            series.push(Series::new(label, matrix.magnitude(0)?.to_vec()));
        }
        plot.finish(&PlotFrame::Line {
            title: "Chi shift".to_string(),
            x_label,
            y_label: "a.u.".to_string(),
            x,
            series,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SweepError;
    use crate::experiment::Instruments;
    use crate::mock::MockSequencer;
    use crate::plot::{FrameLog, NoPlot};
    use crate::results::argmin;
    use std::sync::Arc;

    fn config(check_12: bool) -> ExperimentConfig {
        ExperimentConfig::new()
            .with("pulse_freq", 6962.0)
            .with("TransSpan", 1.5)
            .with("TransNumPoints", 30)
            .with("pulse_expt.check_12", check_12)
    }

    #[test]
    fn axis_uses_half_open_steps() {
        let axis = ChiShift::new(config(false)).axis().unwrap();
        assert_eq!(axis.len(), 30);
        assert!((axis.points()[0] - 6960.5).abs() < 1e-9);
        assert!((axis.step() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn two_branches_without_check_12() {
        let soc = Arc::new(MockSequencer::new());
        let instruments = Instruments::new(soc.clone());
        let mut plot = NoPlot;
        let mut ctx = RunContext::new(&instruments, &mut plot);

        let outcome = ChiShift::new(config(false)).run(&mut ctx).await.unwrap();

        assert_eq!(soc.call_count(), 60);
        assert_eq!(outcome.branches.len(), 2);
        assert_eq!(outcome.branches.branch(GROUND).unwrap().len(), 30);
        assert_eq!(outcome.branches.branch(EXCITED_01).unwrap().len(), 30);
        assert!(matches!(
            outcome.branches.branch(EXCITED_12),
            Err(SweepError::BranchDisabled(_))
        ));
    }

    #[tokio::test]
    async fn three_branches_shift_the_dip() {
        let soc = Arc::new(MockSequencer::new().with_chi(0.4));
        let instruments = Instruments::new(soc.clone());
        let mut plot = FrameLog::new();
        let mut ctx = RunContext::new(&instruments, &mut plot);

        let outcome = ChiShift::new(config(true)).run(&mut ctx).await.unwrap();
        assert_eq!(soc.call_count(), 90);
        assert_eq!(plot.updates().len(), 30);

        let dip = |name: &str| {
            let mag = outcome.branches.branch(name).unwrap().magnitude(0).unwrap();
            outcome.fpts.points()[argmin(&mag.to_vec()).unwrap()]
        };
        assert!(dip(GROUND) < dip(EXCITED_01));
        assert!(dip(EXCITED_01) < dip(EXCITED_12));
    }

    #[tokio::test]
    async fn programs_carry_branch_flags_and_fast_flux() {
        let soc = Arc::new(MockSequencer::new());
        let instruments = Instruments::new(soc.clone());
        let mut plot = NoPlot;
        let mut ctx = RunContext::new(&instruments, &mut plot);
        let cfg = config(true)
            .with("TransNumPoints", 1)
            .with("FF_list_readout", vec![vec![4, -8000], vec![5, 9000], vec![6, 17000]])
            .with("FF_list_exp", vec![vec![4, 0], vec![5, 100], vec![6, 0]]);

        ChiShift::new(cfg).run(&mut ctx).await.unwrap();

        let programs = soc.programs().await;
        let flags: Vec<(bool, bool)> = programs
            .iter()
            .map(|p| {
                (
                    p.config().get_bool("pulse_expt.pulse_01").unwrap(),
                    p.config().get_bool("pulse_expt.pulse_12").unwrap(),
                )
            })
            .collect();
        assert_eq!(flags, vec![(false, false), (true, false), (true, true)]);
        for program in &programs {
            let schedule = program.fast_flux_schedule().unwrap();
            assert_eq!(schedule[2], vec![0, -100, 0]);
            assert_eq!(schedule[3], vec![8000, -9000, -17000]);
        }
    }

    #[tokio::test]
    async fn record_omits_disabled_branch() {
        let instruments = Instruments::new(Arc::new(MockSequencer::new()));
        let mut plot = NoPlot;
        let mut ctx = RunContext::new(&instruments, &mut plot);
        let exp = ChiShift::new(config(false).with("TransNumPoints", 4));
        let record = exp.acquire(&mut ctx).await.unwrap();

        assert!(record.data().contains_key("results_ground"));
        assert!(record.data().contains_key("results_01"));
        assert!(!record.data().contains_key("results_12"));

        let mut shown = FrameLog::new();
        exp.display(&record, &mut shown).unwrap();
        assert!(matches!(
            shown.finished(),
            Some(PlotFrame::Line { series, .. }) if series.len() == 2
        ));
    }
}
