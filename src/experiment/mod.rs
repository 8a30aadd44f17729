//! Concrete experiments.
//!
//! Every experiment implements [`Experiment`]: it reads its parameters from an
//! [`ExperimentConfig`], drives the instruments in a [`RunContext`] and returns a sealed
//! [`DataRecord`]. [`ExperimentKind`] selects an experiment by name for the binary.
//!
//! | name                      | sweep                                  |
//! |---------------------------|----------------------------------------|
//! | `transmission`            | readout frequency                      |
//! | `trans_vs_atten`          | attenuation x readout frequency        |
//! | `trans_vs_gain`           | readout gain x readout frequency       |
//! | `trans_vs_voltage`        | bias voltage x readout frequency       |
//! | `chi_shift`               | readout frequency, ground/01/12 states |
//! | `amplitude_rabi`          | qubit drive gain                       |
//! | `amplitude_rabi_chevron`  | qubit frequency x qubit drive gain     |
//! | `thermometer_calibration` | temperature set points                 |

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engine::{AcquisitionLoop, Sweep2dOutcome};
use crate::error::{AppResult, SweepError};
use crate::grid::{GridSpec, SweepAxis};
use crate::instrument::{Attenuator, Sequencer, TemperatureController, VoltageSource};
use crate::params::ExperimentConfig;
use crate::plot::{LivePlot, PlotFrame};
use crate::progress::ProgressReporter;
use crate::record::{DataRecord, DataRecordBuilder, Dataset};
use crate::results::{Matrix2, ResultMatrix};
use crate::storage::Persister;

pub mod amplitude_rabi;
pub mod amplitude_rabi_chevron;
pub mod chi_shift;
pub mod thermometer;
pub mod trans_vs_atten;
pub mod trans_vs_gain;
pub mod trans_vs_voltage;
pub mod transmission;

pub use amplitude_rabi::AmplitudeRabi;
pub use amplitude_rabi_chevron::AmplitudeRabiChevron;
pub use chi_shift::{ChiShift, ChiShiftOutcome};
pub use thermometer::ThermometerCalibration;
pub use trans_vs_atten::TransVsAttenuation;
pub use trans_vs_gain::TransVsGain;
pub use trans_vs_voltage::TransVsVoltage;
pub use transmission::Transmission;

/// The instruments available to a run.
#[derive(Clone)]
pub struct Instruments {
    /// Pulse sequencer used for every acquisition
    pub sequencer: Arc<dyn Sequencer>,
    /// Step attenuator in front of the readout line
    pub attenuator: Option<Arc<dyn Attenuator>>,
    /// DC bias source
    pub voltage_source: Option<Arc<dyn VoltageSource>>,
    /// Fridge temperature controller
    pub temperature: Option<Arc<dyn TemperatureController>>,
    /// Reload pulse memory on every acquire
    pub load_pulses: bool,
}

impl Instruments {
    /// Sequencer only.
    pub fn new(sequencer: Arc<dyn Sequencer>) -> Self {
        Self {
            sequencer,
            attenuator: None,
            voltage_source: None,
            temperature: None,
            load_pulses: true,
        }
    }

    /// Add a step attenuator.
    pub fn with_attenuator(mut self, attenuator: Arc<dyn Attenuator>) -> Self {
        self.attenuator = Some(attenuator);
        self
    }

    /// Add a DC bias source.
    pub fn with_voltage_source(mut self, source: Arc<dyn VoltageSource>) -> Self {
        self.voltage_source = Some(source);
        self
    }

    /// Add a temperature controller.
    pub fn with_temperature(mut self, controller: Arc<dyn TemperatureController>) -> Self {
        self.temperature = Some(controller);
        self
    }

    /// The attenuator, or a configuration error when none is attached.
    pub fn attenuator(&self) -> AppResult<&Arc<dyn Attenuator>> {
        self.attenuator
            .as_ref()
            .ok_or_else(|| SweepError::Configuration("this experiment needs an attenuator".into()))
    }

    /// The voltage source, or a configuration error when none is attached.
    pub fn voltage_source(&self) -> AppResult<&Arc<dyn VoltageSource>> {
        self.voltage_source.as_ref().ok_or_else(|| {
            SweepError::Configuration("this experiment needs a voltage source".into())
        })
    }

    /// The temperature controller, or a configuration error when none is attached.
    pub fn temperature(&self) -> AppResult<&Arc<dyn TemperatureController>> {
        self.temperature.as_ref().ok_or_else(|| {
            SweepError::Configuration("this experiment needs a temperature controller".into())
        })
    }
}

/// Everything an experiment needs while acquiring.
pub struct RunContext<'a> {
    /// Instruments to drive
    pub instruments: &'a Instruments,
    /// Receives a frame after every acquisition
    pub plot: &'a mut dyn LivePlot,
    /// Print progress and readings to stdout
    pub console: bool,
}

impl<'a> RunContext<'a> {
    /// Context without console output.
    pub fn new(instruments: &'a Instruments, plot: &'a mut dyn LivePlot) -> Self {
        Self {
            instruments,
            plot,
            console: false,
        }
    }

    /// Enable console output.
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    /// Acquisition loop over the context's sequencer.
    pub fn engine(&self) -> AcquisitionLoop {
        AcquisitionLoop::new(self.instruments.sequencer.clone())
            .load_pulses(self.instruments.load_pulses)
    }

    /// Progress reporter for `rows` outer iterations.
    pub fn progress(&self, rows: usize) -> ProgressReporter {
        if self.console {
            ProgressReporter::new(rows)
        } else {
            ProgressReporter::with_writer(rows, Box::new(std::io::sink()))
        }
    }
}

/// A measurement that acquires, displays and saves one data record.
#[async_trait]
pub trait Experiment: Send + Sync {
    /// Experiment name, also the data folder name.
    fn name(&self) -> &'static str;

    /// Parameters the experiment starts from.
    fn config(&self) -> &ExperimentConfig;

    /// Run the sweep. Only a completed sweep yields a record.
    async fn acquire(&self, ctx: &mut RunContext<'_>) -> AppResult<DataRecord>;

    /// Render `record` into `plot`.
    fn display(&self, record: &DataRecord, plot: &mut dyn LivePlot) -> AppResult<()>;

    /// Persist `record` to `path`.
    async fn save(
        &self,
        record: &DataRecord,
        persister: &mut Persister,
        path: &Path,
    ) -> AppResult<PathBuf> {
        persister.persist(record, path).await
    }
}

/// Experiment selected by name.
pub enum ExperimentKind {
    /// Single readout-frequency sweep
    Transmission(Transmission),
    /// Attenuation x frequency
    TransVsAttenuation(TransVsAttenuation),
    /// Readout gain x frequency
    TransVsGain(TransVsGain),
    /// Bias voltage x frequency
    TransVsVoltage(TransVsVoltage),
    /// Frequency sweep per qubit state
    ChiShift(ChiShift),
    /// Qubit drive-gain sweep
    AmplitudeRabi(AmplitudeRabi),
    /// Qubit frequency x drive gain
    AmplitudeRabiChevron(AmplitudeRabiChevron),
    /// Thermometer calibration against set points
    ThermometerCalibration(ThermometerCalibration),
}

impl ExperimentKind {
    /// Every accepted experiment name.
    pub const NAMES: [&'static str; 8] = [
        Transmission::NAME,
        TransVsAttenuation::NAME,
        TransVsGain::NAME,
        TransVsVoltage::NAME,
        ChiShift::NAME,
        AmplitudeRabi::NAME,
        AmplitudeRabiChevron::NAME,
        ThermometerCalibration::NAME,
    ];

    /// Build the experiment called `name` over `config`.
    pub fn from_name(name: &str, config: ExperimentConfig) -> AppResult<Self> {
        Ok(match name {
            Transmission::NAME => ExperimentKind::Transmission(Transmission::new(config)),
            TransVsAttenuation::NAME => {
                ExperimentKind::TransVsAttenuation(TransVsAttenuation::new(config))
            }
            TransVsGain::NAME => ExperimentKind::TransVsGain(TransVsGain::new(config)),
            TransVsVoltage::NAME => ExperimentKind::TransVsVoltage(TransVsVoltage::new(config)),
            ChiShift::NAME => ExperimentKind::ChiShift(ChiShift::new(config)),
            AmplitudeRabi::NAME => ExperimentKind::AmplitudeRabi(AmplitudeRabi::new(config)),
            AmplitudeRabiChevron::NAME => {
                ExperimentKind::AmplitudeRabiChevron(AmplitudeRabiChevron::new(config))
            }
            ThermometerCalibration::NAME => {
                ExperimentKind::ThermometerCalibration(ThermometerCalibration::new(config))
            }
            other => {
                return Err(SweepError::Configuration(format!(
                    "unknown experiment '{other}', expected one of {}",
                    Self::NAMES.join(", ")
                )))
            }
        })
    }

    /// The experiment behind this variant.
    pub fn as_experiment(&self) -> &dyn Experiment {
        match self {
            ExperimentKind::Transmission(e) => e,
            ExperimentKind::TransVsAttenuation(e) => e,
            ExperimentKind::TransVsGain(e) => e,
            ExperimentKind::TransVsVoltage(e) => e,
            ExperimentKind::ChiShift(e) => e,
            ExperimentKind::AmplitudeRabi(e) => e,
            ExperimentKind::AmplitudeRabiChevron(e) => e,
            ExperimentKind::ThermometerCalibration(e) => e,
        }
    }
}

/// Components-first copy of a result matrix, `[I/Q, channel, point]`.
pub(crate) fn results_dataset(results: &ResultMatrix) -> Dataset {
    Dataset::from_array(&results.transpose_components())
}

/// Copy of `config` with `reps` replaced by `trans_reps` when that key is set.
pub(crate) fn with_trans_reps(config: &ExperimentConfig) -> AppResult<ExperimentConfig> {
    if config.contains("trans_reps") {
        Ok(config.with("reps", config.get_i64("trans_reps")?))
    } else {
        Ok(config.clone())
    }
}

/// Readout frequencies as plotted: `(f + cavity_LO / 1e6) / 1e3` GHz when the local
/// oscillator is configured, the raw IF values in MHz otherwise.
pub(crate) fn display_frequencies(config: &ExperimentConfig, fpts: &[f64]) -> (Vec<f64>, String) {
    match config.get_f64("cavity_LO") {
        Ok(lo) => (
            fpts.iter().map(|f| (f + lo / 1e6) / 1e3).collect(),
            "Cavity Frequency (GHz)".to_string(),
        ),
        Err(_) => (fpts.to_vec(), "Cavity Frequency (MHz)".to_string()),
    }
}

/// Inner readout-frequency axis of the nested transmission sweeps:
/// `linspace(trans_freq_start, trans_freq_stop, TransNumPoints)`.
pub(crate) fn trans_frequency_axis(config: &ExperimentConfig) -> AppResult<SweepAxis> {
    Ok(GridSpec::Linspace {
        start: config.get_f64("trans_freq_start")?,
        stop: config.get_f64("trans_freq_stop")?,
        count: config.get_usize("TransNumPoints")?,
    }
    .axis("trans_fpts", "MHz"))
}

/// Datasets shared by the nested transmission sweeps.
pub(crate) fn nested_record(
    name: &str,
    outer_key: &str,
    config: ExperimentConfig,
    outcome: &Sweep2dOutcome,
) -> DataRecordBuilder {
    DataRecord::builder(name, config)
        .dataset("Imat", Dataset::from_array(outcome.matrix.i()))
        .dataset("Qmat", Dataset::from_array(outcome.matrix.q()))
        .dataset(
            "trans_fpts",
            Dataset::vector(outcome.inner.points().to_vec()).with_unit(outcome.inner.unit()),
        )
        .dataset(
            outer_key,
            Dataset::vector(outcome.outer.points().to_vec()).with_unit(outcome.outer.unit()),
        )
}

/// Magnitude heat map of a saved nested sweep, optionally normalized per row.
pub(crate) fn nested_display(
    record: &DataRecord,
    title: &str,
    outer_key: &str,
    outer_label: &str,
    normalize_rows: bool,
    plot: &mut dyn LivePlot,
) -> AppResult<()> {
    let i = matrix_from(record, "Imat")?;
    let q = matrix_from(record, "Qmat")?;
    let (outer, inner) = i.dim();
    let mut matrix = Matrix2::new(outer, inner);
    for row in 0..outer {
        matrix.set_row(row, &i.row(row).to_vec(), &q.row(row).to_vec())?;
    }
    let fpts = record.dataset("trans_fpts")?.values().to_vec();
    let (x, x_label) = display_frequencies(record.config(), &fpts);
    plot.finish(&PlotFrame::Heatmap {
        title: title.to_string(),
        x_label,
        y_label: outer_label.to_string(),
        x,
        y: record.dataset(outer_key)?.values().to_vec(),
        z: if normalize_rows {
            matrix.normalized_magnitude()
        } else {
            matrix.magnitude()
        },
    })
}

/// Rebuild a result matrix from a components-first record dataset.
pub(crate) fn matrix_components(record: &DataRecord, name: &str) -> AppResult<ResultMatrix> {
    let array = record
        .dataset(name)?
        .to_array()?
        .into_dimensionality::<ndarray::Ix3>()
        .map_err(|e| SweepError::Shape(format!("{name}: {e}")))?;
    ResultMatrix::from_components(&array)
}

/// Rebuild a 2-D `[outer, inner]` array from a record dataset.
pub(crate) fn matrix_from(record: &DataRecord, name: &str) -> AppResult<ndarray::Array2<f64>> {
    record
        .dataset(name)?
        .to_array()?
        .into_dimensionality::<ndarray::Ix2>()
        .map_err(|e| SweepError::Shape(format!("{name}: {e}")))
}
