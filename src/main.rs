//! CLI Entry Point for qubit_daq
//!
//! Provides command-line access to:
//! - Running an experiment (`run`), with simulated instruments under `--dry-run`
//! - Previewing sweep axes (`grid`)
//! - Managing account profiles (`profile`)
//!
//! # Usage
//!
//! ```bash
//! qubit_daq run transmission --params params/transmission.toml --dry-run
//! qubit_daq run chi_shift --params chi.toml --set pulse_expt.check_12=true --dry-run
//! qubit_daq grid center 6962 1.5 61
//! qubit_daq profile save-as lab "lab copy"
//! ```
//!
//! Parameter precedence, last wins: `[experiments.<name>]` in the application config,
//! then the `--params` file, then each `--set key=value`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use qubit_daq::config::{AppConfig, DEFAULT_CONFIG_PATH};
use qubit_daq::events::EventBus;
use qubit_daq::experiment::{ExperimentKind, Instruments, RunContext};
use qubit_daq::grid::GridSpec;
use qubit_daq::logging;
use qubit_daq::mock::{MockAttenuator, MockSequencer, MockThermometer, MockVoltageSource};
use qubit_daq::params::{ConfigBuilder, ExperimentConfig, ParamValue};
use qubit_daq::plot::{LivePlot, NoPlot};
use qubit_daq::profile::ProfileStore;
use qubit_daq::storage::{save_config, writer_for, DataFileNamer, Persister};

#[derive(Parser)]
#[command(name = "qubit_daq")]
#[command(about = "Sweep-and-acquire experiments for qubit measurement hardware", long_about = None)]
struct Cli {
    /// Application configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one experiment and save its data record
    Run {
        /// Experiment name (transmission, trans_vs_atten, chi_shift, ...)
        experiment: String,

        /// TOML file with the experiment parameters
        #[arg(long)]
        params: Option<PathBuf>,

        /// Override a parameter, `key=value` with a TOML value; dotted keys allowed
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// Use simulated instruments
        #[arg(long)]
        dry_run: bool,

        /// Skip the SVG plot
        #[arg(long)]
        no_plot: bool,
    },

    /// Print the set-points of a sweep axis
    Grid {
        #[command(subcommand)]
        spec: GridCommand,
    },

    /// Manage account profiles
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },
}

#[derive(Subcommand)]
enum GridCommand {
    /// center ± span with count points
    Center {
        center: f64,
        span: f64,
        count: usize,
        /// Use step 2*span/count starting at center - span (end point excluded)
        #[arg(long)]
        stepped: bool,
    },
    /// start..=stop with count points
    Linspace { start: f64, stop: f64, count: usize },
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// List stored profiles
    List,
    /// Print a profile (the default one when no name is given)
    Show { name: Option<String> },
    /// Copy profile `from` to a new name
    SaveAs { from: String, to: String },
    /// Make `name` the start-up default
    SetDefault { name: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let app = match load_app_config(&cli.config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("qubit_daq: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Run {
            experiment,
            params,
            overrides,
            dry_run,
            no_plot,
        } => {
            run_experiment(
                &app,
                &experiment,
                params.as_deref(),
                &overrides,
                dry_run,
                no_plot,
            )
            .await
        }
        Commands::Grid { spec } => print_grid(spec),
        Commands::Profile { action } => manage_profiles(&app, action),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("qubit_daq: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_app_config(path: &Path) -> Result<AppConfig> {
    let app = AppConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    app.validate()?;
    logging::init_from_config(&app)?;
    Ok(app)
}

/// Site defaults, then the params file, then `--set` overrides.
fn build_params(
    app: &AppConfig,
    experiment: &str,
    params: Option<&Path>,
    overrides: &[String],
) -> Result<ExperimentConfig> {
    let mut builder = ConfigBuilder::new(app.experiment_defaults(experiment));
    if let Some(path) = params {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading parameters {}", path.display()))?;
        builder = builder.layer("params", ExperimentConfig::from_toml_str(&text)?);
    }
    let mut config = builder.build();
    for entry in overrides {
        let (key, value) = parse_override(entry)?;
        config = config.with(&key, value);
    }
    Ok(config)
}

fn parse_override(entry: &str) -> Result<(String, ParamValue)> {
    let Some((key, raw)) = entry.split_once('=') else {
        bail!("override '{entry}' is not of the form key=value");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("override '{entry}' has an empty key");
    }
    let raw = raw.trim();
    let value = match toml::from_str::<toml::Table>(&format!("v = {raw}")) {
        Ok(mut table) => table
            .remove("v")
            .map(ParamValue::from_toml)
            .unwrap_or_else(|| ParamValue::Str(raw.to_string())),
        Err(_) => ParamValue::Str(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

fn simulated_instruments(app: &AppConfig, params: &ExperimentConfig) -> Instruments {
    let cav_atten = params.get_f64("cav_Atten").unwrap_or(0.0);
    let mut instruments = Instruments::new(Arc::new(
        MockSequencer::new()
            .with_channels(app.sequencer.channels)
            .with_noise(0.005),
    ))
    .with_attenuator(Arc::new(MockAttenuator::new(cav_atten)))
    .with_voltage_source(Arc::new(MockVoltageSource::new()))
    .with_temperature(Arc::new(MockThermometer::new()));
    instruments.load_pulses = app.sequencer.load_pulses;
    instruments
}

async fn run_experiment(
    app: &AppConfig,
    name: &str,
    params: Option<&Path>,
    overrides: &[String],
    dry_run: bool,
    no_plot: bool,
) -> Result<()> {
    let config = build_params(app, name, params, overrides)?;
    let kind = ExperimentKind::from_name(name, config.clone())?;
    let experiment = kind.as_experiment();

    if !dry_run {
        bail!("no instrument drivers are built into this binary; pass --dry-run to use simulated instruments");
    }
    let instruments = simulated_instruments(app, &config);

    let mut persister = Persister::new(writer_for(&app.storage.backend)?);
    let names = DataFileNamer::new(app.data_root(), experiment.name()).names(persister.extension());
    info!(
        experiment = experiment.name(),
        data = %names.data.display(),
        keys = config.len(),
        "Starting experiment"
    );

    let mut plot = live_plot(&names.image, app.storage.plot_every, no_plot);
    let record = {
        let mut ctx = RunContext::new(&instruments, plot.as_mut()).with_console(true);
        experiment.acquire(&mut ctx).await?
    };

    experiment.save(&record, &mut persister, &names.data).await?;
    save_config(record.config(), &names.data.with_extension("config.json")).await?;
    experiment.display(&record, plot.as_mut())?;
    Ok(())
}

#[cfg(feature = "plotting")]
fn live_plot(image: &Path, every: usize, disabled: bool) -> Box<dyn LivePlot> {
    if disabled {
        Box::new(NoPlot)
    } else {
        Box::new(qubit_daq::plot::SvgPlot::new(image).every(every))
    }
}

#[cfg(not(feature = "plotting"))]
fn live_plot(_image: &Path, _every: usize, _disabled: bool) -> Box<dyn LivePlot> {
    Box::new(NoPlot)
}

fn print_grid(spec: GridCommand) -> Result<()> {
    let grid = match spec {
        GridCommand::Center {
            center,
            span,
            count,
            stepped: true,
        } => GridSpec::center_span_stepped(center, span, count),
        GridCommand::Center {
            center,
            span,
            count,
            stepped: false,
        } => GridSpec::CenterSpan {
            center,
            span,
            count,
        },
        GridCommand::Linspace { start, stop, count } => GridSpec::Linspace { start, stop, count },
    };
    let axis = grid.axis("points", "");
    println!("{} points, step {}", axis.len(), axis.step());
    for point in axis.points() {
        println!("{point}");
    }
    Ok(())
}

fn manage_profiles(app: &AppConfig, action: ProfileCommand) -> Result<()> {
    let mut store = ProfileStore::new(&app.profiles.account_dir, EventBus::default());
    match action {
        ProfileCommand::List => {
            let default = store.default_name().ok();
            for name in store.list()? {
                let marker = if default.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {name}");
            }
        }
        ProfileCommand::Show { name } => {
            let name = match name {
                Some(name) => name,
                None => store.default_name()?,
            };
            let profile = store.read(&name)?;
            println!("Current Account: {}", profile.name());
            for (key, value) in profile.settings() {
                println!("{key}: {value}");
            }
        }
        ProfileCommand::SaveAs { from, to } => {
            store.load(&from)?;
            let path = store.save_as(&to)?;
            println!("Saved {}", path.display());
        }
        ProfileCommand::SetDefault { name } => {
            store.load(&name)?;
            store.set_default()?;
            println!("Default account: {name}");
        }
    }
    Ok(())
}
