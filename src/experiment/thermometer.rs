//! Thermometer calibration against a regulated mixing-chamber temperature.
//!
//! For every entry of `temps_list` the controller is regulated to that set point, the
//! run waits `settle_secs`, then takes `num_points` readings of temperature
//! (`temperature_channel`) and resistance (`resistance_channel`), waiting `settle_secs`
//! after each. Regulation is switched off (set point 0) once all set points are done.
//!
//! No sequencer is used.

use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use super::{Experiment, RunContext};
use crate::error::{AppResult, SweepError};
use crate::instrument::TemperatureController;
use crate::params::ExperimentConfig;
use crate::plot::{LivePlot, PlotFrame, Series};
use crate::record::{DataRecord, Dataset};

/// Calibration of a thermometer resistance against the controller's temperature.
#[derive(Debug, Clone)]
pub struct ThermometerCalibration {
    config: ExperimentConfig,
}

/// Parameters resolved from the configuration, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationPlan {
    /// Temperatures to visit, kelvin
    pub setpoints: Vec<f64>,
    /// Readings averaged per set point
    pub num_points: usize,
    /// Wait after each set point before reading
    pub settle: Duration,
    /// Controller channel of the reference thermometer
    pub temperature_channel: u8,
    /// Controller channel of the resistor under calibration
    pub resistance_channel: u8,
}

impl ThermometerCalibration {
    /// Registry name.
    pub const NAME: &'static str = "thermometer_calibration";

    /// Calibration over `config`.
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    /// Resolve set points, channels and settle time.
    pub fn plan(&self) -> AppResult<CalibrationPlan> {
        let cfg = &self.config;
        let settle_secs = if cfg.contains("settle_secs") {
            cfg.get_f64("settle_secs")?
        } else {
            60.0
        };
        if !settle_secs.is_finite() || settle_secs < 0.0 {
            return Err(SweepError::Configuration(format!(
                "settle_secs must be a non-negative number, got {settle_secs}"
            )));
        }
        Ok(CalibrationPlan {
            setpoints: cfg.get_f64_list("temps_list")?,
            num_points: if cfg.contains("num_points") {
                cfg.get_usize("num_points")?
            } else {
                15
            },
            settle: Duration::from_secs_f64(settle_secs),
            temperature_channel: channel(cfg, "temperature_channel", 7)?,
            resistance_channel: channel(cfg, "resistance_channel", 8)?,
        })
    }
}

fn channel(cfg: &ExperimentConfig, key: &str, default: u8) -> AppResult<u8> {
    if !cfg.contains(key) {
        return Ok(default);
    }
    let value = cfg.get_i64(key)?;
    u8::try_from(value)
        .map_err(|_| SweepError::Configuration(format!("{key} = {value} is not a bridge channel")))
}

async fn read_temperature(controller: &dyn TemperatureController, channel: u8) -> AppResult<f64> {
    controller
        .temperature(channel)
        .await
        .with_context(|| format!("reading temperature channel {channel}"))
        .map_err(SweepError::instrument)
}

fn calibration_frame(temps: &[f64], resistances: &[f64]) -> PlotFrame {
    PlotFrame::Line {
        title: "Thermometer calibration".to_string(),
        x_label: "Temperature (K)".to_string(),
        y_label: "Resistance (Ohm)".to_string(),
        x: temps.to_vec(),
        series: vec![Series::new("resistance", resistances.to_vec())],
    }
}

#[async_trait]
impl Experiment for ThermometerCalibration {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    async fn acquire(&self, ctx: &mut RunContext<'_>) -> AppResult<DataRecord> {
        let plan = self.plan()?;
        let controller = ctx.instruments.temperature()?.clone();

        let mut temps = Vec::new();
        let mut resistances = Vec::new();
        let mut setpoints = Vec::new();
        info!(
            setpoints = plan.setpoints.len(),
            num_points = plan.num_points,
            "Starting thermometer calibration"
        );

        for &setpoint in &plan.setpoints {
            controller
                .set_temperature(setpoint)
                .await
                .with_context(|| format!("regulating to {setpoint}"))
                .map_err(SweepError::instrument)?;
            let current = read_temperature(controller.as_ref(), plan.temperature_channel).await?;
            if ctx.console {
                println!("Current temperature: {current:.5} K");
            }
            tokio::time::sleep(plan.settle).await;

            for reading in 0..plan.num_points {
                let temperature = read_temperature(controller.as_ref(), plan.temperature_channel).await?;
                let resistance = controller
                    .resistance(plan.resistance_channel)
                    .await
                    .with_context(|| {
                        format!("reading resistance channel {}", plan.resistance_channel)
                    })
                    .map_err(SweepError::instrument)?;
                if ctx.console {
                    println!("Current temperature: {temperature:.5} K");
                    println!("Current resistance: {resistance:.1} Ohm");
                }
                debug!(setpoint, reading, temperature, resistance, "Calibration point");
                temps.push(temperature);
                resistances.push(resistance);
                setpoints.push(setpoint);
                ctx.plot.update(&calibration_frame(&temps, &resistances))?;
                tokio::time::sleep(plan.settle).await;
            }
        }

        controller
            .set_temperature(0.0)
            .await
            .context("switching regulation off")
            .map_err(SweepError::instrument)?;
        ctx.plot.finish(&calibration_frame(&temps, &resistances))?;
        info!(points = temps.len(), "Thermometer calibration complete");

        Ok(DataRecord::builder(Self::NAME, self.config.clone())
            .dataset("temps", Dataset::vector(temps).with_unit("K"))
            .dataset("resistances", Dataset::vector(resistances).with_unit("Ohm"))
            .dataset("setpoints", Dataset::vector(setpoints))
            .build())
    }

    fn display(&self, record: &DataRecord, plot: &mut dyn LivePlot) -> AppResult<()> {
        plot.finish(&calibration_frame(
            record.dataset("temps")?.values(),
            record.dataset("resistances")?.values(),
        ))
    }
}
