//! Instrument capabilities
//!
//! The sweep engine never talks to hardware directly. Each piece of equipment is reached
//! through a small capability trait:
//!
//! - [`Sequencer`]: the RF system-on-chip pulse sequencer. Runs a [`Program`] and returns
//!   averaged I/Q per readout channel.
//! - [`Attenuator`]: step attenuator on the readout line.
//! - [`VoltageSource`]: DC bias source.
//! - [`TemperatureController`]: mixing-chamber heater and resistance bridge.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! Pulse programming itself lives behind the `Sequencer` implementation. A [`Program`]
//! only carries the experiment kind and the configuration snapshot it was built from.

use crate::params::{ExperimentConfig, FastFlux};
use anyhow::Result;
use async_trait::async_trait;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A measurement program bound to one configuration snapshot.
///
/// Built fresh for every grid point, exactly like the per-point program objects of the
/// sequencer framework.
#[derive(Debug, Clone)]
pub struct Program {
    kind: String,
    config: Arc<ExperimentConfig>,
    fast_flux: Option<Vec<Vec<i64>>>,
}

impl Program {
    /// Bind a program kind (e.g. `"transmission"`) to a configuration.
    pub fn new(kind: &str, config: Arc<ExperimentConfig>) -> Self {
        Self {
            kind: kind.to_string(),
            config,
            fast_flux: None,
        }
    }

    /// Attach the fast-flux gain schedule (with its compensation steps).
    pub fn with_fast_flux(mut self, fast_flux: &FastFlux) -> Self {
        self.fast_flux = Some(fast_flux.schedule());
        self
    }

    /// Program kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Configuration snapshot the program was built from.
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Fast-flux gain tables in play order, if any.
    pub fn fast_flux_schedule(&self) -> Option<&[Vec<i64>]> {
        self.fast_flux.as_deref()
    }
}

/// Averaged I/Q returned by one acquire call, one entry per readout channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IqSample {
    /// In-phase component per channel
    pub i: Vec<f64>,
    /// Quadrature component per channel
    pub q: Vec<f64>,
}

impl IqSample {
    /// Sample from per-channel I and Q.
    pub fn new(i: Vec<f64>, q: Vec<f64>) -> Self {
        Self { i, q }
    }

    /// Single-channel sample.
    pub fn single(i: f64, q: f64) -> Self {
        Self {
            i: vec![i],
            q: vec![q],
        }
    }

    /// Number of readout channels.
    pub fn channels(&self) -> usize {
        self.i.len()
    }

    /// Complex signal on channel `ch`.
    pub fn signal(&self, ch: usize) -> Option<Complex64> {
        Some(Complex64::new(*self.i.get(ch)?, *self.q.get(ch)?))
    }
}

/// Capability: Pulse Sequencer Acquisition
///
/// # Contract
/// - `acquire` blocks (awaits) until the averaged result is available
/// - Exactly one program runs at a time; callers never overlap calls
/// - No timeout is applied by callers
#[async_trait]
pub trait Sequencer: Send + Sync {
    /// Load (optionally) and run `program`, returning averaged I/Q.
    async fn acquire(&self, program: &Program, load_pulses: bool) -> Result<IqSample>;

    /// Number of readout channels the board exposes.
    fn readout_channels(&self) -> usize {
        1
    }
}

/// Capability: Step Attenuator
#[async_trait]
pub trait Attenuator: Send + Sync {
    /// Set attenuation in dB.
    async fn set_attenuation(&self, db: f64) -> Result<()>;

    /// Current attenuation in dB.
    async fn attenuation(&self) -> Result<f64>;
}

/// Capability: DC Voltage Source
#[async_trait]
pub trait VoltageSource: Send + Sync {
    /// Set output voltage.
    async fn set_voltage(&self, volts: f64) -> Result<()>;

    /// Current output voltage.
    async fn voltage(&self) -> Result<f64>;
}

/// Capability: Temperature Controller
///
/// # Contract
/// - `set_temperature(0.0)` switches regulation off
/// - Channels are bridge input numbers as wired in the fridge
#[async_trait]
pub trait TemperatureController: Send + Sync {
    /// Regulate to a set point in kelvin.
    async fn set_temperature(&self, kelvin: f64) -> Result<()>;

    /// Temperature reading on `channel` in kelvin.
    async fn temperature(&self, channel: u8) -> Result<f64>;

    /// Resistance reading on `channel` in ohm.
    async fn resistance(&self, channel: u8) -> Result<f64>;
}
