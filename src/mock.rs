//! Mock Hardware Implementations
//!
//! Provides simulated instruments for tests and dry runs without a fridge attached.
//!
//! # Available Mocks
//!
//! - `MockSequencer` - Readout resonator with a dispersive shift and a Rabi response
//! - `MockAttenuator` - Step attenuator that records every setting
//! - `MockVoltageSource` - DC source that records every setting
//! - `MockThermometer` - Temperature controller whose reading follows the set point
//!
//! All mocks use interior mutability (tokio locks and atomics) so they can be shared as
//! `Arc<dyn Capability>` like real drivers.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::instrument::{
    Attenuator, IqSample, Program, Sequencer, TemperatureController, VoltageSource,
};

// =============================================================================
// MockSequencer - Simulated Readout Chain
// =============================================================================

/// Mock pulse sequencer.
///
/// Models a hanger resonator dip at `resonator_mhz` with half-width `half_width_mhz`.
/// The dip moves by `chi_mhz` per excitation (`pulse_expt.pulse_01`,
/// `pulse_expt.pulse_12`). For `amplitude_rabi` programs the excited population follows
/// `sin²(π/2 · gain / pi_gain)`. When the program also sets `qubit_freq`, the drive is
/// detuned from `qubit_mhz` and the population follows the generalized Rabi formula, so
/// a frequency/gain scan traces a chevron.
///
/// The readout frequency is read from `read_pulse_freq` or `pulse_freq`, the readout
/// amplitude from `read_pulse_gain` or `pulse_gain` (DAC units of 32000 full scale).
///
/// # Example
///
/// ```rust,ignore
/// let soc = MockSequencer::new().fail_at(3);
/// // Calls 0, 1, 2 succeed, call 3 returns an error.
/// ```
pub struct MockSequencer {
    resonator_mhz: f64,
    half_width_mhz: f64,
    depth: f64,
    chi_mhz: f64,
    pi_gain: f64,
    qubit_mhz: f64,
    rabi_mhz: f64,
    noise: f64,
    channels: usize,
    fail_at: Option<usize>,
    calls: AtomicUsize,
    programs: Mutex<Vec<Program>>,
}

impl MockSequencer {
    /// Resonator at 6962 MHz, 0.3 MHz half-width, 0.2 MHz dispersive shift.
    pub fn new() -> Self {
        Self {
            resonator_mhz: 6962.0,
            half_width_mhz: 0.3,
            depth: 0.8,
            chi_mhz: 0.2,
            pi_gain: 1500.0,
            qubit_mhz: 4500.0,
            rabi_mhz: 1.0,
            noise: 0.0,
            channels: 1,
            fail_at: None,
            calls: AtomicUsize::new(0),
            programs: Mutex::new(Vec::new()),
        }
    }

    /// Place the resonator dip.
    pub fn with_resonator(mut self, mhz: f64) -> Self {
        self.resonator_mhz = mhz;
        self
    }

    /// Dispersive shift per excitation.
    pub fn with_chi(mut self, mhz: f64) -> Self {
        self.chi_mhz = mhz;
        self
    }

    /// Gain of a π pulse for the Rabi response.
    pub fn with_pi_gain(mut self, gain: f64) -> Self {
        self.pi_gain = gain;
        self
    }

    /// Qubit transition frequency and the Rabi rate of a π-gain drive, both MHz.
    pub fn with_qubit(mut self, mhz: f64, rabi_mhz: f64) -> Self {
        self.qubit_mhz = mhz;
        self.rabi_mhz = rabi_mhz;
        self
    }

    /// Uniform noise amplitude added to I and Q.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude;
        self
    }

    /// Number of readout channels reported and filled.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    /// Make the acquire call with zero-based index `call` fail.
    pub fn fail_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    /// Number of acquire calls made so far (including a failed one).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Programs received, in call order.
    pub async fn programs(&self) -> Vec<Program> {
        self.programs.lock().await.clone()
    }

    fn excitations(&self, program: &Program) -> f64 {
        let cfg = program.config();
        if program.kind().starts_with("amplitude_rabi") {
            let drive = cfg.get_f64("qubit_gain").unwrap_or(0.0) / self.pi_gain;
            let detuning = cfg
                .get_f64("qubit_freq")
                .map(|f| (f - self.qubit_mhz) / self.rabi_mhz)
                .unwrap_or(0.0);
            let rate_sq = drive * drive + detuning * detuning;
            if rate_sq == 0.0 {
                return 0.0;
            }
            let theta = PI / 2.0 * rate_sq.sqrt();
            return drive * drive / rate_sq * theta.sin().powi(2);
        }
        let mut n = 0.0;
        if cfg.get_bool_or("pulse_expt.pulse_01", false).unwrap_or(false) {
            n += 1.0;
        }
        if cfg.get_bool_or("pulse_expt.pulse_12", false).unwrap_or(false) {
            n += 1.0;
        }
        n
    }

    fn response(&self, program: &Program) -> (f64, f64) {
        let cfg = program.config();
        let freq = cfg
            .get_f64("read_pulse_freq")
            .or_else(|_| cfg.get_f64("pulse_freq"))
            .unwrap_or(self.resonator_mhz);
        let gain = cfg
            .get_f64("read_pulse_gain")
            .or_else(|_| cfg.get_f64("pulse_gain"))
            .map(|g| g / 32000.0)
            .unwrap_or(1.0);

        let center = self.resonator_mhz + self.chi_mhz * self.excitations(program);
        let detuning = (freq - center) / self.half_width_mhz;
        let amplitude = gain * (1.0 - self.depth / (1.0 + detuning * detuning));
        let phase = detuning.atan();
        (amplitude * phase.cos(), amplitude * phase.sin())
    }
}

impl Default for MockSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sequencer for MockSequencer {
    async fn acquire(&self, program: &Program, load_pulses: bool) -> Result<IqSample> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.programs.lock().await.push(program.clone());

        if self.fail_at == Some(call) {
            bail!("MockSequencer: board stopped responding on call {}", call);
        }

        let (i, q) = self.response(program);
        let mut rng = rand::thread_rng();
        let mut jitter = || {
            if self.noise > 0.0 {
                rng.gen_range(-self.noise..self.noise)
            } else {
                0.0
            }
        };
        let is: Vec<f64> = (0..self.channels).map(|_| i + jitter()).collect();
        let qs: Vec<f64> = (0..self.channels).map(|_| q + jitter()).collect();

        debug!(
            call,
            kind = program.kind(),
            load_pulses,
            i = is[0],
            q = qs[0],
            "MockSequencer: acquired"
        );
        Ok(IqSample::new(is, qs))
    }

    fn readout_channels(&self) -> usize {
        self.channels
    }
}

// =============================================================================
// MockAttenuator
// =============================================================================

/// Mock step attenuator.
pub struct MockAttenuator {
    db: RwLock<f64>,
    history: Mutex<Vec<f64>>,
}

impl MockAttenuator {
    /// Attenuator starting at `initial_db`.
    pub fn new(initial_db: f64) -> Self {
        Self {
            db: RwLock::new(initial_db),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Every value passed to `set_attenuation`, in order.
    pub async fn history(&self) -> Vec<f64> {
        self.history.lock().await.clone()
    }
}

#[async_trait]
impl Attenuator for MockAttenuator {
    async fn set_attenuation(&self, db: f64) -> Result<()> {
        if !(0.0..=95.0).contains(&db) {
            bail!("MockAttenuator: {} dB out of range 0-95 dB", db);
        }
        *self.db.write().await = db;
        self.history.lock().await.push(db);
        debug!(db, "MockAttenuator: set");
        Ok(())
    }

    async fn attenuation(&self) -> Result<f64> {
        Ok(*self.db.read().await)
    }
}

// =============================================================================
// MockVoltageSource
// =============================================================================

/// Mock DC voltage source.
pub struct MockVoltageSource {
    volts: RwLock<f64>,
    history: Mutex<Vec<f64>>,
}

impl MockVoltageSource {
    /// Source at 0 V.
    pub fn new() -> Self {
        Self {
            volts: RwLock::new(0.0),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Every value passed to `set_voltage`, in order.
    pub async fn history(&self) -> Vec<f64> {
        self.history.lock().await.clone()
    }
}

impl Default for MockVoltageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VoltageSource for MockVoltageSource {
    async fn set_voltage(&self, volts: f64) -> Result<()> {
        *self.volts.write().await = volts;
        self.history.lock().await.push(volts);
        debug!(volts, "MockVoltageSource: set");
        Ok(())
    }

    async fn voltage(&self) -> Result<f64> {
        Ok(*self.volts.read().await)
    }
}

// =============================================================================
// MockThermometer
// =============================================================================

/// Mock temperature controller.
///
/// The reading jumps straight to the set point (base temperature 0.008 K when
/// regulation is off). Resistance follows `R = 1000 + 50 / T`.
pub struct MockThermometer {
    setpoint: RwLock<f64>,
    history: Mutex<Vec<f64>>,
}

impl MockThermometer {
    /// Controller with regulation off.
    pub fn new() -> Self {
        Self {
            setpoint: RwLock::new(0.0),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Every set point requested, in order.
    pub async fn history(&self) -> Vec<f64> {
        self.history.lock().await.clone()
    }

    async fn current(&self) -> f64 {
        let setpoint = *self.setpoint.read().await;
        if setpoint > 0.0 {
            setpoint
        } else {
            0.008
        }
    }
}

impl Default for MockThermometer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemperatureController for MockThermometer {
    async fn set_temperature(&self, kelvin: f64) -> Result<()> {
        if kelvin < 0.0 {
            bail!("MockThermometer: negative set point {}", kelvin);
        }
        *self.setpoint.write().await = kelvin;
        self.history.lock().await.push(kelvin);
        Ok(())
    }

    async fn temperature(&self, _channel: u8) -> Result<f64> {
        Ok(self.current().await)
    }

    async fn resistance(&self, _channel: u8) -> Result<f64> {
        Ok(1000.0 + 50.0 / self.current().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ExperimentConfig;
    use std::sync::Arc;

    fn program_at(freq: f64) -> Program {
        Program::new(
            "transmission",
            Arc::new(ExperimentConfig::new().with("pulse_freq", freq)),
        )
    }

    #[tokio::test]
    async fn dip_is_deepest_on_resonance() {
        let soc = MockSequencer::new();
        let on = soc.acquire(&program_at(6962.0), true).await.unwrap();
        let off = soc.acquire(&program_at(6970.0), true).await.unwrap();
        let on_mag = on.signal(0).unwrap().norm();
        let off_mag = off.signal(0).unwrap().norm();
        assert!(on_mag < off_mag);
        assert!((on_mag - 0.2).abs() < 1e-9);
        assert_eq!(soc.call_count(), 2);
    }

    #[tokio::test]
    async fn excited_state_shifts_the_dip() {
        let soc = MockSequencer::new();
        let cfg = ExperimentConfig::new()
            .with("pulse_freq", 6962.2)
            .with("pulse_expt.pulse_01", true);
        let excited = soc
            .acquire(&Program::new("chi_shift", Arc::new(cfg)), true)
            .await
            .unwrap();
        assert!((excited.signal(0).unwrap().norm() - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fail_at_errors_on_that_call_only() {
        let soc = MockSequencer::new().fail_at(1);
        assert!(soc.acquire(&program_at(6962.0), true).await.is_ok());
        assert!(soc.acquire(&program_at(6962.0), true).await.is_err());
        assert!(soc.acquire(&program_at(6962.0), true).await.is_ok());
        assert_eq!(soc.programs().await.len(), 3);
    }

    #[tokio::test]
    async fn channels_are_filled() {
        let soc = MockSequencer::new().with_channels(3);
        let sample = soc.acquire(&program_at(6962.0), true).await.unwrap();
        assert_eq!(sample.channels(), 3);
        assert_eq!(soc.readout_channels(), 3);
    }

    #[tokio::test]
    async fn attenuator_rejects_out_of_range() {
        let atten = MockAttenuator::new(35.0);
        atten.set_attenuation(20.0).await.unwrap();
        assert_eq!(atten.attenuation().await.unwrap(), 20.0);
        assert!(atten.set_attenuation(120.0).await.is_err());
        assert_eq!(atten.history().await, vec![20.0]);
    }

    #[tokio::test]
    async fn thermometer_follows_setpoint() {
        let fridge = MockThermometer::new();
        assert_eq!(fridge.temperature(7).await.unwrap(), 0.008);
        fridge.set_temperature(0.05).await.unwrap();
        assert_eq!(fridge.temperature(7).await.unwrap(), 0.05);
        assert_eq!(fridge.resistance(8).await.unwrap(), 2000.0);
    }
}
