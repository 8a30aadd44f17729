//! # qubit_daq
//!
//! Sweep-and-acquire experiment engine for superconducting-qubit measurement hardware.
//! An experiment derives a sweep axis from its parameters, steps through it one
//! set-point at a time, hands a configuration snapshot to the pulse sequencer for each
//! point, collects the averaged I/Q result, updates a live plot and finally writes one
//! data record.
//!
//! ## Crate Structure
//!
//! - **`params`**: `ExperimentConfig`, the versioned parameter record, plus layering and
//!   fast-flux tables.
//! - **`grid`**: sweep axes from linspace, center/span and stepped conventions.
//! - **`instrument`**: async capability traits (`Sequencer`, `Attenuator`,
//!   `VoltageSource`, `TemperatureController`) and the `Program` snapshot.
//! - **`mock`**: simulated instruments for tests and dry runs.
//! - **`results`**: I/Q accumulation (`ResultMatrix`, `Matrix2`, `BranchedResults`).
//! - **`engine`**: the acquisition loop, 1-D and nested.
//! - **`experiment`**: concrete experiments behind the `Experiment` trait.
//! - **`record`** / **`storage`**: the sealed data record and its writers (JSON, HDF5).
//! - **`plot`**: the `LivePlot` seam and the SVG implementation.
//! - **`progress`**: console timing and ETA for nested sweeps.
//! - **`profile`** / **`events`**: account profiles and connection state on a typed
//!   event bus.
//! - **`config`** / **`logging`** / **`error`**: application configuration, tracing setup
//!   and the crate error type.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod experiment;
pub mod grid;
pub mod instrument;
pub mod logging;
pub mod mock;
pub mod params;
pub mod plot;
pub mod profile;
pub mod progress;
pub mod record;
pub mod results;
pub mod storage;

pub use error::{AppResult, SweepError};
