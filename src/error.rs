//! Custom error types for the sweep engine.
//!
//! This module defines the primary error type, `SweepError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failure modes of an experiment sweep.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` when the application configuration file
//!   cannot be parsed or extracted.
//! - **`Configuration`**: Semantic errors in an otherwise well-formed configuration.
//! - **`MissingKey`** / **`WrongType`**: An experiment read a parameter that was never set,
//!   or that holds a value of a different kind.
//! - **`Instrument`**: Any fault reported by an instrument driver (sequencer, attenuator,
//!   voltage source, temperature controller). These abort the sweep.
//! - **`BranchDisabled`**: A result branch was read although the configuration flag that
//!   enables it was off.
//! - **`Io`** / **`Serialization`** / **`Storage`**: Faults while writing data records.
//! - **`AlreadyPersisted`**: A record was written twice for the same sweep.
//! - **`FeatureNotEnabled`**: The code tried to use a backend that was not compiled in.
//!
//! None of these are retried anywhere in the crate: every error ends the sweep and is
//! reported by the binary.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, SweepError>;

/// Errors raised while configuring, running or saving a sweep.
#[derive(Error, Debug)]
pub enum SweepError {
    /// The application configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A configuration value is present but unusable
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// An experiment parameter was never set
    #[error("Missing configuration key '{0}'")]
    MissingKey(String),

    /// An experiment parameter holds a value of another kind
    #[error("Configuration key '{key}' holds {found}, expected {expected}")]
    WrongType {
        /// Dotted parameter path
        key: String,
        /// Kind the caller asked for
        expected: &'static str,
        /// Kind actually stored
        found: &'static str,
    },

    /// An instrument driver reported a fault
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// A result branch disabled by configuration was read
    #[error("Result branch '{0}' is disabled for this sweep")]
    BranchDisabled(String),

    /// Array dimensions do not match
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record could not be written or read back
    #[error("Storage error: {0}")]
    Storage(String),

    /// The record with this run id was written before
    #[error("Data record for run {0} was already persisted")]
    AlreadyPersisted(String),

    /// An account profile could not be read or written
    #[error("Profile error: {0}")]
    Profile(String),

    /// The plot backend failed
    #[error("Plot error: {0}")]
    Plot(String),

    /// The named cargo feature was not compiled in
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for SweepError {
    fn from(value: figment::Error) -> Self {
        SweepError::Config(Box::new(value))
    }
}

impl SweepError {
    /// Wrap a driver fault. Instrument traits return `anyhow::Result`, the engine
    /// converts at the call site.
    pub fn instrument(err: anyhow::Error) -> Self {
        SweepError::Instrument(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_error_keeps_context_chain() {
        let err = anyhow::anyhow!("socket closed").context("acquire failed");
        let sweep = SweepError::instrument(err);
        let text = sweep.to_string();
        assert!(text.contains("acquire failed"));
        assert!(text.contains("socket closed"));
    }

    #[test]
    fn wrong_type_message_names_both_kinds() {
        let err = SweepError::WrongType {
            key: "reps".into(),
            expected: "integer",
            found: "string",
        };
        assert_eq!(
            err.to_string(),
            "Configuration key 'reps' holds string, expected integer"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SweepError = io.into();
        match err {
            SweepError::Io(inner) => assert_eq!(inner.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
