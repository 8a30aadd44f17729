//! Integration tests for the acquisition loop and persistence
//!
//! These tests drive complete experiments against the mock instruments and check the
//! guarantees the lab relies on: one acquire per set-point, nothing saved after a
//! fault, and exactly one saved record whose configuration is the one in effect at the
//! end of the sweep.

use qubit_daq::error::SweepError;
use qubit_daq::experiment::{Experiment, Instruments, RunContext, Transmission};
use qubit_daq::grid::GridSpec;
use qubit_daq::mock::MockSequencer;
use qubit_daq::params::{ConfigBuilder, ExperimentConfig};
use qubit_daq::plot::{FrameLog, NoPlot};
use qubit_daq::record::DataRecord;
use qubit_daq::storage::{DataFileNamer, JsonWriter, Persister};
use std::sync::Arc;
use tempfile::tempdir;

fn transmission_params() -> ExperimentConfig {
    ExperimentConfig::new()
        .with("read_pulse_freq", 6962.0)
        .with("TransSpan", 1.5)
        .with("TransNumPoints", 61)
        .with("reps", 1000)
        .with("trans_reps", 50)
        .with("update_read_freq", true)
}

async fn acquire(exp: &dyn Experiment, soc: Arc<MockSequencer>) -> Result<DataRecord, SweepError> {
    let instruments = Instruments::new(soc);
    let mut plot = NoPlot;
    let mut ctx = RunContext::new(&instruments, &mut plot);
    exp.acquire(&mut ctx).await
}

// =============================================================================
// Grid Scenarios
// =============================================================================

#[test]
fn test_resonator_scan_grid() {
    let axis = GridSpec::CenterSpan {
        center: 6962.0,
        span: 1.5,
        count: 61,
    }
    .axis("fpts", "MHz");

    assert_eq!(axis.len(), 61);
    assert_eq!(axis.points()[0], 6960.5);
    assert_eq!(axis.points()[60], 6963.5);
    assert!(axis.points().windows(2).all(|w| w[1] > w[0]));
    assert!((axis.step() - 0.05).abs() < 1e-9);
}

#[test]
fn test_half_open_grid_stops_short() {
    let axis = GridSpec::center_span_stepped(6962.0, 1.5, 61).axis("fpts", "MHz");
    assert_eq!(axis.len(), 61);
    assert_eq!(axis.points()[0], 6960.5);
    assert!((axis.step() - 3.0 / 61.0).abs() < 1e-9);
    assert!(axis.points()[60] < 6963.5);
}

// =============================================================================
// Fault Handling
// =============================================================================

#[tokio::test]
async fn test_fault_at_k_makes_k_plus_one_calls_and_saves_nothing() {
    let dir = tempdir().unwrap();
    let soc = Arc::new(MockSequencer::new().fail_at(17));
    let exp = Transmission::new(transmission_params());
    let mut persister = Persister::new(Box::new(JsonWriter::new()));
    let names = DataFileNamer::new(dir.path(), exp.name()).names("json");

    let result = acquire(&exp, soc.clone()).await;
    if let Ok(record) = &result {
        exp.save(record, &mut persister, &names.data).await.unwrap();
    }

    let err = result.unwrap_err();
    assert!(matches!(err, SweepError::Instrument(_)));
    assert!(err.to_string().contains("point 17"));
    assert_eq!(soc.call_count(), 18);
    assert!(!names.data.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_fault_on_first_point() {
    let soc = Arc::new(MockSequencer::new().fail_at(0));
    let result = acquire(&Transmission::new(transmission_params()), soc.clone()).await;
    assert!(result.is_err());
    assert_eq!(soc.call_count(), 1);
}

#[tokio::test]
async fn test_live_plot_not_finished_after_fault() {
    let soc = Arc::new(MockSequencer::new().fail_at(3));
    let instruments = Instruments::new(soc);
    let mut plot = FrameLog::new();
    let exp = Transmission::new(transmission_params());
    {
        let mut ctx = RunContext::new(&instruments, &mut plot);
        assert!(exp.acquire(&mut ctx).await.is_err());
    }
    assert_eq!(plot.updates().len(), 3);
    assert!(plot.finished().is_none());
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_record_persisted_exactly_once_with_final_config() {
    let dir = tempdir().unwrap();
    let soc = Arc::new(MockSequencer::new().with_resonator(6962.45));
    let exp = Transmission::new(transmission_params());
    let mut persister = Persister::new(Box::new(JsonWriter::new()));
    let names = DataFileNamer::new(dir.path(), exp.name()).names(persister.extension());

    let record = acquire(&exp, soc).await.unwrap();
    let path = exp.save(&record, &mut persister, &names.data).await.unwrap();
    assert!(persister.is_persisted(record.run_id()));

    let again = exp.save(&record, &mut persister, &names.data).await;
    assert!(matches!(again, Err(SweepError::AlreadyPersisted(_))));

    let saved = JsonWriter::read(&path).await.unwrap();
    assert_eq!(saved.run_id(), record.run_id());
    assert_eq!(saved.config(), record.config());

    // The peak correction made after the last point is part of the saved config, the
    // experiment's starting parameters are not touched.
    let peak = saved.config().get_f64("peak_freq_min").unwrap();
    assert!((peak - 6962.45).abs() < 1e-6);
    assert_eq!(saved.config().get_f64("read_pulse_freq").unwrap(), peak);
    assert_eq!(exp.config().get_f64("read_pulse_freq").unwrap(), 6962.0);
    assert!(saved.config().version() > exp.config().version() + 61);
}

#[tokio::test]
async fn test_two_sweeps_never_share_config() {
    let soc = Arc::new(MockSequencer::new());
    let params = transmission_params().with("TransNumPoints", 5);

    let first = acquire(&Transmission::new(params.clone()), soc.clone())
        .await
        .unwrap();
    let second = acquire(&Transmission::new(params.clone()), soc).await.unwrap();

    assert_ne!(first.run_id(), second.run_id());
    assert_eq!(first.config(), second.config());
    assert!(!params.contains("peak_freq_min"));
}

// =============================================================================
// Configuration Layering
// =============================================================================

#[test]
fn test_layers_apply_in_declared_order() {
    let site = ExperimentConfig::new().with("reps", 1000).with("TransSpan", 2.0);
    let file = ExperimentConfig::new().with("TransSpan", 1.5);
    let session = ExperimentConfig::new().with("reps", 200);

    let builder = ConfigBuilder::new(site)
        .layer("file", file)
        .layer("session", session);
    let config = builder.build();

    assert_eq!(config.get_f64("TransSpan").unwrap(), 1.5);
    assert_eq!(config.get_i64("reps").unwrap(), 200);
    assert_eq!(builder.source_of("reps"), Some("session"));
    assert_eq!(builder.source_of("TransSpan"), Some("file"));
}
