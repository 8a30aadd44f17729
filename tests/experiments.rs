//! Integration tests for the concrete experiments
//!
//! Each experiment is selected by name the way the binary does it, run against the
//! mock instruments and, where it matters, saved and reloaded.

use qubit_daq::error::SweepError;
use qubit_daq::events::{AppEvent, ConnectionStatus, EventBus};
use qubit_daq::experiment::{ChiShift, ExperimentKind, Instruments, RunContext};
use qubit_daq::mock::{MockAttenuator, MockSequencer, MockThermometer, MockVoltageSource};
use qubit_daq::params::ExperimentConfig;
use qubit_daq::plot::{FrameLog, NoPlot, PlotFrame};
use qubit_daq::profile::{ConnectionController, ProfileStore};
use qubit_daq::storage::{DataFileNamer, JsonWriter, Persister};
use std::sync::Arc;
use tempfile::tempdir;

fn lab_instruments(soc: Arc<MockSequencer>) -> Instruments {
    Instruments::new(soc)
        .with_attenuator(Arc::new(MockAttenuator::new(0.0)))
        .with_voltage_source(Arc::new(MockVoltageSource::new()))
        .with_temperature(Arc::new(MockThermometer::new()))
}

// =============================================================================
// ChiShift Branches
// =============================================================================

#[tokio::test]
async fn test_chi_shift_without_12_branch() {
    let soc = Arc::new(MockSequencer::new());
    let instruments = lab_instruments(soc.clone());
    let config = ExperimentConfig::new()
        .with("pulse_freq", 6962.0)
        .with("TransSpan", 1.5)
        .with("TransNumPoints", 61)
        .with("pulse_expt.check_12", false);
    let chi = ChiShift::new(config);

    let mut plot = NoPlot;
    let mut ctx = RunContext::new(&instruments, &mut plot);
    let outcome = chi.run(&mut ctx).await.unwrap();

    assert_eq!(outcome.fpts.len(), 61);
    assert!((outcome.fpts.step() - 3.0 / 61.0).abs() < 1e-9);
    assert_eq!(outcome.branches.names(), vec!["01", "ground"]);
    assert_eq!(soc.call_count(), 122);
    assert!(matches!(
        outcome.branches.branch("12"),
        Err(SweepError::BranchDisabled(name)) if name == "12"
    ));
}

#[tokio::test]
async fn test_chi_shift_record_round_trips_through_json() {
    let dir = tempdir().unwrap();
    let instruments = lab_instruments(Arc::new(MockSequencer::new()));
    let config = ExperimentConfig::new()
        .with("pulse_freq", 6962.0)
        .with("TransSpan", 1.0)
        .with("TransNumPoints", 10)
        .with("pulse_expt.check_12", true)
        .with("cavity_LO", 6.0e9);
    let kind = ExperimentKind::from_name("chi_shift", config).unwrap();
    let exp = kind.as_experiment();

    let record = {
        let mut plot = NoPlot;
        let mut ctx = RunContext::new(&instruments, &mut plot);
        exp.acquire(&mut ctx).await.unwrap()
    };
    let mut persister = Persister::new(Box::new(JsonWriter::new()));
    let names = DataFileNamer::new(dir.path(), exp.name()).names("json");
    let path = exp.save(&record, &mut persister, &names.data).await.unwrap();
    let saved = JsonWriter::read(&path).await.unwrap();

    for key in ["fpts", "results_ground", "results_01", "results_12"] {
        assert_eq!(saved.dataset(key).unwrap(), record.dataset(key).unwrap(), "{key}");
    }
    assert_eq!(saved.dataset("results_01").unwrap().shape(), &[2, 1, 10]);

    let mut shown = FrameLog::new();
    exp.display(&saved, &mut shown).unwrap();
    match shown.finished().unwrap() {
        PlotFrame::Line { series, x, x_label, .. } => {
            assert_eq!(series.len(), 3);
            assert!(x_label.contains("GHz"));
            assert!((x[0] - 12.961).abs() < 1e-9);
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

// =============================================================================
// Nested Sweeps
// =============================================================================

#[tokio::test]
async fn test_attenuation_sweep_by_name() {
    let soc = Arc::new(MockSequencer::new());
    let atten = Arc::new(MockAttenuator::new(0.0));
    let instruments = Instruments::new(soc.clone()).with_attenuator(atten.clone());
    let config = ExperimentConfig::new()
        .with("trans_attn_start", 5)
        .with("trans_attn_stop", 25)
        .with("trans_attn_num", 5)
        .with("trans_freq_start", 6961.0)
        .with("trans_freq_stop", 6963.0)
        .with("TransNumPoints", 11)
        .with("reps", 1000)
        .with("trans_reps", 10);
    let kind = ExperimentKind::from_name("trans_vs_atten", config).unwrap();

    let mut plot = FrameLog::new();
    let record = {
        let mut ctx = RunContext::new(&instruments, &mut plot);
        kind.as_experiment().acquire(&mut ctx).await.unwrap()
    };

    assert_eq!(soc.call_count(), 55);
    assert_eq!(atten.history().await, vec![5.0, 10.0, 15.0, 20.0, 25.0]);
    assert_eq!(record.dataset("Imat").unwrap().shape(), &[5, 11]);
    assert_eq!(record.dataset("Qmat").unwrap().shape(), &[5, 11]);
    assert_eq!(record.config().get_i64("reps").unwrap(), 10);
    assert_eq!(plot.updates().len(), 5);
}

#[tokio::test]
async fn test_nested_fault_saves_nothing() {
    let soc = Arc::new(MockSequencer::new().fail_at(12));
    let instruments = lab_instruments(soc.clone());
    let config = ExperimentConfig::new()
        .with("trans_gain_start", 1000)
        .with("trans_gain_stop", 3000)
        .with("trans_gain_num", 3)
        .with("trans_freq_start", 6961.0)
        .with("trans_freq_stop", 6963.0)
        .with("TransNumPoints", 5);
    let kind = ExperimentKind::from_name("trans_vs_gain", config).unwrap();

    let mut plot = FrameLog::new();
    let mut ctx = RunContext::new(&instruments, &mut plot);
    let result = kind.as_experiment().acquire(&mut ctx).await;

    assert!(matches!(result, Err(SweepError::Instrument(_))));
    assert_eq!(soc.call_count(), 13);
}

#[tokio::test]
async fn test_chevron_by_name_saves_frequency_by_gain_planes() {
    let dir = tempdir().unwrap();
    let soc = Arc::new(MockSequencer::new().with_qubit(4500.0, 1.0));
    let instruments = Instruments::new(soc.clone());
    let config = ExperimentConfig::new()
        .with("start_f", 4499.0)
        .with("step_f", 0.5)
        .with("expts_f", 3)
        .with("start_gain", 0)
        .with("step_gain", 750)
        .with("expts_gain", 4)
        .with("read_pulse_freq", 6962.0);
    let kind = ExperimentKind::from_name("amplitude_rabi_chevron", config).unwrap();
    let exp = kind.as_experiment();

    let record = {
        let mut plot = NoPlot;
        let mut ctx = RunContext::new(&instruments, &mut plot);
        exp.acquire(&mut ctx).await.unwrap()
    };

    assert_eq!(soc.call_count(), 12);
    let outer: Vec<f64> = soc
        .programs()
        .await
        .iter()
        .map(|p| p.config().get_f64("qubit_freq").unwrap())
        .collect();
    assert_eq!(outer[..4], [4499.0; 4]);
    assert_eq!(outer[4..8], [4499.5; 4]);
    assert_eq!(outer[8..], [4500.0; 4]);

    let mut persister = Persister::new(Box::new(JsonWriter::new()));
    let names = DataFileNamer::new(dir.path(), exp.name()).names("json");
    let path = exp.save(&record, &mut persister, &names.data).await.unwrap();
    let saved = JsonWriter::read(&path).await.unwrap();
    for key in ["avgi", "avgq", "amps", "phases"] {
        assert_eq!(saved.dataset(key).unwrap().shape(), &[3, 4], "{key}");
    }
    assert_eq!(saved.dataset("freqpts").unwrap().values(), &[4499.0, 4499.5, 4500.0]);
    assert_eq!(saved.dataset("xpts").unwrap().values(), &[0.0, 750.0, 1500.0, 2250.0]);

    let mut shown = FrameLog::new();
    exp.display(&saved, &mut shown).unwrap();
    assert!(matches!(shown.finished(), Some(PlotFrame::Heatmap { y, .. }) if y.len() == 3));
}

// =============================================================================
// Profiles and Connection
// =============================================================================

#[tokio::test]
async fn test_profile_and_connection_events_share_a_bus() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("default.json"),
        r#"{"default_account_name": "lab"}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("lab.json"),
        r#"{"account_name": "lab", "ip_address": "192.168.1.10"}"#,
    )
    .unwrap();

    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let mut store = ProfileStore::new(dir.path(), bus.clone());
    let mut conn = ConnectionController::new(bus);

    let profile = store.load_default().unwrap().clone();
    conn.connect(&profile).unwrap();
    conn.handle_connection_update("192.168.1.10", ConnectionStatus::Success);
    conn.disconnect();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            AppEvent::AccountLoaded("lab".into()),
            AppEvent::DeviceConnected("192.168.1.10".into()),
            AppEvent::ConnectionUpdated {
                ip_address: "192.168.1.10".into(),
                status: ConnectionStatus::Success,
            },
            AppEvent::DeviceDisconnected,
        ]
    );
}
