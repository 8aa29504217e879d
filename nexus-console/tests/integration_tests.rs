use std::{io::Write, sync::atomic::Ordering, time::Duration};

use nexus_console::{
    fid_sequence, loopback_gates, AcquisitionControl, ConsoleConfig, ControlError, FidSettings,
    LoopbackSignal,
};
use nexus_hal::{SimulatedRxCard, SimulatedTxCard};
use nexus_types::{AcquisitionParameter, DdcMethod};
use tempfile::NamedTempFile;

// ===========================================================================
// Helpers
// ===========================================================================

type SimControl = AcquisitionControl<SimulatedTxCard, SimulatedRxCard>;

/// 2 повтора по 20 отсчётов × 10 мкс: окна по 4000 отсчётов при 20 МГц.
fn settings() -> FidSettings {
    FidSettings {
        adc_samples: 20,
        ..Default::default()
    }
}

fn config() -> ConsoleConfig {
    let mut config = ConsoleConfig::default();
    config.tx.ring_size = 4096;
    config.tx.notify_size = 512;
    config.tx.dma_timeout_ms = 0;
    config.rx.ring_size = 64 * 1024;
    config.rx.notify_size = 4096;
    config.rx.gate_timeout_ms = 200;
    config.rx.dma_timeout_ms = 1;
    config
}

/// Консоль с загруженной последовательностью и сценарием дигитайзера.
fn loopback_control(
    rx: SimulatedRxCard,
    params: &AcquisitionParameter,
    signal: &LoopbackSignal,
) -> SimControl {
    let mut control = AcquisitionControl::new(SimulatedTxCard::new(), rx, config()).unwrap();
    let sequence = control
        .set_sequence(&fid_sequence(&settings()), params)
        .unwrap()
        .clone();

    let gates = loopback_gates(
        &sequence,
        control.rx_sample_rate(),
        control.rx_channels(),
        signal,
    );
    control.rx_hal_mut().unwrap().set_script(gates);
    control
}

fn quiet_signal() -> LoopbackSignal {
    LoopbackSignal {
        noise: 0,
        ..Default::default()
    }
}

/// 12000 единиц АЦП при пределе 200 мВ.
const PEAK_MV: f64 = 12_000.0 * 200.0 / 32768.0;

// ===========================================================================
// Полный сбор
// ===========================================================================

#[test]
fn test_fid_loopback_fir() {
    let params = AcquisitionParameter::default();
    let mut control = loopback_control(SimulatedRxCard::new(Vec::new()), &params, &quiet_signal());

    let data = control.run(&params).unwrap();

    assert_eq!(data.gate_count(), 2);
    assert_eq!(data.gates_per_average, 2);
    assert!((data.dwell_time - 1e-5).abs() < 1e-12);

    let readouts = data.readouts();
    assert_eq!(readouts.len(), 1);
    // 4000 / 200, как у CIC
    assert_eq!(readouts[0].samples, 20);
    assert_eq!(readouts[0].gate_indices, vec![0, 1]);

    for gate in &readouts[0].signal[0] {
        // Первые два отсчёта перекрывают дополнение нулями
        let early = gate[0][2];
        assert!(
            (early.arg() + 0.3).abs() < 0.05,
            "phase {:.4} rad",
            early.arg()
        );
        assert!(
            early.norm() > 0.9 * PEAK_MV && early.norm() < 1.02 * PEAK_MV,
            "magnitude {:.2} mV",
            early.norm()
        );
        // FID затухает
        assert!(gate[0][17].norm() < early.norm());
    }

    let metrics = control.recorder_metrics();
    assert_eq!(metrics.gates.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.aborted_gates.load(Ordering::Relaxed), 0);

    let (tx, rx) = control.close().unwrap();
    assert!(!tx.output().is_empty());
    assert!(!rx.is_running());
}

#[test]
fn test_fid_loopback_cic() {
    let params = AcquisitionParameter {
        ddc_method: DdcMethod::Cic,
        ..Default::default()
    };
    let mut control = loopback_control(SimulatedRxCard::new(Vec::new()), &params, &quiet_signal());

    let data = control.run(&params).unwrap();
    let readouts = data.readouts();

    // 4000 / 100 после CIC, затем ↓2
    assert_eq!(readouts[0].samples, 20);

    let middle = readouts[0].signal[0][0][0][10];
    assert!((middle.arg() + 0.3).abs() < 0.1, "phase {:.4}", middle.arg());
    assert!(middle.norm() > 0.8 * PEAK_MV, "magnitude {:.2}", middle.norm());

    control.close().unwrap();
}

#[test]
fn test_averages_share_layout() {
    let params = AcquisitionParameter {
        num_averages: 3,
        averaging_delay: 0.01,
        ..Default::default()
    };
    let mut control = loopback_control(
        SimulatedRxCard::new(Vec::new()),
        &params,
        &LoopbackSignal::default(),
    );

    let data = control.run(&params).unwrap();

    assert_eq!(data.gate_count(), 6);
    assert_eq!(data.complete_averages().count(), 3);

    let readout = &data.readouts()[0];
    assert_eq!(readout.num_averages(), 3);

    // Сценарий одинаков в каждом усреднении, шум канала 1 тоже
    let mean = readout.mean();
    assert_eq!(mean.len(), 2);
    for (m, first) in mean[0][0].iter().zip(&readout.signal[0][0][0]) {
        assert!((m - first).norm() < 1e-9);
    }

    control.close().unwrap();
}

// ===========================================================================
// Неполный сбор
// ===========================================================================

#[test]
fn test_truncated_gate_yields_partial_data() {
    let params = AcquisitionParameter {
        num_averages: 2,
        ..Default::default()
    };
    let rx = SimulatedRxCard::new(Vec::new()).with_truncated_last(100);
    let mut control = loopback_control(rx, &params, &quiet_signal());

    let (received, expected, data) = match control.run(&params) {
        Err(ControlError::AcquisitionIncomplete {
            received,
            expected,
            data,
        }) => (received, expected, data),
        other => panic!("expected AcquisitionIncomplete, got {other:?}"),
    };

    assert_eq!(received, 1);
    assert_eq!(expected, 4);
    assert_eq!(data.averages.len(), 1);
    assert_eq!(data.averages[0].len(), 2);
    assert_eq!(data.averages[0][0].reference.len(), 20);
    // 100 отсчётов короче шага прореживания
    assert!(data.averages[0][1].reference.is_empty());
    assert_eq!(data.averages[0][1].unprocessed[0].len(), 100);

    control.close().unwrap();
}

#[test]
fn test_cancel_before_run() {
    let params = AcquisitionParameter::default();
    let mut control = loopback_control(SimulatedRxCard::new(Vec::new()), &params, &quiet_signal());

    control.stop_flag().store(true, Ordering::SeqCst);
    let err = control.run(&params).unwrap_err();

    match err.into_partial() {
        Some(data) => assert_eq!(data.gate_count(), 0),
        None => panic!("cancelled run must keep (empty) data"),
    }
    assert_eq!(control.replay_metrics().chunks.load(Ordering::Relaxed), 0);

    control.close().unwrap();
}

#[test]
fn test_missing_gates_time_out() {
    let params = AcquisitionParameter::default();
    let mut config = config();
    config.gate_budget = Duration::from_millis(300);

    // Дигитайзер без сценария: окна не придут
    let mut control =
        AcquisitionControl::new(SimulatedTxCard::new(), SimulatedRxCard::new(Vec::new()), config)
            .unwrap();
    control
        .set_sequence(&fid_sequence(&settings()), &params)
        .unwrap();

    match control.run(&params) {
        Err(ControlError::AcquisitionIncomplete {
            received, expected, ..
        }) => {
            assert_eq!(received, 0);
            assert_eq!(expected, 2);
        }
        other => panic!("expected AcquisitionIncomplete, got {other:?}"),
    }

    control.close().unwrap();
}

// ===========================================================================
// Параметры из файла
// ===========================================================================

#[test]
fn test_parameters_from_json_drive_acquisition() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{ "ddc_method": "cic", "decimation": 100 }}"#).unwrap();

    let params = AcquisitionParameter::load(file.path()).unwrap();
    assert_eq!(params.ddc_method, DdcMethod::Cic);
    assert_eq!(params.larmor_frequency, 2e6);

    let mut control = loopback_control(SimulatedRxCard::new(Vec::new()), &params, &quiet_signal());
    let data = control.run(&params).unwrap();

    // 4000 / 50, затем ↓2
    assert_eq!(data.readouts()[0].samples, 40);
    assert!((data.dwell_time - 5e-6).abs() < 1e-12);

    control.close().unwrap();
}
