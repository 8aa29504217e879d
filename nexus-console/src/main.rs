use std::{
    path::PathBuf,
    sync::{atomic::Ordering, Arc},
    time::Instant,
};

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use nexus_console::{
    fid_sequence, loopback_gates, parse_freq_hz, AcquisitionControl, AcquisitionData,
    ConsoleConfig, ControlError, FidSettings, LoopbackSignal,
};
use nexus_hal::{SimulatedRxCard, SimulatedTxCard};
use nexus_types::{AcquisitionParameter, DdcMethod};

#[derive(Parser, Debug)]
#[command(
    name = "nexus",
    version = env!("CARGO_PKG_VERSION"),
    about = "Run an FID acquisition through the simulated generator and digitizer",
    long_about = None,
)]
struct Cli {
    /// Частота Лармора (2MHz, 2000kHz, 2000000)
    #[arg(short = 'f', long, default_value = "2MHz")]
    larmor: String,
    /// Частота дискретизации генератора
    #[arg(long, default_value = "20MHz")]
    tx_rate: String,
    /// Частота дискретизации дигитайзера
    #[arg(long, default_value = "20MHz")]
    rx_rate: String,
    /// Количество усреднений
    #[arg(short = 'n', long, default_value = "1")]
    averages: usize,
    /// Пауза между усреднениями (секунды)
    #[arg(long, default_value = "0")]
    averaging_delay: f64,
    /// Коэффициент децимации DDC
    #[arg(short, long, default_value = "200")]
    decimation: usize,
    /// Метод DDC: fir, cic
    #[arg(long, default_value = "fir")]
    ddc: String,
    /// Повторений RF + приём в последовательности
    #[arg(long, default_value = "2")]
    repetitions: usize,
    /// Отсчётов АЦП в окне
    #[arg(long, default_value = "200")]
    adc_samples: usize,
    /// Период отсчётов АЦП (микросекунды)
    #[arg(long, default_value = "10")]
    adc_dwell_us: f64,
    /// Параметры сбора из JSON (заменяют флаги выше)
    #[arg(long)]
    params: Option<PathBuf>,
    /// Сохранить итоговые параметры в JSON
    #[arg(long)]
    save_params: Option<PathBuf>,
    /// Интервал вывода прогресса движков (секунды)
    #[arg(long, default_value = "5")]
    stats_interval: u64,
    /// Тихий режим (только ошибки)
    #[arg(short, long)]
    quiet: bool,
    /// Отладочный вывод
    #[arg(short, long)]
    verbose: bool,
}

fn parse_rate(
    flag: &str,
    value: &str,
) -> u64 {
    match parse_freq_hz(value) {
        Ok(f) if f > 0 => f,
        Ok(_) => {
            error!("--{flag} must be > 0");
            std::process::exit(1);
        }
        Err(e) => {
            error!("--{flag}: {e}");
            std::process::exit(1);
        }
    }
}

fn parameters(cli: &Cli) -> AcquisitionParameter {
    if let Some(path) = &cli.params {
        return match AcquisitionParameter::load(path) {
            Ok(p) => {
                info!("Loaded acquisition parameters from {path:?}");
                p
            }
            Err(e) => {
                error!("--params {path:?}: {e}");
                std::process::exit(1);
            }
        };
    }

    let ddc_method: DdcMethod = match cli.ddc.parse() {
        Ok(m) => m,
        Err(e) => {
            error!("--ddc: {e}");
            std::process::exit(1);
        }
    };

    AcquisitionParameter {
        larmor_frequency: parse_rate("larmor", &cli.larmor) as f64,
        decimation: cli.decimation,
        ddc_method,
        num_averages: cli.averages,
        averaging_delay: cli.averaging_delay,
        ..Default::default()
    }
}

fn report(data: &AcquisitionData) {
    info!("\n{data}");

    for readout in data.readouts() {
        let mean = readout.mean();
        let Some(first) = mean.first().and_then(|gate| gate.first()) else {
            continue;
        };
        // Крайние отсчёты FIR захватывают дополнение нулями
        let Some(peak) = first.iter().max_by(|a, b| a.norm().total_cmp(&b.norm())) else {
            continue;
        };

        info!(
            "  {} samples: peak {:.2} mV, phase {:.1}°",
            readout.samples,
            peak.norm(),
            peak.arg().to_degrees()
        );
    }
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.quiet {
        LevelFilter::Error
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .format_timestamp_secs()
        .init();

    let params = parameters(&cli);
    if let Err(e) = params.validate() {
        error!("{e}");
        std::process::exit(1);
    }

    if let Some(path) = &cli.save_params {
        if let Err(e) = params.save(path) {
            error!("--save-params {path:?}: {e}");
            std::process::exit(1);
        }
        info!("Saved acquisition parameters to {path:?}");
    }

    let mut config = ConsoleConfig::default();
    config.tx.sample_rate = parse_rate("tx-rate", &cli.tx_rate);
    config.tx.ring_size = 1024 * 1024;
    config.tx.notify_size = 64 * 1024;
    config.tx.stats_interval_secs = cli.stats_interval;
    config.rx.sample_rate = parse_rate("rx-rate", &cli.rx_rate);
    config.rx.ring_size = 1024 * 1024;
    config.rx.stats_interval_secs = cli.stats_interval;

    let mut control = match AcquisitionControl::new(
        SimulatedTxCard::new(),
        SimulatedRxCard::new(Vec::new()),
        config,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to set up cards: {e}");
            std::process::exit(1);
        }
    };

    let stop_flag = control.stop_flag();
    let stop_ctrlc = Arc::clone(&stop_flag);

    if let Err(e) = ctrlc::set_handler(move || {
        if stop_ctrlc.swap(true, Ordering::SeqCst) {
            // Второй Ctrl+C — принудительный выход
            warn!("Force exit");
            std::process::exit(130);
        }
        warn!("Ctrl+C received, finishing current average...");
    }) {
        warn!("Failed to set Ctrl+C handler: {e}");
    }

    let settings = FidSettings {
        adc_samples: cli.adc_samples,
        adc_dwell: cli.adc_dwell_us * 1e-6,
        repetitions: cli.repetitions,
        ..Default::default()
    };

    let sequence = match control.set_sequence(&fid_sequence(&settings), &params) {
        Ok(seq) => seq.clone(),
        Err(e) => {
            error!("Sequence rejected: {e}");
            std::process::exit(1);
        }
    };

    // Дигитайзер "принимает" сигнал, синхронный с опорным тактом генератора
    let gates = loopback_gates(
        &sequence,
        control.rx_sample_rate(),
        control.rx_channels(),
        &LoopbackSignal::default(),
    );
    if let Some(rx) = control.rx_hal_mut() {
        rx.set_script(gates);
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "  Larmor        : {:.3} MHz",
        params.larmor_frequency / 1e6
    );
    info!("  Sequence      : {:.3} ms", sequence.duration * 1e3);
    info!("  ADC events    : {}", sequence.adc_count);
    info!("  Averages      : {}", params.num_averages);
    info!(
        "  DDC           : {} / {}",
        params.ddc_method, params.decimation
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let session_start = Instant::now();
    let mut failed = false;

    match control.run(&params) {
        Ok(data) => report(&data),
        Err(ControlError::AcquisitionIncomplete {
            received,
            expected,
            data,
        }) => {
            warn!("⚠ Acquisition incomplete: {received} of {expected} gates");
            report(&data);
            failed = !stop_flag.load(Ordering::Relaxed);
        }
        Err(e) => {
            error!("Acquisition failed: {e}");
            std::process::exit(1);
        }
    }

    info!(
        "\nTx\n{}",
        control.replay_metrics().summary(&session_start)
    );
    info!(
        "\nRx\n{}",
        control.recorder_metrics().summary(&session_start)
    );

    if let Err(e) = control.close() {
        error!("Failed to close cards: {e}");
        std::process::exit(1);
    }

    if failed {
        std::process::exit(1);
    }

    info!("✓ Acquisition complete");
}
