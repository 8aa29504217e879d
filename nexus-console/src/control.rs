use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use nexus_core::{DownconversionPipeline, ProcessedGate, SequenceUnroller};
use nexus_hal::{Card, Hal};
use nexus_recorder::{AcquisitionEngine, RecorderMetrics};
use nexus_replayer::{ReplayEngine, ReplayMetrics};
use nexus_types::{AcquisitionParameter, Gate, SequenceSource, UnrolledSequence};

use crate::{AcquisitionData, ConsoleConfig, ControlError, ControlResult};

/// Шаг опроса очереди окон и флага остановки.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Оркестратор сбора данных: развёртка, запуск генератора и дигитайзера
/// на каждое усреднение, сбор окон и DDC.
///
/// Последовательность разворачивается один раз в [`set_sequence`]; каждое
/// усреднение проигрывает её заново.
///
/// [`set_sequence`]: AcquisitionControl::set_sequence
pub struct AcquisitionControl<T: Hal + 'static, R: Hal + 'static> {
    config: ConsoleConfig,
    replay: ReplayEngine<T>,
    record: AcquisitionEngine<R>,
    unroller: SequenceUnroller,
    sequence: Option<UnrolledSequence>,
    stop_flag: Arc<AtomicBool>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<T: Hal + 'static, R: Hal + 'static> AcquisitionControl<T, R> {
    /// Проверяет конфигурацию, открывает и настраивает обе карты.
    pub fn new(
        tx: T,
        rx: R,
        config: ConsoleConfig,
    ) -> ControlResult<Self> {
        config.validate()?;

        let mut replay = ReplayEngine::new(tx, config.tx.clone())?;
        let mut record = AcquisitionEngine::new(rx, config.rx.clone())?;

        replay.setup_card()?;
        record.setup_card()?;

        // Частота генератора могла быть скорректирована картой
        let tx_config = replay.config();
        let unroller = SequenceUnroller::new(
            tx_config.dwell_time(),
            config.rf_to_volt,
            config.grad_to_volt,
            tx_config.output_limits(),
        )
        .with_system_timing(config.timing);

        info!(
            "Console ready: Tx {:.3} MHz, Rx {:.3} MHz x {} channels",
            tx_config.sample_rate as f64 / 1e6,
            record.config().sample_rate as f64 / 1e6,
            record.config().channels
        );

        Ok(Self {
            config,
            replay,
            record,
            unroller,
            sequence: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn sequence(&self) -> Option<&UnrolledSequence> {
        self.sequence.as_ref()
    }

    /// Флаг отмены сбора (например, из обработчика Ctrl+C).
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    pub fn replay_metrics(&self) -> Arc<ReplayMetrics> {
        self.replay.metrics()
    }

    pub fn recorder_metrics(&self) -> Arc<RecorderMetrics> {
        self.record.metrics()
    }

    /// Частота дискретизации дигитайзера после настройки карты (Гц).
    pub fn rx_sample_rate(&self) -> f64 {
        self.record.config().sample_rate as f64
    }

    pub fn rx_channels(&self) -> usize {
        self.record.config().channels
    }

    /// Драйвер дигитайзера между запусками.
    pub fn rx_hal_mut(&mut self) -> Option<&mut R> {
        self.record.card_mut().map(Card::hal_mut)
    }

    /// Разворачивает последовательность. Ошибки проверки и амплитуды
    /// возникают здесь, до запуска карт.
    pub fn set_sequence(
        &mut self,
        source: &dyn SequenceSource,
        params: &AcquisitionParameter,
    ) -> ControlResult<&UnrolledSequence> {
        let unrolled = self.unroller.unroll(source, params)?;

        info!(
            "Sequence unrolled: {} blocks, {} samples, {} ADC events, {:.3} ms",
            unrolled.blocks.len(),
            unrolled.sample_count,
            unrolled.adc_count,
            unrolled.duration * 1e3
        );

        Ok(self.sequence.insert(unrolled))
    }

    /// Выполняет все усреднения и обрабатывает окна.
    ///
    /// Если полных окон меньше ожидаемого (таймаут, обрыв окна, ошибка
    /// карты, отмена), возвращается [`ControlError::AcquisitionIncomplete`]
    /// с уже полученными данными.
    pub fn run(
        &mut self,
        params: &AcquisitionParameter,
    ) -> ControlResult<AcquisitionData> {
        params.validate()?;

        let Self {
            config,
            replay,
            record,
            sequence,
            stop_flag,
            ..
        } = self;
        let sequence = sequence.as_ref().ok_or(ControlError::NotConfigured)?;

        if (sequence.larmor_frequency - params.larmor_frequency).abs() > 1e-6 {
            warn!(
                "Sequence was unrolled at {:.6} MHz, acquisition uses {:.6} MHz",
                sequence.larmor_frequency / 1e6,
                params.larmor_frequency / 1e6
            );
        }

        let pipeline = DownconversionPipeline::new(
            params,
            record.config().sample_rate as f64,
            record.rx_scaling(),
        )?;
        let expected = sequence.adc_count;
        let timeout = config.collect_timeout(sequence.duration);
        let mut data = AcquisitionData::new(
            params.clone(),
            sequence.duration,
            pipeline.output_dwell(),
            expected,
        );

        let mut complete = 0;

        for avg in 0..params.num_averages {
            if stop_flag.load(Ordering::Relaxed) {
                warn!("Acquisition cancelled after {avg} averages");
                break;
            }

            let (gates, failure) =
                acquire_average(replay, record, sequence, expected, timeout, stop_flag);

            // Обрезанное окно попадает в данные, но полным не считается
            let full = gates.iter().filter(|g| !g.truncated).count();
            let processed: Vec<ProcessedGate> =
                gates.iter().map(|g| pipeline.process_gate(g)).collect();
            let received = processed.len();
            data.push_average(processed);
            complete += full;

            info!(
                "Average {}/{}: {received} of {expected} gates",
                avg + 1,
                params.num_averages
            );

            if let Some(e) = failure {
                warn!("Average {} stopped by error: {e}", avg + 1);
                break;
            }

            if full < expected {
                warn!(
                    "Average {} incomplete: {full} of {expected} gates ({received} received)",
                    avg + 1
                );
                break;
            }

            if avg + 1 < params.num_averages {
                pause(params.averaging_delay, stop_flag);
            }
        }

        let total = expected * params.num_averages;

        if complete < total {
            return Err(ControlError::AcquisitionIncomplete {
                received: complete,
                expected: total,
                data: Box::new(data),
            });
        }

        Ok(data)
    }

    /// Останавливает оба движка и закрывает карты.
    pub fn close(self) -> ControlResult<(T, R)> {
        let tx = self.replay.close()?;
        let rx = self.record.close()?;
        Ok((tx, rx))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Одно усреднение
////////////////////////////////////////////////////////////////////////////////

/// Запускает приём, затем передачу, собирает окна и останавливает оба
/// движка. Ошибка любого движка возвращается вместе с уже полученными
/// окнами.
fn acquire_average<T: Hal + 'static, R: Hal + 'static>(
    replay: &mut ReplayEngine<T>,
    record: &mut AcquisitionEngine<R>,
    sequence: &UnrolledSequence,
    expected: usize,
    timeout: Duration,
    stop_flag: &AtomicBool,
) -> (Vec<Gate>, Option<ControlError>) {
    if let Err(e) = record.start() {
        return (Vec::new(), Some(e.into()));
    }

    if let Err(e) = replay.start(sequence) {
        if let Err(rx) = record.stop() {
            warn!("Rx stop after Tx failure: {rx}");
        }
        return (Vec::new(), Some(e.into()));
    }

    let mut gates = collect_gates(record, expected, timeout, stop_flag);

    let tx_result = replay.stop();
    let rx_result = record.stop();

    // Окна, пришедшие между таймаутом и остановкой
    gates.extend(record.queue().drain());
    gates.truncate(expected);

    let failure = match (tx_result, rx_result) {
        (Err(e), _) => Some(e.into()),
        (_, Err(e)) => Some(e.into()),
        _ => None,
    };

    (gates, failure)
}

fn collect_gates<R: Hal + 'static>(
    record: &AcquisitionEngine<R>,
    expected: usize,
    timeout: Duration,
    stop_flag: &AtomicBool,
) -> Vec<Gate> {
    let deadline = Instant::now() + timeout;
    let mut gates = Vec::with_capacity(expected);

    while gates.len() < expected && !stop_flag.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(
                "Gate collection timed out after {:.1}s with {} of {expected} gates",
                timeout.as_secs_f64(),
                gates.len()
            );
            break;
        }

        match record.queue().pop(remaining.min(POLL_INTERVAL)) {
            Some(gate) => {
                debug!("Collected gate {} ({} samples)", gate.index, gate.len());
                gates.push(gate);
            }
            None if record.is_finished() => break,
            None => {}
        }
    }

    gates
}

/// Пауза между усреднениями с проверкой флага остановки.
fn pause(
    secs: f64,
    stop_flag: &AtomicBool,
) {
    let deadline = Instant::now() + Duration::from_secs_f64(secs.max(0.0));

    while !stop_flag.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(POLL_INTERVAL));
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use nexus_hal::{SimulatedRxCard, SimulatedTxCard};
    use nexus_types::{BlockSequence, ConsoleError, RfEvent, SequenceBlock};

    use super::*;

    fn control() -> AcquisitionControl<SimulatedTxCard, SimulatedRxCard> {
        let mut config = ConsoleConfig::default();
        config.tx.ring_size = 4096;
        config.tx.notify_size = 512;
        config.rx.ring_size = 8192;

        AcquisitionControl::new(SimulatedTxCard::new(), SimulatedRxCard::new(Vec::new()), config)
            .unwrap()
    }

    #[test]
    fn test_run_without_sequence() {
        let mut control = control();

        assert!(matches!(
            control.run(&AcquisitionParameter::default()),
            Err(ControlError::NotConfigured)
        ));
    }

    #[test]
    fn test_amplitude_error_keeps_previous_state() {
        let mut control = control();
        let seq = BlockSequence::new(vec![
            SequenceBlock::new(1e-5).with_rf(RfEvent::block_pulse(500.0, 5e-6))
        ]);

        let result = control.set_sequence(&seq, &AcquisitionParameter::default());

        assert!(matches!(
            result,
            Err(ControlError::Console(ConsoleError::AmplitudeExceeded { .. }))
        ));
        assert!(control.sequence().is_none());
    }

    #[test]
    fn test_pause_cancelled_by_flag() {
        let stop = AtomicBool::new(true);
        let start = Instant::now();

        pause(10.0, &stop);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
