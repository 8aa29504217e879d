use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use nexus_core::{read_samples_le, read_timestamp, RingBuffer};
use nexus_hal::{
    channel_mask, channel_register, BufferKind, Card, Direction, Hal, HalResult,
    DIGMODEMASK_BIT15, M2CMD_CARD_ENABLETRIGGER, M2CMD_CARD_RESET, M2CMD_CARD_START,
    M2CMD_CARD_STOP, M2CMD_DATA_STARTDMA, M2CMD_DATA_STOPDMA, M2CMD_EXTRA_POLL,
    M2CMD_EXTRA_STOPDMA, SPCM_DIGMODE_X2, SPCM_X2_MODE, SPCM_XMODE_DIGIN, SPC_50OHM0, SPC_AMP0,
    SPC_CARDMODE, SPC_CHCOUNT, SPC_CHENABLE, SPC_CLOCKMODE, SPC_CM_INTPLL, SPC_DIGMODE0,
    SPC_LOOPS, SPC_POSTTRIGGER, SPC_PRETRIGGER, SPC_REC_FIFO_GATE, SPC_SAMPLERATE,
    SPC_TIMEOUT, SPC_TIMESTAMP_CMD, SPC_TMASK_EXT1, SPC_TM_POS, SPC_TRIG_EXT1_MODE,
    SPC_TRIG_ORMASK, SPC_TSCNT_INTERNAL, SPC_TSMODE_STARTRESET, TIMESTAMP_RECORD_BYTES,
};
use nexus_types::{ConsoleError, Gate};

use crate::{
    gate_channel, GateProducer, GateQueue, RecorderError, RecorderMetrics, RecorderResult,
    RxConfig, TIMESTAMP_PAIR_BYTES,
};

/// Количество отсчётов окна по меткам времени (секунды).
pub fn gate_samples(
    t_start: f64,
    t_end: f64,
    sample_rate: f64,
) -> usize {
    ((t_end - t_start) * sample_rate).round().max(0.0) as usize
}

/// Состояние движка приёма.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Idle,
    Acquiring,
    Stopping,
}

/// Что рабочий поток возвращает движку при завершении.
type WorkerOutput<H> = (Card<H>, RingBuffer, RingBuffer, RecorderResult<()>);

/// Движок приёма: читает окна дигитайзера в режиме gated FIFO.
///
/// Длина каждого окна определяется парой меток времени. Окна кладутся в
/// очередь строго в порядке их меток; потребитель забирает их через
/// [`GateQueue`].
pub struct AcquisitionEngine<H: Hal + 'static> {
    config: RxConfig,
    card: Option<Card<H>>,
    data: Option<RingBuffer>,
    timestamps: Option<RingBuffer>,
    state: RecordState,
    metrics: Arc<RecorderMetrics>,
    stop_flag: Arc<AtomicBool>,
    queue: GateQueue,
    worker: Option<JoinHandle<WorkerOutput<H>>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<H: Hal + 'static> AcquisitionEngine<H> {
    /// Проверяет конфигурацию и открывает дигитайзер.
    pub fn new(
        hal: H,
        config: RxConfig,
    ) -> RecorderResult<Self> {
        config.validate()?;

        let data = RingBuffer::new(config.ring_size, config.notify_size, config.frame_bytes())?;
        let timestamps = RingBuffer::new(
            config.ts_ring_size,
            config.ts_notify_size,
            TIMESTAMP_PAIR_BYTES,
        )?;
        let card = Card::open(hal, &config.device_path, "rx")?;
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (_, queue) = gate_channel(config.queue_capacity, stop_flag.clone());

        info!(
            "Rx ring buffer: {} bytes, notify {} bytes; timestamp buffer {} bytes",
            data.len(),
            data.notify_size(),
            timestamps.len()
        );

        Ok(Self {
            config,
            card: Some(card),
            data: Some(data),
            timestamps: Some(timestamps),
            state: RecordState::Idle,
            metrics: RecorderMetrics::new(),
            stop_flag,
            queue,
            worker: None,
        })
    }

    pub fn config(&self) -> &RxConfig {
        &self.config
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn metrics(&self) -> Arc<RecorderMetrics> {
        self.metrics.clone()
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    /// Очередь окон текущего (или последнего) запуска.
    pub fn queue(&self) -> &GateQueue {
        &self.queue
    }

    pub fn card(&self) -> Option<&Card<H>> {
        self.card.as_ref()
    }

    /// Карта для настройки между запусками (пока поток не работает).
    pub fn card_mut(&mut self) -> Option<&mut Card<H>> {
        self.card.as_mut()
    }

    /// Рабочий поток завершился (ошибкой или по флагу) или не запущен.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Масштаб каналов (мВ на единицу АЦП).
    pub fn rx_scaling(&self) -> Vec<f64> {
        self.config.rx_scaling()
    }

    /// Настраивает дигитайзер: каналы, триггер, метки времени, режим
    /// gated FIFO и таймаут DMA.
    pub fn setup_card(&mut self) -> RecorderResult<()> {
        if self.state != RecordState::Idle {
            return Err(RecorderError::state(format!(
                "setup_card requires Idle, engine is {:?}",
                self.state
            )));
        }

        let Self { card, config, .. } = self;
        let card = card
            .as_mut()
            .ok_or_else(|| RecorderError::state("Rx card is not available"))?;

        card.command(M2CMD_CARD_RESET)?;
        card.set_i32(SPC_CLOCKMODE, SPC_CM_INTPLL)?;

        card.set_i64(SPC_SAMPLERATE, config.sample_rate as i64)?;
        let actual = card.get_i64(SPC_SAMPLERATE)?;
        if actual > 0 && actual as u64 != config.sample_rate {
            warn!(
                "Rx sample rate {} Hz differs from requested {} Hz",
                actual, config.sample_rate
            );
            config.sample_rate = actual as u64;
        }
        info!(
            "Rx sampling rate: {:.3} MHz",
            config.sample_rate as f64 / 1e6
        );

        card.set_i32(SPC_CHENABLE, channel_mask(config.channels))?;

        for (ch, &amp) in config.max_amplitude.iter().enumerate() {
            info!(
                "Rx channel {ch} enabled; 50 ohms: {}; max amplitude: {amp} mV",
                config.termination_50_ohm
            );
            card.set_i32(
                channel_register(SPC_50OHM0, ch),
                config.termination_50_ohm as i32,
            )?;
            card.set_i32(channel_register(SPC_AMP0, ch), amp)?;
        }

        let count = card.get_i32(SPC_CHCOUNT)?;
        if count as usize != config.channels {
            return Err(ConsoleError::validation(format!(
                "Rx card reports {count} enabled channels, expected {}",
                config.channels
            ))
            .into());
        }

        // Опорный сигнал фазы приходит на X2 и пишется в бит 15 канала 0
        card.set_i32(SPCM_X2_MODE, SPCM_XMODE_DIGIN)?;
        card.set_i32(SPC_DIGMODE0, DIGMODEMASK_BIT15 & SPCM_DIGMODE_X2)?;

        card.set_i32(SPC_POSTTRIGGER, config.post_trigger as i32)?;
        card.set_i32(SPC_PRETRIGGER, config.pre_trigger as i32)?;
        card.set_i32(SPC_LOOPS, 0)?;

        card.set_i32(
            SPC_TIMESTAMP_CMD,
            SPC_TSMODE_STARTRESET | SPC_TSCNT_INTERNAL,
        )?;
        card.set_i32(SPC_TRIG_EXT1_MODE, SPC_TM_POS)?;
        card.set_i32(SPC_TRIG_ORMASK, SPC_TMASK_EXT1)?;

        card.set_i32(SPC_CARDMODE, SPC_REC_FIFO_GATE)?;
        card.set_i32(SPC_TIMEOUT, config.dma_timeout_ms as i32)?;
        card.log_status()?;

        debug!("Rx card configured: {} channels", config.channels);
        Ok(())
    }

    /// Регистрирует буферы, запускает карту и рабочий поток. Очередь окон
    /// создаётся заново.
    pub fn start(&mut self) -> RecorderResult<()> {
        if self.state != RecordState::Idle {
            return Err(RecorderError::state(format!(
                "start requires Idle, engine is {:?}",
                self.state
            )));
        }

        let (mut card, mut data, mut timestamps) =
            match (self.card.take(), self.data.take(), self.timestamps.take()) {
                (Some(card), Some(data), Some(ts)) => (card, data, ts),
                (card, data, ts) => {
                    self.card = card;
                    self.data = data;
                    self.timestamps = ts;
                    return Err(RecorderError::state(
                        "Rx card or buffers are not available",
                    ));
                }
            };

        self.stop_flag.store(false, Ordering::Relaxed);

        if let Err(e) = arm(&mut card, &mut data, &mut timestamps) {
            self.metrics.hal_errors.fetch_add(1, Ordering::Relaxed);
            self.card = Some(card);
            self.data = Some(data);
            self.timestamps = Some(timestamps);
            return Err(e.into());
        }

        let (producer, queue) = gate_channel(self.config.queue_capacity, self.stop_flag.clone());
        self.queue = queue;

        let ctx = WorkerContext {
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            stop_flag: self.stop_flag.clone(),
            producer,
        };

        self.worker = Some(thread::spawn(move || {
            let mut stream = DataStream::new(data);
            let result = gate_worker(&mut card, &mut stream, &mut timestamps, &ctx);

            match &result {
                Ok(()) => {}
                Err(RecorderError::GateAborted { .. }) => {
                    ctx.metrics.aborted_gates.fetch_add(1, Ordering::Relaxed);
                }
                Err(RecorderError::Hal(_)) => {
                    ctx.metrics.hal_errors.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {}
            }

            if let Err(ref e) = result {
                error!("Rx worker stopped: {e}");
            }

            (card, stream.into_ring(), timestamps, result)
        }));
        self.state = RecordState::Acquiring;

        info!("Rx acquisition started");
        Ok(())
    }

    /// Останавливает приём: флаг, ожидание потока, стоп карты и обоих DMA.
    ///
    /// Окна, уже попавшие в очередь, остаются доступны через [`queue`].
    /// Ошибка рабочего потока возвращается после остановки карты.
    ///
    /// [`queue`]: AcquisitionEngine::queue
    pub fn stop(&mut self) -> RecorderResult<()> {
        if self.state == RecordState::Idle {
            return Ok(());
        }

        self.state = RecordState::Stopping;
        self.stop_flag.store(true, Ordering::Relaxed);

        let worker_result = match self.worker.take() {
            Some(handle) => match handle.join() {
                Ok((card, data, timestamps, result)) => {
                    self.card = Some(card);
                    self.data = Some(data);
                    self.timestamps = Some(timestamps);
                    result
                }
                Err(_) => {
                    warn!("Rx worker panicked");
                    Err(RecorderError::WorkerPanicked)
                }
            },
            None => Ok(()),
        };

        let stop_result = match self.card.as_mut() {
            Some(card) => card
                .command(M2CMD_CARD_STOP | M2CMD_DATA_STOPDMA | M2CMD_EXTRA_STOPDMA)
                .map_err(RecorderError::from),
            None => Ok(()),
        };

        self.stop_flag.store(false, Ordering::Relaxed);
        self.state = RecordState::Idle;
        debug!(
            "Rx stopped after {} gates",
            self.metrics.gates.load(Ordering::Relaxed)
        );

        worker_result.and(stop_result)
    }

    /// Останавливает движок и закрывает карту.
    pub fn close(mut self) -> RecorderResult<H> {
        self.stop()?;

        self.card
            .take()
            .map(Card::close)
            .ok_or_else(|| RecorderError::state("Rx card is not available"))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для AcquisitionEngine
////////////////////////////////////////////////////////////////////////////////

impl<H: Hal + 'static> Drop for AcquisitionEngine<H> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop() {
                warn!("Rx engine dropped while acquiring: {e}");
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Рабочий поток
////////////////////////////////////////////////////////////////////////////////

/// Регистрирует оба буфера и запускает карту с DMA.
fn arm<H: Hal>(
    card: &mut Card<H>,
    data: &mut RingBuffer,
    timestamps: &mut RingBuffer,
) -> HalResult<()> {
    data.reset();
    timestamps.reset();

    let notify = data.notify_size();
    card.define_transfer(
        BufferKind::Data,
        Direction::CardToHost,
        notify,
        data.as_mut_slice(),
    )?;

    let ts_notify = timestamps.notify_size();
    card.define_transfer(
        BufferKind::Timestamp,
        Direction::CardToHost,
        ts_notify,
        timestamps.as_mut_slice(),
    )?;

    card.command(M2CMD_EXTRA_POLL)?;
    card.command(M2CMD_CARD_START | M2CMD_CARD_ENABLETRIGGER | M2CMD_DATA_STARTDMA)?;

    Ok(())
}

struct WorkerContext {
    config: RxConfig,
    metrics: Arc<RecorderMetrics>,
    stop_flag: Arc<AtomicBool>,
    producer: GateProducer,
}

/// Почему закончилось чтение окна.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    Complete,
    Stopped,
    Deadline,
}

/// Чтение буфера данных с собственным логическим курсором.
///
/// Прочитано `ring.transferred()` байт, из них карте подтверждено `acked`.
/// Подтверждения идут только целыми notify; хвост подтверждается позже.
struct DataStream {
    ring: RingBuffer,
    acked: u64,
    /// Байты post-trigger, которые ещё нужно пропустить
    skip: usize,
}

impl DataStream {
    fn new(ring: RingBuffer) -> Self {
        Self {
            ring,
            acked: 0,
            skip: 0,
        }
    }

    fn into_ring(self) -> RingBuffer {
        self.ring
    }

    /// Забирает до `want` уже пришедших байт без ожидания. `out == None`
    /// пропускает байты.
    fn pull<H: Hal>(
        &mut self,
        card: &mut Card<H>,
        want: usize,
        out: Option<&mut Vec<u8>>,
        metrics: &RecorderMetrics,
    ) -> HalResult<usize> {
        let (available, _) = card.available(BufferKind::Data)?;
        let unacked = (self.ring.transferred() - self.acked) as usize;
        let n = available.saturating_sub(unacked).min(want);

        if n == 0 {
            return Ok(0);
        }

        if let Some(out) = out {
            card.sync_dma(BufferKind::Data, self.ring.as_mut_slice());
            if self.ring.read_at(self.ring.position(), n, out) {
                metrics.wrap_splits.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.ring.advance(n);
        metrics.bytes_read.fetch_add(n as u64, Ordering::Relaxed);

        let notify = self.ring.notify_size() as u64;
        let release = (self.ring.transferred() - self.acked) / notify * notify;
        if release > 0 {
            card.acknowledge(BufferKind::Data, release as usize)?;
            self.acked += release;
        }

        Ok(n)
    }

    /// Читает `want` байт, ожидая DMA до `deadline` или флага остановки.
    /// Возвращает количество полученных байт и причину завершения.
    fn read<H: Hal>(
        &mut self,
        card: &mut Card<H>,
        want: usize,
        mut out: Option<&mut Vec<u8>>,
        deadline: Instant,
        ctx: &WorkerContext,
    ) -> HalResult<(usize, ReadEnd)> {
        let mut got = 0;

        loop {
            got += self.pull(card, want - got, out.as_deref_mut(), &ctx.metrics)?;

            if got >= want {
                return Ok((got, ReadEnd::Complete));
            }
            if ctx.stop_flag.load(Ordering::Relaxed) {
                return Ok((got, ReadEnd::Stopped));
            }
            if Instant::now() >= deadline {
                return Ok((got, ReadEnd::Deadline));
            }

            wait_dma(card, &ctx.metrics)?;
        }
    }

    /// Пропускает отложенный post-trigger: сколько уже есть, без ожидания.
    fn skip_available<H: Hal>(
        &mut self,
        card: &mut Card<H>,
        metrics: &RecorderMetrics,
    ) -> HalResult<()> {
        if self.skip > 0 {
            let skipped = self.pull(card, self.skip, None, metrics)?;
            self.skip -= skipped;
        }
        Ok(())
    }
}

/// Ожидание DMA; таймаут не ошибка.
fn wait_dma<H: Hal>(
    card: &mut Card<H>,
    metrics: &RecorderMetrics,
) -> HalResult<()> {
    match card.wait_dma() {
        Ok(()) => Ok(()),
        Err(e) if e.is_timeout() => {
            metrics.dma_timeouts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Пара меток окна в тактах, если она уже пришла.
fn next_timestamps<H: Hal>(
    card: &mut Card<H>,
    timestamps: &mut RingBuffer,
) -> HalResult<Option<(u64, u64)>> {
    let (available, _) = card.available(BufferKind::Timestamp)?;

    if available < TIMESTAMP_PAIR_BYTES {
        return Ok(None);
    }

    card.sync_dma(BufferKind::Timestamp, timestamps.as_mut_slice());

    let mut record = Vec::with_capacity(TIMESTAMP_PAIR_BYTES);
    timestamps.read_at(timestamps.position(), TIMESTAMP_PAIR_BYTES, &mut record);
    timestamps.advance(TIMESTAMP_PAIR_BYTES);

    let t0 = read_timestamp(&record[..TIMESTAMP_RECORD_BYTES]);
    let t1 = read_timestamp(&record[TIMESTAMP_RECORD_BYTES..]);

    Ok(t0.zip(t1))
}

/// Цикл приёма: метки времени окна, данные окна, очередь, подтверждение.
fn gate_worker<H: Hal>(
    card: &mut Card<H>,
    stream: &mut DataStream,
    timestamps: &mut RingBuffer,
    ctx: &WorkerContext,
) -> RecorderResult<()> {
    let cfg = &ctx.config;
    let rate = cfg.sample_rate as f64;
    let frame = cfg.frame_bytes();
    let gate_timeout = Duration::from_millis(cfg.gate_timeout_ms);
    let stats_interval = Duration::from_secs(cfg.stats_interval_secs);
    let session_start = Instant::now();
    let mut last_stats = Instant::now();
    let mut index = 0usize;

    while !ctx.stop_flag.load(Ordering::Relaxed) {
        wait_dma(card, &ctx.metrics)?;
        stream.skip_available(card, &ctx.metrics)?;

        let Some((tick0, tick1)) = next_timestamps(card, timestamps)? else {
            continue;
        };

        let t_start = tick0 as f64 / rate;
        let t_end = tick1 as f64 / rate;
        let samples = gate_samples(t_start, t_end, rate);
        let expected = (samples + cfg.pre_trigger) * frame;

        debug!(
            "Gate {index}: t0={t_start:.6}s t1={t_end:.6}s, {samples} samples, {expected} bytes"
        );

        let deadline = Instant::now() + gate_timeout;

        // Хвост предыдущего окна должен уйти до начала этого
        let pending = stream.skip;
        let (skipped, skip_end) = stream.read(card, pending, None, deadline, ctx)?;
        stream.skip -= skipped;

        let mut bytes = Vec::with_capacity(expected);
        let (received, end) = if stream.skip == 0 {
            stream.read(card, expected, Some(&mut bytes), deadline, ctx)?
        } else {
            (0, skip_end)
        };

        let raw = read_samples_le(&bytes[..received - received % frame]);
        let body = &raw[(cfg.pre_trigger * cfg.channels).min(raw.len())..];
        let gate = Gate::from_interleaved(index, t_start, t_end, samples, body, cfg.channels);
        let got = gate.len();
        let truncated = gate.truncated;
        // Причина обрыва известна до передачи окна потребителю
        let aborted = truncated && end == ReadEnd::Deadline;

        ctx.metrics.samples.fetch_add(got as u64, Ordering::Relaxed);
        ctx.producer.push(gate)?;
        ctx.metrics.gates.fetch_add(1, Ordering::Relaxed);

        card.acknowledge(BufferKind::Timestamp, TIMESTAMP_PAIR_BYTES)?;

        if aborted {
            warn!("Gate {index} aborted: {got} of {samples} samples before timeout");
            return Err(RecorderError::GateAborted {
                index,
                received: got,
                expected: samples,
            });
        }

        if truncated {
            debug!("Gate {index} cut short by stop ({got} of {samples} samples)");
            return Ok(());
        }

        stream.skip = cfg.post_trigger * frame;
        index += 1;

        if last_stats.elapsed() >= stats_interval {
            info!(
                "[ {:.0}s ] rx gates={} samples={} timeouts={}",
                session_start.elapsed().as_secs_f64(),
                ctx.metrics.gates.load(Ordering::Relaxed),
                ctx.metrics.samples.load(Ordering::Relaxed),
                ctx.metrics.dma_timeouts.load(Ordering::Relaxed),
            );
            last_stats = Instant::now();
        }
    }

    debug!("Rx worker done after {index} gates");
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use nexus_hal::{SimGate, SimulatedRxCard};

    use super::*;

    #[test]
    fn test_gate_samples_from_timestamps() {
        assert_eq!(gate_samples(0.001, 0.003, 20e6), 40_000);
        assert_eq!(gate_samples(0.5, 0.5, 20e6), 0);
        assert_eq!(gate_samples(0.003, 0.001, 20e6), 0);
    }

    #[test]
    fn test_setup_writes_registers() {
        let cfg = RxConfig {
            ring_size: 8192,
            ..Default::default()
        };
        let mut engine = AcquisitionEngine::new(SimulatedRxCard::new(Vec::new()), cfg).unwrap();
        engine.setup_card().unwrap();

        let regs = engine.card().unwrap().hal().registers();
        assert_eq!(regs.last_write(SPC_PRETRIGGER), Some(8));
        assert_eq!(regs.last_write(SPC_POSTTRIGGER), Some(2048));
        assert_eq!(regs.last_write(SPC_CARDMODE), Some(SPC_REC_FIFO_GATE as i64));
        assert_eq!(
            regs.last_write(SPC_TIMESTAMP_CMD),
            Some((SPC_TSMODE_STARTRESET | SPC_TSCNT_INTERNAL) as i64)
        );
        assert_eq!(regs.last_write(SPCM_X2_MODE), Some(SPCM_XMODE_DIGIN as i64));
    }

    #[test]
    fn test_start_twice_is_state_error() {
        let cfg = RxConfig {
            ring_size: 8192,
            dma_timeout_ms: 0,
            ..Default::default()
        };
        let script = vec![SimGate::new(0, vec![vec![1; 4], vec![2; 4]])];
        let mut engine = AcquisitionEngine::new(SimulatedRxCard::new(script), cfg).unwrap();

        engine.start().unwrap();
        assert_eq!(engine.state(), RecordState::Acquiring);
        assert!(matches!(engine.start(), Err(RecorderError::State(_))));

        engine.stop().unwrap();
        assert_eq!(engine.state(), RecordState::Idle);
    }
}
