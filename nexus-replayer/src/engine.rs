use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use nexus_core::{copy_circular, RingBuffer, UnrolledSequenceExt};
use nexus_hal::{
    channel_mask, channel_register, BufferKind, Card, Direction, Hal, M2CMD_CARD_ENABLETRIGGER,
    M2CMD_CARD_RESET, M2CMD_CARD_START, M2CMD_CARD_STOP, M2CMD_DATA_STARTDMA, M2CMD_DATA_STOPDMA,
    SPCM_X1_MODE, SPCM_X2_MODE, SPCM_X3_MODE, SPCM_XMODE_DIGOUT, SPCM_XMODE_DIGOUTSRC_BIT15,
    SPCM_XMODE_DIGOUTSRC_CH1, SPCM_XMODE_DIGOUTSRC_CH2, SPCM_XMODE_DIGOUTSRC_CH3, SPC_AMP0,
    SPC_CARDMODE, SPC_CHENABLE, SPC_CLOCKMODE, SPC_CM_INTPLL, SPC_ENABLEOUT0, SPC_FILTER0,
    SPC_REP_FIFO_SINGLE, SPC_SAMPLERATE, SPC_TIMEOUT, SPC_TMASK_SOFTWARE, SPC_TRIG_ORMASK,
};
use nexus_types::{ConsoleError, UnrolledSequence, NUM_TX_CHANNELS};

use crate::{ReplayError, ReplayMetrics, ReplayResult, TxConfig};

/// Состояние движка передачи.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    /// Первое заполнение кольца и старт DMA
    Priming,
    /// Рабочий поток дозаполняет кольцо
    Streaming,
    Stopping,
}

/// Что рабочий поток возвращает движку при завершении.
type WorkerOutput<H> = (Card<H>, RingBuffer, ReplayResult<()>);

/// Движок передачи: подаёт развёрнутую последовательность в FIFO
/// генератора через кольцевой буфер DMA.
///
/// Карта и кольцо принадлежат движку. На время потоковой передачи они
/// переходят рабочему потоку и возвращаются при его завершении.
pub struct ReplayEngine<H: Hal + 'static> {
    config: TxConfig,
    card: Option<Card<H>>,
    ring: Option<RingBuffer>,
    state: ReplayState,
    metrics: Arc<ReplayMetrics>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<WorkerOutput<H>>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<H: Hal + 'static> ReplayEngine<H> {
    /// Проверяет конфигурацию и открывает карту генератора.
    pub fn new(
        hal: H,
        config: TxConfig,
    ) -> ReplayResult<Self> {
        config.validate()?;

        let ring = RingBuffer::new(config.ring_size, config.notify_size, TxConfig::frame_bytes())?;
        let card = Card::open(hal, &config.device_path, "tx")?;

        info!(
            "Tx ring buffer: {} bytes, notify {} bytes ({} chunks)",
            ring.len(),
            ring.notify_size(),
            ring.len() / ring.notify_size()
        );

        Ok(Self {
            config,
            card: Some(card),
            ring: Some(ring),
            state: ReplayState::Idle,
            metrics: ReplayMetrics::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    pub fn metrics(&self) -> Arc<ReplayMetrics> {
        self.metrics.clone()
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    /// Карта, пока движок не передаёт данные.
    pub fn card(&self) -> Option<&Card<H>> {
        self.card.as_ref()
    }

    /// Рабочий поток отдал все байты источника (или не запущен).
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Настраивает карту: частота, каналы, режим FIFO и цифровые выходы
    /// X1..X3 из бита 15 каналов 1..3.
    pub fn setup_card(&mut self) -> ReplayResult<()> {
        self.expect_state(ReplayState::Idle, "setup_card")?;

        let Self { card, config, .. } = self;
        let card = card
            .as_mut()
            .ok_or_else(|| ReplayError::state("Tx card is not available"))?;

        card.command(M2CMD_CARD_RESET)?;
        card.set_i32(SPC_TRIG_ORMASK, SPC_TMASK_SOFTWARE)?;
        card.set_i32(SPC_CLOCKMODE, SPC_CM_INTPLL)?;

        card.set_i64(SPC_SAMPLERATE, config.sample_rate as i64)?;
        let actual = card.get_i64(SPC_SAMPLERATE)?;
        if actual > 0 && actual as u64 != config.sample_rate {
            warn!(
                "Tx sample rate {} Hz differs from requested {} Hz",
                actual, config.sample_rate
            );
            config.sample_rate = actual as u64;
        }
        info!(
            "Tx sampling rate: {:.3} MHz",
            config.sample_rate as f64 / 1e6
        );

        card.set_i32(SPC_CHENABLE, channel_mask(NUM_TX_CHANNELS))?;

        for ch in 0..NUM_TX_CHANNELS {
            card.set_i32(channel_register(SPC_ENABLEOUT0, ch), 1)?;
            card.set_i32(channel_register(SPC_AMP0, ch), config.max_amplitude[ch])?;
            card.set_i32(channel_register(SPC_FILTER0, ch), config.filter[ch])?;
        }

        card.set_i32(SPC_CARDMODE, SPC_REP_FIFO_SINGLE)?;

        // X1: ADC gate, X2: опорный сигнал, X3: разблокировка RF
        for (line, source) in [
            (SPCM_X1_MODE, SPCM_XMODE_DIGOUTSRC_CH1),
            (SPCM_X2_MODE, SPCM_XMODE_DIGOUTSRC_CH2),
            (SPCM_X3_MODE, SPCM_XMODE_DIGOUTSRC_CH3),
        ] {
            card.set_i32(
                line,
                SPCM_XMODE_DIGOUT | source | SPCM_XMODE_DIGOUTSRC_BIT15,
            )?;
        }

        card.set_i32(SPC_TIMEOUT, config.dma_timeout_ms as i32)?;
        card.log_status()?;

        debug!("Tx card configured: {} channels", NUM_TX_CHANNELS);
        Ok(())
    }

    /// Заполняет кольцо началом последовательности, запускает DMA и карту
    /// и передаёт дозаполнение рабочему потоку.
    pub fn start(
        &mut self,
        sequence: &UnrolledSequence,
    ) -> ReplayResult<()> {
        self.expect_state(ReplayState::Idle, "start")?;

        if sequence.blocks.is_empty() {
            return Err(ConsoleError::validation("Unrolled sequence has no blocks").into());
        }

        let dwell = self.config.dwell_time();
        if (sequence.dwell_time - dwell).abs() > dwell * 1e-9 {
            warn!(
                "Sequence dwell time {:.3e} s does not match Tx sample period {:.3e} s",
                sequence.dwell_time, dwell
            );
        }

        let (mut card, mut ring) = match (self.card.take(), self.ring.take()) {
            (Some(card), Some(ring)) => (card, ring),
            (card, ring) => {
                self.card = card;
                self.ring = ring;
                return Err(ReplayError::state("Tx card or ring buffer is not available"));
            }
        };

        let source = self.source_bytes(sequence, &ring);
        self.stop_flag.store(false, Ordering::Relaxed);
        self.state = ReplayState::Priming;

        if let Err(e) = self.prime(&mut card, &mut ring, &source) {
            self.metrics.hal_errors.fetch_add(1, Ordering::Relaxed);
            self.card = Some(card);
            self.ring = Some(ring);
            self.state = ReplayState::Idle;
            return Err(e);
        }

        info!(
            "Tx streaming {} bytes ({} blocks, loop={})",
            source.len(),
            sequence.blocks.len(),
            self.config.loop_playback
        );

        // Время воспроизведения полного кольца с двойным запасом
        let ring_secs = ring.len() as f64 / TxConfig::frame_bytes() as f64 * dwell;
        let drain_timeout = Duration::from_secs_f64(2.0 * ring_secs)
            + Duration::from_millis(self.config.dma_timeout_ms as u64 + 100);

        let ctx = WorkerContext {
            metrics: self.metrics.clone(),
            stop_flag: self.stop_flag.clone(),
            loop_playback: self.config.loop_playback,
            stats_interval: Duration::from_secs(self.config.stats_interval_secs),
            drain_timeout,
        };

        self.worker = Some(thread::spawn(move || {
            let result = stream_worker(&mut card, &mut ring, &source, &ctx);

            if let Err(ref e) = result {
                ctx.metrics.hal_errors.fetch_add(1, Ordering::Relaxed);
                error!("Tx worker stopped: {e}");
            }

            (card, ring, result)
        }));
        self.state = ReplayState::Streaming;

        Ok(())
    }

    /// Останавливает передачу: флаг, ожидание потока, стоп карты и DMA.
    ///
    /// Ошибка рабочего потока возвращается после остановки карты.
    pub fn stop(&mut self) -> ReplayResult<()> {
        if self.state == ReplayState::Idle {
            return Ok(());
        }

        self.state = ReplayState::Stopping;
        self.stop_flag.store(true, Ordering::Relaxed);
        self.finish()
    }

    /// Ждёт, пока рабочий поток передаст всю последовательность и карта
    /// воспроизведёт остаток кольца, затем останавливает карту. При
    /// `loop_playback` завершается только по флагу.
    pub fn wait(&mut self) -> ReplayResult<()> {
        if self.state == ReplayState::Idle {
            return Ok(());
        }

        self.finish()
    }

    /// Останавливает движок и закрывает карту.
    pub fn close(mut self) -> ReplayResult<H> {
        self.stop()?;

        self.card
            .take()
            .map(Card::close)
            .ok_or_else(|| ReplayError::state("Tx card is not available"))
    }

    fn finish(&mut self) -> ReplayResult<()> {
        let worker_result = match self.worker.take() {
            Some(handle) => match handle.join() {
                Ok((card, ring, result)) => {
                    self.card = Some(card);
                    self.ring = Some(ring);
                    result
                }
                Err(_) => {
                    warn!("Tx worker panicked");
                    Err(ReplayError::WorkerPanicked)
                }
            },
            None => Ok(()),
        };

        let stop_result = match self.card.as_mut() {
            Some(card) => card
                .command(M2CMD_CARD_STOP | M2CMD_DATA_STOPDMA)
                .map_err(ReplayError::from),
            None => Ok(()),
        };

        self.stop_flag.store(false, Ordering::Relaxed);
        self.state = ReplayState::Idle;
        debug!(
            "Tx stopped after {} bytes",
            self.metrics.bytes_transferred.load(Ordering::Relaxed)
        );

        worker_result.and(stop_result)
    }

    fn expect_state(
        &self,
        expected: ReplayState,
        op: &str,
    ) -> ReplayResult<()> {
        if self.state != expected {
            return Err(ReplayError::state(format!(
                "{op} requires {expected:?}, engine is {:?}",
                self.state
            )));
        }
        Ok(())
    }

    /// Байты последовательности, дополненные нулями до кратного notify.
    /// Без повтора источник не короче кольца.
    fn source_bytes(
        &self,
        sequence: &UnrolledSequence,
        ring: &RingBuffer,
    ) -> Vec<u8> {
        let mut bytes = sequence.to_le_bytes();
        let notify = ring.notify_size();

        let mut target = bytes.len().div_ceil(notify) * notify;
        if !self.config.loop_playback {
            target = target.max(ring.len());
        }

        if target != bytes.len() {
            debug!("Tx source padded from {} to {target} bytes", bytes.len());
            bytes.resize(target, 0);
        }

        bytes
    }

    fn prime(
        &self,
        card: &mut Card<H>,
        ring: &mut RingBuffer,
        source: &[u8],
    ) -> ReplayResult<()> {
        let notify = ring.notify_size();

        ring.reset();
        copy_circular(source, 0, ring.as_mut_slice());

        card.define_transfer(
            BufferKind::Data,
            Direction::HostToCard,
            notify,
            ring.as_mut_slice(),
        )?;
        card.sync_dma(BufferKind::Data, ring.as_mut_slice());
        card.acknowledge(BufferKind::Data, ring.len())?;
        ring.advance(ring.len());

        self.metrics
            .bytes_transferred
            .fetch_add(ring.len() as u64, Ordering::Relaxed);

        card.command(M2CMD_DATA_STARTDMA)?;
        match card.wait_dma() {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                self.metrics.dma_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => return Err(e.into()),
        }

        card.command(M2CMD_CARD_START | M2CMD_CARD_ENABLETRIGGER)?;
        debug!("Tx primed with {} bytes", ring.len());

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для ReplayEngine
////////////////////////////////////////////////////////////////////////////////

impl<H: Hal + 'static> Drop for ReplayEngine<H> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop_flag.store(true, Ordering::Relaxed);
            if let Err(e) = self.finish() {
                warn!("Tx engine dropped while streaming: {e}");
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Рабочий поток
////////////////////////////////////////////////////////////////////////////////

struct WorkerContext {
    metrics: Arc<ReplayMetrics>,
    stop_flag: Arc<AtomicBool>,
    loop_playback: bool,
    stats_interval: Duration,
    drain_timeout: Duration,
}

/// Дозаполняет кольцо порциями notify, пока карта сообщает свободное место.
fn stream_worker<H: Hal>(
    card: &mut Card<H>,
    ring: &mut RingBuffer,
    source: &[u8],
    ctx: &WorkerContext,
) -> ReplayResult<()> {
    let notify = ring.notify_size();
    let total = source.len() as u64;
    let mut chunk = vec![0u8; notify];
    let session_start = Instant::now();
    let mut last_stats = Instant::now();

    while !ctx.stop_flag.load(Ordering::Relaxed)
        && (ctx.loop_playback || ring.transferred() < total)
    {
        let (available, position) = card.available(BufferKind::Data)?;

        if available >= notify {
            copy_circular(source, ring.transferred(), &mut chunk);

            if ring.write_at(position, &chunk) {
                ctx.metrics.wrap_splits.fetch_add(1, Ordering::Relaxed);
            }

            card.sync_dma(BufferKind::Data, ring.as_mut_slice());
            card.acknowledge(BufferKind::Data, notify)?;
            ring.advance(notify);

            ctx.metrics
                .bytes_transferred
                .fetch_add(notify as u64, Ordering::Relaxed);
            ctx.metrics.chunks.fetch_add(1, Ordering::Relaxed);
        }

        match card.wait_dma() {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                ctx.metrics.dma_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => return Err(e.into()),
        }

        if last_stats.elapsed() >= ctx.stats_interval {
            info!(
                "[ {:.0}s ] tx transferred={} of {} bytes, timeouts={}",
                session_start.elapsed().as_secs_f64(),
                ring.transferred(),
                total,
                ctx.metrics.dma_timeouts.load(Ordering::Relaxed),
            );
            last_stats = Instant::now();
        }
    }

    debug!(
        "Tx worker done: {} bytes handed to the card",
        ring.transferred()
    );

    if !ctx.loop_playback {
        drain_ring(card, ring, ctx)?;
    }

    Ok(())
}

/// Ждёт, пока карта воспроизведёт всё подтверждённое: свободное место
/// сравняется с размером кольца. Прерывается флагом остановки.
fn drain_ring<H: Hal>(
    card: &mut Card<H>,
    ring: &RingBuffer,
    ctx: &WorkerContext,
) -> ReplayResult<()> {
    let deadline = Instant::now() + ctx.drain_timeout;

    loop {
        let (available, _) = card.available(BufferKind::Data)?;
        if available >= ring.len() {
            debug!("Tx ring drained");
            return Ok(());
        }

        if ctx.stop_flag.load(Ordering::Relaxed) {
            debug!("Tx drain interrupted, {} bytes unplayed", ring.len() - available);
            return Ok(());
        }

        if Instant::now() >= deadline {
            warn!(
                "Tx ring not drained after {:?}, {} bytes unplayed",
                ctx.drain_timeout,
                ring.len() - available
            );
            return Ok(());
        }

        match card.wait_dma() {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                ctx.metrics.dma_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
