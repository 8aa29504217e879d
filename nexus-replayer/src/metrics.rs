use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

/// Счётчики передачи, обновляются рабочим потоком без блокировок.
#[derive(Debug, Default)]
pub struct ReplayMetrics {
    pub bytes_transferred: AtomicU64,
    pub chunks: AtomicU64,
    pub wrap_splits: AtomicU64,
    pub dma_timeouts: AtomicU64,
    pub hal_errors: AtomicU64,
}

/// Снимок метрик для вывода и тестов.
#[derive(Debug, Clone)]
pub struct ReplaySummary {
    pub duration_secs: f64,
    pub bytes_transferred: u64,
    pub chunks: u64,
    pub wrap_splits: u64,
    pub dma_timeouts: u64,
    pub hal_errors: u64,
    pub throughput_mbps: f64,
}

impl ReplayMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Скорость передачи в МБ/с.
    pub fn throughput_mbps(
        &self,
        start: &Instant,
    ) -> f64 {
        let secs = start.elapsed().as_secs_f64();

        if secs < 1e-9 {
            return 0.0;
        }

        self.bytes_transferred.load(Ordering::Relaxed) as f64 / secs / 1_000_000.0
    }

    pub fn summary(
        &self,
        start: &Instant,
    ) -> ReplaySummary {
        ReplaySummary {
            duration_secs: start.elapsed().as_secs_f64(),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            wrap_splits: self.wrap_splits.load(Ordering::Relaxed),
            dma_timeouts: self.dma_timeouts.load(Ordering::Relaxed),
            hal_errors: self.hal_errors.load(Ordering::Relaxed),
            throughput_mbps: self.throughput_mbps(start),
        }
    }
}

impl std::fmt::Display for ReplaySummary {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "  Duration      : {:.1}s", self.duration_secs)?;
        writeln!(
            f,
            "  Transferred   : {:.1} MB",
            self.bytes_transferred as f64 / 1e6
        )?;
        writeln!(f, "  Chunks        : {}", self.chunks)?;
        writeln!(f, "  Wrap splits   : {}", self.wrap_splits)?;
        writeln!(f, "  DMA timeouts  : {}", self.dma_timeouts)?;
        writeln!(f, "  HAL errors    : {}", self.hal_errors)?;
        writeln!(f, "  Throughput    : {:.1} MB/s", self.throughput_mbps)?;
        write!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")
    }
}
