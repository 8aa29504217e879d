use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

/// Метрики приёма, обновляемые lock-free рабочим потоком.
#[derive(Debug, Default)]
pub struct RecorderMetrics {
    pub gates: AtomicU64,
    pub samples: AtomicU64,
    pub bytes_read: AtomicU64,
    pub wrap_splits: AtomicU64,
    pub dma_timeouts: AtomicU64,
    pub aborted_gates: AtomicU64,
    pub hal_errors: AtomicU64,
}

/// Snapshot метрик для отображения и тестов.
#[derive(Debug, Clone)]
pub struct RecorderSummary {
    pub duration_secs: f64,
    pub gates: u64,
    pub samples: u64,
    pub bytes_read: u64,
    pub wrap_splits: u64,
    pub dma_timeouts: u64,
    pub aborted_gates: u64,
    pub hal_errors: u64,
    pub throughput_msps: f64,
}

impl RecorderMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn throughput_msps(
        &self,
        elapsed: &Instant,
    ) -> f64 {
        let secs = elapsed.elapsed().as_secs_f64();

        if secs < 1e-9 {
            return 0.0;
        }

        self.samples.load(Ordering::Relaxed) as f64 / secs / 1_000_000.0
    }

    pub fn summary(
        &self,
        elapsed: &Instant,
    ) -> RecorderSummary {
        RecorderSummary {
            duration_secs: elapsed.elapsed().as_secs_f64(),
            gates: self.gates.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            wrap_splits: self.wrap_splits.load(Ordering::Relaxed),
            dma_timeouts: self.dma_timeouts.load(Ordering::Relaxed),
            aborted_gates: self.aborted_gates.load(Ordering::Relaxed),
            hal_errors: self.hal_errors.load(Ordering::Relaxed),
            throughput_msps: self.throughput_msps(elapsed),
        }
    }
}

impl std::fmt::Display for RecorderSummary {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "  Duration      : {:.1}s", self.duration_secs)?;
        writeln!(
            f,
            "  Gates         : {} ({} aborted)",
            self.gates, self.aborted_gates
        )?;
        writeln!(f, "  Samples       : {}", self.samples)?;
        writeln!(
            f,
            "  Bytes read    : {:.1} MB",
            self.bytes_read as f64 / 1e6
        )?;
        writeln!(f, "  Wrap splits   : {}", self.wrap_splits)?;
        writeln!(f, "  DMA timeouts  : {}", self.dma_timeouts)?;
        writeln!(f, "  HAL errors    : {}", self.hal_errors)?;
        writeln!(f, "  Throughput    : {:.3} Msps", self.throughput_msps)?;
        write!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")
    }
}
