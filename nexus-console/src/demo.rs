//! Демонстрационная последовательность FID и петля генератор → дигитайзер
//! для симулированных карт.
//!
//! Окна дигитайзера строятся из развёрнутой последовательности: строб АЦП
//! (бит 15 Gx) задаёт начало и длину окна, опорный такт (бит 15 Gy)
//! переносится в бит 15 канала 0, как это делает вход X2 настоящей карты.

use std::f64::consts::PI;

use nexus_core::{decode_digital, encode_digital};
use nexus_hal::SimGate;
use nexus_types::{AdcEvent, BlockSequence, RfEvent, SequenceBlock, UnrolledSequence};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Запас до и после событий блока (секунды).
const BLOCK_MARGIN: f64 = 20e-6;

/// Параметры FID последовательности.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FidSettings {
    /// Амплитуда прямоугольного RF импульса (единицы последовательности)
    pub rf_amplitude: f64,
    /// Длительность RF импульса (секунды)
    pub rf_duration: f64,
    /// Отсчётов АЦП в окне
    pub adc_samples: usize,
    /// Период отсчётов АЦП (секунды)
    pub adc_dwell: f64,
    /// Количество повторений RF + приём
    pub repetitions: usize,
}

/// Модель сигнала, который "возвращается" в дигитайзер.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopbackSignal {
    /// Начальная амплитуда (единицы АЦП)
    pub amplitude: f64,
    /// Время затухания T2* (секунды)
    pub t2: f64,
    /// Фаза сигнала относительно опорного такта (радианы)
    pub phase: f64,
    /// Отстройка от частоты Лармора (Гц)
    pub offset_hz: f64,
    /// Амплитуда равномерного шума (единицы АЦП)
    pub noise: i16,
    pub seed: u64,
}

impl Default for FidSettings {
    fn default() -> Self {
        Self {
            rf_amplitude: 100.0,
            rf_duration: 50e-6,
            adc_samples: 200,
            adc_dwell: 1e-5,
            repetitions: 2,
        }
    }
}

impl Default for LoopbackSignal {
    fn default() -> Self {
        Self {
            amplitude: 12_000.0,
            t2: 5e-3,
            phase: 0.3,
            offset_hz: 0.0,
            noise: 40,
            seed: 7,
        }
    }
}

/// Последовательность FID: прямоугольный импульс, затем окно АЦП, и так
/// `repetitions` раз.
pub fn fid_sequence(settings: &FidSettings) -> BlockSequence {
    let mut seq = BlockSequence::default();

    for _ in 0..settings.repetitions {
        seq.push(
            SequenceBlock::new(settings.rf_duration + BLOCK_MARGIN)
                .with_rf(RfEvent::block_pulse(settings.rf_amplitude, settings.rf_duration)),
        );

        let mut adc = AdcEvent::new(settings.adc_samples, settings.adc_dwell);
        adc.delay = BLOCK_MARGIN;
        let duration = adc.delay + adc.duration() + BLOCK_MARGIN;

        seq.push(SequenceBlock::new(duration).with_adc(adc));
    }

    seq
}

/// Окна дигитайзера для каждого строба АЦП развёрнутой последовательности.
pub fn loopback_gates(
    sequence: &UnrolledSequence,
    rx_sample_rate: f64,
    rx_channels: usize,
    signal: &LoopbackSignal,
) -> Vec<SimGate> {
    let dwell = sequence.dwell_time;
    let f0 = sequence.larmor_frequency + signal.offset_hz;
    let mut rng = StdRng::seed_from_u64(signal.seed);

    // Стробы АЦП и опорный такт по всей последовательности
    let mut adc = Vec::with_capacity(sequence.sample_count as usize);
    let mut reference = Vec::with_capacity(sequence.sample_count as usize);
    for block in &sequence.blocks {
        for frame in block.chunks_exact(4) {
            adc.push(decode_digital(frame[1]));
            reference.push(decode_digital(frame[2]));
        }
    }

    let mut gates = Vec::new();
    let mut i = 0;

    while i < adc.len() {
        if !adc[i] {
            i += 1;
            continue;
        }

        let start = i;
        while i < adc.len() && adc[i] {
            i += 1;
        }

        let t_start = start as f64 * dwell;
        let len = ((i - start) as f64 * dwell * rx_sample_rate).round() as usize;
        let start_tick = (t_start * rx_sample_rate).round() as u64;

        let mut channels = vec![Vec::with_capacity(len); rx_channels.max(1)];
        for k in 0..len {
            let t = k as f64 / rx_sample_rate;
            let tx_index = (start + (t / dwell).round() as usize).min(reference.len() - 1);
            let t_abs = t_start + t;

            let value = signal.amplitude
                * (-t / signal.t2).exp()
                * (2.0 * PI * f0 * t_abs + signal.phase).cos();
            let analog = value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            channels[0].push(encode_digital(analog, reference[tx_index]));

            for ch in channels.iter_mut().skip(1) {
                ch.push(rng.gen_range(-signal.noise..=signal.noise));
            }
        }

        gates.push(SimGate::new(start_tick, channels));
    }

    gates
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
