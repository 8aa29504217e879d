//! Цифровое понижающее преобразование (DDC) и фазовая коррекция.
//!
//! Вещественный сигнал на частоте Лармора переносится в комплексную
//! полосу, фильтруется и прореживается. Опорный такт, зашитый в бит 15
//! канала 0, проходит тот же DDC; фаза данных выравнивается по фазе
//! опорного сигнала поотсчётно.

use std::f64::consts::PI;

use log::debug;
use num_complex::Complex64;
use nexus_types::{AcquisitionParameter, ConsoleError, ConsoleResult, DdcMethod, Gate};

use crate::{decode_analog, decode_digital};

/// Перекрытие окна FIR по умолчанию: ядро длиной 4 шага прореживания.
pub const DEFAULT_OVERLAP: usize = 4;

/// Количество каскадов CIC по умолчанию.
pub const DEFAULT_CIC_STAGES: usize = 5;

/// Число коэффициентов компенсирующего FIR фильтра (прореживание на 2).
const HALFBAND_TAPS: usize = 41;

/// Результат обработки одного окна.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedGate {
    pub index: usize,
    /// Скорректированный по фазе сигнал каждого канала
    pub signal: Vec<Vec<Complex64>>,
    /// DDC опорного такта
    pub reference: Vec<Complex64>,
    /// Каналы в мВ и строка опорного такта (0/1) последней
    pub unprocessed: Vec<Vec<f64>>,
}

/// Конвейер DDC для окон дигитайзера.
#[derive(Debug, Clone)]
pub struct DownconversionPipeline {
    pub method: DdcMethod,
    pub decimation: usize,
    pub overlap: usize,
    pub cic_stages: usize,
    /// Частота дискретизации дигитайзера (Гц)
    pub sample_rate: f64,
    /// Частота демодуляции (Гц)
    pub larmor_frequency: f64,
    /// мВ на единицу младшего разряда по каналам
    pub rx_scaling: Vec<f64>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl DownconversionPipeline {
    pub fn new(
        params: &AcquisitionParameter,
        sample_rate: f64,
        rx_scaling: Vec<f64>,
    ) -> ConsoleResult<Self> {
        params.validate()?;

        let pipeline = Self {
            method: params.ddc_method,
            decimation: params.decimation,
            overlap: DEFAULT_OVERLAP,
            cic_stages: DEFAULT_CIC_STAGES,
            sample_rate,
            larmor_frequency: params.larmor_frequency,
            rx_scaling,
        };
        pipeline.validate()?;

        Ok(pipeline)
    }

    pub fn with_overlap(
        mut self,
        overlap: usize,
    ) -> ConsoleResult<Self> {
        self.overlap = overlap;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> ConsoleResult<()> {
        if !(self.sample_rate > 0.0 && self.sample_rate.is_finite()) {
            return Err(ConsoleError::validation(format!(
                "Invalid sample rate {}",
                self.sample_rate
            )));
        }

        if self.decimation == 0 || self.overlap == 0 {
            return Err(ConsoleError::validation(
                "Decimation and overlap must be at least 1",
            ));
        }

        if self.method == DdcMethod::Cic && (self.decimation < 2 || self.decimation % 2 != 0) {
            return Err(ConsoleError::validation(format!(
                "CIC decimation must be even, got {}",
                self.decimation
            )));
        }

        Ok(())
    }

    /// Период отсчётов после прореживания (секунды).
    pub fn output_dwell(&self) -> f64 {
        self.decimation as f64 / self.sample_rate
    }

    /// DDC вещественного сигнала выбранным методом.
    pub fn downconvert(
        &self,
        raw: &[f64],
    ) -> Vec<Complex64> {
        match self.method {
            DdcMethod::Fir => fir_ddc(
                raw,
                self.decimation,
                self.overlap,
                self.larmor_frequency,
                self.sample_rate,
            ),
            DdcMethod::Cic => cic_ddc(
                raw,
                self.decimation,
                self.cic_stages,
                self.larmor_frequency,
                self.sample_rate,
            ),
        }
    }

    /// Обрабатывает окно: извлекает опорный такт из канала 0, переводит
    /// каналы в мВ, выполняет DDC и фазовую коррекцию.
    pub fn process_gate(
        &self,
        gate: &Gate,
    ) -> ProcessedGate {
        let mut unprocessed = Vec::with_capacity(gate.num_channels() + 1);
        let mut reference_bits = Vec::new();

        for (ch, samples) in gate.channels.iter().enumerate() {
            let scale = self.rx_scaling.get(ch).copied().unwrap_or(1.0);

            let analog: Vec<f64> = if ch == 0 {
                reference_bits = samples
                    .iter()
                    .map(|&raw| if decode_digital(raw) { 1.0 } else { 0.0 })
                    .collect();
                samples
                    .iter()
                    .map(|&raw| decode_analog(raw) as f64 * scale)
                    .collect()
            } else {
                samples.iter().map(|&raw| raw as f64 * scale).collect()
            };

            unprocessed.push(analog);
        }

        let reference = self.downconvert(&reference_bits);
        let signal = unprocessed
            .iter()
            .map(|channel| phase_correct(&self.downconvert(channel), &reference))
            .collect();

        unprocessed.push(reference_bits);

        debug!(
            "Gate {}: {} samples -> {} after DDC ({})",
            gate.index,
            gate.len(),
            reference.len(),
            self.method
        );

        ProcessedGate {
            index: gate.index,
            signal,
            reference,
            unprocessed,
        }
    }
}

/// Окно ядра FIR: `exp(-1/(1-x²))·sin(2.073πx)/x`.
fn taper(x: f64) -> f64 {
    (-1.0 / (1.0 - x * x)).exp() * (2.073 * PI * x).sin() / x
}

/// DDC со стридовой свёрткой.
///
/// Ядро длиной `overlap × decimation` на сетке середин интервалов
/// `x_j = -1 + (2j+1)/L` (точки 0 и ±1 не попадают), шаг окна равен
/// `decimation`. Сигнал дополняется нулями на `L/2` с каждой стороны,
/// окно `i` центрировано на отсчёте `i × decimation`. Выход содержит
/// `len / decimation` отсчётов, как и CIC.
pub fn fir_ddc(
    raw: &[f64],
    decimation: usize,
    overlap: usize,
    f0: f64,
    fs: f64,
) -> Vec<Complex64> {
    let kernel_size = overlap * decimation;

    if kernel_size == 0 {
        return Vec::new();
    }

    let window: Vec<f64> = (0..kernel_size)
        .map(|j| taper(-1.0 + (2 * j + 1) as f64 / kernel_size as f64))
        .collect();
    let norm: f64 = window.iter().sum();

    let kernel: Vec<Complex64> = window
        .iter()
        .enumerate()
        .map(|(j, &w)| Complex64::from_polar(w, 2.0 * PI * f0 * j as f64 / fs))
        .collect();

    let half = (kernel_size / 2) as isize;
    let len = raw.len() as isize;
    let count = raw.len() / decimation;

    (0..count)
        .map(|i| {
            let start = (i * decimation) as isize - half;
            // Нули дополнения в сумму не входят
            let first = (-start).max(0) as usize;
            let last = (len - start).clamp(0, kernel_size as isize) as usize;

            let acc: Complex64 = kernel[first..last]
                .iter()
                .enumerate()
                .map(|(j, &k)| k * raw[(start + (first + j) as isize) as usize])
                .sum();
            let shift = Complex64::from_polar(1.0, 2.0 * PI * f0 * start as f64 / fs);
            acc * shift * (2.0 / norm)
        })
        .collect()
}

/// DDC на CIC фильтре: смешение, `stages` интеграторов, прореживание в
/// `decimation/2` раз, `stages` гребёнок, нормировка на `R^stages` и
/// компенсирующий FIR с прореживанием на 2.
///
/// `decimation` должен быть чётным; нечётный даёт пустой результат.
pub fn cic_ddc(
    raw: &[f64],
    decimation: usize,
    stages: usize,
    f0: f64,
    fs: f64,
) -> Vec<Complex64> {
    if decimation < 2 || decimation % 2 != 0 || raw.is_empty() {
        return Vec::new();
    }

    let rate = decimation / 2;

    let mut signal: Vec<Complex64> = raw
        .iter()
        .enumerate()
        .map(|(n, &x)| Complex64::from_polar(x, 2.0 * PI * f0 * n as f64 / fs))
        .collect();

    for _ in 0..stages {
        let mut acc = Complex64::new(0.0, 0.0);
        for v in signal.iter_mut() {
            acc += *v;
            *v = acc;
        }
    }

    let mut decimated: Vec<Complex64> = signal.into_iter().step_by(rate).collect();

    for _ in 0..stages {
        let mut prev = Complex64::new(0.0, 0.0);
        for v in decimated.iter_mut() {
            let current = *v;
            *v = current - prev;
            prev = current;
        }
    }

    let gain = (rate as f64).powi(stages as i32);
    decimated.iter_mut().for_each(|v| *v /= gain);

    halfband_decimate(&decimated)
        .into_iter()
        .map(|v| v * 2.0)
        .collect()
}

/// FIR фильтр нижних частот (окно Хэмминга, срез на половине Найквиста),
/// центрированная свёртка и прореживание на 2.
fn halfband_decimate(signal: &[Complex64]) -> Vec<Complex64> {
    let center = (HALFBAND_TAPS / 2) as isize;

    let mut taps: Vec<f64> = (0..HALFBAND_TAPS)
        .map(|k| {
            let m = k as f64 - center as f64;
            let sinc = if m == 0.0 {
                1.0
            } else {
                (0.5 * PI * m).sin() / (0.5 * PI * m)
            };
            let hamming =
                0.54 - 0.46 * (2.0 * PI * k as f64 / (HALFBAND_TAPS - 1) as f64).cos();
            0.5 * sinc * hamming
        })
        .collect();

    let dc: f64 = taps.iter().sum();
    taps.iter_mut().for_each(|t| *t /= dc);

    let len = signal.len() as isize;

    (0..signal.len())
        .step_by(2)
        .map(|i| {
            taps.iter()
                .enumerate()
                .filter_map(|(k, &t)| {
                    let idx = i as isize + center - k as isize;
                    (0..len).contains(&idx).then(|| signal[idx as usize] * t)
                })
                .sum()
        })
        .collect()
}

/// Фазовая коррекция: `data · exp(-i·arg(ref))` поотсчётно. Отсчёты с
/// нулевым опорным сигналом не меняются. Длина результата — минимум длин.
pub fn phase_correct(
    data: &[Complex64],
    reference: &[Complex64],
) -> Vec<Complex64> {
    data.iter()
        .zip(reference)
        .map(|(&d, &r)| {
            if r.norm() > 0.0 {
                d * Complex64::from_polar(1.0, -r.arg())
            } else {
                d
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_digital;

    const FS: f64 = 20e6;

    fn tone(
        n: usize,
        freq: f64,
        phase: f64,
    ) -> Vec<f64> {
        (0..n)
            .map(|k| (2.0 * PI * freq * k as f64 / FS + phase).cos())
            .collect()
    }

    /// Отсчёты, окна которых целиком внутри сигнала.
    fn interior(
        x: &[Complex64],
        overlap: usize,
    ) -> &[Complex64] {
        let edge = overlap / 2;
        &x[edge..x.len() - edge]
    }

    fn mean_magnitude(x: &[Complex64]) -> f64 {
        x.iter().map(|v| v.norm()).sum::<f64>() / x.len() as f64
    }

    #[test]
    fn test_fir_output_length() {
        assert_eq!(fir_ddc(&vec![0.0; 1000], 50, 4, 2e6, FS).len(), 20);
        assert_eq!(fir_ddc(&vec![0.0; 1010], 50, 4, 2e6, FS).len(), 20);
        // Окно короче ядра: выход всё равно len / decimation
        assert_eq!(fir_ddc(&vec![0.0; 600], 200, 4, 2e6, FS).len(), 3);
        assert!(fir_ddc(&[0.0; 10], 50, 4, 2e6, FS).is_empty());
    }

    #[test]
    fn test_fir_unity_gain_at_f0() {
        let out = fir_ddc(&tone(8000, 2e6, 0.0), 50, 4, 2e6, FS);
        let gain = mean_magnitude(interior(&out, 4));

        assert!((gain - 1.0).abs() < 0.01, "gain {gain}");
    }

    #[test]
    fn test_fir_rejects_offset_tone() {
        let out = fir_ddc(&tone(8000, 2e6 + FS / 50.0, 0.0), 50, 4, 2e6, FS);
        let db = 20.0 * mean_magnitude(interior(&out, 4)).log10();

        assert!(db < -20.0, "attenuation {db} dB");
    }

    #[test]
    fn test_cic_unity_gain_and_rejection() {
        let out = cic_ddc(&tone(16000, 2e6, 0.0), 100, 5, 2e6, FS);
        assert_eq!(out.len(), 160);

        let interior = &out[8..out.len() - 8];
        assert!((mean_magnitude(interior) - 1.0).abs() < 0.01);

        let off = cic_ddc(&tone(16000, 2e6 + FS / 100.0, 0.0), 100, 5, 2e6, FS);
        let db = 20.0 * mean_magnitude(&off[8..off.len() - 8]).log10();
        assert!(db < -20.0, "attenuation {db} dB");
    }

    #[test]
    fn test_cic_rejects_odd_decimation() {
        assert!(cic_ddc(&[1.0; 100], 5, 5, 2e6, FS).is_empty());

        let params = AcquisitionParameter {
            decimation: 7,
            ddc_method: DdcMethod::Cic,
            ..Default::default()
        };
        assert!(matches!(
            DownconversionPipeline::new(&params, FS, vec![1.0]),
            Err(ConsoleError::Validation(_))
        ));
    }

    #[test]
    fn test_phase_correction_aligns_to_reference() {
        let f0 = 2.1234e6;

        for phase in [0.0, 0.7, 1.3, -2.0, 3.0] {
            let data = tone(16000, f0, phase);
            let reference: Vec<f64> = data
                .iter()
                .map(|&v| if v > 0.0 { 1.0 } else { 0.0 })
                .collect();

            let data = fir_ddc(&data, 200, 4, f0, FS);
            let reference = fir_ddc(&reference, 200, 4, f0, FS);
            let corrected = phase_correct(&data, &reference);

            assert_eq!(corrected.len(), 80);
            for v in interior(&corrected, 4) {
                assert!(v.arg().to_degrees().abs() < 1.0, "phase {phase}: {}", v.arg());
            }
        }
    }

    #[test]
    fn test_overlap_changes_kernel_not_length() {
        let params = AcquisitionParameter::default();
        let pipeline = DownconversionPipeline::new(&params, FS, vec![1.0])
            .unwrap()
            .with_overlap(2)
            .unwrap();

        let out = pipeline.downconvert(&tone(4000, 2e6, 0.0));
        assert_eq!(out.len(), 4000 / 200);
        // Краевые окна неполные, внутренние с единичным усилением
        let gain = mean_magnitude(interior(&out, 2));
        assert!((gain - 1.0).abs() < 0.01, "gain {gain}");

        let pipeline = DownconversionPipeline::new(&params, FS, vec![1.0]).unwrap();
        assert!(pipeline.with_overlap(0).is_err());
    }

    #[test]
    fn test_process_gate_splits_reference() {
        let f0 = 2.1234e6;
        let params = AcquisitionParameter {
            larmor_frequency: f0,
            decimation: 200,
            ..Default::default()
        };
        let pipeline = DownconversionPipeline::new(&params, FS, vec![0.5, 1.0]).unwrap();

        let carrier = tone(4000, f0, 0.4);
        let ch0: Vec<i16> = carrier
            .iter()
            .map(|&v| encode_digital((v * 8000.0) as i16, v > 0.0))
            .collect();
        let gate = Gate {
            index: 3,
            channels: vec![ch0, vec![0; 4000]],
            sample_count: 4000,
            ..Default::default()
        };

        let out = pipeline.process_gate(&gate);

        assert_eq!(out.index, 3);
        assert_eq!(out.signal.len(), 2);
        assert_eq!(out.unprocessed.len(), 3);
        assert_eq!(out.reference.len(), 4000 / 200);
        assert!(out.unprocessed[0].iter().all(|v| v.abs() <= 4000.0 + 1.0));
        assert!(out.unprocessed[2].iter().all(|&b| b == 0.0 || b == 1.0));

        // Амплитуда канала 0: 8000 LSB × 0.5 мВ
        let signal = interior(&out.signal[0], 4);
        let gain = mean_magnitude(signal);
        assert!((gain - 4000.0).abs() < 80.0, "gain {gain}");
        assert!(signal.iter().all(|v| v.arg().to_degrees().abs() < 1.0));
    }
}
