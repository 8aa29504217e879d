//! Развёртка блочной последовательности в отсчёты генератора.
//!
//! Каждый блок превращается в массив `4 × n` отсчётов int16, каналы
//! чередуются `[rf, gx, gy, gz]`. Цифровые сигналы (строб АЦП, опорный
//! такт, разблокировка RF) упаковываются в бит 15 каналов Gx, Gy, Gz.

use std::f64::consts::PI;

use log::{debug, error};
use num_complex::Complex64;
use nexus_types::{
    AcquisitionParameter, AdcEvent, Axis, ConsoleError, ConsoleResult, GradientEvent,
    GradientShape, RfEvent, SequenceSource, UnrolledSequence, MAX_LARMOR_FREQUENCY,
    NUM_TX_CHANNELS,
};

use crate::{encode_digital, fourier_resample, interp, linspace};

/// Полная шкала int16.
pub const INT16_FULL_SCALE: f64 = i16::MAX as f64;

/// Системные времена RF усилителя. Для каждого RF события берётся
/// максимум из значения события и системного.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SystemTiming {
    /// Разблокировка до начала RF (секунды)
    pub rf_dead_time: f64,
    /// Затухание после RF (секунды)
    pub rf_ringdown_time: f64,
}

/// Синтезатор отсчётов генератора.
#[derive(Debug, Clone)]
pub struct SequenceUnroller {
    /// Период отсчётов генератора (секунды)
    pub dwell_time: f64,
    /// Перевод RF амплитуды последовательности в мВ
    pub rf_to_volt: f64,
    /// Перевод амплитуды градиента в мВ
    pub grad_to_volt: f64,
    /// Предельное выходное напряжение каналов (мВ)
    pub output_limits: [f64; NUM_TX_CHANNELS],
    pub timing: SystemTiming,
    sample_count: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SequenceUnroller {
    pub fn new(
        dwell_time: f64,
        rf_to_volt: f64,
        grad_to_volt: f64,
        output_limits: [f64; NUM_TX_CHANNELS],
    ) -> Self {
        Self {
            dwell_time,
            rf_to_volt,
            grad_to_volt,
            output_limits,
            timing: SystemTiming::default(),
            sample_count: 0,
        }
    }

    pub fn with_system_timing(
        mut self,
        timing: SystemTiming,
    ) -> Self {
        self.timing = timing;
        self
    }

    /// Отсчётов на канал, синтезированных последней развёрткой.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Развёртывает последовательность.
    ///
    /// Все проверки выполняются до синтеза; ошибка амплитуды возникает до
    /// возврата результата, поэтому к железу ничего не уходит.
    pub fn unroll(
        &mut self,
        source: &dyn SequenceSource,
        params: &AcquisitionParameter,
    ) -> ConsoleResult<UnrolledSequence> {
        self.validate(source, params).inspect_err(|e| error!("{e}"))?;

        let ids = source.block_events();
        let mut blocks = Vec::with_capacity(ids.len());
        // Начало отсчёта фазы несущей: первый блок с RF событием
        let mut rf_origin: Option<u64> = None;
        let mut carry = Axis::ALL.map(|axis| self.gradient_base(axis, params));
        let mut adc_count = 0;

        self.sample_count = 0;

        for id in ids {
            let block = source.get_block(id)?;
            let n = self.samples(block.duration);

            let mut rf = vec![0i16; n];
            let mut unblanking = vec![false; n];
            let mut adc_gate = vec![false; n];
            let mut reference = vec![false; n];

            if let Some(event) = block.rf.as_ref().filter(|e| !e.signal.is_empty()) {
                let origin = *rf_origin.get_or_insert(self.sample_count);
                self.calculate_rf(
                    event,
                    params,
                    self.sample_count - origin,
                    &mut rf,
                    &mut unblanking,
                )?;
            }

            if let Some(adc) = &block.adc {
                let origin = rf_origin.unwrap_or(0);
                self.add_adc_gate(
                    adc,
                    params.larmor_frequency,
                    self.sample_count.saturating_sub(origin),
                    &mut adc_gate,
                    &mut reference,
                )?;
                adc_count += 1;
            }

            let mut gradients: [Vec<i16>; 3] = Default::default();
            for (slot, axis) in Axis::ALL.into_iter().enumerate() {
                gradients[slot] = match block.gradient(axis) {
                    Some(event) => {
                        self.calculate_gradient(event, axis, params, n, carry[slot])?
                    }
                    None => vec![carry[slot]; n],
                };
                if let Some(&last) = gradients[slot].last() {
                    carry[slot] = last;
                }
            }

            let digital = [&adc_gate, &reference, &unblanking];
            let mut samples = Vec::with_capacity(NUM_TX_CHANNELS * n);

            for i in 0..n {
                samples.push(rf[i]);
                for slot in 0..3 {
                    samples.push(encode_digital(gradients[slot][i], digital[slot][i]));
                }
            }

            if samples.len() != NUM_TX_CHANNELS * n {
                return Err(ConsoleError::SampleCount {
                    expected: NUM_TX_CHANNELS * n,
                    found: samples.len(),
                });
            }

            blocks.push(samples);
            self.sample_count += n as u64;
        }

        debug!(
            "Unrolled sequence; total sample points: {}; blocks: {}; ADC events: {adc_count}",
            self.sample_count,
            blocks.len()
        );

        Ok(UnrolledSequence {
            blocks,
            sample_count: self.sample_count,
            dwell_time: self.dwell_time,
            larmor_frequency: params.larmor_frequency,
            duration: source.duration(),
            adc_count,
            rf_to_volt: self.rf_to_volt,
            grad_to_volt: self.grad_to_volt,
        })
    }

    fn validate(
        &self,
        source: &dyn SequenceSource,
        params: &AcquisitionParameter,
    ) -> ConsoleResult<()> {
        params.validate()?;

        if params.larmor_frequency > MAX_LARMOR_FREQUENCY {
            return Err(ConsoleError::validation(format!(
                "Larmor frequency is above 10 MHz: {} MHz",
                params.larmor_frequency * 1e-6
            )));
        }

        if !(self.dwell_time > 0.0 && self.dwell_time.is_finite()) {
            return Err(ConsoleError::validation(format!(
                "Invalid dwell time {}",
                self.dwell_time
            )));
        }

        if source.block_events().is_empty() {
            return Err(ConsoleError::validation("No block events found"));
        }

        source.check_timing().map_err(|e| {
            ConsoleError::validation(format!("Sequence timing check failed: {e}"))
        })?;

        if self
            .output_limits
            .iter()
            .any(|l| !(*l > 0.0 && l.is_finite()))
        {
            return Err(ConsoleError::validation(
                "Amplitude output limits are not provided",
            ));
        }

        Ok(())
    }

    /// Количество отсчётов генератора на интервал `duration`.
    fn samples(
        &self,
        duration: f64,
    ) -> usize {
        (duration / self.dwell_time).round().max(0.0) as usize
    }

    /// Постоянный уровень градиента оси (int16) из смещения в мВ.
    fn gradient_base(
        &self,
        axis: Axis,
        params: &AcquisitionParameter,
    ) -> i16 {
        let offset = params.gradient_offset.get(axis) / self.output_limits[axis.channel()];
        (offset * INT16_FULL_SCALE).round() as i16
    }

    /// Синтезирует RF событие в `rf` и отмечает окно разблокировки.
    ///
    /// `elapsed` — отсчёты от начала первого RF блока до начала текущего;
    /// по нему считается фаза несущей.
    fn calculate_rf(
        &self,
        event: &RfEvent,
        params: &AcquisitionParameter,
        elapsed: u64,
        rf: &mut [i16],
        unblanking: &mut [bool],
    ) -> ConsoleResult<()> {
        let n = rf.len();
        let n_delay = self.samples(event.delay);
        let n_dead = self.samples(event.dead_time.max(self.timing.rf_dead_time));
        let n_ringdown = self.samples(event.ringdown_time.max(self.timing.rf_ringdown_time));
        let n_shape = self.samples(event.shape_dur);

        let required = n_delay + n_shape + n_ringdown;
        if required > n {
            return Err(ConsoleError::SampleCount {
                expected: n,
                found: required,
            });
        }

        let scaling = params.b1_scaling * self.rf_to_volt / self.output_limits[0];
        let peak = event
            .signal
            .iter()
            .map(|s| s.norm() * scaling.abs())
            .fold(0.0, f64::max);

        if peak > 1.0 {
            return Err(ConsoleError::AmplitudeExceeded { channel: 0, peak });
        }

        let scaled: Vec<Complex64> = event
            .signal
            .iter()
            .map(|s| *s * (scaling * INT16_FULL_SCALE))
            .collect();
        let envelope = fourier_resample(&scaled, n_shape);

        let freq = params.larmor_frequency + event.freq_offset;
        let start = elapsed + n_delay as u64;

        let modulated: Vec<f64> = envelope
            .iter()
            .enumerate()
            .map(|(k, value)| {
                let t = (start + k as u64) as f64 * self.dwell_time;
                let carrier = Complex64::from_polar(1.0, 2.0 * PI * freq * t + event.phase_offset);
                (value * carrier).re
            })
            .collect();

        // Передискретизация даёт выбросы Гиббса поверх огибающей
        let peak = modulated.iter().fold(0.0_f64, |m, v| m.max(v.abs())) / INT16_FULL_SCALE;
        if peak > 1.0 {
            return Err(ConsoleError::AmplitudeExceeded { channel: 0, peak });
        }

        for (slot, value) in rf[n_delay..].iter_mut().zip(&modulated) {
            *slot = value.round() as i16;
        }

        let on = n_delay.saturating_sub(n_dead);
        unblanking[on..n_delay + n_shape].fill(true);

        Ok(())
    }

    /// Синтезирует градиент оси. Задержка заполняется значением `carry`
    /// (конец предыдущего блока), хвост блока — последним значением формы.
    fn calculate_gradient(
        &self,
        event: &GradientEvent,
        axis: Axis,
        params: &AcquisitionParameter,
        n: usize,
        carry: i16,
    ) -> ConsoleResult<Vec<i16>> {
        let channel = axis.channel();
        let limit = self.output_limits[channel];
        let scaling = params.fov_scaling.get(axis) * self.grad_to_volt / limit;
        let offset = params.gradient_offset.get(axis) / limit;
        let base = self.gradient_base(axis, params);

        let check = |peak: f64| -> ConsoleResult<()> {
            if peak > 1.0 {
                Err(ConsoleError::AmplitudeExceeded { channel, peak })
            } else {
                Ok(())
            }
        };

        let mut gradient = vec![carry; self.samples(event.delay)];

        match &event.shape {
            GradientShape::Arbitrary {
                waveform,
                times,
                shape_dur,
            } => {
                let ordered = times.iter().all(|t| t.is_finite())
                    && times.windows(2).all(|w| w[0] < w[1]);
                if times.len() != waveform.len() || !ordered {
                    return Err(ConsoleError::validation(format!(
                        "{axis:?} gradient time points must be finite, strictly increasing \
                         and match the waveform length"
                    )));
                }

                let scaled: Vec<f64> = waveform.iter().map(|w| w * scaling + offset).collect();
                check(scaled.iter().fold(0.0, |m, v| m.max(v.abs())))?;

                let fp: Vec<f64> = scaled.iter().map(|v| v * INT16_FULL_SCALE).collect();
                let (first, last) = match (times.first(), times.last()) {
                    (Some(first), Some(last)) => (*first, *last),
                    _ => (0.0, 0.0),
                };
                let x = linspace(first, last, self.samples(*shape_dur));

                gradient.extend(interp(&x, times, &fp).iter().map(|v| v.round() as i16));
            }

            GradientShape::Trapezoid {
                amplitude,
                rise_time,
                flat_time,
                fall_time,
            } => {
                let flat = amplitude * scaling + offset;
                check(flat.abs())?;
                let flat = (flat * INT16_FULL_SCALE).round();

                let ramp = |from: f64, to: f64, dur: f64| {
                    linspace(from, to, self.samples(dur))
                        .into_iter()
                        .map(|v| v.round() as i16)
                };

                gradient.extend(ramp(carry as f64, flat, *rise_time));
                gradient.extend(std::iter::repeat(flat as i16).take(self.samples(*flat_time)));
                gradient.extend(ramp(flat, base as f64, *fall_time));
            }
        }

        if gradient.len() > n {
            return Err(ConsoleError::SampleCount {
                expected: n,
                found: gradient.len(),
            });
        }

        let tail = gradient.last().copied().unwrap_or(carry);
        gradient.resize(n, tail);

        Ok(gradient)
    }

    /// Отмечает строб АЦП и опорный такт (`cos > 0`) на весь блок.
    ///
    /// `elapsed` — отсчёты от начала отсчёта фазы до начала блока.
    fn add_adc_gate(
        &self,
        adc: &AdcEvent,
        larmor_frequency: f64,
        elapsed: u64,
        gate: &mut [bool],
        reference: &mut [bool],
    ) -> ConsoleResult<()> {
        let n = gate.len();
        let start = self.samples(adc.delay).max(self.samples(adc.dead_time));
        let len = self.samples(adc.duration());

        if start + len > n {
            return Err(ConsoleError::SampleCount {
                expected: n,
                found: start + len,
            });
        }

        gate[start..start + len].fill(true);

        for (k, bit) in reference.iter_mut().enumerate() {
            let t = (elapsed + k as u64) as f64 * self.dwell_time;
            *bit = (2.0 * PI * larmor_frequency * t).cos() > 0.0;
        }

        Ok(())
    }
}
