use num_complex::Complex64;

use crate::{ConsoleError, ConsoleResult};

/// Ось градиента. Индекс канала генератора: RF = 0, X = 1, Y = 2, Z = 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// RF событие блока.
#[derive(Debug, Clone, PartialEq)]
pub struct RfEvent {
    /// Комплексная огибающая
    pub signal: Vec<Complex64>,
    /// Длительность огибающей (секунды)
    pub shape_dur: f64,
    /// Задержка от начала блока (секунды)
    pub delay: f64,
    /// Время от включения усилителя до начала RF (секунды)
    pub dead_time: f64,
    /// Время затухания после RF (секунды)
    pub ringdown_time: f64,
    /// Сдвиг частоты (Гц)
    pub freq_offset: f64,
    /// Сдвиг фазы (радианы)
    pub phase_offset: f64,
}

/// Форма градиента.
#[derive(Debug, Clone, PartialEq)]
pub enum GradientShape {
    /// Произвольная форма: значения `waveform` в моменты `times`
    Arbitrary {
        waveform: Vec<f64>,
        times: Vec<f64>,
        shape_dur: f64,
    },
    /// Трапеция
    Trapezoid {
        amplitude: f64,
        rise_time: f64,
        flat_time: f64,
        fall_time: f64,
    },
}

/// Градиентное событие одной оси.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientEvent {
    pub delay: f64,
    pub shape: GradientShape,
}

/// ADC событие.
#[derive(Debug, Clone, PartialEq)]
pub struct AdcEvent {
    /// Количество отсчётов АЦП
    pub num_samples: usize,
    /// Период отсчётов АЦП (секунды)
    pub dwell: f64,
    pub delay: f64,
    pub dead_time: f64,
}

/// Один временной сегмент последовательности.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SequenceBlock {
    /// Длительность блока (секунды)
    pub duration: f64,
    pub rf: Option<RfEvent>,
    pub gx: Option<GradientEvent>,
    pub gy: Option<GradientEvent>,
    pub gz: Option<GradientEvent>,
    pub adc: Option<AdcEvent>,
}

/// Источник разобранной последовательности.
///
/// Синтезатор работает с любым адаптером, дающим доступ к блокам по
/// идентификатору.
pub trait SequenceSource {
    /// Идентификаторы блоков в порядке воспроизведения
    fn block_events(&self) -> Vec<u32>;

    /// Блок по идентификатору
    fn get_block(
        &self,
        id: u32,
    ) -> ConsoleResult<SequenceBlock>;

    /// Полная длительность (секунды)
    fn duration(&self) -> f64;

    /// Проверка временной сетки. Текст ошибки возвращается как есть.
    fn check_timing(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Последовательность в памяти. Идентификаторы блоков начинаются с 1.
#[derive(Debug, Clone, Default)]
pub struct BlockSequence {
    blocks: Vec<SequenceBlock>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Индекс канала генератора
    pub fn channel(self) -> usize {
        match self {
            Axis::X => 1,
            Axis::Y => 2,
            Axis::Z => 3,
        }
    }
}

impl RfEvent {
    /// RF событие без задержек и сдвигов.
    pub fn new(
        signal: Vec<Complex64>,
        shape_dur: f64,
    ) -> Self {
        Self {
            signal,
            shape_dur,
            delay: 0.0,
            dead_time: 0.0,
            ringdown_time: 0.0,
            freq_offset: 0.0,
            phase_offset: 0.0,
        }
    }

    /// Прямоугольный импульс.
    pub fn block_pulse(
        amplitude: f64,
        duration: f64,
    ) -> Self {
        Self::new(vec![Complex64::new(amplitude, 0.0); 2], duration)
    }
}

impl GradientEvent {
    pub fn trapezoid(
        amplitude: f64,
        rise_time: f64,
        flat_time: f64,
        fall_time: f64,
    ) -> Self {
        Self {
            delay: 0.0,
            shape: GradientShape::Trapezoid {
                amplitude,
                rise_time,
                flat_time,
                fall_time,
            },
        }
    }

    pub fn arbitrary(
        waveform: Vec<f64>,
        times: Vec<f64>,
        shape_dur: f64,
    ) -> Self {
        Self {
            delay: 0.0,
            shape: GradientShape::Arbitrary {
                waveform,
                times,
                shape_dur,
            },
        }
    }
}

impl AdcEvent {
    pub fn new(
        num_samples: usize,
        dwell: f64,
    ) -> Self {
        Self {
            num_samples,
            dwell,
            delay: 0.0,
            dead_time: 0.0,
        }
    }

    /// Длительность окна АЦП (секунды)
    pub fn duration(&self) -> f64 {
        self.num_samples as f64 * self.dwell
    }
}

impl SequenceBlock {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    pub fn with_rf(
        mut self,
        rf: RfEvent,
    ) -> Self {
        self.rf = Some(rf);
        self
    }

    pub fn with_gradient(
        mut self,
        axis: Axis,
        grad: GradientEvent,
    ) -> Self {
        match axis {
            Axis::X => self.gx = Some(grad),
            Axis::Y => self.gy = Some(grad),
            Axis::Z => self.gz = Some(grad),
        }
        self
    }

    pub fn with_adc(
        mut self,
        adc: AdcEvent,
    ) -> Self {
        self.adc = Some(adc);
        self
    }

    pub fn gradient(
        &self,
        axis: Axis,
    ) -> Option<&GradientEvent> {
        match axis {
            Axis::X => self.gx.as_ref(),
            Axis::Y => self.gy.as_ref(),
            Axis::Z => self.gz.as_ref(),
        }
    }
}

impl BlockSequence {
    pub fn new(blocks: Vec<SequenceBlock>) -> Self {
        Self { blocks }
    }

    pub fn push(
        &mut self,
        block: SequenceBlock,
    ) {
        self.blocks.push(block);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////
// SequenceSource для BlockSequence
////////////////////////////////////////////////////////////////////////////////

impl SequenceSource for BlockSequence {
    fn block_events(&self) -> Vec<u32> {
        (1..=self.blocks.len() as u32).collect()
    }

    fn get_block(
        &self,
        id: u32,
    ) -> ConsoleResult<SequenceBlock> {
        id.checked_sub(1)
            .and_then(|idx| self.blocks.get(idx as usize))
            .cloned()
            .ok_or_else(|| ConsoleError::validation(format!("Unknown block id {id}")))
    }

    fn duration(&self) -> f64 {
        self.blocks.iter().map(|b| b.duration).sum()
    }

    fn check_timing(&self) -> Result<(), String> {
        for (idx, block) in self.blocks.iter().enumerate() {
            if !(block.duration > 0.0 && block.duration.is_finite()) {
                return Err(format!(
                    "block {} has invalid duration {}",
                    idx + 1,
                    block.duration
                ));
            }

            if let Some(adc) = &block.adc {
                let end = adc.delay.max(adc.dead_time) + adc.duration();
                if end > block.duration * (1.0 + 1e-9) {
                    return Err(format!(
                        "block {}: ADC window ends at {end} s after block end {} s",
                        idx + 1,
                        block.duration
                    ));
                }
            }
        }

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
