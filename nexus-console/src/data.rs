use log::warn;
use nexus_core::ProcessedGate;
use nexus_types::{AcquisitionParameter, Complex64};

/// Окна одинаковой длины, сложенные по усреднениям.
#[derive(Debug, Clone, PartialEq)]
pub struct Readout {
    /// Отсчётов в окне после DDC
    pub samples: usize,
    /// Номера окон внутри усреднения
    pub gate_indices: Vec<usize>,
    /// `[усреднение][окно][канал][отсчёт]`
    pub signal: Vec<Vec<Vec<Vec<Complex64>>>>,
    /// `[усреднение][окно][строка][отсчёт]`: каналы в мВ, последней опорный такт
    pub unprocessed: Vec<Vec<Vec<Vec<f64>>>>,
}

/// Результат сбора: обработанные окна всех усреднений.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionData {
    pub parameter: AcquisitionParameter,
    /// Длительность последовательности (секунды)
    pub sequence_duration: f64,
    /// Период отсчётов после прореживания (секунды)
    pub dwell_time: f64,
    /// Ожидаемое количество окон в усреднении
    pub gates_per_average: usize,
    /// Окна каждого усреднения в порядке приёма
    pub averages: Vec<Vec<ProcessedGate>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Readout {
    /// Количество усреднений в группе.
    pub fn num_averages(&self) -> usize {
        self.signal.len()
    }

    /// Сигнал, усреднённый по усреднениям: `[окно][канал][отсчёт]`.
    ///
    /// Усреднения, форма которых отличается от первого, пропускаются.
    pub fn mean(&self) -> Vec<Vec<Vec<Complex64>>> {
        let Some(first) = self.signal.first() else {
            return Vec::new();
        };
        let mut acc = first.clone();
        let mut count = 1usize;

        for (avg, average) in self.signal.iter().enumerate().skip(1) {
            if !same_shape(first, average) {
                warn!("Readout average {avg} has a different shape, skipped in mean");
                continue;
            }

            for (gate_acc, gate) in acc.iter_mut().zip(average) {
                for (ch_acc, ch) in gate_acc.iter_mut().zip(gate) {
                    for (a, &v) in ch_acc.iter_mut().zip(ch) {
                        *a += v;
                    }
                }
            }
            count += 1;
        }

        let n = count as f64;
        for gate in acc.iter_mut() {
            for ch in gate.iter_mut() {
                for v in ch.iter_mut() {
                    *v /= n;
                }
            }
        }

        acc
    }
}

/// Одинаковое число окон, каналов и отсчётов.
fn same_shape(
    a: &[Vec<Vec<Complex64>>],
    b: &[Vec<Vec<Complex64>>],
) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(ga, gb)| {
            ga.len() == gb.len() && ga.iter().zip(gb).all(|(ca, cb)| ca.len() == cb.len())
        })
}

impl AcquisitionData {
    pub fn new(
        parameter: AcquisitionParameter,
        sequence_duration: f64,
        dwell_time: f64,
        gates_per_average: usize,
    ) -> Self {
        Self {
            parameter,
            sequence_duration,
            dwell_time,
            gates_per_average,
            averages: Vec::new(),
        }
    }

    pub fn push_average(
        &mut self,
        gates: Vec<ProcessedGate>,
    ) {
        self.averages.push(gates);
    }

    /// Всего принятых окон.
    pub fn gate_count(&self) -> usize {
        self.averages.iter().map(Vec::len).sum()
    }

    /// Усреднения, в которых пришли все окна.
    pub fn complete_averages(&self) -> impl Iterator<Item = &Vec<ProcessedGate>> {
        self.averages
            .iter()
            .filter(move |a| a.len() == self.gates_per_average)
    }

    /// Группирует окна по длине после DDC и складывает группы по полным
    /// усреднениям. Порядок групп: по первому появлению длины.
    pub fn readouts(&self) -> Vec<Readout> {
        let complete: Vec<&Vec<ProcessedGate>> = self.complete_averages().collect();
        let Some(layout) = complete.first() else {
            return Vec::new();
        };

        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        for (g, gate) in layout.iter().enumerate() {
            let len = gate.reference.len();
            match groups.iter_mut().find(|(l, _)| *l == len) {
                Some((_, indices)) => indices.push(g),
                None => groups.push((len, vec![g])),
            }
        }

        groups
            .into_iter()
            .map(|(samples, gate_indices)| {
                let signal = complete
                    .iter()
                    .map(|avg| {
                        gate_indices
                            .iter()
                            .map(|&g| avg[g].signal.clone())
                            .collect()
                    })
                    .collect();
                let unprocessed = complete
                    .iter()
                    .map(|avg| {
                        gate_indices
                            .iter()
                            .map(|&g| avg[g].unprocessed.clone())
                            .collect()
                    })
                    .collect();

                Readout {
                    samples,
                    gate_indices,
                    signal,
                    unprocessed,
                }
            })
            .collect()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для AcquisitionData
////////////////////////////////////////////////////////////////////////////////

impl std::fmt::Display for AcquisitionData {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "  Larmor        : {:.6} MHz",
            self.parameter.larmor_frequency / 1e6
        )?;
        writeln!(
            f,
            "  DDC           : {} / {}",
            self.parameter.ddc_method, self.parameter.decimation
        )?;
        writeln!(
            f,
            "  Averages      : {} of {}",
            self.complete_averages().count(),
            self.parameter.num_averages
        )?;
        writeln!(
            f,
            "  Gates         : {} ({} per average)",
            self.gate_count(),
            self.gates_per_average
        )?;
        for readout in self.readouts() {
            writeln!(
                f,
                "  Readout       : {} samples x {} gates, dwell {:.3} us",
                readout.samples,
                readout.gate_indices.len(),
                self.dwell_time * 1e6
            )?;
        }
        write!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
