use std::time::Duration;

use nexus_core::SystemTiming;
use nexus_recorder::RxConfig;
use nexus_replayer::TxConfig;
use nexus_types::{ConsoleError, ConsoleResult};

/// Конфигурация консоли: обе карты и перевод единиц последовательности.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleConfig {
    pub tx: TxConfig,
    pub rx: RxConfig,
    /// мВ на единицу RF амплитуды последовательности
    pub rf_to_volt: f64,
    /// мВ на единицу амплитуды градиента
    pub grad_to_volt: f64,
    pub timing: SystemTiming,
    /// Запас времени на сбор окон сверх длительности последовательности
    pub gate_budget: Duration,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConsoleConfig {
    /// Проверяет обе карты и коэффициенты до открытия устройств.
    pub fn validate(&self) -> ConsoleResult<()> {
        self.tx.validate()?;
        self.rx.validate()?;

        if !(self.rf_to_volt > 0.0 && self.rf_to_volt.is_finite())
            || !(self.grad_to_volt > 0.0 && self.grad_to_volt.is_finite())
        {
            return Err(ConsoleError::validation(
                "rf_to_volt and grad_to_volt must be finite and > 0",
            ));
        }

        Ok(())
    }

    /// Сколько ждать окна одного усреднения.
    pub fn collect_timeout(
        &self,
        sequence_duration: f64,
    ) -> Duration {
        self.gate_budget + Duration::from_secs_f64(sequence_duration.max(0.0))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для ConsoleConfig
////////////////////////////////////////////////////////////////////////////////

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            tx: TxConfig::default(),
            rx: RxConfig::default(),
            rf_to_volt: 1.0,
            grad_to_volt: 1.0,
            timing: SystemTiming::default(),
            gate_budget: Duration::from_secs(5),
        }
    }
}

/// Парсинг частоты с суффиксом: "2MHz", "2.1mhz", "500kHz", "2000000".
///
/// # Examples
/// ```
/// use nexus_console::config::parse_freq_hz;
/// assert_eq!(parse_freq_hz("2MHz").unwrap(), 2_000_000);
/// assert_eq!(parse_freq_hz("2.5 MHz").unwrap(), 2_500_000);
/// assert_eq!(parse_freq_hz("20000000").unwrap(), 20_000_000);
/// ```
pub fn parse_freq_hz(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let lower = s.to_lowercase();

    let (num_str, mult) = if let Some(v) = lower.strip_suffix("mhz") {
        (v.trim(), 1_000_000_f64)
    } else if let Some(v) = lower.strip_suffix("khz") {
        (v.trim(), 1_000_f64)
    } else if let Some(v) = lower.strip_suffix("hz") {
        (v.trim(), 1_f64)
    } else {
        // Без суффикса: число в герцах
        return s
            .parse::<u64>()
            .map_err(|e| format!("Invalid frequency '{s}': {e}"));
    };

    let n: f64 = num_str
        .parse()
        .map_err(|e| format!("Invalid frequency value '{num_str}': {e}"))?;

    if !(n.is_finite() && n >= 0.0) {
        return Err(format!("Invalid frequency value '{num_str}'"));
    }

    Ok((n * mult).round() as u64)
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_freq_hz() {
        assert_eq!(parse_freq_hz("2MHz").unwrap(), 2_000_000);
        assert_eq!(parse_freq_hz("2.1mhz").unwrap(), 2_100_000);
        assert_eq!(parse_freq_hz("500kHz").unwrap(), 500_000);
        assert_eq!(parse_freq_hz("20000000Hz").unwrap(), 20_000_000);
        assert_eq!(parse_freq_hz("20000000").unwrap(), 20_000_000);
        assert!(parse_freq_hz("abc").is_err());
        assert!(parse_freq_hz("-1MHz").is_err());
    }

    #[test]
    fn test_default_is_valid() {
        let cfg = ConsoleConfig::default();

        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.collect_timeout(0.5), Duration::from_millis(5500));
    }

    #[test]
    fn test_invalid_scaling_rejected() {
        let cfg = ConsoleConfig {
            rf_to_volt: 0.0,
            ..Default::default()
        };

        assert!(matches!(cfg.validate(), Err(ConsoleError::Validation(_))));
    }
}
