use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Axis, ConsoleError, ConsoleResult};

/// Жёсткий верхний предел частоты Лармора (Гц).
pub const MAX_LARMOR_FREQUENCY: f64 = 10e6;

/// Тройка значений по осям градиентов.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Вариант цифрового понижающего преобразования (DDC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DdcMethod {
    /// Ядро с оконной функцией и шаговой свёрткой
    #[default]
    Fir,
    /// Каскад интегратор-гребёнка с финальным FIR ↓2
    Cic,
}

/// Параметры сбора данных. Передаются явно в каждый вызов синтеза и
/// обработки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParameter {
    /// Частота Лармора (Гц)
    pub larmor_frequency: f64,
    /// Масштаб амплитуды RF по калибровке B1
    pub b1_scaling: f64,
    /// Смещение градиентов (мВ)
    pub gradient_offset: Dimensions,
    /// Масштаб градиентов для поля зрения
    pub fov_scaling: Dimensions,
    /// Коэффициент децимации
    pub decimation: usize,
    /// Метод DDC
    pub ddc_method: DdcMethod,
    /// Количество усреднений
    pub num_averages: usize,
    /// Пауза между усреднениями (секунды)
    pub averaging_delay: f64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Dimensions {
    pub const fn new(
        x: f64,
        y: f64,
        z: f64,
    ) -> Self {
        Self { x, y, z }
    }

    /// Одинаковое значение по всем осям.
    pub const fn splat(v: f64) -> Self {
        Self { x: v, y: v, z: v }
    }

    pub fn get(
        &self,
        axis: Axis,
    ) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl AcquisitionParameter {
    /// Проверяет параметры до любых обращений к устройствам.
    pub fn validate(&self) -> ConsoleResult<()> {
        if !(self.larmor_frequency > 0.0 && self.larmor_frequency <= MAX_LARMOR_FREQUENCY) {
            return Err(ConsoleError::validation(format!(
                "Larmor frequency {} Hz is outside (0, {}] Hz",
                self.larmor_frequency, MAX_LARMOR_FREQUENCY
            )));
        }

        if !self.b1_scaling.is_finite() {
            return Err(ConsoleError::validation("b1_scaling must be finite"));
        }

        if !self.gradient_offset.is_finite() || !self.fov_scaling.is_finite() {
            return Err(ConsoleError::validation(
                "gradient_offset and fov_scaling must be finite",
            ));
        }

        if self.decimation == 0 {
            return Err(ConsoleError::validation("decimation must be >= 1"));
        }

        if self.num_averages == 0 {
            return Err(ConsoleError::validation("num_averages must be >= 1"));
        }

        if !(self.averaging_delay >= 0.0 && self.averaging_delay.is_finite()) {
            return Err(ConsoleError::validation(
                "averaging_delay must be a finite value >= 0",
            ));
        }

        Ok(())
    }

    /// Сохраняет параметры в JSON файл.
    pub fn save<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> ConsoleResult<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Загружает и проверяет параметры из JSON файла. Отсутствующие поля
    /// берутся по умолчанию.
    pub fn load<P: AsRef<Path>>(path: P) -> ConsoleResult<Self> {
        let file = File::open(path)?;
        let params: Self = serde_json::from_reader(BufReader::new(file))?;
        params.validate()?;
        Ok(params)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для DdcMethod, AcquisitionParameter
////////////////////////////////////////////////////////////////////////////////

impl std::fmt::Display for DdcMethod {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            DdcMethod::Fir => write!(f, "fir"),
            DdcMethod::Cic => write!(f, "cic"),
        }
    }
}

impl std::str::FromStr for DdcMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fir" => Ok(DdcMethod::Fir),
            "cic" => Ok(DdcMethod::Cic),
            _ => Err(format!("Unknown DDC method: '{s}'. Use: fir, cic")),
        }
    }
}

impl Default for AcquisitionParameter {
    fn default() -> Self {
        Self {
            larmor_frequency: 2e6,
            b1_scaling: 1.0,
            gradient_offset: Dimensions::default(),
            fov_scaling: Dimensions::splat(1.0),
            decimation: 200,
            ddc_method: DdcMethod::Fir,
            num_averages: 1,
            averaging_delay: 0.0,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_default_is_valid() {
        let params = AcquisitionParameter::default();

        params.validate().unwrap();
        assert_eq!(params.fov_scaling, Dimensions::splat(1.0));
        assert_eq!(params.ddc_method, DdcMethod::Fir);
    }

    #[test]
    fn test_larmor_ceiling() {
        let mut params = AcquisitionParameter {
            larmor_frequency: MAX_LARMOR_FREQUENCY,
            ..Default::default()
        };
        assert!(params.validate().is_ok());

        params.larmor_frequency = MAX_LARMOR_FREQUENCY + 1.0;
        assert!(matches!(
            params.validate(),
            Err(ConsoleError::Validation(_))
        ));

        params.larmor_frequency = 0.0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_invalid_counts_rejected() {
        let params = AcquisitionParameter {
            decimation: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = AcquisitionParameter {
            num_averages: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = AcquisitionParameter {
            averaging_delay: -0.5,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = NamedTempFile::new().unwrap();
        let params = AcquisitionParameter {
            larmor_frequency: 2.0451e6,
            b1_scaling: 3.2,
            gradient_offset: Dimensions::new(10.0, -5.0, 0.0),
            decimation: 100,
            ddc_method: DdcMethod::Cic,
            num_averages: 4,
            averaging_delay: 0.25,
            ..Default::default()
        };

        params.save(tmp.path()).unwrap();
        let loaded = AcquisitionParameter::load(tmp.path()).unwrap();

        assert_eq!(loaded, params);
    }

    #[test]
    fn test_load_partial_json_uses_defaults() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            r#"{ "larmor_frequency": 2.5e6, "ddc_method": "cic" }"#,
        )
        .unwrap();

        let loaded = AcquisitionParameter::load(tmp.path()).unwrap();

        assert_eq!(loaded.larmor_frequency, 2.5e6);
        assert_eq!(loaded.ddc_method, DdcMethod::Cic);
        assert_eq!(loaded.decimation, 200);
        assert_eq!(loaded.num_averages, 1);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), r#"{ "larmor_frequency": 64e6 }"#).unwrap();

        assert!(matches!(
            AcquisitionParameter::load(tmp.path()),
            Err(ConsoleError::Validation(_))
        ));
    }

    #[test]
    fn test_ddc_method_fromstr() {
        assert_eq!("fir".parse::<DdcMethod>().unwrap(), DdcMethod::Fir);
        assert_eq!("CIC".parse::<DdcMethod>().unwrap(), DdcMethod::Cic);
        assert!("avg".parse::<DdcMethod>().is_err());
        assert_eq!(DdcMethod::Cic.to_string(), "cic");
    }
}
