//! Оркестратор сбора данных консоли МРТ.
//!
//! [`AcquisitionControl`] связывает развёртку последовательности, движки
//! передачи и приёма и DDC: по одному запуску карт на усреднение, окна
//! группируются по длине и складываются по усреднениям в
//! [`AcquisitionData`].

pub mod config;
pub mod control;
pub mod data;
pub mod demo;
pub mod error;

pub use config::*;
pub use control::*;
pub use data::*;
pub use demo::*;
pub use error::*;
