//! Ядро консоли: развёртка последовательности, упаковка цифровых
//! сигналов, кольцевой буфер DMA и понижающее преобразование.
//!
//! # Быстрый старт
//!
//! ```no_run
//! use nexus_core::{SequenceUnroller, UnrolledSequenceExt};
//! use nexus_types::{AcquisitionParameter, BlockSequence, RfEvent, SequenceBlock};
//!
//! let seq = BlockSequence::new(vec![
//!     SequenceBlock::new(1e-4).with_rf(RfEvent::block_pulse(100.0, 5e-5)),
//! ]);
//! let mut unroller = SequenceUnroller::new(5e-8, 1.0, 1.0, [200.0; 4]);
//! let unrolled = unroller.unroll(&seq, &AcquisitionParameter::default())?;
//! let bytes = unrolled.to_le_bytes();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod binary;
pub mod ddc;
pub mod digital;
pub mod resample;
pub mod ring_buffer;
pub mod unroll;

pub use binary::*;
pub use ddc::*;
pub use digital::*;
pub use resample::*;
pub use ring_buffer::*;
pub use unroll::*;

/// Версия библиотеки.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
