pub mod error;
pub mod gate;
pub mod parameter;
pub mod sequence;
pub mod unrolled;

pub use error::*;
pub use gate::*;
pub use parameter::*;
pub use sequence::*;
pub use unrolled::*;

pub use num_complex::Complex64;
