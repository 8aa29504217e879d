pub mod card;
pub mod error;
pub mod hal;
pub mod registers;
#[cfg(feature = "sim")]
pub mod sim;

pub use card::*;
pub use error::*;
pub use hal::*;
pub use registers::*;
#[cfg(feature = "sim")]
pub use sim::*;
