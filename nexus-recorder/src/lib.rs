pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod queue;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use metrics::*;
pub use queue::*;
