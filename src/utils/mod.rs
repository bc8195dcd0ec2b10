//! Shared helpers: logging setup, timing and polling.

mod logger;
mod sampler;
mod timer;

pub use logger::{init_logger, LogLevel};
pub use sampler::{SamplerError, TimeoutSampler};
pub use timer::Timer;
