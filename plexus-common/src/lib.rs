// Plexus common utilities
//
// Shared building blocks for the plexus crates: component scoped logging,
// the logging macros and a few time helpers.

pub mod logging;
pub mod macros;
pub mod utils;

pub use logging::{Component, ComponentKey, LogLevel, Logger, LoggingConfig};
pub use utils::time::{current_time_ms, instant_after_epoch_ms};
