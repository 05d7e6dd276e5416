//! Infrastructure layer module
//!
//! - Configuration loading (figment)
//! - Logging (tracing-subscriber, tracing-appender, secret scrubbing)

pub mod config;
pub mod logging;
