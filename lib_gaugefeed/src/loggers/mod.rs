//! # Loggers
//!
//! Subscriber setup for binaries. Requires the `loggers` feature.

pub mod logsetup;

pub use logsetup::{setup_logging, LogOptions};
