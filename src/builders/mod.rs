//! Builders
//!
//! Fluent builders for lifecycle configuration.

pub mod config;

pub use config::*;
