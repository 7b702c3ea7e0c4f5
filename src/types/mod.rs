//! Lifecycle Types
//!
//! Core type definitions for credential records, tokens and configuration.

pub mod config;
pub mod record;
pub mod token;

pub use config::*;
pub use record::*;
pub use token::*;
