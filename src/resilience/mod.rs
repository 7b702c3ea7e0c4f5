//! Resilience
//!
//! Auth-aware retry for outbound API calls.
//!
//! This module provides:
//!
//! - **Classification**: closed set of authentication-failure signals
//! - **Call Wrapper**: one forced refresh and one retry on auth failure

pub mod classify;
pub mod wrapper;

// Classification
pub use classify::{classify_api_error, AuthSignal, FailureClass};

// Call Wrapper
pub use wrapper::{CallStats, ResilientCallWrapper};
