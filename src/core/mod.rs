//! Core Components
//!
//! HTTP transport and clock abstractions shared by the lifecycle components.

pub mod clock;
pub mod transport;

pub use clock::*;
pub use transport::*;
