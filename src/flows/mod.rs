//! OAuth2 Flows
//!
//! Grant exchanges used by the credential lifecycle. Only the refresh grant
//! is performed here; the initial authorization-code exchange happens
//! out-of-band and produces the first stored record.

pub mod refresh;

pub use refresh::{AuthGateway, HttpAuthGateway, MockAuthGateway};
