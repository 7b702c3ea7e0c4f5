//! API Clients
//!
//! Authenticated client construction for the wrapped SaaS APIs.

pub mod bearer;
pub mod factory;

pub use bearer::{
    parse_api_error, BearerApiClient, BearerClientBuilder, QUICKBOOKS_PRODUCTION_BASE,
    QUICKBOOKS_SANDBOX_BASE,
};
pub use factory::{ApiClientBuilder, AuthenticatedClientFactory};
