//! Credential Lifecycle Integration
//!
//! OAuth2 credential lifecycle and auth-aware call retry for SaaS REST
//! integrations.
//!
//! # Features
//!
//! - Durable token record in a local file or AWS Secrets Manager
//! - Staleness tracking with provider-reported expiry and a fixed-lifetime fallback
//! - Refresh-grant exchange (RFC 6749 Section 6) with rotating refresh tokens
//! - Single-flight refresh: concurrent callers share one exchange
//! - Rotated tokens are persisted before they are handed out
//! - One forced refresh and one retry when a call is rejected as unauthenticated
//!
//! # Example
//!
//! ```rust,ignore
//! use credential_lifecycle::quickbooks_from_env;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let qbo = quickbooks_from_env().await?;
//!
//!     let invoices = qbo
//!         .call(|client| async move { client.query("select * from Invoice").await })
//!         .await?;
//!
//!     println!("{}", invoices);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: token record, client identity, tokens and configuration
//! - `error`: error hierarchy with provider error mapping
//! - `core`: HTTP transport and clock
//! - `flows`: refresh-grant exchange (`AuthGateway`)
//! - `token`: credential stores and the lifecycle manager
//! - `client`: client factory and the bearer API client
//! - `resilience`: failure classification and the call wrapper
//! - `builders`: fluent configuration builder

pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod flows;
pub mod integration;
pub mod resilience;
pub mod token;
pub mod types;

// Re-export integration entry points
pub use integration::{
    quickbooks_from_env, quickbooks_with_transport, Integration, QuickBooksIntegration,
};

// Re-export builders
pub use builders::{lifecycle_config, LifecycleConfigBuilder};

// Re-export errors
pub use error::{
    create_error_from_response, get_user_message, map_token_error, parse_error_response,
    ApiError, ApiErrorKind, CallError, ConfigurationError, CredentialsError, LifecycleError,
    LifecycleResult, NetworkError, OAuth2ErrorResponse, ProtocolError, ProviderError,
    RefreshError, StorageError,
};

// Re-export types
pub use types::{
    // Config
    ClientAuthMethod, LifecycleConfig, DEFAULT_TOKEN_ENDPOINT,
    // Record
    ClientIdentity, Environment, TokenPair, TokenRecord, DEFAULT_REDIRECT_URI,
    // Token
    AccessToken, RefreshedTokens, TokenResponse,
};

// Re-export core components
pub use core::{
    // Transport
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport,
    ReqwestHttpTransport,
    // Clock
    Clock, ManualClock, SystemClock,
};

// Re-export flows
pub use flows::{AuthGateway, HttpAuthGateway, MockAuthGateway};

// Re-export token lifecycle
pub use token::{
    // Storage
    CredentialStore, InMemoryCredentialStore, MockCredentialStore, StoreSelection,
    // Backends
    LocalFileStore, SecretsManagerStore,
    // AWS credentials
    default_credential_chain, AwsCredentialChain, AwsCredentialProvider, AwsCredentials,
    CachedCredentialProvider, ContainerCredentialProvider, EnvironmentCredentialProvider,
    ImdsCredentialProvider,
    // Manager
    CredentialLifecycleManager, CredentialState,
};

// Re-export clients
pub use client::{
    parse_api_error, ApiClientBuilder, AuthenticatedClientFactory, BearerApiClient,
    BearerClientBuilder,
};

// Re-export resilience
pub use resilience::{
    classify_api_error, AuthSignal, CallStats, FailureClass, ResilientCallWrapper,
};
