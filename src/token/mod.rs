//! Token Lifecycle
//!
//! Durable storage of the token record and the manager that keeps it fresh.
//!
//! This module provides:
//!
//! - **Credential Storage**: the store contract, an in-memory store and a mock
//! - **Local File Store**: `KEY=VALUE` token file with atomic replacement
//! - **Secrets Manager Store**: JSON secret in AWS Secrets Manager, SigV4-signed
//! - **AWS Credentials**: environment, container endpoint and IMDS providers, cached
//! - **Lifecycle Manager**: staleness, serialized refresh, persist-before-return

pub mod aws_credentials;
pub mod file_store;
pub mod manager;
pub mod secret_store;
pub mod sigv4;
pub mod storage;

// Credential Storage
pub use storage::{
    CredentialStore, InMemoryCredentialStore, MockCredentialStore, StoreSelection,
    DEFAULT_AWS_REGION, DEFAULT_SECRET_NAME, DEFAULT_TOKEN_FILE,
};

// Backends
pub use file_store::LocalFileStore;
pub use aws_credentials::{
    default_credential_chain, AwsCredentialChain, AwsCredentialProvider, AwsCredentials,
    CachedCredentialProvider, ContainerCredentialProvider, EnvironmentCredentialProvider,
    ImdsCredentialProvider,
};
pub use secret_store::SecretsManagerStore;

// Lifecycle Manager
pub use manager::{CredentialLifecycleManager, CredentialState};
