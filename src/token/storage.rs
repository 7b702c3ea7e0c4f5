//! Credential Storage
//!
//! Durable persistence contract for the token record, plus in-memory and
//! mock implementations.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::core::HttpTransport;
use crate::error::{LifecycleError, StorageError};
use crate::token::file_store::LocalFileStore;
use crate::token::aws_credentials::default_credential_chain;
use crate::token::secret_store::SecretsManagerStore;
use crate::types::{ClientIdentity, LifecycleConfig, TokenRecord};

/// Credential store interface.
///
/// Stores do no caching; the lifecycle manager owns the in-memory copy.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the stored record. Fails with `StorageError::NotFound` when none exists.
    async fn load(&self) -> Result<TokenRecord, LifecycleError>;

    /// Replace the stored record wholesale.
    async fn save(&self, record: &TokenRecord) -> Result<(), LifecycleError>;

    /// Whether a record exists. Read errors count as absent.
    async fn exists(&self) -> bool;

    /// Human-readable location for logs and errors.
    fn location(&self) -> String;
}

/// In-memory credential store.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    record: Mutex<Option<TokenRecord>>,
}

impl InMemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `record`.
    pub fn with_record(record: TokenRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    /// Current contents without going through `load`.
    pub fn snapshot(&self) -> Option<TokenRecord> {
        self.record.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self) -> Result<TokenRecord, LifecycleError> {
        self.record.lock().unwrap().clone().ok_or_else(|| {
            StorageError::NotFound {
                location: self.location(),
            }
            .into()
        })
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), LifecycleError> {
        *self.record.lock().unwrap() = Some(record.clone());
        Ok(())
    }

    async fn exists(&self) -> bool {
        self.record.lock().unwrap().is_some()
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// Mock credential store for testing.
#[derive(Default)]
pub struct MockCredentialStore {
    record: Mutex<Option<TokenRecord>>,
    save_history: Mutex<Vec<TokenRecord>>,
    load_count: Mutex<usize>,
    failing_saves: Mutex<usize>,
    fail_loads: Mutex<bool>,
}

impl MockCredentialStore {
    /// Create new empty mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the record.
    pub fn set_record(&self, record: TokenRecord) -> &Self {
        *self.record.lock().unwrap() = Some(record);
        self
    }

    /// Make the next `count` saves fail with a write error.
    pub fn fail_next_saves(&self, count: usize) -> &Self {
        *self.failing_saves.lock().unwrap() = count;
        self
    }

    /// Make every load fail with a read error.
    pub fn set_fail_loads(&self, fail: bool) -> &Self {
        *self.fail_loads.lock().unwrap() = fail;
        self
    }

    /// Records successfully saved, in order.
    pub fn get_save_history(&self) -> Vec<TokenRecord> {
        self.save_history.lock().unwrap().clone()
    }

    /// Number of `load` calls.
    pub fn load_count(&self) -> usize {
        *self.load_count.lock().unwrap()
    }

    /// Current stored record.
    pub fn snapshot(&self) -> Option<TokenRecord> {
        self.record.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn load(&self) -> Result<TokenRecord, LifecycleError> {
        *self.load_count.lock().unwrap() += 1;

        if *self.fail_loads.lock().unwrap() {
            return Err(StorageError::ReadFailed {
                message: "Mock storage failure".to_string(),
            }
            .into());
        }

        self.record.lock().unwrap().clone().ok_or_else(|| {
            StorageError::NotFound {
                location: self.location(),
            }
            .into()
        })
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), LifecycleError> {
        {
            let mut failing = self.failing_saves.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(StorageError::WriteFailed {
                    message: "Mock storage failure".to_string(),
                }
                .into());
            }
        }

        self.save_history.lock().unwrap().push(record.clone());
        *self.record.lock().unwrap() = Some(record.clone());
        Ok(())
    }

    async fn exists(&self) -> bool {
        !*self.fail_loads.lock().unwrap() && self.record.lock().unwrap().is_some()
    }

    fn location(&self) -> String {
        "mock".to_string()
    }
}

/// Default local token file.
pub const DEFAULT_TOKEN_FILE: &str = ".qbo_tokens";

/// Default secret name in AWS Secrets Manager.
pub const DEFAULT_SECRET_NAME: &str = "qbo-ai/tokens";

/// Default AWS region.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Which backend holds the token record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreSelection {
    /// `KEY=VALUE` file on local disk.
    LocalFile { path: PathBuf },
    /// JSON secret in AWS Secrets Manager.
    SecretsManager { secret_id: String, region: String },
}

impl StoreSelection {
    /// Pick a backend from the environment.
    ///
    /// Running on AWS (`AWS_EXECUTION_ENV` or
    /// `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` set) selects Secrets Manager
    /// with `QBO_SECRET_NAME` and `AWS_REGION`; otherwise the local file at
    /// `QBO_TOKEN_FILE` is used.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let on_aws = var("AWS_EXECUTION_ENV").is_some()
            || var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI").is_some();

        if on_aws {
            Self::SecretsManager {
                secret_id: var("QBO_SECRET_NAME").unwrap_or_else(|| DEFAULT_SECRET_NAME.to_string()),
                region: var("AWS_REGION")
                    .or_else(|| var("AWS_DEFAULT_REGION"))
                    .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string()),
            }
        } else {
            Self::LocalFile {
                path: PathBuf::from(
                    var("QBO_TOKEN_FILE").unwrap_or_else(|| DEFAULT_TOKEN_FILE.to_string()),
                ),
            }
        }
    }

    /// Build the selected store.
    ///
    /// The local file only holds tokens, so it needs the static `identity`.
    /// The secret carries its own identity; its requests are signed with
    /// credentials from the environment, the ECS container endpoint or the
    /// instance metadata service, resolved on use and renewed before expiry.
    pub fn build<T: HttpTransport + 'static>(
        &self,
        config: &LifecycleConfig,
        identity: Option<ClientIdentity>,
        transport: Arc<T>,
    ) -> Result<Arc<dyn CredentialStore>, LifecycleError> {
        match self {
            Self::LocalFile { path } => {
                let identity = match identity {
                    Some(identity) => identity,
                    None => ClientIdentity::from_env()?,
                };
                Ok(Arc::new(LocalFileStore::new(path.clone(), identity)))
            }
            Self::SecretsManager { secret_id, region } => {
                let credentials = default_credential_chain(transport.clone());
                Ok(Arc::new(
                    SecretsManagerStore::new(secret_id.clone(), region.clone(), credentials, transport)
                        .with_timeout(config.http_timeout),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Environment, DEFAULT_REDIRECT_URI};

    fn record(access: &str, refresh: &str) -> TokenRecord {
        let identity =
            ClientIdentity::new("client", "secret", DEFAULT_REDIRECT_URI, Environment::Sandbox);
        TokenRecord::new("realm-1", identity, access, refresh)
    }

    #[tokio::test]
    async fn test_in_memory_load_missing() {
        let store = InMemoryCredentialStore::new();

        assert!(!store.exists().await);
        let result = store.load().await;
        assert!(matches!(
            result,
            Err(LifecycleError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_save_overwrites() {
        let store = InMemoryCredentialStore::with_record(record("A1", "R1"));
        store.save(&record("A2", "R2")).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.refresh_token(), Some("R2"));
    }

    #[tokio::test]
    async fn test_mock_store_save_failures() {
        let store = MockCredentialStore::new();
        store.fail_next_saves(1);

        assert!(store.save(&record("A1", "R1")).await.is_err());
        assert!(store.save(&record("A2", "R2")).await.is_ok());

        let history = store.get_save_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].access_token(), Some("A2"));
    }

    #[tokio::test]
    async fn test_mock_store_exists_treats_read_error_as_absent() {
        let store = MockCredentialStore::new();
        store.set_record(record("A1", "R1"));
        assert!(store.exists().await);

        store.set_fail_loads(true);
        assert!(!store.exists().await);
    }

    fn lookup(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name: &str| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_selects_local_file_off_aws() {
        let selection = StoreSelection::from_lookup(lookup(&[("QBO_TOKEN_FILE", "/tmp/tokens")]));
        assert_eq!(
            selection,
            StoreSelection::LocalFile {
                path: PathBuf::from("/tmp/tokens")
            }
        );
    }

    #[test]
    fn test_selects_secrets_manager_on_ecs() {
        let selection = StoreSelection::from_lookup(lookup(&[
            ("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI", "/v2/credentials/abc"),
            ("AWS_DEFAULT_REGION", "eu-west-1"),
        ]));
        assert_eq!(
            selection,
            StoreSelection::SecretsManager {
                secret_id: DEFAULT_SECRET_NAME.to_string(),
                region: "eu-west-1".to_string(),
            }
        );
    }

    #[test]
    fn test_build_secrets_manager_without_static_keys() {
        let selection = StoreSelection::from_lookup(lookup(&[
            ("AWS_EXECUTION_ENV", "AWS_ECS_FARGATE"),
            ("QBO_SECRET_NAME", "prod/qbo"),
        ]));
        let transport = Arc::new(crate::core::MockHttpTransport::new());

        let store = selection
            .build(&LifecycleConfig::default(), None, transport.clone())
            .unwrap();
        assert_eq!(store.location(), "secretsmanager:us-east-1/prod/qbo");
        assert!(transport.get_requests().is_empty());
    }
}
