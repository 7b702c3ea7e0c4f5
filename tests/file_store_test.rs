//! Lifecycle tests against the local file store.

use credential_lifecycle::{
    ClientIdentity, CredentialLifecycleManager, CredentialState, CredentialsError, Environment,
    LifecycleConfig, LifecycleError, LocalFileStore, MockAuthGateway, ProviderError,
    DEFAULT_REDIRECT_URI,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

fn identity() -> ClientIdentity {
    ClientIdentity::new("client", "secret", DEFAULT_REDIRECT_URI, Environment::Production)
}

fn manager_over(dir: &TempDir, gateway: Arc<MockAuthGateway>) -> CredentialLifecycleManager {
    let store = Arc::new(LocalFileStore::new(dir.path().join("tokens.env"), identity()));
    CredentialLifecycleManager::new(LifecycleConfig::default(), store, gateway)
}

#[tokio::test]
async fn test_rotation_rewrites_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tokens.env");
    std::fs::write(
        &path,
        "# issued by the playground\nACCESS_TOKEN=A0\nREFRESH_TOKEN=R0\nREALM_ID=9130\n",
    )
    .unwrap();

    let gateway = Arc::new(MockAuthGateway::new());
    gateway.queue_tokens("A1", "R1");
    let manager = manager_over(&dir, gateway.clone());

    let token = manager.get_valid_access_token().await.unwrap();
    assert_eq!(token.secret(), "A1");
    assert_eq!(manager.tenant_id().await.as_deref(), Some("9130"));
    assert_eq!(manager.environment().await, Some(Environment::Production));

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("ACCESS_TOKEN=A1"));
    assert!(contents.contains("REFRESH_TOKEN=R1"));
    assert!(contents.contains("REALM_ID=9130"));
    assert_eq!(gateway.get_refresh_history(), vec!["R0"]);
}

#[tokio::test]
async fn test_missing_file_reports_not_found() {
    let dir = TempDir::new().unwrap();
    let manager = manager_over(&dir, Arc::new(MockAuthGateway::new()));

    let error = manager.initialize().await.unwrap_err();
    assert!(matches!(
        error,
        LifecycleError::Credentials(CredentialsError::NotFound { .. })
    ));
    assert!(error.needs_reauth());
    assert_eq!(manager.state().await, CredentialState::Failed);
}

#[tokio::test]
async fn test_operator_rewrite_then_reload_recovers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tokens.env");
    std::fs::write(&path, "ACCESS_TOKEN=A0\nREFRESH_TOKEN=R0\nREALM_ID=9130\n").unwrap();

    let gateway = Arc::new(MockAuthGateway::new());
    gateway.queue_error(
        ProviderError::InvalidGrant {
            message: "Incorrect Token type or clientID".to_string(),
        }
        .into(),
    );
    let manager = manager_over(&dir, gateway.clone());

    assert_err!(manager.get_valid_access_token().await);
    assert_eq!(manager.state().await, CredentialState::Failed);

    // Re-authorized out of band; tenant key spelled the generic way.
    std::fs::write(&path, "access_token=A5\nrefresh_token=R5\ntenant_id=4620\n").unwrap();
    assert_ok!(manager.reload().await);

    let token = manager.get_valid_access_token().await.unwrap();
    assert_eq!(token.secret(), "access-2");
    assert_eq!(manager.tenant_id().await.as_deref(), Some("4620"));
    assert_eq!(gateway.get_refresh_history(), vec!["R0", "R5"]);
    assert!(std::fs::read_to_string(&path)
        .unwrap()
        .contains("REFRESH_TOKEN=refresh-2"));
}
