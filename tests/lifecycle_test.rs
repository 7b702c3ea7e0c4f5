//! Integration tests for the credential lifecycle with mock collaborators.

use chrono::{Duration as ChronoDuration, Utc};
use credential_lifecycle::{
    AccessToken, ApiClientBuilder, ApiError, CallError, ClientIdentity, CredentialLifecycleManager,
    CredentialState, Environment, Integration, LifecycleConfig, LifecycleError, LifecycleResult,
    ManualClock, MockAuthGateway, MockCredentialStore, NetworkError, ProviderError, RefreshError,
    StorageError, TokenRecord, DEFAULT_REDIRECT_URI,
};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Client that is just the token it was built with.
struct TokenClient;

impl ApiClientBuilder for TokenClient {
    type Client = String;

    fn build(
        &self,
        token: &AccessToken,
        _tenant_id: &str,
        _environment: Environment,
    ) -> LifecycleResult<String> {
        Ok(token.secret().to_string())
    }
}

fn identity() -> ClientIdentity {
    ClientIdentity::new("client", "secret", DEFAULT_REDIRECT_URI, Environment::Sandbox)
}

fn seeded_store() -> Arc<MockCredentialStore> {
    let store = Arc::new(MockCredentialStore::new());
    store.set_record(TokenRecord::new("9130", identity(), "A0", "R0"));
    store
}

struct Harness {
    integration: Integration<TokenClient>,
    store: Arc<MockCredentialStore>,
    gateway: Arc<MockAuthGateway>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let store = seeded_store();
    let gateway = Arc::new(MockAuthGateway::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let integration = Integration::with_clock(
        LifecycleConfig::default(),
        store.clone(),
        gateway.clone(),
        TokenClient,
        clock.clone(),
    );

    Harness {
        integration,
        store,
        gateway,
        clock,
    }
}

#[tokio::test]
async fn test_stale_token_rotates_refresh_token() {
    let h = harness();
    h.gateway.queue_tokens("A1", "R1").queue_tokens("A2", "R2");
    let manager = h.integration.manager();

    assert_eq!(manager.get_valid_access_token().await.unwrap().secret(), "A1");

    h.clock.advance(ChronoDuration::minutes(58));
    assert_eq!(manager.state().await, CredentialState::Stale);

    let token = manager.get_valid_access_token().await.unwrap();
    assert_eq!(token.secret(), "A2");
    assert_eq!(h.gateway.get_refresh_history(), vec!["R0", "R1"]);

    let stored = h.store.snapshot().unwrap();
    assert_eq!(stored.access_token(), Some("A2"));
    assert_eq!(stored.refresh_token(), Some("R2"));
    assert_eq!(stored.tenant_id(), "9130");
}

#[tokio::test]
async fn test_unauthorized_call_on_fresh_token_forces_refresh() {
    let h = harness();
    h.gateway.queue_tokens("A1", "R1").queue_tokens("A2", "R2");

    assert_eq!(*h.integration.get_client(false).await.unwrap(), "A1");
    h.clock.advance(ChronoDuration::minutes(2));

    let seen = Mutex::new(Vec::new());
    let result = h
        .integration
        .call(|client| {
            seen.lock().unwrap().push(client.to_string());
            async move {
                if client.as_str() == "A1" {
                    Err(ApiError::http(401, None, "Unauthorized"))
                } else {
                    Ok(format!("data via {}", client))
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(result, "data via A2");
    assert_eq!(*seen.lock().unwrap(), vec!["A1", "A2"]);
    assert_eq!(h.gateway.call_count(), 2);
    assert_eq!(h.store.snapshot().unwrap().refresh_token(), Some("R2"));
}

#[tokio::test]
async fn test_invalid_grant_fails_until_reload() {
    let h = harness();
    let manager = h.integration.manager();
    manager.get_valid_access_token().await.unwrap();

    h.gateway.queue_error(
        ProviderError::InvalidGrant {
            message: "Token invalid".to_string(),
        }
        .into(),
    );
    let error = manager.force_refresh().await.unwrap_err();
    assert!(matches!(
        error,
        LifecycleError::Refresh(RefreshError::Rejected { .. })
    ));
    assert!(error.needs_reauth());
    assert_eq!(manager.state().await, CredentialState::Failed);

    // No further exchanges while failed.
    h.clock.advance(ChronoDuration::hours(2));
    assert!(manager.get_valid_access_token().await.is_err());
    assert!(manager.force_refresh().await.is_err());

    let invoked = AtomicUsize::new(0);
    let call = h
        .integration
        .call(|_client| {
            invoked.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ApiError>(()) }
        })
        .await;
    assert!(matches!(
        call,
        Err(LifecycleError::Refresh(RefreshError::Rejected { .. }))
    ));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(h.gateway.call_count(), 2);

    // Operator re-authorizes out of band.
    h.store
        .set_record(TokenRecord::new("9130", identity(), "A9", "R9"));
    manager.reload().await.unwrap();
    manager.get_valid_access_token().await.unwrap();
    assert_eq!(h.gateway.get_refresh_history().last().map(String::as_str), Some("R9"));
}

#[tokio::test]
async fn test_concurrent_callers_share_one_exchange() {
    let store = seeded_store();
    let gateway = Arc::new(MockAuthGateway::new());
    gateway.set_delay(Duration::from_millis(50));
    let manager = Arc::new(CredentialLifecycleManager::new(
        LifecycleConfig::default(),
        store.clone(),
        gateway.clone(),
    ));

    let results = join_all((0..16).map(|_| {
        let manager = manager.clone();
        async move { manager.get_valid_access_token().await }
    }))
    .await;

    assert_eq!(gateway.call_count(), 1);
    for result in results {
        assert_eq!(result.unwrap().secret(), "access-1");
    }
    assert_eq!(store.get_save_history().len(), 1);
}

#[tokio::test]
async fn test_concurrent_callers_share_a_failed_exchange() {
    let store = seeded_store();
    let gateway = Arc::new(MockAuthGateway::new());
    gateway.set_delay(Duration::from_millis(50));
    gateway.queue_error(
        NetworkError::ConnectionFailed {
            message: "connection reset".to_string(),
        }
        .into(),
    );
    let manager = Arc::new(CredentialLifecycleManager::new(
        LifecycleConfig::default(),
        store,
        gateway.clone(),
    ));

    let results = join_all((0..8).map(|_| {
        let manager = manager.clone();
        async move { manager.get_valid_access_token().await }
    }))
    .await;

    assert_eq!(gateway.call_count(), 1);
    for result in results {
        assert!(matches!(
            result,
            Err(LifecycleError::Refresh(RefreshError::Unavailable { .. }))
        ));
    }
}

#[tokio::test]
async fn test_concurrent_auth_failures_refresh_once() {
    let h = harness();
    h.integration.get_client(false).await.unwrap();
    h.gateway.set_delay(Duration::from_millis(20));

    let results = join_all((0..4).map(|_| {
        h.integration.call(|client| async move {
            if client.as_str() == "access-1" {
                Err(ApiError::http(401, None, "Unauthorized"))
            } else {
                Ok(client.to_string())
            }
        })
    }))
    .await;

    for result in results {
        assert_eq!(result.unwrap(), "access-2");
    }
    assert_eq!(h.gateway.call_count(), 2);
}

#[tokio::test]
async fn test_cancelled_refresh_resets_in_flight() {
    let store = seeded_store();
    let gateway = Arc::new(MockAuthGateway::new());
    gateway.set_delay(Duration::from_millis(200));
    let manager = CredentialLifecycleManager::new(LifecycleConfig::default(), store, gateway.clone());

    let cancelled =
        tokio::time::timeout(Duration::from_millis(20), manager.get_valid_access_token()).await;
    assert!(cancelled.is_err());
    assert!(!manager.is_refreshing());
    assert_ne!(manager.state().await, CredentialState::Refreshing);

    assert!(manager.get_valid_access_token().await.is_ok());
    assert_eq!(gateway.call_count(), 2);
}

#[tokio::test]
async fn test_rotated_tokens_persisted_before_use() {
    let h = harness();
    h.gateway.queue_tokens("A1", "R1");
    h.store.fail_next_saves(2);
    let manager = h.integration.manager();

    let invoked = AtomicUsize::new(0);
    let call = h
        .integration
        .call(|_client| {
            invoked.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ApiError>(()) }
        })
        .await;
    assert!(matches!(
        call,
        Err(LifecycleError::Storage(StorageError::Unpersisted { .. }))
    ));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    // Still failing: the held token stays withheld.
    assert!(manager.get_valid_access_token().await.is_err());

    let token = manager.get_valid_access_token().await.unwrap();
    assert_eq!(token.secret(), "A1");
    assert_eq!(h.gateway.call_count(), 1);
    assert_eq!(h.store.get_save_history().len(), 1);
}

#[tokio::test]
async fn test_operation_invoked_at_most_twice() {
    let h = harness();
    let invoked = AtomicUsize::new(0);

    let error = h
        .integration
        .call(|_client| {
            invoked.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(ApiError::http(
                    401,
                    Some("3200".to_string()),
                    "AuthenticationFailed",
                ))
            }
        })
        .await
        .unwrap_err();

    assert_eq!(invoked.load(Ordering::SeqCst), 2);
    match error {
        LifecycleError::Call(CallError::AuthRejected { source }) => {
            assert_eq!(source.provider_code.as_deref(), Some("3200"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_other_failure_after_retry_is_surfaced() {
    let h = harness();
    let invoked = AtomicUsize::new(0);

    let error = h
        .integration
        .call(|_client| {
            let n = invoked.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err::<(), _>(ApiError::http(401, None, "Unauthorized"))
                } else {
                    Err(ApiError::http(503, None, "Service Unavailable"))
                }
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        LifecycleError::Call(CallError::Failed { retried: true, .. })
    ));
    assert!(error.is_retryable());
}
