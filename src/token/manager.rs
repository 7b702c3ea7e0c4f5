//! Credential Lifecycle Manager
//!
//! Owns the in-memory token record, decides when it is stale, and refreshes
//! it through the auth gateway. Refreshes are serialized: one exchange at a
//! time, with concurrent callers receiving the outcome of the exchange they
//! waited on.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::{Clock, SystemClock};
use crate::error::{
    CredentialsError, LifecycleError, LifecycleResult, NetworkError, RefreshError, StorageError,
};
use crate::flows::AuthGateway;
use crate::token::CredentialStore;
use crate::types::{AccessToken, Environment, LifecycleConfig, RefreshedTokens, TokenRecord};

/// Observable lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialState {
    /// The store has not been read yet.
    Uninitialized,
    /// A complete record is held and fresh.
    Valid,
    /// A complete record is held but due for refresh.
    Stale,
    /// A refresh-grant exchange is in flight.
    Refreshing,
    /// No usable credentials until the store is reloaded.
    Failed,
}

#[derive(Clone, Copy)]
enum Acquire {
    IfStale,
    /// Refresh regardless of age, unless the token has already been replaced
    /// since the given generation.
    Force { rejected_generation: Option<u64> },
}

#[derive(Default)]
struct Inner {
    initialized: bool,
    record: Option<TokenRecord>,
    /// Sticky failure; cleared only by `reload`.
    failed: Option<LifecycleError>,
    last_refresh_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    /// Rotated tokens held in memory that the store has not accepted yet.
    unpersisted: bool,
    /// Outcome of the most recent exchange, shared with callers that waited on it.
    last_attempt: Option<Result<(), LifecycleError>>,
}

/// Sets the in-flight flag for its lifetime.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Credential lifecycle manager.
///
/// Construct one per credential set and share it by `Arc`.
pub struct CredentialLifecycleManager {
    config: LifecycleConfig,
    store: Arc<dyn CredentialStore>,
    gateway: Arc<dyn AuthGateway>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    attempts: AtomicU64,
    generation: AtomicU64,
    refresh_in_flight: AtomicBool,
}

impl CredentialLifecycleManager {
    /// Create an uninitialized manager. The store is read on first use.
    pub fn new(
        config: LifecycleConfig,
        store: Arc<dyn CredentialStore>,
        gateway: Arc<dyn AuthGateway>,
    ) -> Self {
        Self {
            config,
            store,
            gateway,
            clock: Arc::new(SystemClock),
            inner: Mutex::new(Inner::default()),
            attempts: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            refresh_in_flight: AtomicBool::new(false),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create a manager and load the stored record immediately.
    pub async fn open(
        config: LifecycleConfig,
        store: Arc<dyn CredentialStore>,
        gateway: Arc<dyn AuthGateway>,
    ) -> LifecycleResult<Self> {
        let manager = Self::new(config, store, gateway);
        manager.initialize().await?;
        Ok(manager)
    }

    /// Load the stored record if that has not happened yet.
    pub async fn initialize(&self) -> LifecycleResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.initialized {
            self.load_into(&mut inner).await?;
        }
        match &inner.failed {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// Re-read the store, replacing the in-memory record.
    ///
    /// This is the only way out of `Failed`: after an operator re-authorizes
    /// and a complete record is stored, `reload` picks it up.
    pub async fn reload(&self) -> LifecycleResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.unpersisted {
            warn!(
                location = %self.store.location(),
                "discarding rotated tokens that were never persisted"
            );
        }
        self.load_into(&mut inner).await
    }

    /// Return an access token that is not stale, refreshing first if needed.
    pub async fn get_valid_access_token(&self) -> LifecycleResult<AccessToken> {
        self.acquire(Acquire::IfStale).await.map(|(token, _)| token)
    }

    /// Refresh now, regardless of the token's age.
    pub async fn force_refresh(&self) -> LifecycleResult<AccessToken> {
        self.acquire(Acquire::Force {
            rejected_generation: None,
        })
        .await
        .map(|(token, _)| token)
    }

    /// Valid token together with the generation it belongs to.
    pub(crate) async fn token_with_generation(&self) -> LifecycleResult<(AccessToken, u64)> {
        self.acquire(Acquire::IfStale).await
    }

    /// Force a refresh because the token of `generation` was rejected. If the
    /// token has been replaced since, the replacement is returned instead.
    pub(crate) async fn refresh_rejected(
        &self,
        generation: u64,
    ) -> LifecycleResult<(AccessToken, u64)> {
        self.acquire(Acquire::Force {
            rejected_generation: Some(generation),
        })
        .await
    }

    /// Current state.
    pub async fn state(&self) -> CredentialState {
        if self.is_refreshing() {
            return CredentialState::Refreshing;
        }

        let inner = self.inner.lock().await;
        if !inner.initialized {
            CredentialState::Uninitialized
        } else if inner.failed.is_some() || inner.record.is_none() {
            CredentialState::Failed
        } else if self.is_stale(&inner, self.clock.now()) {
            CredentialState::Stale
        } else {
            CredentialState::Valid
        }
    }

    /// Whether a refresh-grant exchange is running.
    pub fn is_refreshing(&self) -> bool {
        self.refresh_in_flight.load(Ordering::SeqCst)
    }

    /// Incremented whenever the held token pair is replaced.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Tenant of the loaded record.
    pub async fn tenant_id(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.record.as_ref().map(|r| r.tenant_id().to_string())
    }

    /// Provider environment of the loaded record.
    pub async fn environment(&self) -> Option<Environment> {
        let inner = self.inner.lock().await;
        inner.record.as_ref().map(|r| r.identity().environment)
    }

    /// When the held token was obtained by this manager.
    pub async fn last_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.last_refresh_at
    }

    async fn acquire(&self, mode: Acquire) -> LifecycleResult<(AccessToken, u64)> {
        let observed = self.attempts.load(Ordering::SeqCst);
        let mut inner = self.inner.lock().await;

        if !inner.initialized {
            self.load_into(&mut inner).await?;
        }
        if let Some(error) = &inner.failed {
            return Err(error.clone());
        }
        if inner.unpersisted {
            self.persist(&mut inner).await?;
        }

        let now = self.clock.now();
        let needs_refresh = match mode {
            Acquire::IfStale => self.is_stale(&inner, now),
            Acquire::Force {
                rejected_generation: Some(generation),
            } => self.generation() <= generation,
            Acquire::Force {
                rejected_generation: None,
            } => true,
        };
        if !needs_refresh {
            return self.current(&inner);
        }

        if self.attempts.load(Ordering::SeqCst) != observed {
            // An exchange finished while this caller waited for the lock.
            if let Some(Err(error)) = &inner.last_attempt {
                return Err(error.clone());
            }
            return self.current(&inner);
        }

        self.refresh_locked(&mut inner, now).await
    }

    async fn refresh_locked(
        &self,
        inner: &mut Inner,
        now: DateTime<Utc>,
    ) -> LifecycleResult<(AccessToken, u64)> {
        let record = match inner.record.clone() {
            Some(record) => record,
            None => return Err(no_record()),
        };
        let refresh_token = record.refresh_token().unwrap_or_default().to_string();

        let _in_flight = InFlight::enter(&self.refresh_in_flight);
        info!(tenant_id = %record.tenant_id(), "refreshing access token");

        let timeout = self.config.http_timeout;
        let outcome = tokio::time::timeout(
            timeout,
            self.gateway.refresh(&refresh_token, record.identity()),
        )
        .await
        .unwrap_or_else(|_| Err(NetworkError::Timeout { timeout }.into()));
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let tokens = match outcome {
            Ok(tokens) => tokens,
            Err(e) => {
                let error = self.refresh_failure(inner, e);
                inner.last_attempt = Some(Err(error.clone()));
                return Err(error);
            }
        };

        self.install(inner, &record, tokens, now);
        let result = self.persist(inner).await;
        inner.last_attempt = Some(result.clone());
        result?;

        info!(
            tenant_id = %record.tenant_id(),
            generation = self.generation(),
            "access token refreshed"
        );
        self.current(inner)
    }

    fn install(
        &self,
        inner: &mut Inner,
        record: &TokenRecord,
        tokens: RefreshedTokens,
        now: DateTime<Utc>,
    ) {
        inner.expires_at = tokens
            .expires_in
            .map(|secs| now + chrono_duration(Duration::from_secs(secs)));
        inner.record = Some(record.with_tokens(tokens.access_token, tokens.refresh_token));
        inner.last_refresh_at = Some(now);
        inner.unpersisted = true;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn refresh_failure(&self, inner: &mut Inner, error: LifecycleError) -> LifecycleError {
        if error.rejects_refresh_token() {
            error!(
                code = error.error_code(),
                error = %error,
                "refresh token rejected; re-authorization required"
            );
            let rejected: LifecycleError = RefreshError::Rejected {
                reason: error.to_string(),
            }
            .into();
            inner.failed = Some(rejected.clone());
            rejected
        } else {
            warn!(code = error.error_code(), error = %error, "refresh-grant exchange failed");
            RefreshError::Unavailable {
                reason: error.to_string(),
            }
            .into()
        }
    }

    /// Write the held record to the store. On failure the record stays in
    /// memory, flagged for another attempt on the next access.
    async fn persist(&self, inner: &mut Inner) -> LifecycleResult<()> {
        let record = match inner.record.as_ref() {
            Some(record) => record,
            None => return Ok(()),
        };

        let timeout = self.config.http_timeout;
        let result = match tokio::time::timeout(timeout, self.store.save(record)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout { timeout }.into()),
        };

        match result {
            Ok(()) => {
                if inner.unpersisted {
                    debug!(location = %self.store.location(), "rotated tokens persisted");
                }
                inner.unpersisted = false;
                Ok(())
            }
            Err(e) => {
                error!(
                    location = %self.store.location(),
                    error = %e,
                    "failed to persist rotated tokens; holding them in memory"
                );
                inner.unpersisted = true;
                Err(StorageError::Unpersisted {
                    message: e.to_string(),
                }
                .into())
            }
        }
    }

    async fn load_into(&self, inner: &mut Inner) -> LifecycleResult<()> {
        let location = self.store.location();
        let loaded = self.store.load().await;

        let error: LifecycleError = match loaded {
            Ok(record) if record.is_complete() => {
                info!(location = %location, tenant_id = %record.tenant_id(), "credentials loaded");
                *inner = Inner {
                    initialized: true,
                    record: Some(record),
                    ..Inner::default()
                };
                self.generation.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            Ok(record) if record.tokens().is_none() => CredentialsError::NotFound {
                location: location.clone(),
            }
            .into(),
            Ok(_) => CredentialsError::Incomplete {
                message: "record has no tenant id".to_string(),
            }
            .into(),
            Err(LifecycleError::Storage(StorageError::NotFound { location })) => {
                CredentialsError::NotFound { location }.into()
            }
            Err(e @ LifecycleError::Credentials(_)) => e,
            Err(e) => {
                // Read failures are retried on the next access.
                warn!(location = %location, error = %e, "failed to load credentials");
                return Err(e);
            }
        };

        error!(location = %location, error = %error, "no usable credentials");
        *inner = Inner {
            initialized: true,
            failed: Some(error.clone()),
            ..Inner::default()
        };
        Err(error)
    }

    fn is_stale(&self, inner: &Inner, now: DateTime<Utc>) -> bool {
        let last_refresh_at = match inner.last_refresh_at {
            Some(at) => at,
            None => return true,
        };

        if self.config.prefer_provider_expiry {
            if let Some(expires_at) = inner.expires_at {
                return now + chrono_duration(self.config.refresh_margin) >= expires_at;
            }
        }

        now - last_refresh_at > chrono_duration(self.config.staleness_threshold())
    }

    fn current(&self, inner: &Inner) -> LifecycleResult<(AccessToken, u64)> {
        let access_token = inner
            .record
            .as_ref()
            .and_then(TokenRecord::access_token)
            .ok_or_else(no_record)?;

        Ok((
            AccessToken::new(
                access_token.to_string(),
                inner.last_refresh_at,
                inner.expires_at,
            ),
            self.generation(),
        ))
    }
}

fn no_record() -> LifecycleError {
    CredentialsError::Incomplete {
        message: "no token pair held".to_string(),
    }
    .into()
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
