//! Resilient Call Wrapper
//!
//! Runs an API operation with the cached client. When the failure is
//! classified as an authentication rejection, the token is force-refreshed,
//! the client rebuilt and the operation retried exactly once.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::{ApiClientBuilder, AuthenticatedClientFactory};
use crate::error::{ApiError, CallError, LifecycleError, LifecycleResult};
use crate::resilience::classify::{classify_api_error, FailureClass};
use crate::token::CredentialLifecycleManager;

/// Wrapper statistics.
#[derive(Debug, Clone, Default)]
pub struct CallStats {
    pub total_calls: u64,
    pub total_invocations: u64,
    /// Calls that hit an auth failure and were retried after a refresh.
    pub auth_retries: u64,
    /// Retried calls that succeeded.
    pub successful_retries: u64,
    pub failed_calls: u64,
}

/// Auth-aware call wrapper.
pub struct ResilientCallWrapper<B: ApiClientBuilder> {
    manager: Arc<CredentialLifecycleManager>,
    factory: Arc<AuthenticatedClientFactory<B>>,
    call_timeout: Duration,
    stats: Mutex<CallStats>,
}

impl<B: ApiClientBuilder> ResilientCallWrapper<B> {
    /// `factory` must be bound to `manager`.
    pub fn new(
        manager: Arc<CredentialLifecycleManager>,
        factory: Arc<AuthenticatedClientFactory<B>>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            factory,
            call_timeout,
            stats: Mutex::new(CallStats::default()),
        }
    }

    /// Run `operation`, classifying failures with `classify`.
    ///
    /// The operation runs at most twice. A failed forced refresh is returned
    /// as is and the operation is not retried.
    pub async fn call<T, F, Fut, C>(&self, operation: F, classify: C) -> LifecycleResult<T>
    where
        F: Fn(Arc<B::Client>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
        C: Fn(&ApiError) -> FailureClass,
    {
        self.record(|s| s.total_calls += 1);

        let (client, generation) = self.factory.client_with_generation(false).await?;
        let error = match self.invoke(&operation, client).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if classify(&error) == FailureClass::Other {
            self.record(|s| s.failed_calls += 1);
            return Err(CallError::Failed {
                source: error,
                retried: false,
            }
            .into());
        }

        warn!(
            status = ?error.status,
            provider_code = ?error.provider_code,
            "call rejected as unauthenticated; refreshing and retrying once"
        );
        self.record(|s| s.auth_retries += 1);

        let failure = match self.retry_after_refresh(&operation, generation).await {
            Ok(value) => {
                self.record(|s| s.successful_retries += 1);
                return Ok(value);
            }
            Err(failure) => failure,
        };

        self.record(|s| s.failed_calls += 1);
        match failure {
            RetryFailure::Refresh(error) => Err(error),
            RetryFailure::Call(error) if classify(&error) == FailureClass::Auth => {
                Err(CallError::AuthRejected { source: error }.into())
            }
            RetryFailure::Call(error) => Err(CallError::Failed {
                source: error,
                retried: true,
            }
            .into()),
        }
    }

    /// `call` with the default classifier.
    pub async fn call_default<T, F, Fut>(&self, operation: F) -> LifecycleResult<T>
    where
        F: Fn(Arc<B::Client>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.call(operation, classify_api_error).await
    }

    pub fn get_stats(&self) -> CallStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    async fn retry_after_refresh<T, F, Fut>(
        &self,
        operation: &F,
        rejected_generation: u64,
    ) -> Result<T, RetryFailure>
    where
        F: Fn(Arc<B::Client>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let (token, generation) = self
            .manager
            .refresh_rejected(rejected_generation)
            .await
            .map_err(RetryFailure::Refresh)?;
        let (client, _) = self
            .factory
            .rebuild(&token, generation, false)
            .await
            .map_err(RetryFailure::Refresh)?;

        debug!(generation, "retrying call with refreshed client");
        self.invoke(operation, client)
            .await
            .map_err(RetryFailure::Call)
    }

    async fn invoke<T, F, Fut>(&self, operation: &F, client: Arc<B::Client>) -> Result<T, ApiError>
    where
        F: Fn(Arc<B::Client>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.record(|s| s.total_invocations += 1);
        match tokio::time::timeout(self.call_timeout, operation(client)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::timeout(self.call_timeout)),
        }
    }

    fn record(&self, update: impl FnOnce(&mut CallStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }
}

enum RetryFailure {
    Refresh(LifecycleError),
    Call(ApiError),
}
