//! Authenticated Client Factory
//!
//! Builds API clients bound to the manager's current access token and keeps
//! exactly one of them cached.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CredentialsError, LifecycleResult};
use crate::token::CredentialLifecycleManager;
use crate::types::{AccessToken, Environment};

/// Constructs an API client around an access token.
///
/// Implementations should be cheap; the factory calls `build` whenever the
/// manager hands out a new token.
pub trait ApiClientBuilder: Send + Sync {
    type Client: Send + Sync;

    fn build(
        &self,
        token: &AccessToken,
        tenant_id: &str,
        environment: Environment,
    ) -> LifecycleResult<Self::Client>;
}

struct CachedClient<C> {
    client: Arc<C>,
    generation: u64,
}

/// Hands out API clients carrying a valid token.
pub struct AuthenticatedClientFactory<B: ApiClientBuilder> {
    manager: Arc<CredentialLifecycleManager>,
    builder: B,
    cached: RwLock<Option<CachedClient<B::Client>>>,
    builds: AtomicUsize,
}

impl<B: ApiClientBuilder> AuthenticatedClientFactory<B> {
    pub fn new(manager: Arc<CredentialLifecycleManager>, builder: B) -> Self {
        Self {
            manager,
            builder,
            cached: RwLock::new(None),
            builds: AtomicUsize::new(0),
        }
    }

    /// Return a client bound to a valid access token.
    ///
    /// The cached client is reused unless `force_rebuild` is set or the
    /// manager has replaced the token since the client was built.
    pub async fn get_client(&self, force_rebuild: bool) -> LifecycleResult<Arc<B::Client>> {
        self.client_with_generation(force_rebuild)
            .await
            .map(|(client, _)| client)
    }

    /// Number of clients built so far.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub(crate) async fn client_with_generation(
        &self,
        force_rebuild: bool,
    ) -> LifecycleResult<(Arc<B::Client>, u64)> {
        let (token, generation) = self.manager.token_with_generation().await?;

        if !force_rebuild {
            let cached = self.cached.read().await;
            if let Some(cached) = cached.as_ref().filter(|c| c.generation >= generation) {
                return Ok((cached.client.clone(), cached.generation));
            }
        }

        self.rebuild(&token, generation, force_rebuild).await
    }

    /// Replace the cached client with one bound to `token`.
    ///
    /// A cached client from a newer generation always wins over `token`, so
    /// a caller holding a replaced token gets the newer client back.
    pub(crate) async fn rebuild(
        &self,
        token: &AccessToken,
        generation: u64,
        force: bool,
    ) -> LifecycleResult<(Arc<B::Client>, u64)> {
        let mut cached = self.cached.write().await;

        // Another caller may have rebuilt while this one waited.
        if let Some(current) = cached
            .as_ref()
            .filter(|c| c.generation > generation || (!force && c.generation == generation))
        {
            return Ok((current.client.clone(), current.generation));
        }

        let tenant_id = self.manager.tenant_id().await.ok_or_else(|| {
            CredentialsError::Incomplete {
                message: "no tenant id loaded".to_string(),
            }
        })?;
        let environment = self.manager.environment().await.unwrap_or_default();

        let client = Arc::new(self.builder.build(token, &tenant_id, environment)?);
        self.builds.fetch_add(1, Ordering::SeqCst);
        debug!(tenant_id = %tenant_id, generation, "API client rebuilt");

        *cached = Some(CachedClient {
            client: client.clone(),
            generation,
        });
        Ok((client, generation))
    }
}
