//! Integration
//!
//! High-level entry point combining the credential store, lifecycle manager,
//! client factory and call wrapper. Consumers only need `get_client` and `call`.

use std::future::Future;
use std::sync::Arc;

use crate::client::{ApiClientBuilder, AuthenticatedClientFactory, BearerClientBuilder};
use crate::core::{Clock, HttpTransport, ReqwestHttpTransport};
use crate::error::{ApiError, LifecycleResult};
use crate::flows::{AuthGateway, HttpAuthGateway};
use crate::resilience::{FailureClass, ResilientCallWrapper};
use crate::token::{CredentialLifecycleManager, CredentialStore, StoreSelection};
use crate::types::{ClientIdentity, LifecycleConfig};

/// Store, manager, factory and wrapper for one credential set.
pub struct Integration<B: ApiClientBuilder> {
    manager: Arc<CredentialLifecycleManager>,
    factory: Arc<AuthenticatedClientFactory<B>>,
    wrapper: ResilientCallWrapper<B>,
}

impl<B: ApiClientBuilder> Integration<B> {
    /// Wire the components together. Nothing is loaded until first use.
    pub fn new(
        config: LifecycleConfig,
        store: Arc<dyn CredentialStore>,
        gateway: Arc<dyn AuthGateway>,
        builder: B,
    ) -> Self {
        let call_timeout = config.call_timeout;
        let manager = Arc::new(CredentialLifecycleManager::new(config, store, gateway));
        Self::from_manager(manager, builder, call_timeout)
    }

    /// Same as `new` with an explicit time source.
    pub fn with_clock(
        config: LifecycleConfig,
        store: Arc<dyn CredentialStore>,
        gateway: Arc<dyn AuthGateway>,
        builder: B,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let call_timeout = config.call_timeout;
        let manager =
            Arc::new(CredentialLifecycleManager::new(config, store, gateway).with_clock(clock));
        Self::from_manager(manager, builder, call_timeout)
    }

    fn from_manager(
        manager: Arc<CredentialLifecycleManager>,
        builder: B,
        call_timeout: std::time::Duration,
    ) -> Self {
        let factory = Arc::new(AuthenticatedClientFactory::new(manager.clone(), builder));
        let wrapper = ResilientCallWrapper::new(manager.clone(), factory.clone(), call_timeout);
        Self {
            manager,
            factory,
            wrapper,
        }
    }

    /// See [`AuthenticatedClientFactory::get_client`].
    pub async fn get_client(&self, force_rebuild: bool) -> LifecycleResult<Arc<B::Client>> {
        self.factory.get_client(force_rebuild).await
    }

    /// Run `operation` with the default auth classifier.
    pub async fn call<T, F, Fut>(&self, operation: F) -> LifecycleResult<T>
    where
        F: Fn(Arc<B::Client>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.wrapper.call_default(operation).await
    }

    /// Run `operation` with a caller-supplied classifier.
    pub async fn call_with<T, F, Fut, C>(&self, operation: F, classify: C) -> LifecycleResult<T>
    where
        F: Fn(Arc<B::Client>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
        C: Fn(&ApiError) -> FailureClass,
    {
        self.wrapper.call(operation, classify).await
    }

    pub fn manager(&self) -> &Arc<CredentialLifecycleManager> {
        &self.manager
    }

    pub fn wrapper(&self) -> &ResilientCallWrapper<B> {
        &self.wrapper
    }
}

/// QuickBooks Online integration over the default reqwest transport.
pub type QuickBooksIntegration = Integration<BearerClientBuilder<ReqwestHttpTransport>>;

/// Build a QuickBooks integration from environment variables.
///
/// Reads `LifecycleConfig::from_env`, selects the store with
/// `StoreSelection::from_env` and, for the local file store, the client
/// identity from `ClientIdentity::from_env`. The stored record is loaded
/// before returning so that missing credentials are reported immediately.
pub async fn quickbooks_from_env() -> LifecycleResult<QuickBooksIntegration> {
    let config = LifecycleConfig::from_env()?;
    let transport = Arc::new(ReqwestHttpTransport::new()?);
    let selection = StoreSelection::from_env();

    let identity = match &selection {
        StoreSelection::LocalFile { .. } => Some(ClientIdentity::from_env()?),
        StoreSelection::SecretsManager { .. } => None,
    };
    let store = selection.build(&config, identity, transport.clone())?;

    quickbooks_with_transport(config, store, transport).await
}

/// Build a QuickBooks integration over `transport` and load the stored record.
pub async fn quickbooks_with_transport<T: HttpTransport + 'static>(
    config: LifecycleConfig,
    store: Arc<dyn CredentialStore>,
    transport: Arc<T>,
) -> LifecycleResult<Integration<BearerClientBuilder<T>>> {
    let gateway = Arc::new(HttpAuthGateway::new(&config, transport.clone()));
    let builder = BearerClientBuilder::new(transport).with_timeout(config.call_timeout);

    let integration = Integration::new(config, store, gateway, builder);
    integration.manager.initialize().await?;
    Ok(integration)
}
