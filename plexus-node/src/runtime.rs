// Runtime
//
// INTENTION: Assemble the client core from a RuntimeConfig and the external
// collaborators (dispatcher, message router, global directory, optional
// key/value store). Owns the lifecycle of every manager and exposes provider
// registration and proxy building.

use plexus_common::{log_debug, log_info, log_warn, Component, Logger, LoggingConfig};
use std::sync::Arc;

use crate::capabilities::{
    Arbitrator, CapabilitiesStore, CapabilityDiscovery, CapabilityLookup,
    GlobalCapabilitiesCache, GlobalCapabilitiesDirectory, RemoteGlobalCapabilitiesDirectory,
};
use crate::config::RuntimeConfig;
use crate::dispatching::{Dispatcher, RequestReplyManager, SubscriptionManager};
use crate::error::{PlexusError, Result};
use crate::persistence::KeyValueStore;
use crate::provider::Provider;
use crate::proxy::{ProxyBuilder, ProxyHandle, ProxySettings};
use crate::routing::{Address, MessageRouter};
use crate::type_registry::TypeRegistry;
use crate::types::{DiscoveryEntry, DiscoveryEntryWithMetaInfo, ProviderQos, ProviderScope};

/// How to reach the global capabilities directory
#[derive(Clone)]
pub enum DirectoryConnection {
    /// Call the provisioned directory provider through the request/reply manager
    Provisioned(DiscoveryEntryWithMetaInfo),
    Custom(Arc<dyn GlobalCapabilitiesDirectory>),
}

/// External collaborators the runtime is built on
#[derive(Clone)]
pub struct RuntimeCollaborators {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub router: Arc<dyn MessageRouter>,
    pub directory: DirectoryConnection,
    pub key_value_store: Option<Arc<dyn KeyValueStore>>,
    /// Capabilities available to static arbitration
    pub static_capabilities: Vec<DiscoveryEntryWithMetaInfo>,
}

impl RuntimeCollaborators {
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        router: Arc<dyn MessageRouter>,
        directory: DirectoryConnection,
    ) -> Self {
        Self {
            dispatcher,
            router,
            directory,
            key_value_store: None,
            static_capabilities: Vec::new(),
        }
    }

    pub fn with_key_value_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.key_value_store = Some(store);
        self
    }

    pub fn with_static_capabilities(mut self, capabilities: Vec<DiscoveryEntryWithMetaInfo>) -> Self {
        self.static_capabilities = capabilities;
        self
    }
}

pub struct PlexusRuntime {
    config: RuntimeConfig,
    router: Arc<dyn MessageRouter>,
    type_registry: Arc<TypeRegistry>,
    discovery: Arc<CapabilityDiscovery>,
    arbitrator: Arc<Arbitrator>,
    request_reply_manager: Arc<RequestReplyManager>,
    subscription_manager: Arc<SubscriptionManager>,
    proxy_builder: ProxyBuilder,
    logger: Logger,
}

impl PlexusRuntime {
    /// Build the runtime. Must be called inside a tokio runtime because the
    /// request/reply sweep starts immediately.
    pub fn new(config: RuntimeConfig, collaborators: RuntimeCollaborators) -> Self {
        let logger = Logger::new_root(Component::Runtime, &config.cluster_controller_id);
        match &config.logging_config {
            Some(logging_config) => logging_config.apply(),
            None => LoggingConfig::default_info().apply(),
        }
        log_info!(logger, "initializing runtime: {config}");

        let RuntimeCollaborators {
            dispatcher,
            router,
            directory,
            key_value_store,
            static_capabilities,
        } = collaborators;

        let type_registry = Arc::new(TypeRegistry::new());
        let request_reply_manager = RequestReplyManager::new(
            dispatcher.clone(),
            type_registry.clone(),
            config.reply_sweep_interval(),
            &logger,
        );
        let subscription_manager = SubscriptionManager::new(
            dispatcher,
            type_registry.clone(),
            key_value_store,
            &logger,
        );

        let directory: Arc<dyn GlobalCapabilitiesDirectory> = match directory {
            DirectoryConnection::Provisioned(entry) => {
                log_debug!(
                    logger,
                    "using provisioned global directory {}",
                    entry.participant_id()
                );
                Arc::new(RemoteGlobalCapabilitiesDirectory::new(
                    request_reply_manager.clone(),
                    format!("{}-directory-proxy", config.cluster_controller_id),
                    entry,
                ))
            }
            DirectoryConnection::Custom(directory) => directory,
        };

        let discovery = Arc::new(CapabilityDiscovery::new(
            Arc::new(CapabilitiesStore::new()),
            Arc::new(GlobalCapabilitiesCache::new()),
            router.clone(),
            directory,
            &logger,
        ));
        let lookup: Arc<dyn CapabilityLookup> = discovery.clone();
        let mut arbitrator = Arbitrator::new(lookup, &logger);
        if !static_capabilities.is_empty() {
            arbitrator = arbitrator.with_static_capabilities(static_capabilities);
        }
        let arbitrator = Arc::new(arbitrator);

        let proxy_builder = ProxyBuilder::new(
            &config,
            arbitrator.clone(),
            router.clone(),
            request_reply_manager.clone(),
            subscription_manager.clone(),
            &logger,
        );

        Self {
            config,
            router,
            type_registry,
            discovery,
            arbitrator,
            request_reply_manager,
            subscription_manager,
            proxy_builder,
            logger,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn type_registry(&self) -> &Arc<TypeRegistry> {
        &self.type_registry
    }

    pub fn discovery(&self) -> &Arc<CapabilityDiscovery> {
        &self.discovery
    }

    pub fn arbitrator(&self) -> &Arc<Arbitrator> {
        &self.arbitrator
    }

    pub fn request_reply_manager(&self) -> &Arc<RequestReplyManager> {
        &self.request_reply_manager
    }

    pub fn subscription_manager(&self) -> &Arc<SubscriptionManager> {
        &self.subscription_manager
    }

    /// The transport layer learned this node's global address
    pub fn global_address_ready(&self, address: &Address) -> Result<()> {
        self.discovery.global_address_ready(address)
    }

    /// Register `provider` under `domain` and return its participant id.
    ///
    /// The provider serves requests as soon as it is registered with
    /// discovery; a failed registration leaves nothing behind.
    pub async fn register_provider(
        &self,
        domain: &str,
        provider: Provider,
        provider_qos: ProviderQos,
    ) -> Result<String> {
        let participant_id = uuid::Uuid::new_v4().to_string();
        let entry = DiscoveryEntry::new(
            domain,
            provider.interface_name(),
            participant_id.clone(),
            provider.version(),
            provider_qos,
        );
        let is_globally_visible = entry.scope() == ProviderScope::Global;

        self.request_reply_manager
            .add_request_caller(participant_id.clone(), Arc::new(provider));
        let registered = self
            .publish_provider(&participant_id, entry, is_globally_visible)
            .await;
        if let Err(e) = registered {
            log_warn!(
                self.logger,
                "registering provider {participant_id} in domain {domain} failed: {e}"
            );
            self.request_reply_manager
                .remove_request_caller(&participant_id);
            return Err(e);
        }
        log_info!(
            self.logger,
            "registered provider {participant_id} in domain {domain}"
        );
        Ok(participant_id)
    }

    async fn publish_provider(
        &self,
        participant_id: &str,
        entry: DiscoveryEntry,
        is_globally_visible: bool,
    ) -> Result<()> {
        self.router
            .add_next_hop(
                participant_id,
                self.config.local_address.clone(),
                is_globally_visible,
            )
            .await?;
        self.discovery.add(entry).await
    }

    pub async fn unregister_provider(&self, participant_id: &str) -> Result<()> {
        if self
            .request_reply_manager
            .remove_request_caller(participant_id)
            .is_none()
        {
            return Err(PlexusError::InvalidArgument(format!(
                "no provider registered with participantId {participant_id}"
            )));
        }
        self.discovery.remove(participant_id).await?;
        log_info!(self.logger, "unregistered provider {participant_id}");
        Ok(())
    }

    pub async fn build_proxy(&self, settings: ProxySettings) -> Result<ProxyHandle> {
        self.proxy_builder.build(settings).await
    }

    /// Stop open subscriptions, then close every manager
    pub async fn shutdown(&self) -> Result<()> {
        log_info!(self.logger, "shutting down runtime");
        let terminated = self
            .subscription_manager
            .terminate_subscriptions(self.config.shutdown_timeout_ms)
            .await;
        if let Err(e) = &terminated {
            log_warn!(self.logger, "{e}");
        }
        self.arbitrator.shutdown();
        self.subscription_manager.shutdown();
        self.request_reply_manager.shutdown();
        terminated
    }
}
