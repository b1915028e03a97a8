// Proxy builder
//
// INTENTION: Bind a logical (domain, interface) to one concrete provider. The
// builder arbitrates, takes the best ranked provider, gives the new proxy its
// own participant id and makes both ends known to the message router.

use plexus_common::{log_debug, log_info, log_warn, Component, Logger};
use std::sync::Arc;

use crate::capabilities::{ArbitrationRequest, Arbitrator};
use crate::config::RuntimeConfig;
use crate::dispatching::{RequestReplyManager, SubscriptionManager};
use crate::error::{PlexusError, Result};
use crate::proxy::handle::ProxyHandle;
use crate::routing::{Address, MessageRouter};
use crate::types::{DiscoveryQos, MessagingQos, Version};

/// What to build a proxy for
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub domain: String,
    pub interface_name: String,
    pub proxy_version: Version,
    pub discovery_qos: Option<DiscoveryQos>,
    pub messaging_qos: Option<MessagingQos>,
    pub static_arbitration: bool,
}

impl ProxySettings {
    pub fn new(
        domain: impl Into<String>,
        interface_name: impl Into<String>,
        proxy_version: Version,
    ) -> Self {
        Self {
            domain: domain.into(),
            interface_name: interface_name.into(),
            proxy_version,
            discovery_qos: None,
            messaging_qos: None,
            static_arbitration: false,
        }
    }

    pub fn with_discovery_qos(mut self, discovery_qos: DiscoveryQos) -> Self {
        self.discovery_qos = Some(discovery_qos);
        self
    }

    pub fn with_messaging_qos(mut self, messaging_qos: MessagingQos) -> Self {
        self.messaging_qos = Some(messaging_qos);
        self
    }

    pub fn with_static_arbitration(mut self) -> Self {
        self.static_arbitration = true;
        self
    }
}

pub struct ProxyBuilder {
    arbitrator: Arc<Arbitrator>,
    router: Arc<dyn MessageRouter>,
    request_reply_manager: Arc<RequestReplyManager>,
    subscription_manager: Arc<SubscriptionManager>,
    local_address: Address,
    default_discovery_qos: DiscoveryQos,
    default_messaging_ttl_ms: u64,
    max_messaging_ttl_ms: u64,
    logger: Logger,
}

impl ProxyBuilder {
    pub fn new(
        config: &RuntimeConfig,
        arbitrator: Arc<Arbitrator>,
        router: Arc<dyn MessageRouter>,
        request_reply_manager: Arc<RequestReplyManager>,
        subscription_manager: Arc<SubscriptionManager>,
        logger: &Logger,
    ) -> Self {
        Self {
            arbitrator,
            router,
            request_reply_manager,
            subscription_manager,
            local_address: config.local_address.clone(),
            default_discovery_qos: config.default_discovery_qos(),
            default_messaging_ttl_ms: config.default_messaging_ttl_ms,
            max_messaging_ttl_ms: config.max_messaging_ttl_ms,
            logger: logger.with_component(Component::ProxyBuilder),
        }
    }

    fn messaging_qos(&self, settings: &ProxySettings) -> MessagingQos {
        let mut messaging_qos = settings
            .messaging_qos
            .clone()
            .unwrap_or_else(|| MessagingQos::with_ttl(self.default_messaging_ttl_ms));
        if messaging_qos.ttl_ms > self.max_messaging_ttl_ms {
            log_warn!(
                self.logger,
                "messaging ttl {} for {}/{} exceeds the maximum, using {}",
                messaging_qos.ttl_ms,
                settings.domain,
                settings.interface_name,
                self.max_messaging_ttl_ms
            );
            messaging_qos.ttl_ms = self.max_messaging_ttl_ms;
        }
        messaging_qos
    }

    /// Arbitrate and create a proxy for the best ranked provider
    pub async fn build(&self, settings: ProxySettings) -> Result<ProxyHandle> {
        let messaging_qos = self.messaging_qos(&settings);
        let discovery_qos = settings
            .discovery_qos
            .clone()
            .unwrap_or_else(|| self.default_discovery_qos.clone());
        let mut request = ArbitrationRequest::new(
            settings.domain.clone(),
            settings.interface_name.clone(),
            discovery_qos,
            settings.proxy_version,
        );
        if settings.static_arbitration {
            request = request.with_static_arbitration();
        }

        let mut providers = self.arbitrator.start_arbitration(request).await?;
        if providers.is_empty() {
            return Err(PlexusError::DiscoveryTimeout {
                domain: settings.domain,
                interface_name: settings.interface_name,
                last_error: None,
            });
        }
        let provider = providers.swap_remove(0);
        let proxy_participant_id = uuid::Uuid::new_v4().to_string();
        log_debug!(
            self.logger,
            "proxy {proxy_participant_id} for {}/{} selected provider {}",
            settings.domain,
            settings.interface_name,
            provider.participant_id()
        );

        self.router
            .add_next_hop(&proxy_participant_id, self.local_address.clone(), true)
            .await?;
        self.router.set_to_known(provider.participant_id());

        log_info!(
            self.logger,
            "built proxy {proxy_participant_id} for {}/{}",
            settings.domain,
            settings.interface_name
        );
        Ok(ProxyHandle::new(
            proxy_participant_id,
            provider,
            messaging_qos,
            self.request_reply_manager.clone(),
            self.subscription_manager.clone(),
        ))
    }
}
