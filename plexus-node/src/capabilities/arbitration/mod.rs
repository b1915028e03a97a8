// Arbitrator
//
// INTENTION: Turn a logical (domain, interface) into a ranked list of usable
// providers. Drives a deadline bounded retry loop around capability lookups,
// filters candidates by version and on-change support, and applies the
// arbitration strategy of the DiscoveryQos.

pub mod strategies;

use async_trait::async_trait;
use plexus_common::{log_debug, log_info, log_warn, Component, Logger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout_at, Instant};

use crate::capabilities::discovery::CapabilityDiscovery;
use crate::error::{PlexusError, Result};
use crate::types::{DiscoveryEntryWithMetaInfo, DiscoveryQos, Version};

/// Lookup operation the arbitrator retries
#[async_trait]
pub trait CapabilityLookup: Send + Sync {
    async fn lookup(
        &self,
        domains: &[String],
        interface_name: &str,
        discovery_qos: &DiscoveryQos,
    ) -> Result<Vec<DiscoveryEntryWithMetaInfo>>;
}

#[async_trait]
impl CapabilityLookup for CapabilityDiscovery {
    async fn lookup(
        &self,
        domains: &[String],
        interface_name: &str,
        discovery_qos: &DiscoveryQos,
    ) -> Result<Vec<DiscoveryEntryWithMetaInfo>> {
        CapabilityDiscovery::lookup(self, domains, interface_name, discovery_qos).await
    }
}

/// Parameters of one arbitration
#[derive(Debug, Clone)]
pub struct ArbitrationRequest {
    pub domains: Vec<String>,
    pub interface_name: String,
    pub discovery_qos: DiscoveryQos,
    /// Interface version the proxy was built for
    pub proxy_version: Version,
    /// Arbitrate among the provisioned static capabilities instead of looking up
    pub static_arbitration: bool,
}

impl ArbitrationRequest {
    pub fn new(
        domain: impl Into<String>,
        interface_name: impl Into<String>,
        discovery_qos: DiscoveryQos,
        proxy_version: Version,
    ) -> Self {
        Self {
            domains: vec![domain.into()],
            interface_name: interface_name.into(),
            discovery_qos,
            proxy_version,
            static_arbitration: false,
        }
    }

    pub fn with_static_arbitration(mut self) -> Self {
        self.static_arbitration = true;
        self
    }
}

fn supports_on_change(candidate: &DiscoveryEntryWithMetaInfo, required: bool) -> bool {
    !required || candidate.entry.qos.supports_on_change_subscriptions
}

fn is_usable(candidate: &DiscoveryEntryWithMetaInfo, request: &ArbitrationRequest) -> bool {
    candidate
        .entry
        .provider_version
        .is_compatible_with(&request.proxy_version)
        && supports_on_change(
            candidate,
            request.discovery_qos.provider_must_support_on_change,
        )
}

/// What a pending arbitration has learned so far, used to build the timeout error
#[derive(Default)]
struct AttemptState {
    attempts: u32,
    incompatible_versions: Vec<Version>,
    last_error: Option<String>,
}

enum Attempt {
    Done(Vec<DiscoveryEntryWithMetaInfo>),
    Failed(PlexusError),
    TimedOut,
}

pub struct Arbitrator {
    discovery: Arc<dyn CapabilityLookup>,
    static_capabilities: Option<Vec<DiscoveryEntryWithMetaInfo>>,
    shutdown: watch::Sender<bool>,
    logger: Logger,
}

impl Arbitrator {
    pub fn new(discovery: Arc<dyn CapabilityLookup>, logger: &Logger) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            discovery,
            static_capabilities: None,
            shutdown,
            logger: logger.with_component(Component::Arbitration),
        }
    }

    /// Provision capabilities used by static arbitrations
    pub fn with_static_capabilities(mut self, capabilities: Vec<DiscoveryEntryWithMetaInfo>) -> Self {
        self.static_capabilities = Some(capabilities);
        self
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolve the request to a non-empty, strategy ordered list of providers.
    ///
    /// Every call owns its deadline and retry timer; concurrent arbitrations
    /// do not influence each other.
    pub async fn start_arbitration(
        &self,
        request: ArbitrationRequest,
    ) -> Result<Vec<DiscoveryEntryWithMetaInfo>> {
        if self.is_shut_down() {
            return Err(PlexusError::ManagerClosed("Arbitrator"));
        }
        if request.static_arbitration {
            if let Some(static_capabilities) = &self.static_capabilities {
                return self.arbitrate_static(static_capabilities, &request);
            }
        }

        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            result = self.arbitrate(&request) => result,
            _ = shutdown.wait_for(|closed| *closed) => {
                Err(PlexusError::ManagerClosed("Arbitrator"))
            }
        }
    }

    fn arbitrate_static(
        &self,
        static_capabilities: &[DiscoveryEntryWithMetaInfo],
        request: &ArbitrationRequest,
    ) -> Result<Vec<DiscoveryEntryWithMetaInfo>> {
        let candidates: Vec<_> = static_capabilities
            .iter()
            .filter(|c| {
                request.domains.contains(&c.entry.domain)
                    && c.entry.interface_name == request.interface_name
                    && is_usable(c, request)
            })
            .cloned()
            .collect();
        (request.discovery_qos.arbitration_strategy)(&candidates)
            .map_err(|e| PlexusError::ArbitrationStrategy(format!("{e:#}")))
    }

    async fn arbitrate(&self, request: &ArbitrationRequest) -> Result<Vec<DiscoveryEntryWithMetaInfo>> {
        let qos = &request.discovery_qos;
        let deadline = Instant::now() + Duration::from_millis(qos.discovery_timeout_ms);
        let retry_delay = Duration::from_millis(qos.discovery_retry_delay_ms);
        let mut state = AttemptState::default();

        let outcome = timeout_at(deadline, self.retry_loop(request, deadline, retry_delay, &mut state))
            .await
            .unwrap_or(Attempt::TimedOut);

        match outcome {
            Attempt::Done(providers) => {
                log_debug!(
                    self.logger,
                    "arbitration for {} succeeded after {} lookups with {} providers",
                    request.interface_name,
                    state.attempts,
                    providers.len()
                );
                Ok(providers)
            }
            Attempt::Failed(err) => Err(err),
            Attempt::TimedOut => {
                log_info!(
                    self.logger,
                    "arbitration for {} timed out after {} lookups",
                    request.interface_name,
                    state.attempts
                );
                let domain = request.domains.join(",");
                if state.incompatible_versions.is_empty() {
                    Err(PlexusError::DiscoveryTimeout {
                        domain,
                        interface_name: request.interface_name.clone(),
                        last_error: state.last_error,
                    })
                } else {
                    Err(PlexusError::NoCompatibleProviderFound {
                        domain,
                        interface_name: request.interface_name.clone(),
                        discovered_versions: state.incompatible_versions,
                    })
                }
            }
        }
    }

    async fn retry_loop(
        &self,
        request: &ArbitrationRequest,
        deadline: Instant,
        retry_delay: Duration,
        state: &mut AttemptState,
    ) -> Attempt {
        let qos = &request.discovery_qos;
        loop {
            state.attempts += 1;
            match self
                .discovery
                .lookup(&request.domains, &request.interface_name, qos)
                .await
            {
                Ok(discovered) => {
                    state.incompatible_versions.clear();
                    let mut compatible = Vec::with_capacity(discovered.len());
                    for candidate in discovered {
                        if is_usable(&candidate, request) {
                            compatible.push(candidate);
                        } else if !state
                            .incompatible_versions
                            .contains(&candidate.entry.provider_version)
                        {
                            state
                                .incompatible_versions
                                .push(candidate.entry.provider_version);
                        }
                    }
                    match (qos.arbitration_strategy)(&compatible) {
                        Ok(arbitrated) if !arbitrated.is_empty() => return Attempt::Done(arbitrated),
                        Ok(_) => {}
                        Err(e) => {
                            return Attempt::Failed(PlexusError::ArbitrationStrategy(format!("{e:#}")))
                        }
                    }
                }
                Err(err @ PlexusError::MultiDomainLookup(_)) => return Attempt::Failed(err),
                Err(err) => {
                    log_warn!(self.logger, "lookup failed, retrying: {err}");
                    state.last_error = Some(err.to_string());
                }
            }

            if Instant::now() >= deadline {
                return Attempt::TimedOut;
            }
            sleep(retry_delay).await;
        }
    }

    /// Reject every pending arbitration and all later calls
    pub fn shutdown(&self) {
        log_info!(self.logger, "shutting down arbitrator");
        self.shutdown.send_replace(true);
    }
}
