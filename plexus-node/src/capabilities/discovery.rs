// Capability discovery
//
// INTENTION: Resolve (domain, interface) to discovery entries by combining the
// local capabilities store, the global capabilities cache and the global
// directory, according to the scope of the DiscoveryQos. Registrations are
// written locally or to the directory depending on the provider scope.

use plexus_common::{current_time_ms, log_debug, log_error, log_info, log_warn, Component, Logger};
use std::sync::Arc;
use tokio::sync::watch;

use crate::capabilities::cache::GlobalCapabilitiesCache;
use crate::capabilities::directory::GlobalCapabilitiesDirectory;
use crate::capabilities::store::CapabilitiesStore;
use crate::error::{PlexusError, Result};
use crate::routing::{Address, MessageRouter};
use crate::types::{
    DiscoveryEntry, DiscoveryEntryWithMetaInfo, DiscoveryQos, DiscoveryScope,
    GlobalDiscoveryEntry, ProviderScope,
};

/// Messaging ttl used for calls to the global directory: 30 days
pub const TTL_30_DAYS_MS: u64 = 30 * 24 * 60 * 60 * 1000;

pub struct CapabilityDiscovery {
    local_store: Arc<CapabilitiesStore>,
    global_cache: Arc<GlobalCapabilitiesCache>,
    router: Arc<dyn MessageRouter>,
    directory: Arc<dyn GlobalCapabilitiesDirectory>,
    /// Serialized global address of this cluster controller, `None` until known
    global_address: watch::Sender<Option<String>>,
    logger: Logger,
}

impl CapabilityDiscovery {
    pub fn new(
        local_store: Arc<CapabilitiesStore>,
        global_cache: Arc<GlobalCapabilitiesCache>,
        router: Arc<dyn MessageRouter>,
        directory: Arc<dyn GlobalCapabilitiesDirectory>,
        logger: &Logger,
    ) -> Self {
        let (global_address, _) = watch::channel(None);
        Self {
            local_store,
            global_cache,
            router,
            directory,
            global_address,
            logger: logger.with_component(Component::Discovery),
        }
    }

    /// Record the global transport address of this node.
    ///
    /// Global lookups and registrations issued before this call are waiting
    /// for it and proceed now.
    pub fn global_address_ready(&self, address: &Address) -> Result<()> {
        let serialized = address.to_json_string()?;
        log_info!(self.logger, "global address ready: {serialized}");
        self.global_address.send_replace(Some(serialized));
        Ok(())
    }

    pub fn global_address(&self) -> Option<String> {
        self.global_address.borrow().clone()
    }

    async fn wait_for_global_address(&self) -> Result<String> {
        let mut receiver = self.global_address.subscribe();
        if receiver.borrow().is_none() {
            log_debug!(self.logger, "global address unknown, queueing global operation");
        }
        let address = receiver
            .wait_for(|address| address.is_some())
            .await
            .map_err(|_| PlexusError::Directory("global address channel closed".to_string()))?;
        Ok(address.clone().unwrap_or_default())
    }

    /// Look up providers of `interface_name` in exactly one domain.
    pub async fn lookup(
        &self,
        domains: &[String],
        interface_name: &str,
        discovery_qos: &DiscoveryQos,
    ) -> Result<Vec<DiscoveryEntryWithMetaInfo>> {
        if domains.len() != 1 {
            return Err(PlexusError::MultiDomainLookup(domains.len()));
        }
        let domain = domains[0].as_str();
        let max_age = discovery_qos.cache_max_age_ms;

        match discovery_qos.discovery_scope {
            DiscoveryScope::LocalOnly => Ok(self.lookup_local(domain, interface_name)),
            DiscoveryScope::LocalThenGlobal => {
                let local = self.lookup_local(domain, interface_name);
                if !local.is_empty() {
                    return Ok(local);
                }
                let cached = self.lookup_cache(domain, interface_name, max_age);
                if !cached.is_empty() {
                    return Ok(cached);
                }
                self.lookup_global(domains, interface_name, TTL_30_DAYS_MS, Vec::new())
                    .await
            }
            DiscoveryScope::LocalAndGlobal => {
                let local = self.lookup_local(domain, interface_name);
                let cached = self.lookup_cache(domain, interface_name, max_age);
                if cached.is_empty() {
                    return self
                        .lookup_global(domains, interface_name, TTL_30_DAYS_MS, local)
                        .await;
                }
                let mut result = local;
                result.extend(cached);
                Ok(result)
            }
            DiscoveryScope::GlobalOnly => {
                let cached = self.lookup_cache(domain, interface_name, max_age);
                if !cached.is_empty() {
                    return Ok(cached);
                }
                self.lookup_global(domains, interface_name, TTL_30_DAYS_MS, Vec::new())
                    .await
            }
        }
    }

    fn lookup_local(&self, domain: &str, interface_name: &str) -> Vec<DiscoveryEntryWithMetaInfo> {
        self.local_store
            .lookup(domain, interface_name, None)
            .into_iter()
            .map(|entry| entry.with_meta_info(true))
            .collect()
    }

    fn lookup_cache(
        &self,
        domain: &str,
        interface_name: &str,
        max_age_ms: u64,
    ) -> Vec<DiscoveryEntryWithMetaInfo> {
        let evicted = self.global_cache.evict_expired(current_time_ms());
        if evicted > 0 {
            log_debug!(self.logger, "evicted {evicted} expired global entries");
        }
        self.global_cache
            .lookup(domain, interface_name, max_age_ms)
            .into_iter()
            .map(|global| global.entry.with_meta_info(false))
            .collect()
    }

    /// Query the directory and append usable results to `capabilities`
    async fn lookup_global(
        &self,
        domains: &[String],
        interface_name: &str,
        ttl_ms: u64,
        mut capabilities: Vec<DiscoveryEntryWithMetaInfo>,
    ) -> Result<Vec<DiscoveryEntryWithMetaInfo>> {
        let own_address = self.wait_for_global_address().await?;
        let found = self
            .directory
            .lookup(domains, interface_name, ttl_ms)
            .await
            .map_err(|e| PlexusError::Directory(format!("lookup failed: {e:#}")))?;
        log_debug!(
            self.logger,
            "directory returned {} entries for {}/{}",
            found.len(),
            domains.join(","),
            interface_name
        );

        for global in found {
            if global.address == own_address {
                continue;
            }
            let address = match Address::from_json_str(&global.address) {
                Ok(address) => address,
                Err(_) => {
                    log_error!(
                        self.logger,
                        "unable to use global discovery entry with unknown address type: {}",
                        global.address
                    );
                    continue;
                }
            };
            let is_globally_visible = global.entry.scope() == ProviderScope::Global;
            self.router
                .add_next_hop(&global.entry.participant_id, address, is_globally_visible)
                .await?;
            capabilities.push(global.entry.clone().with_meta_info(false));
            self.global_cache.add(global);
        }
        Ok(capabilities)
    }

    /// Register a provider.
    ///
    /// LOCAL entries go to the local store only. GLOBAL entries are registered
    /// at the directory with this node's global address first; the local store
    /// is only written once the directory accepted the entry.
    pub async fn add(&self, mut entry: DiscoveryEntry) -> Result<()> {
        entry.last_seen_date_ms = current_time_ms();
        match entry.scope() {
            ProviderScope::Local => {
                log_debug!(self.logger, "adding local entry {}", entry.participant_id);
                self.local_store.add(entry);
                Ok(())
            }
            ProviderScope::Global => {
                let address = self.wait_for_global_address().await?;
                let global = GlobalDiscoveryEntry::new(entry.clone(), address);
                self.directory
                    .add(global, TTL_30_DAYS_MS)
                    .await
                    .map_err(|e| {
                        PlexusError::Directory(format!(
                            "Error calling operation \"add\" of the global directory: {e:#}"
                        ))
                    })?;
                log_info!(self.logger, "registered global entry {}", entry.participant_id);
                self.local_store.add(entry);
                Ok(())
            }
        }
    }

    /// Unregister a provider. Global (or locally unknown) entries are also
    /// removed from the directory.
    pub async fn remove(&self, participant_id: &str) -> Result<()> {
        match self.local_store.remove(participant_id) {
            Some(entry) if entry.scope() == ProviderScope::Local => Ok(()),
            Some(_) => self.remove_from_directory(participant_id).await,
            None => {
                log_warn!(
                    self.logger,
                    "remove(): no entry found locally for participantId {participant_id}, trying the global directory"
                );
                self.remove_from_directory(participant_id).await
            }
        }
    }

    async fn remove_from_directory(&self, participant_id: &str) -> Result<()> {
        self.directory
            .remove(participant_id, TTL_30_DAYS_MS)
            .await
            .map_err(|e| {
                PlexusError::Directory(format!(
                    "Error calling operation \"remove\" of the global directory: {e:#}"
                ))
            })
    }

    /// Renew all entries of `cluster_controller_id` at the directory
    pub async fn touch(&self, cluster_controller_id: &str, ttl_ms: u64) -> Result<()> {
        self.directory
            .touch(cluster_controller_id, ttl_ms)
            .await
            .map_err(|e| {
                PlexusError::Directory(format!(
                    "Error calling operation \"touch\" of the global directory: {e:#}"
                ))
            })
    }

    pub fn local_store(&self) -> &Arc<CapabilitiesStore> {
        &self.local_store
    }

    pub fn global_cache(&self) -> &Arc<GlobalCapabilitiesCache> {
        &self.global_cache
    }
}
