// Global capabilities directory seam
//
// The directory is a remote provider like any other. `GlobalCapabilitiesDirectory`
// is what discovery needs from it; `RemoteGlobalCapabilitiesDirectory` reaches it
// through the request/reply manager using a provisioned discovery entry.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::dispatching::request_reply::RequestReplyManager;
use crate::types::{
    DiscoveryEntryWithMetaInfo, GlobalDiscoveryEntry, MessagingQos, Request, RequestEnvelope,
};

pub const GLOBAL_CAPABILITIES_DIRECTORY_INTERFACE: &str = "infrastructure/GlobalCapabilitiesDirectory";

/// Operations of the global capabilities directory. `ttl_ms` is the messaging
/// ttl of the call.
#[async_trait]
pub trait GlobalCapabilitiesDirectory: Send + Sync {
    async fn lookup(
        &self,
        domains: &[String],
        interface_name: &str,
        ttl_ms: u64,
    ) -> Result<Vec<GlobalDiscoveryEntry>>;

    async fn add(&self, entry: GlobalDiscoveryEntry, ttl_ms: u64) -> Result<()>;

    async fn remove(&self, participant_id: &str, ttl_ms: u64) -> Result<()>;

    async fn touch(&self, cluster_controller_id: &str, ttl_ms: u64) -> Result<()>;
}

/// Directory client talking to the provisioned directory provider
pub struct RemoteGlobalCapabilitiesDirectory {
    request_reply_manager: Arc<RequestReplyManager>,
    proxy_participant_id: String,
    directory_entry: DiscoveryEntryWithMetaInfo,
}

impl RemoteGlobalCapabilitiesDirectory {
    pub fn new(
        request_reply_manager: Arc<RequestReplyManager>,
        proxy_participant_id: impl Into<String>,
        directory_entry: DiscoveryEntryWithMetaInfo,
    ) -> Self {
        Self {
            request_reply_manager,
            proxy_participant_id: proxy_participant_id.into(),
            directory_entry,
        }
    }

    async fn call(&self, method_name: &str, params: Vec<Value>, ttl_ms: u64) -> Result<Vec<Value>> {
        let envelope = RequestEnvelope::new(
            self.proxy_participant_id.clone(),
            self.directory_entry.clone(),
            MessagingQos::with_ttl(ttl_ms),
            Request::new(method_name, params),
        );
        let response = self.request_reply_manager.send_request(envelope).await?;
        Ok(response)
    }
}

#[async_trait]
impl GlobalCapabilitiesDirectory for RemoteGlobalCapabilitiesDirectory {
    async fn lookup(
        &self,
        domains: &[String],
        interface_name: &str,
        ttl_ms: u64,
    ) -> Result<Vec<GlobalDiscoveryEntry>> {
        let mut response = self
            .call("lookup", vec![json!(domains), json!(interface_name)], ttl_ms)
            .await?;
        if response.is_empty() {
            return Err(anyhow!("directory lookup returned without result"));
        }
        let entries: Vec<GlobalDiscoveryEntry> = serde_json::from_value(response.swap_remove(0))?;
        Ok(entries)
    }

    async fn add(&self, entry: GlobalDiscoveryEntry, ttl_ms: u64) -> Result<()> {
        self.call("add", vec![serde_json::to_value(entry)?], ttl_ms)
            .await?;
        Ok(())
    }

    async fn remove(&self, participant_id: &str, ttl_ms: u64) -> Result<()> {
        self.call("remove", vec![json!(participant_id)], ttl_ms).await?;
        Ok(())
    }

    async fn touch(&self, cluster_controller_id: &str, ttl_ms: u64) -> Result<()> {
        self.call("touch", vec![json!(cluster_controller_id)], ttl_ms)
            .await?;
        Ok(())
    }
}
