// Routing seam
//
// The message router lives outside the core. Discovery and the proxy builder
// only register next hops for participants they learn about.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PlexusError;

/// Transport address of a cluster controller or in-process participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "_typeName", rename_all = "camelCase")]
pub enum Address {
    /// Participant living in this process
    InProcess,
    #[serde(rename_all = "camelCase")]
    Mqtt { broker_uri: String, topic: String },
    #[serde(rename_all = "camelCase")]
    WebSocket {
        protocol: String,
        host: String,
        port: u16,
        path: String,
    },
    #[serde(rename_all = "camelCase")]
    WebSocketClient { id: String },
}

impl Address {
    /// Serialized form stored in global discovery entries
    pub fn to_json_string(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_str(serialized: &str) -> crate::error::Result<Self> {
        serde_json::from_str(serialized).map_err(PlexusError::from)
    }
}

/// Message router operations the core depends on
#[async_trait]
pub trait MessageRouter: Send + Sync {
    /// Route messages for `participant_id` to `address`
    async fn add_next_hop(
        &self,
        participant_id: &str,
        address: Address,
        is_globally_visible: bool,
    ) -> Result<()>;

    /// Mark a participant as known so that incoming messages from it are accepted
    fn set_to_known(&self, participant_id: &str);

    async fn resolve_next_hop(&self, participant_id: &str) -> Result<Address>;
}
