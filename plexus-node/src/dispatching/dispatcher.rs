// Dispatcher seam
//
// INTENTION: The managers hand fully addressed payloads to a dispatcher which
// serializes and routes them. Transports and message framing live behind this
// trait.

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{
    BroadcastSubscriptionRequest, MulticastSubscriptionRequest, MulticastSubscriptionStop,
    OneWayRequest, Request, RequestEnvelope, SubscriptionRequest,
    SubscriptionStop,
};

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Send a two-way request. The reply arrives later through
    /// `RequestReplyManager::handle_reply`.
    async fn send_request(&self, envelope: RequestEnvelope<Request>) -> Result<()>;

    async fn send_one_way_request(&self, envelope: RequestEnvelope<OneWayRequest>) -> Result<()>;

    /// Send an attribute subscription request. The provider acknowledges it
    /// later through `SubscriptionManager::handle_subscription_reply`.
    async fn send_subscription_request(
        &self,
        envelope: RequestEnvelope<SubscriptionRequest>,
    ) -> Result<()>;

    async fn send_broadcast_subscription_request(
        &self,
        envelope: RequestEnvelope<BroadcastSubscriptionRequest>,
    ) -> Result<()>;

    /// Multicast subscriptions are not acknowledged by the provider
    async fn send_multicast_subscription_request(
        &self,
        envelope: RequestEnvelope<MulticastSubscriptionRequest>,
    ) -> Result<()>;

    async fn send_subscription_stop(&self, envelope: RequestEnvelope<SubscriptionStop>) -> Result<()>;

    async fn send_multicast_subscription_stop(
        &self,
        envelope: RequestEnvelope<MulticastSubscriptionStop>,
    ) -> Result<()>;
}
