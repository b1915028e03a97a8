// Proxy handle
//
// The untyped client side of one provider: RPC calls, attribute access and
// subscriptions, all addressed to the provider chosen at build time.

use serde_json::Value;
use std::sync::Arc;

use crate::dispatching::{
    AttributeSubscription, BroadcastSubscription, RequestReplyManager, SubscriptionListener,
    SubscriptionManager,
};
use crate::error::{PlexusError, Result};
use crate::types::{
    BroadcastFilterParameters, DiscoveryEntryWithMetaInfo, MessagingQos, OneWayRequest, Request,
    RequestEnvelope, SubscriptionQos,
};

#[derive(Clone)]
pub struct ProxyHandle {
    proxy_participant_id: String,
    provider: DiscoveryEntryWithMetaInfo,
    messaging_qos: MessagingQos,
    request_reply_manager: Arc<RequestReplyManager>,
    subscription_manager: Arc<SubscriptionManager>,
}

impl std::fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("proxy_participant_id", &self.proxy_participant_id)
            .field("provider", &self.provider)
            .field("messaging_qos", &self.messaging_qos)
            .finish_non_exhaustive()
    }
}

fn accessor_name(prefix: &str, attribute_name: &str) -> String {
    let mut chars = attribute_name.chars();
    match chars.next() {
        Some(first) => format!("{prefix}{}{}", first.to_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    }
}

impl ProxyHandle {
    pub fn new(
        proxy_participant_id: String,
        provider: DiscoveryEntryWithMetaInfo,
        messaging_qos: MessagingQos,
        request_reply_manager: Arc<RequestReplyManager>,
        subscription_manager: Arc<SubscriptionManager>,
    ) -> Self {
        Self {
            proxy_participant_id,
            provider,
            messaging_qos,
            request_reply_manager,
            subscription_manager,
        }
    }

    pub fn proxy_participant_id(&self) -> &str {
        &self.proxy_participant_id
    }

    pub fn provider(&self) -> &DiscoveryEntryWithMetaInfo {
        &self.provider
    }

    pub fn messaging_qos(&self) -> &MessagingQos {
        &self.messaging_qos
    }

    fn envelope<T>(&self, payload: T) -> RequestEnvelope<T> {
        RequestEnvelope::new(
            self.proxy_participant_id.clone(),
            self.provider.clone(),
            self.messaging_qos.clone(),
            payload,
        )
    }

    pub async fn call_operation(&self, method_name: &str, params: Vec<Value>) -> Result<Vec<Value>> {
        self.request_reply_manager
            .send_request(self.envelope(Request::new(method_name, params)))
            .await
    }

    /// Call an operation and augment the output parameters with `output_types`
    pub async fn call_operation_typed(
        &self,
        method_name: &str,
        params: Vec<Value>,
        output_types: &[String],
    ) -> Result<Vec<Value>> {
        self.request_reply_manager
            .send_typed_request(self.envelope(Request::new(method_name, params)), output_types)
            .await
    }

    pub async fn call_fire_and_forget(&self, method_name: &str, params: Vec<Value>) -> Result<()> {
        self.request_reply_manager
            .send_one_way_request(self.envelope(OneWayRequest::new(method_name, params)))
            .await
    }

    pub async fn get_attribute(&self, attribute_name: &str, attribute_type: &str) -> Result<Value> {
        let request = Request::new(accessor_name("get", attribute_name), Vec::new());
        let mut response = self
            .request_reply_manager
            .send_typed_request(self.envelope(request), &[attribute_type.to_string()])
            .await?;
        if response.is_empty() {
            return Err(PlexusError::ProviderRuntime(format!(
                "getter of attribute {attribute_name} returned no value"
            )));
        }
        Ok(response.swap_remove(0))
    }

    pub async fn set_attribute(&self, attribute_name: &str, value: Value) -> Result<()> {
        let request = Request::new(accessor_name("set", attribute_name), vec![value]);
        self.request_reply_manager
            .send_request(self.envelope(request))
            .await?;
        Ok(())
    }

    pub async fn subscribe_to_attribute(
        &self,
        attribute_name: &str,
        attribute_type: &str,
        qos: impl Into<SubscriptionQos>,
        listener: SubscriptionListener,
    ) -> Result<String> {
        let subscription = AttributeSubscription::new(
            self.proxy_participant_id.clone(),
            self.provider.clone(),
            attribute_name,
            attribute_type,
            qos,
        )
        .with_listener(listener);
        self.subscription_manager
            .register_subscription(subscription)
            .await
    }

    /// Subscribe to a non-selective (multicast) broadcast
    pub async fn subscribe_to_broadcast(
        &self,
        broadcast_name: &str,
        parameter_types: Vec<String>,
        qos: impl Into<SubscriptionQos>,
        partitions: Vec<String>,
        listener: SubscriptionListener,
    ) -> Result<String> {
        let subscription = BroadcastSubscription::new(
            self.proxy_participant_id.clone(),
            self.provider.clone(),
            broadcast_name,
            parameter_types,
            qos,
        )
        .with_partitions(partitions)
        .with_listener(listener);
        self.subscription_manager
            .register_broadcast_subscription(subscription)
            .await
    }

    pub async fn subscribe_to_selective_broadcast(
        &self,
        broadcast_name: &str,
        parameter_types: Vec<String>,
        qos: impl Into<SubscriptionQos>,
        filter_parameters: Option<BroadcastFilterParameters>,
        listener: SubscriptionListener,
    ) -> Result<String> {
        let subscription = BroadcastSubscription::new(
            self.proxy_participant_id.clone(),
            self.provider.clone(),
            broadcast_name,
            parameter_types,
            qos,
        )
        .selective(filter_parameters)
        .with_listener(listener);
        self.subscription_manager
            .register_broadcast_subscription(subscription)
            .await
    }

    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.subscription_manager
            .unregister_subscription(subscription_id, self.messaging_qos.clone())
            .await
    }
}
