// Subscription Manager
//
// INTENTION: Own the consumer side of every attribute and broadcast
// subscription: send the subscription request, wait for the provider's
// acknowledgement, route publications to the subscriber's callbacks, raise
// "publication missed" alerts and stop everything once the QoS expiry date is
// reached.
//
// Each subscription has at most one scheduled wake-up task. A publication
// cancels that task and starts a fresh one (cancel-and-replace), unsubscribe
// and shutdown cancel it for good.

use dashmap::DashMap;
use futures_util::future::join_all;
use plexus_common::{
    current_time_ms, instant_after_epoch_ms, log_debug, log_error, log_info, log_warn, Component,
    Logger,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};

use crate::dispatching::dispatcher::Dispatcher;
use crate::dispatching::multicast;
use crate::error::{PlexusError, ProviderException, Result};
use crate::persistence::KeyValueStore;
use crate::type_registry::TypeRegistry;
use crate::types::{
    BroadcastFilterParameters, BroadcastSubscriptionRequest, DiscoveryEntryWithMetaInfo,
    MessagingQos, MulticastPublication, MulticastSubscriptionRequest, MulticastSubscriptionStop,
    RequestEnvelope, SubscriptionPublication, SubscriptionQos, SubscriptionReply,
    SubscriptionRequest, SubscriptionStop,
};

const MANAGER_NAME: &str = "SubscriptionManager";

/// Key prefix of persisted subscriptions
pub const SUBSCRIPTION_KEY_PREFIX: &str = "plexus.subscription.";

pub type OnReceive = Arc<dyn Fn(Vec<Value>) + Send + Sync>;
pub type OnError = Arc<dyn Fn(PlexusError) + Send + Sync>;
pub type OnSubscribed = Arc<dyn Fn(&str) + Send + Sync>;

pub fn new_subscription_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Callbacks of one subscriber
#[derive(Clone, Default)]
pub struct SubscriptionListener {
    pub on_receive: Option<OnReceive>,
    pub on_error: Option<OnError>,
    pub on_subscribed: Option<OnSubscribed>,
}

impl SubscriptionListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_receive<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        self.on_receive = Some(Arc::new(f));
        self
    }

    pub fn with_on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(PlexusError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn with_on_subscribed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_subscribed = Some(Arc::new(f));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionState {
    /// Request sent, no acknowledgement yet
    Pending,
    Active,
    Stopped,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionKind {
    Attribute,
    SelectiveBroadcast,
    Multicast,
}

/// Serializable description of one subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInformation {
    pub subscription_id: String,
    pub subscribed_to_name: String,
    pub kind: SubscriptionKind,
    pub proxy_participant_id: String,
    pub provider_discovery_entry: DiscoveryEntryWithMetaInfo,
    pub qos: SubscriptionQos,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multicast_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_parameters: Option<BroadcastFilterParameters>,
    /// Type names used to augment the values of a publication, by position
    #[serde(default)]
    pub payload_types: Vec<String>,
    #[serde(default)]
    pub last_publication_ms: i64,
}

impl SubscriptionInformation {
    pub fn provider_participant_id(&self) -> &str {
        self.provider_discovery_entry.participant_id()
    }
}

/// Subscription to an attribute of a provider
#[derive(Clone)]
pub struct AttributeSubscription {
    pub proxy_participant_id: String,
    pub provider: DiscoveryEntryWithMetaInfo,
    pub attribute_name: String,
    pub attribute_type: String,
    pub qos: SubscriptionQos,
    /// Reuse an existing id to update a subscription
    pub subscription_id: Option<String>,
    pub listener: SubscriptionListener,
}

impl AttributeSubscription {
    pub fn new(
        proxy_participant_id: impl Into<String>,
        provider: DiscoveryEntryWithMetaInfo,
        attribute_name: impl Into<String>,
        attribute_type: impl Into<String>,
        qos: impl Into<SubscriptionQos>,
    ) -> Self {
        Self {
            proxy_participant_id: proxy_participant_id.into(),
            provider,
            attribute_name: attribute_name.into(),
            attribute_type: attribute_type.into(),
            qos: qos.into(),
            subscription_id: None,
            listener: SubscriptionListener::default(),
        }
    }

    pub fn with_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    pub fn with_listener(mut self, listener: SubscriptionListener) -> Self {
        self.listener = listener;
        self
    }
}

/// Subscription to a broadcast. Non-selective broadcasts are multicast and
/// may be narrowed by partitions, selective ones by filter parameters.
#[derive(Clone)]
pub struct BroadcastSubscription {
    pub proxy_participant_id: String,
    pub provider: DiscoveryEntryWithMetaInfo,
    pub broadcast_name: String,
    pub parameter_types: Vec<String>,
    pub qos: SubscriptionQos,
    pub selective: bool,
    pub filter_parameters: Option<BroadcastFilterParameters>,
    pub partitions: Vec<String>,
    pub subscription_id: Option<String>,
    pub listener: SubscriptionListener,
}

impl BroadcastSubscription {
    pub fn new(
        proxy_participant_id: impl Into<String>,
        provider: DiscoveryEntryWithMetaInfo,
        broadcast_name: impl Into<String>,
        parameter_types: Vec<String>,
        qos: impl Into<SubscriptionQos>,
    ) -> Self {
        Self {
            proxy_participant_id: proxy_participant_id.into(),
            provider,
            broadcast_name: broadcast_name.into(),
            parameter_types,
            qos: qos.into(),
            selective: false,
            filter_parameters: None,
            partitions: Vec::new(),
            subscription_id: None,
            listener: SubscriptionListener::default(),
        }
    }

    pub fn selective(mut self, filter_parameters: Option<BroadcastFilterParameters>) -> Self {
        self.selective = true;
        self.filter_parameters = filter_parameters;
        self
    }

    pub fn with_partitions<I, S>(mut self, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partitions = partitions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    pub fn with_listener(mut self, listener: SubscriptionListener) -> Self {
        self.listener = listener;
        self
    }
}

struct SubscriptionTimer {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SubscriptionTimer {
    fn cancel(self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

struct Subscription {
    info: SubscriptionInformation,
    state: SubscriptionState,
    listener: SubscriptionListener,
    expires_at: Option<Instant>,
    timer: Option<SubscriptionTimer>,
}

pub struct SubscriptionManager {
    dispatcher: Arc<dyn Dispatcher>,
    type_registry: Arc<TypeRegistry>,
    store: Option<Arc<dyn KeyValueStore>>,
    subscriptions: DashMap<String, Subscription>,
    reply_callers: DashMap<String, oneshot::Sender<SubscriptionReply>>,
    /// Subscribed multicast id (possibly with wildcards) to subscription ids
    multicast_subscribers: DashMap<String, Vec<String>>,
    shut_down: AtomicBool,
    self_ref: Weak<SubscriptionManager>,
    logger: Logger,
}

impl SubscriptionManager {
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        type_registry: Arc<TypeRegistry>,
        store: Option<Arc<dyn KeyValueStore>>,
        logger: &Logger,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            dispatcher,
            type_registry,
            store,
            subscriptions: DashMap::new(),
            reply_callers: DashMap::new(),
            multicast_subscribers: DashMap::new(),
            shut_down: AtomicBool::new(false),
            self_ref: self_ref.clone(),
            logger: logger.with_component(Component::Subscription),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(PlexusError::ManagerClosed(MANAGER_NAME));
        }
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Subscribe to an attribute. Resolves with the subscription id once the
    /// provider acknowledged the request.
    pub async fn register_subscription(&self, subscription: AttributeSubscription) -> Result<String> {
        self.check_open()?;
        subscription.qos.validate()?;
        let AttributeSubscription {
            proxy_participant_id,
            provider,
            attribute_name,
            attribute_type,
            qos,
            subscription_id,
            listener,
        } = subscription;
        let subscription_id = subscription_id.unwrap_or_else(new_subscription_id);
        self.warn_missing_callbacks(&attribute_name, &listener);

        let ttl_ms = qos.messaging_ttl_ms(current_time_ms());
        let request = SubscriptionRequest {
            subscription_id: subscription_id.clone(),
            subscribed_to_name: attribute_name.clone(),
            qos: qos.clone(),
        };
        let info = SubscriptionInformation {
            subscription_id: subscription_id.clone(),
            subscribed_to_name: attribute_name,
            kind: SubscriptionKind::Attribute,
            proxy_participant_id: proxy_participant_id.clone(),
            provider_discovery_entry: provider.clone(),
            qos,
            multicast_id: None,
            filter_parameters: None,
            payload_types: vec![attribute_type],
            last_publication_ms: 0,
        };

        let acknowledgement = self.expect_reply(&subscription_id);
        self.store_subscription(info, listener);
        let sent = self
            .dispatcher
            .send_subscription_request(RequestEnvelope::new(
                proxy_participant_id,
                provider,
                MessagingQos::with_ttl(ttl_ms),
                request,
            ))
            .await;
        self.await_acknowledgement(&subscription_id, sent, acknowledgement, ttl_ms)
            .await
    }

    /// Subscribe to a broadcast.
    ///
    /// Filter parameters and partitions are validated before anything is sent.
    /// Multicast subscriptions are active as soon as the request was handed to
    /// the dispatcher.
    pub async fn register_broadcast_subscription(
        &self,
        subscription: BroadcastSubscription,
    ) -> Result<String> {
        self.check_open()?;
        subscription.qos.validate()?;
        if subscription.selective {
            if !subscription.partitions.is_empty() {
                return Err(PlexusError::InvalidArgument(format!(
                    "partitions are not supported for selective broadcast {}",
                    subscription.broadcast_name
                )));
            }
            if let Some(filter_parameters) = &subscription.filter_parameters {
                filter_parameters.validate()?;
            }
        } else {
            multicast::validate_partitions(&subscription.partitions)?;
        }

        let BroadcastSubscription {
            proxy_participant_id,
            provider,
            broadcast_name,
            parameter_types,
            qos,
            selective,
            filter_parameters,
            partitions,
            subscription_id,
            listener,
        } = subscription;
        let subscription_id = subscription_id.unwrap_or_else(new_subscription_id);
        self.warn_missing_callbacks(&broadcast_name, &listener);
        let ttl_ms = qos.messaging_ttl_ms(current_time_ms());

        let mut info = SubscriptionInformation {
            subscription_id: subscription_id.clone(),
            subscribed_to_name: broadcast_name.clone(),
            kind: SubscriptionKind::SelectiveBroadcast,
            proxy_participant_id: proxy_participant_id.clone(),
            provider_discovery_entry: provider.clone(),
            qos: qos.clone(),
            multicast_id: None,
            filter_parameters: None,
            payload_types: parameter_types,
            last_publication_ms: 0,
        };

        if selective {
            info.filter_parameters = filter_parameters.clone();
            let request = BroadcastSubscriptionRequest {
                subscription_id: subscription_id.clone(),
                subscribed_to_name: broadcast_name,
                qos,
                filter_parameters,
            };
            let acknowledgement = self.expect_reply(&subscription_id);
            self.store_subscription(info, listener);
            let sent = self
                .dispatcher
                .send_broadcast_subscription_request(RequestEnvelope::new(
                    proxy_participant_id,
                    provider,
                    MessagingQos::with_ttl(ttl_ms),
                    request,
                ))
                .await;
            return self
                .await_acknowledgement(&subscription_id, sent, acknowledgement, ttl_ms)
                .await;
        }

        let multicast_id =
            multicast::create_multicast_id(provider.participant_id(), &broadcast_name, &partitions);
        info.kind = SubscriptionKind::Multicast;
        info.multicast_id = Some(multicast_id.clone());
        let request = MulticastSubscriptionRequest {
            multicast_id: multicast_id.clone(),
            subscription_id: subscription_id.clone(),
            subscribed_to_name: broadcast_name,
            qos,
        };
        let on_subscribed = listener.on_subscribed.clone();
        self.store_subscription(info, listener);
        self.add_multicast_subscriber(&multicast_id, &subscription_id);

        let sent = self
            .dispatcher
            .send_multicast_subscription_request(RequestEnvelope::new(
                proxy_participant_id,
                provider,
                MessagingQos::with_ttl(ttl_ms),
                request,
            ))
            .await;
        match sent {
            Ok(()) => {
                self.activate(&subscription_id);
                if let Some(on_subscribed) = on_subscribed {
                    on_subscribed(&subscription_id);
                }
                Ok(subscription_id)
            }
            Err(e) => Err(self.fail_send(&subscription_id, e)),
        }
    }

    fn warn_missing_callbacks(&self, subscribed_to_name: &str, listener: &SubscriptionListener) {
        if listener.on_error.is_none() {
            log_warn!(
                self.logger,
                "subscription to \"{subscribed_to_name}\" has no error callback, missed publications will go unnoticed"
            );
        }
        if listener.on_receive.is_none() {
            log_warn!(
                self.logger,
                "subscription to \"{subscribed_to_name}\" has no receive callback, publications will be dropped"
            );
        }
    }

    fn expect_reply(&self, subscription_id: &str) -> oneshot::Receiver<SubscriptionReply> {
        let (sender, receiver) = oneshot::channel();
        self.reply_callers.insert(subscription_id.to_string(), sender);
        receiver
    }

    async fn await_acknowledgement(
        &self,
        subscription_id: &str,
        sent: anyhow::Result<()>,
        acknowledgement: oneshot::Receiver<SubscriptionReply>,
        ttl_ms: u64,
    ) -> Result<String> {
        if let Err(e) = sent {
            return Err(self.fail_send(subscription_id, e));
        }
        match timeout(Duration::from_millis(ttl_ms), acknowledgement).await {
            Ok(Ok(reply)) => match reply.error {
                Some(exception) => Err(exception.into()),
                None => Ok(subscription_id.to_string()),
            },
            Ok(Err(_)) if self.is_shut_down() => Err(PlexusError::ManagerClosed(MANAGER_NAME)),
            // unsubscribed before the provider answered
            Ok(Err(_)) => Err(PlexusError::SubscriptionNotFound(subscription_id.to_string())),
            Err(_) => {
                log_warn!(
                    self.logger,
                    "subscription request {subscription_id} was not acknowledged within {ttl_ms} ms"
                );
                self.cleanup(subscription_id);
                Err(PlexusError::SubscriptionRequestTimeout(subscription_id.to_string()))
            }
        }
    }

    /// Clean up after a failed dispatch and tell the subscriber
    fn fail_send(&self, subscription_id: &str, error: anyhow::Error) -> PlexusError {
        log_error!(
            self.logger,
            "sending subscription request {subscription_id} failed: {error:#}"
        );
        if let Some(on_error) = self.cleanup(subscription_id).and_then(|l| l.on_error) {
            on_error(PlexusError::Transport(anyhow::anyhow!("{error:#}")));
        }
        PlexusError::Transport(error)
    }

    fn store_subscription(&self, info: SubscriptionInformation, listener: SubscriptionListener) {
        let subscription_id = info.subscription_id.clone();
        let expires_at = info
            .qos
            .has_expiry()
            .then(|| instant_after_epoch_ms(info.qos.expiry_date_ms()));
        let timer = self.start_timer(
            &subscription_id,
            &info.qos,
            Instant::now(),
            expires_at,
            listener.on_error.clone(),
        );
        let previous = self.subscriptions.insert(
            subscription_id.clone(),
            Subscription {
                info,
                state: SubscriptionState::Pending,
                listener,
                expires_at,
                timer,
            },
        );
        if let Some(previous) = previous {
            log_debug!(self.logger, "updating subscription {subscription_id}");
            if let Some(timer) = previous.timer {
                timer.cancel();
            }
        }
    }

    fn start_timer(
        &self,
        subscription_id: &str,
        qos: &SubscriptionQos,
        start: Instant,
        expires_at: Option<Instant>,
        on_error: Option<OnError>,
    ) -> Option<SubscriptionTimer> {
        let alert_after_ms = qos.alert_after_interval_ms();
        let alert_after = (alert_after_ms > 0).then(|| Duration::from_millis(alert_after_ms));
        if alert_after.is_none() && expires_at.is_none() {
            return None;
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(Self::run_timer(
            self.self_ref.clone(),
            subscription_id.to_string(),
            start,
            alert_after,
            expires_at,
            on_error,
            cancelled.clone(),
            self.logger.clone(),
        ));
        Some(SubscriptionTimer { cancelled, task })
    }

    /// Alert every `alert_after` counted from `start` until `expires_at`, then
    /// expire the subscription. No alert fires at or after the expiry instant.
    #[allow(clippy::too_many_arguments)]
    async fn run_timer(
        manager: Weak<SubscriptionManager>,
        subscription_id: String,
        start: Instant,
        alert_after: Option<Duration>,
        expires_at: Option<Instant>,
        on_error: Option<OnError>,
        cancelled: Arc<AtomicBool>,
        logger: Logger,
    ) {
        if let Some(interval) = alert_after {
            let mut alert_at = start + interval;
            while expires_at.map_or(true, |expiry| alert_at < expiry) {
                sleep_until(alert_at).await;
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }
                log_debug!(logger, "publication missed for subscription {subscription_id}");
                if let Some(on_error) = &on_error {
                    on_error(PlexusError::PublicationMissed(subscription_id.clone()));
                }
                alert_at += interval;
            }
        }

        let Some(expiry) = expires_at else {
            return;
        };
        sleep_until(expiry).await;
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        if let Some(manager) = manager.upgrade() {
            manager.expire(&subscription_id, &cancelled);
        }
    }

    /// Drop a subscription whose expiry date was reached. Only the timer that
    /// currently belongs to the subscription may expire it.
    fn expire(&self, subscription_id: &str, timer_flag: &Arc<AtomicBool>) {
        let removed = self.subscriptions.remove_if(subscription_id, |_, subscription| {
            subscription
                .timer
                .as_ref()
                .is_some_and(|timer| Arc::ptr_eq(&timer.cancelled, timer_flag))
        });
        if let Some((_, mut subscription)) = removed {
            subscription.state = SubscriptionState::Expired;
            // the running task is this timer itself, let it finish
            drop(subscription.timer.take());
            self.remove_multicast_subscriber(subscription_id);
            self.reply_callers.remove(subscription_id);
            self.unpersist(subscription_id);
            log_info!(self.logger, "subscription {subscription_id} expired");
        }
    }

    /// Remove every trace of a subscription, returning its callbacks
    fn cleanup(&self, subscription_id: &str) -> Option<SubscriptionListener> {
        self.reply_callers.remove(subscription_id);
        self.remove_multicast_subscriber(subscription_id);
        self.unpersist(subscription_id);
        let (_, subscription) = self.subscriptions.remove(subscription_id)?;
        if let Some(timer) = subscription.timer {
            timer.cancel();
        }
        Some(subscription.listener)
    }

    fn activate(&self, subscription_id: &str) {
        let info = match self.subscriptions.get_mut(subscription_id) {
            Some(mut subscription) => {
                subscription.state = SubscriptionState::Active;
                subscription.info.clone()
            }
            None => return,
        };
        self.persist(&info);
    }

    fn add_multicast_subscriber(&self, multicast_id: &str, subscription_id: &str) {
        let mut subscribers = self
            .multicast_subscribers
            .entry(multicast_id.to_string())
            .or_default();
        if !subscribers.iter().any(|id| id == subscription_id) {
            subscribers.push(subscription_id.to_string());
        }
    }

    fn remove_multicast_subscriber(&self, subscription_id: &str) {
        for mut subscribers in self.multicast_subscribers.iter_mut() {
            subscribers.retain(|id| id != subscription_id);
        }
        self.multicast_subscribers
            .retain(|_, subscribers| !subscribers.is_empty());
    }

    fn persist(&self, info: &SubscriptionInformation) {
        let Some(store) = &self.store else {
            return;
        };
        let key = format!("{SUBSCRIPTION_KEY_PREFIX}{}", info.subscription_id);
        let stored = serde_json::to_string(info)
            .map_err(anyhow::Error::from)
            .and_then(|json| store.set(&key, json));
        if let Err(e) = stored {
            log_warn!(
                self.logger,
                "unable to persist subscription {}: {e:#}",
                info.subscription_id
            );
        }
    }

    fn unpersist(&self, subscription_id: &str) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.remove(&format!("{SUBSCRIPTION_KEY_PREFIX}{subscription_id}")) {
            log_warn!(
                self.logger,
                "unable to remove persisted subscription {subscription_id}: {e:#}"
            );
        }
    }

    /// Subscriptions found in the configured key/value store
    pub fn persisted_subscriptions(&self) -> Result<Vec<SubscriptionInformation>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let mut persisted = Vec::new();
        for key in store.keys_with_prefix(SUBSCRIPTION_KEY_PREFIX)? {
            if let Some(json) = store.get(&key)? {
                persisted.push(serde_json::from_str(&json)?);
            }
        }
        Ok(persisted)
    }

    /// Provider acknowledgement (or rejection) of a subscription request
    pub fn handle_subscription_reply(&self, reply: SubscriptionReply) {
        let subscription_id = reply.subscription_id.clone();
        let caller = self
            .reply_callers
            .remove(&subscription_id)
            .map(|(_, caller)| caller);
        let listener = self
            .subscriptions
            .get(&subscription_id)
            .map(|subscription| subscription.listener.clone());

        if caller.is_none() && listener.is_none() {
            log_error!(
                self.logger,
                "error handling subscription reply, no subscription with id {subscription_id} is known"
            );
            return;
        }

        match &reply.error {
            Some(exception) => {
                log_warn!(
                    self.logger,
                    "subscription {subscription_id} rejected by provider: {exception}"
                );
                self.cleanup(&subscription_id);
                if let Some(on_error) = listener.and_then(|l| l.on_error) {
                    on_error(exception.clone().into());
                }
            }
            None => {
                self.activate(&subscription_id);
                log_debug!(self.logger, "subscription {subscription_id} is active");
                if let Some(on_subscribed) = listener.and_then(|l| l.on_subscribed) {
                    on_subscribed(&subscription_id);
                }
            }
        }
        if let Some(caller) = caller {
            let _ = caller.send(reply);
        }
    }

    /// Deliver a publication. Publications of unknown subscriptions (for
    /// example arriving after unsubscribe) are ignored.
    pub fn handle_publication(&self, publication: SubscriptionPublication) {
        if self.is_shut_down() {
            return;
        }
        let SubscriptionPublication {
            subscription_id,
            response,
            error,
        } = publication;
        match self.record_publication(&subscription_id) {
            Some((listener, payload_types)) => {
                self.deliver(&subscription_id, &listener, &payload_types, response, error)
            }
            None => log_debug!(
                self.logger,
                "ignoring publication for unknown subscription {subscription_id}"
            ),
        }
    }

    /// Deliver a multicast publication to every subscription whose multicast
    /// id pattern matches.
    pub fn handle_multicast_publication(&self, publication: MulticastPublication) {
        if self.is_shut_down() {
            return;
        }
        let subscribers: Vec<String> = self
            .multicast_subscribers
            .iter()
            .filter(|entry| multicast::matches(entry.key(), &publication.multicast_id))
            .flat_map(|entry| entry.value().clone())
            .collect();
        if subscribers.is_empty() {
            log_warn!(
                self.logger,
                "publication cannot be handled, no subscription with multicastId {} is known",
                publication.multicast_id
            );
            return;
        }
        for subscription_id in subscribers {
            if let Some((listener, payload_types)) = self.record_publication(&subscription_id) {
                self.deliver(
                    &subscription_id,
                    &listener,
                    &payload_types,
                    publication.response.clone(),
                    publication.error.clone(),
                );
            }
        }
    }

    /// Note the arrival of a publication and restart the alert schedule from now
    fn record_publication(&self, subscription_id: &str) -> Option<(SubscriptionListener, Vec<String>)> {
        let mut subscription = self.subscriptions.get_mut(subscription_id)?;
        subscription.info.last_publication_ms = current_time_ms();
        if subscription.info.qos.alert_after_interval_ms() > 0 {
            if let Some(timer) = subscription.timer.take() {
                timer.cancel();
            }
            let timer = self.start_timer(
                subscription_id,
                &subscription.info.qos,
                Instant::now(),
                subscription.expires_at,
                subscription.listener.on_error.clone(),
            );
            subscription.timer = timer;
        }
        Some((
            subscription.listener.clone(),
            subscription.info.payload_types.clone(),
        ))
    }

    fn deliver(
        &self,
        subscription_id: &str,
        listener: &SubscriptionListener,
        payload_types: &[String],
        response: Option<Vec<Value>>,
        error: Option<ProviderException>,
    ) {
        if let Some(exception) = error {
            match &listener.on_error {
                Some(on_error) => on_error(exception.into()),
                None => log_debug!(
                    self.logger,
                    "subscription {subscription_id} has no error callback, skipping error publication"
                ),
            }
            return;
        }
        let Some(values) = response else {
            return;
        };
        let decoded = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| match payload_types.get(index) {
                Some(type_name) => self.type_registry.augment(value, type_name),
                None => Ok(value),
            })
            .collect::<Result<Vec<_>>>();
        match (decoded, &listener.on_receive, &listener.on_error) {
            (Ok(values), Some(on_receive), _) => on_receive(values),
            (Ok(_), None, _) => log_debug!(
                self.logger,
                "subscription {subscription_id} has no receive callback, skipping publication"
            ),
            (Err(e), _, on_error) => {
                log_error!(
                    self.logger,
                    "unable to decode publication for subscription {subscription_id}: {e}"
                );
                if let Some(on_error) = on_error {
                    on_error(e);
                }
            }
        }
    }

    /// Stop a subscription: its timer is cancelled before this returns and a
    /// stop message is sent to the provider.
    pub async fn unregister_subscription(
        &self,
        subscription_id: &str,
        messaging_qos: MessagingQos,
    ) -> Result<()> {
        self.check_open()?;
        let Some((_, subscription)) = self.subscriptions.remove(subscription_id) else {
            log_error!(self.logger, "Cannot find subscription with id: {subscription_id}");
            return Err(PlexusError::SubscriptionNotFound(subscription_id.to_string()));
        };
        let Subscription { info, timer, .. } = subscription;
        if let Some(timer) = timer {
            timer.cancel();
        }
        self.reply_callers.remove(subscription_id);
        self.remove_multicast_subscriber(subscription_id);
        self.unpersist(subscription_id);
        log_info!(self.logger, "stopping subscription {subscription_id}");

        let subscription_stop = SubscriptionStop {
            subscription_id: subscription_id.to_string(),
        };
        let sent = match info.multicast_id {
            Some(multicast_id) => {
                self.dispatcher
                    .send_multicast_subscription_stop(RequestEnvelope::new(
                        info.proxy_participant_id,
                        info.provider_discovery_entry,
                        messaging_qos,
                        MulticastSubscriptionStop {
                            multicast_id,
                            subscription_stop,
                        },
                    ))
                    .await
            }
            None => {
                self.dispatcher
                    .send_subscription_stop(RequestEnvelope::new(
                        info.proxy_participant_id,
                        info.provider_discovery_entry,
                        messaging_qos,
                        subscription_stop,
                    ))
                    .await
            }
        };
        sent.map_err(|e| {
            log_error!(
                self.logger,
                "sending subscription stop for {subscription_id} failed: {e:#}"
            );
            PlexusError::Transport(e)
        })
    }

    /// Unregister every subscription, waiting at most `timeout_ms` for the
    /// stop messages to be sent.
    pub async fn terminate_subscriptions(&self, timeout_ms: u64) -> Result<()> {
        let subscription_ids: Vec<String> = self
            .subscriptions
            .iter()
            .map(|subscription| subscription.key().clone())
            .collect();
        let stops = subscription_ids
            .iter()
            .map(|id| self.unregister_subscription(id, MessagingQos::default()));
        match timeout(Duration::from_millis(timeout_ms), join_all(stops)).await {
            Ok(results) => {
                for e in results.into_iter().filter_map(|result| result.err()) {
                    log_warn!(self.logger, "terminating subscription failed: {e}");
                }
                Ok(())
            }
            Err(_) => Err(PlexusError::Transport(anyhow::anyhow!(
                "terminating {} subscriptions did not finish within {timeout_ms} ms",
                subscription_ids.len()
            ))),
        }
    }

    pub fn has_open_subscriptions(&self) -> bool {
        !self.subscriptions.is_empty()
            || !self.reply_callers.is_empty()
            || !self.multicast_subscribers.is_empty()
    }

    pub fn subscription_state(&self, subscription_id: &str) -> Option<SubscriptionState> {
        self.subscriptions
            .get(subscription_id)
            .map(|subscription| subscription.state)
    }

    pub fn subscription_information(&self, subscription_id: &str) -> Option<SubscriptionInformation> {
        self.subscriptions
            .get(subscription_id)
            .map(|subscription| subscription.info.clone())
    }

    /// Cancel every timer and pending acknowledgement. Later register and
    /// unregister calls fail with `ManagerClosed`.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for mut subscription in self.subscriptions.iter_mut() {
            if let Some(timer) = subscription.timer.take() {
                timer.cancel();
            }
        }
        self.reply_callers.clear();
        log_info!(self.logger, "{MANAGER_NAME} shut down");
    }
}
