// Test utilities for Plexus crates
//
// Recording mocks for the collaborators of the core (dispatcher, message
// router, global directory, capability lookup) plus entry and provider
// fixtures. Everything here is for tests only.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use plexus_common::logging::{Component, Logger};
use plexus_node::capabilities::CapabilityLookup;
use plexus_node::config::RuntimeConfig;
use plexus_node::provider::{getter, operation, setter, Provider};
use plexus_node::types::{
    BroadcastSubscriptionRequest, DiscoveryEntry, DiscoveryEntryWithMetaInfo, DiscoveryQos,
    GlobalDiscoveryEntry, MulticastSubscriptionRequest, MulticastSubscriptionStop, OneWayRequest,
    ProviderQos, ProviderScope, Request, RequestEnvelope, SubscriptionRequest, SubscriptionStop,
    Version,
};
use plexus_node::{Address, Dispatcher, GlobalCapabilitiesDirectory, MessageRouter};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_DOMAIN: &str = "vehicle";
pub const RADIO_INTERFACE: &str = "vehicle/Radio";

/// Runtime configuration for tests: unique id, no logger installation
pub fn create_test_config() -> RuntimeConfig {
    RuntimeConfig::new(format!("test-cc-{}", uuid::Uuid::new_v4())).without_logging_config()
}

pub fn create_test_logger() -> Logger {
    Logger::new_root(Component::Custom("Test"), "test-node")
}

pub fn test_entry(
    participant_id: &str,
    version: Version,
    scope: ProviderScope,
) -> DiscoveryEntry {
    DiscoveryEntry::new(
        TEST_DOMAIN,
        RADIO_INTERFACE,
        participant_id,
        version,
        ProviderQos::default().with_scope(scope),
    )
}

pub fn test_provider_entry(participant_id: &str) -> DiscoveryEntryWithMetaInfo {
    test_entry(participant_id, Version::new(1, 0), ProviderScope::Local).with_meta_info(true)
}

pub fn global_entry(entry: DiscoveryEntry, address: &Address) -> GlobalDiscoveryEntry {
    let serialized = address.to_json_string().unwrap_or_default();
    GlobalDiscoveryEntry::new(entry, serialized)
}

pub fn mqtt_address(topic: &str) -> Address {
    Address::Mqtt {
        broker_uri: "tcp://broker:1883".to_string(),
        topic: topic.to_string(),
    }
}

/// Radio provider: attribute `currentStation` (read/write), attribute `mode`
/// (read only), operations `shuffleStations` and `addFavoriteStation`
pub fn radio_provider() -> Provider {
    let station = Arc::new(Mutex::new(json!("radio-1")));
    let read = station.clone();
    let write = station;
    Provider::new(RADIO_INTERFACE, Version::new(1, 0))
        .with_attribute(
            "currentStation",
            getter(move || {
                let value = read.lock().map(|v| v.clone()).unwrap_or(Value::Null);
                async move { Ok(value) }
            }),
            Some(setter(move |value| {
                if let Ok(mut station) = write.lock() {
                    *station = value;
                }
                async { Ok(()) }
            })),
        )
        .with_attribute("mode", getter(|| async { Ok(json!("FM")) }), None)
        .with_operation("shuffleStations", operation(|_| async { Ok(vec![]) }))
        .with_operation(
            "addFavoriteStation",
            operation(|params| async move {
                let name = params
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("station name missing"))?;
                Ok(vec![json!(!name.is_empty())])
            }),
        )
}

/// Dispatcher that records every envelope handed to it
#[derive(Default)]
pub struct MockDispatcher {
    pub requests: Mutex<Vec<RequestEnvelope<Request>>>,
    pub one_way_requests: Mutex<Vec<RequestEnvelope<OneWayRequest>>>,
    pub subscription_requests: Mutex<Vec<RequestEnvelope<SubscriptionRequest>>>,
    pub broadcast_subscription_requests: Mutex<Vec<RequestEnvelope<BroadcastSubscriptionRequest>>>,
    pub multicast_subscription_requests: Mutex<Vec<RequestEnvelope<MulticastSubscriptionRequest>>>,
    pub subscription_stops: Mutex<Vec<RequestEnvelope<SubscriptionStop>>>,
    pub multicast_subscription_stops: Mutex<Vec<RequestEnvelope<MulticastSubscriptionStop>>>,
    fail: AtomicBool,
}

impl MockDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every send fail from now on
    pub fn fail_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("transport unavailable"));
        }
        Ok(())
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn subscription_request_count(&self) -> usize {
        self.subscription_requests.lock().unwrap().len()
            + self.broadcast_subscription_requests.lock().unwrap().len()
            + self.multicast_subscription_requests.lock().unwrap().len()
    }

    pub fn stop_count(&self) -> usize {
        self.subscription_stops.lock().unwrap().len()
            + self.multicast_subscription_stops.lock().unwrap().len()
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn send_request(&self, envelope: RequestEnvelope<Request>) -> Result<()> {
        self.check()?;
        self.requests.lock().unwrap().push(envelope);
        Ok(())
    }

    async fn send_one_way_request(&self, envelope: RequestEnvelope<OneWayRequest>) -> Result<()> {
        self.check()?;
        self.one_way_requests.lock().unwrap().push(envelope);
        Ok(())
    }

    async fn send_subscription_request(
        &self,
        envelope: RequestEnvelope<SubscriptionRequest>,
    ) -> Result<()> {
        self.check()?;
        self.subscription_requests.lock().unwrap().push(envelope);
        Ok(())
    }

    async fn send_broadcast_subscription_request(
        &self,
        envelope: RequestEnvelope<BroadcastSubscriptionRequest>,
    ) -> Result<()> {
        self.check()?;
        self.broadcast_subscription_requests
            .lock()
            .unwrap()
            .push(envelope);
        Ok(())
    }

    async fn send_multicast_subscription_request(
        &self,
        envelope: RequestEnvelope<MulticastSubscriptionRequest>,
    ) -> Result<()> {
        self.check()?;
        self.multicast_subscription_requests
            .lock()
            .unwrap()
            .push(envelope);
        Ok(())
    }

    async fn send_subscription_stop(&self, envelope: RequestEnvelope<SubscriptionStop>) -> Result<()> {
        self.check()?;
        self.subscription_stops.lock().unwrap().push(envelope);
        Ok(())
    }

    async fn send_multicast_subscription_stop(
        &self,
        envelope: RequestEnvelope<MulticastSubscriptionStop>,
    ) -> Result<()> {
        self.check()?;
        self.multicast_subscription_stops
            .lock()
            .unwrap()
            .push(envelope);
        Ok(())
    }
}

/// Router recording next hops and known participants
#[derive(Default)]
pub struct MockMessageRouter {
    pub next_hops: Mutex<Vec<(String, Address, bool)>>,
    pub known: Mutex<Vec<String>>,
}

impl MockMessageRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hop_for(&self, participant_id: &str) -> Option<(Address, bool)> {
        self.next_hops
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _, _)| id == participant_id)
            .map(|(_, address, visible)| (address.clone(), *visible))
    }
}

#[async_trait]
impl MessageRouter for MockMessageRouter {
    async fn add_next_hop(
        &self,
        participant_id: &str,
        address: Address,
        is_globally_visible: bool,
    ) -> Result<()> {
        self.next_hops
            .lock()
            .unwrap()
            .push((participant_id.to_string(), address, is_globally_visible));
        Ok(())
    }

    fn set_to_known(&self, participant_id: &str) {
        self.known.lock().unwrap().push(participant_id.to_string());
    }

    async fn resolve_next_hop(&self, participant_id: &str) -> Result<Address> {
        self.hop_for(participant_id)
            .map(|(address, _)| address)
            .ok_or_else(|| anyhow!("no next hop for {participant_id}"))
    }
}

/// Global directory with scripted lookup results and call counters
#[derive(Default)]
pub struct MockGlobalDirectory {
    pub lookup_result: Mutex<Vec<GlobalDiscoveryEntry>>,
    pub lookup_error: Mutex<Option<String>>,
    pub add_error: Mutex<Option<String>>,
    pub added: Mutex<Vec<GlobalDiscoveryEntry>>,
    pub removed: Mutex<Vec<String>>,
    pub touched: Mutex<Vec<String>>,
    pub lookup_calls: AtomicUsize,
}

impl MockGlobalDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn returning(entries: Vec<GlobalDiscoveryEntry>) -> Arc<Self> {
        let directory = Self::default();
        *directory.lookup_result.lock().unwrap() = entries;
        Arc::new(directory)
    }

    pub fn fail_lookups(&self, message: &str) {
        *self.lookup_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_adds(&self, message: &str) {
        *self.add_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn lookup_count(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GlobalCapabilitiesDirectory for MockGlobalDirectory {
    async fn lookup(
        &self,
        _domains: &[String],
        _interface_name: &str,
        _ttl_ms: u64,
    ) -> Result<Vec<GlobalDiscoveryEntry>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.lookup_error.lock().unwrap().clone() {
            return Err(anyhow!(message));
        }
        Ok(self.lookup_result.lock().unwrap().clone())
    }

    async fn add(&self, entry: GlobalDiscoveryEntry, _ttl_ms: u64) -> Result<()> {
        if let Some(message) = self.add_error.lock().unwrap().clone() {
            return Err(anyhow!(message));
        }
        self.added.lock().unwrap().push(entry);
        Ok(())
    }

    async fn remove(&self, participant_id: &str, _ttl_ms: u64) -> Result<()> {
        self.removed.lock().unwrap().push(participant_id.to_string());
        Ok(())
    }

    async fn touch(&self, cluster_controller_id: &str, _ttl_ms: u64) -> Result<()> {
        self.touched
            .lock()
            .unwrap()
            .push(cluster_controller_id.to_string());
        Ok(())
    }
}

/// Capability lookup returning the same result on every call
pub struct MockCapabilityLookup {
    result: Mutex<std::result::Result<Vec<DiscoveryEntryWithMetaInfo>, String>>,
    calls: AtomicUsize,
}

impl MockCapabilityLookup {
    pub fn returning(entries: Vec<DiscoveryEntryWithMetaInfo>) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Ok(entries)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Err(message.to_string())),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_result(&self, entries: Vec<DiscoveryEntryWithMetaInfo>) {
        *self.result.lock().unwrap() = Ok(entries);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityLookup for MockCapabilityLookup {
    async fn lookup(
        &self,
        _domains: &[String],
        _interface_name: &str,
        _discovery_qos: &DiscoveryQos,
    ) -> plexus_node::Result<Vec<DiscoveryEntryWithMetaInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.result.lock().unwrap().clone() {
            Ok(entries) => Ok(entries),
            Err(message) => Err(plexus_node::PlexusError::Directory(message)),
        }
    }
}
