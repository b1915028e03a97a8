// Tests for the runtime and the proxy builder
//
// A loopback dispatcher hands requests straight to the request/reply manager
// of the same runtime, so proxies talk to locally registered providers
// without a transport.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use plexus_node::types::{
    BroadcastSubscriptionRequest, DiscoveryQos, DiscoveryScope, MessagingQos,
    MulticastSubscriptionRequest, MulticastSubscriptionStop, OneWayRequest, ProviderQos,
    ProviderScope, Request, RequestEnvelope, SubscriptionRequest, SubscriptionStop, Version,
};
use plexus_node::types::qos::MAX_MESSAGING_TTL_MS;
use plexus_node::{
    Address, DirectoryConnection, Dispatcher, PlexusError, PlexusRuntime, ProxySettings,
    RequestReplyManager, RuntimeCollaborators,
};
use plexus_test_utils::{
    create_test_config, mqtt_address, radio_provider, MockGlobalDirectory, MockMessageRouter,
    RADIO_INTERFACE, TEST_DOMAIN,
};
use serde_json::json;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::time::timeout;

/// Delivers requests to the request/reply manager it is attached to
#[derive(Default)]
struct LoopbackDispatcher {
    manager: Mutex<Weak<RequestReplyManager>>,
}

impl LoopbackDispatcher {
    fn attach(&self, manager: &Arc<RequestReplyManager>) {
        *self.manager.lock().unwrap() = Arc::downgrade(manager);
    }

    fn manager(&self) -> Result<Arc<RequestReplyManager>> {
        self.manager
            .lock()
            .unwrap()
            .upgrade()
            .ok_or_else(|| anyhow!("loopback not attached"))
    }
}

#[async_trait]
impl Dispatcher for LoopbackDispatcher {
    async fn send_request(&self, envelope: RequestEnvelope<Request>) -> Result<()> {
        let manager = self.manager()?;
        tokio::spawn(async move {
            let provider = envelope.to_discovery_entry.participant_id().to_string();
            let reply = manager.handle_request(&provider, envelope.payload).await;
            manager.handle_reply(reply);
        });
        Ok(())
    }

    async fn send_one_way_request(&self, envelope: RequestEnvelope<OneWayRequest>) -> Result<()> {
        let manager = self.manager()?;
        let provider = envelope.to_discovery_entry.participant_id().to_string();
        manager
            .handle_one_way_request(&provider, envelope.payload)
            .await;
        Ok(())
    }

    async fn send_subscription_request(
        &self,
        _envelope: RequestEnvelope<SubscriptionRequest>,
    ) -> Result<()> {
        Err(anyhow!("subscriptions are not looped back"))
    }

    async fn send_broadcast_subscription_request(
        &self,
        _envelope: RequestEnvelope<BroadcastSubscriptionRequest>,
    ) -> Result<()> {
        Err(anyhow!("subscriptions are not looped back"))
    }

    async fn send_multicast_subscription_request(
        &self,
        _envelope: RequestEnvelope<MulticastSubscriptionRequest>,
    ) -> Result<()> {
        Err(anyhow!("subscriptions are not looped back"))
    }

    async fn send_subscription_stop(&self, _envelope: RequestEnvelope<SubscriptionStop>) -> Result<()> {
        Ok(())
    }

    async fn send_multicast_subscription_stop(
        &self,
        _envelope: RequestEnvelope<MulticastSubscriptionStop>,
    ) -> Result<()> {
        Ok(())
    }
}

struct TestRuntime {
    runtime: PlexusRuntime,
    router: Arc<MockMessageRouter>,
    directory: Arc<MockGlobalDirectory>,
}

fn create_runtime() -> TestRuntime {
    let dispatcher = Arc::new(LoopbackDispatcher::default());
    let router = MockMessageRouter::new();
    let directory = MockGlobalDirectory::new();
    let collaborators = RuntimeCollaborators::new(
        dispatcher.clone(),
        router.clone(),
        DirectoryConnection::Custom(directory.clone()),
    );
    let runtime = PlexusRuntime::new(create_test_config(), collaborators);
    dispatcher.attach(runtime.request_reply_manager());
    TestRuntime {
        runtime,
        router,
        directory,
    }
}

fn local_settings() -> ProxySettings {
    ProxySettings::new(TEST_DOMAIN, RADIO_INTERFACE, Version::new(1, 0)).with_discovery_qos(
        DiscoveryQos::new()
            .with_scope(DiscoveryScope::LocalOnly)
            .with_timeout(2_000)
            .with_retry_delay(100),
    )
}

fn local_qos() -> ProviderQos {
    ProviderQos::default().with_scope(ProviderScope::Local)
}

/// INTENTION: Building a proxy registers a globally visible next hop for the
/// proxy and marks the chosen provider as known.
#[tokio::test]
async fn test_build_proxy_registers_routing() {
    timeout(Duration::from_secs(10), async {
        let test = create_runtime();
        let provider_id = test
            .runtime
            .register_provider(TEST_DOMAIN, radio_provider(), local_qos())
            .await
            .unwrap();
        assert_eq!(test.router.hop_for(&provider_id), Some((Address::InProcess, false)));

        let proxy = test.runtime.build_proxy(local_settings()).await.unwrap();

        assert_eq!(proxy.provider().participant_id(), provider_id);
        assert_eq!(
            test.router.hop_for(proxy.proxy_participant_id()),
            Some((Address::InProcess, true))
        );
        assert!(test.router.known.lock().unwrap().contains(&provider_id));
    })
    .await
    .expect("test timed out");
}

/// INTENTION: Messaging ttls above the configured maximum are clamped.
#[tokio::test]
async fn test_build_proxy_clamps_messaging_ttl() {
    timeout(Duration::from_secs(10), async {
        let test = create_runtime();
        test.runtime
            .register_provider(TEST_DOMAIN, radio_provider(), local_qos())
            .await
            .unwrap();

        let settings =
            local_settings().with_messaging_qos(MessagingQos::with_ttl(MAX_MESSAGING_TTL_MS + 1));
        let proxy = test.runtime.build_proxy(settings).await.unwrap();

        assert_eq!(proxy.messaging_qos().ttl_ms, MAX_MESSAGING_TTL_MS);
    })
    .await
    .expect("test timed out");
}

/// INTENTION: Attribute access and operation calls travel through the
/// request/reply manager to the registered provider and back.
#[tokio::test]
async fn test_proxy_round_trip_to_local_provider() {
    timeout(Duration::from_secs(10), async {
        let test = create_runtime();
        test.runtime
            .register_provider(TEST_DOMAIN, radio_provider(), local_qos())
            .await
            .unwrap();
        let proxy = test.runtime.build_proxy(local_settings()).await.unwrap();

        assert_eq!(
            proxy.get_attribute("currentStation", "String").await.unwrap(),
            json!("radio-1")
        );
        proxy
            .set_attribute("currentStation", json!("radio-5"))
            .await
            .unwrap();
        assert_eq!(
            proxy.get_attribute("currentStation", "String").await.unwrap(),
            json!("radio-5")
        );
        assert_eq!(
            proxy
                .call_operation("addFavoriteStation", vec![json!("jazz")])
                .await
                .unwrap(),
            vec![json!(true)]
        );

        proxy
            .call_fire_and_forget("setCurrentStation", vec![json!("radio-6")])
            .await
            .unwrap();
        assert_eq!(
            proxy.get_attribute("currentStation", "String").await.unwrap(),
            json!("radio-6")
        );

        let err = proxy.set_attribute("mode", json!("AM")).await.unwrap_err();
        assert!(matches!(err, PlexusError::MethodInvocation { .. }));
    })
    .await
    .expect("test timed out");
}

/// INTENTION: A GLOBAL provider is published to the directory and gets a
/// globally visible next hop; unregistering removes it again.
#[tokio::test]
async fn test_register_and_unregister_global_provider() {
    timeout(Duration::from_secs(10), async {
        let test = create_runtime();
        test.runtime
            .global_address_ready(&mqtt_address("cc/self"))
            .unwrap();

        let provider_id = test
            .runtime
            .register_provider(TEST_DOMAIN, radio_provider(), ProviderQos::default())
            .await
            .unwrap();

        assert_eq!(test.router.hop_for(&provider_id), Some((Address::InProcess, true)));
        let added = test.directory.added.lock().unwrap().clone();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].entry.participant_id, provider_id);

        test.runtime.unregister_provider(&provider_id).await.unwrap();
        assert_eq!(*test.directory.removed.lock().unwrap(), vec![provider_id.clone()]);

        let err = test
            .runtime
            .unregister_provider(&provider_id)
            .await
            .unwrap_err();
        assert!(matches!(err, PlexusError::InvalidArgument(_)));
    })
    .await
    .expect("test timed out");
}

/// INTENTION: A registration the directory rejects leaves nothing behind.
#[tokio::test]
async fn test_failed_registration_is_rolled_back() {
    timeout(Duration::from_secs(10), async {
        let test = create_runtime();
        test.directory.fail_adds("quota exceeded");
        test.runtime
            .global_address_ready(&mqtt_address("cc/self"))
            .unwrap();

        let err = test
            .runtime
            .register_provider(TEST_DOMAIN, radio_provider(), ProviderQos::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PlexusError::Directory(_)));
        assert!(test.runtime.discovery().local_store().is_empty());
    })
    .await
    .expect("test timed out");
}

/// INTENTION: After shutdown proxies can no longer be built and pending
/// work is rejected.
#[tokio::test]
async fn test_shutdown_closes_managers() {
    timeout(Duration::from_secs(10), async {
        let test = create_runtime();
        test.runtime
            .register_provider(TEST_DOMAIN, radio_provider(), local_qos())
            .await
            .unwrap();

        test.runtime.shutdown().await.unwrap();

        assert!(test.runtime.request_reply_manager().is_shut_down());
        assert!(test.runtime.subscription_manager().is_shut_down());
        let err = test.runtime.build_proxy(local_settings()).await.unwrap_err();
        assert!(matches!(err, PlexusError::ManagerClosed(_)));
    })
    .await
    .expect("test timed out");
}
