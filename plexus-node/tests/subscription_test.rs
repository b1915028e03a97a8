// Tests for the subscription manager
//
// Alert and expiry timing runs on paused time; acknowledgements are fed back
// by hand once the recording dispatcher saw the subscription request.

use plexus_common::current_time_ms;
use plexus_node::types::{
    BroadcastFilterParameters, MessagingQos, MulticastPublication, MulticastSubscriptionQos,
    OnChangeSubscriptionQos, PeriodicSubscriptionQos, SubscriptionPublication, SubscriptionReply,
};
use plexus_node::{
    AttributeSubscription, BroadcastSubscription, InMemoryKeyValueStore, KeyValueStore,
    PlexusError, ProviderException, ProxyHandle, RequestReplyManager, SubscriptionListener,
    SubscriptionManager, SubscriptionState, TypeRegistry,
};
use plexus_test_utils::{create_test_logger, test_provider_entry, MockDispatcher};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

const PROVIDER_PID: &str = "radio-provider";

/// Counts alerts and collects publications
#[derive(Clone, Default)]
struct Recorder {
    missed: Arc<AtomicUsize>,
    errors: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<Vec<Value>>>>,
    subscribed: Arc<AtomicUsize>,
}

impl Recorder {
    fn listener(&self) -> SubscriptionListener {
        let missed = self.missed.clone();
        let errors = self.errors.clone();
        let received = self.received.clone();
        let subscribed = self.subscribed.clone();
        SubscriptionListener::new()
            .with_on_receive(move |values| received.lock().unwrap().push(values))
            .with_on_error(move |error| {
                if matches!(error, PlexusError::PublicationMissed(_)) {
                    missed.fetch_add(1, Ordering::SeqCst);
                } else {
                    errors.lock().unwrap().push(error.to_string());
                }
            })
            .with_on_subscribed(move |_| {
                subscribed.fetch_add(1, Ordering::SeqCst);
            })
    }

    fn missed(&self) -> usize {
        self.missed.load(Ordering::SeqCst)
    }

    fn received(&self) -> Vec<Vec<Value>> {
        self.received.lock().unwrap().clone()
    }
}

fn manager(
    dispatcher: Arc<MockDispatcher>,
    store: Option<Arc<dyn KeyValueStore>>,
) -> Arc<SubscriptionManager> {
    SubscriptionManager::new(
        dispatcher,
        Arc::new(TypeRegistry::new()),
        store,
        &create_test_logger(),
    )
}

fn attribute_subscription(
    qos: impl Into<plexus_node::types::SubscriptionQos>,
    recorder: &Recorder,
) -> AttributeSubscription {
    AttributeSubscription::new(
        "proxy-1",
        test_provider_entry(PROVIDER_PID),
        "currentStation",
        "String",
        qos,
    )
    .with_listener(recorder.listener())
}

/// Register an attribute subscription and acknowledge it as the provider would
async fn subscribe_acknowledged(
    manager: &Arc<SubscriptionManager>,
    dispatcher: &MockDispatcher,
    subscription: AttributeSubscription,
) -> String {
    let before = dispatcher.subscription_requests.lock().unwrap().len();
    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.register_subscription(subscription).await })
    };
    while dispatcher.subscription_requests.lock().unwrap().len() == before {
        tokio::task::yield_now().await;
    }
    let subscription_id = dispatcher
        .subscription_requests
        .lock()
        .unwrap()
        .last()
        .map(|envelope| envelope.payload.subscription_id.clone())
        .unwrap();
    manager.handle_subscription_reply(SubscriptionReply::ok(subscription_id.clone()));
    let registered = pending.await.unwrap().unwrap();
    assert_eq!(registered, subscription_id);
    registered
}

/// INTENTION: Without publications the subscriber is alerted at A and 2A;
/// at the expiry date the subscription disappears without a further alert
/// and without a stop message.
#[tokio::test(start_paused = true)]
async fn test_alerts_until_expiry() {
    let dispatcher = MockDispatcher::new();
    let manager = manager(dispatcher.clone(), None);
    let recorder = Recorder::default();
    let qos = PeriodicSubscriptionQos::new(500, 1_000, current_time_ms() + 2_500).unwrap();

    let id = subscribe_acknowledged(&manager, &dispatcher, attribute_subscription(qos, &recorder)).await;
    assert_eq!(manager.subscription_state(&id), Some(SubscriptionState::Active));
    assert_eq!(recorder.subscribed.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(1_100)).await;
    assert_eq!(recorder.missed(), 1);
    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(recorder.missed(), 2);

    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(recorder.missed(), 2);
    assert_eq!(manager.subscription_state(&id), None);
    assert!(!manager.has_open_subscriptions());
    assert_eq!(dispatcher.stop_count(), 0);
}

/// INTENTION: Each publication restarts the alert schedule from its arrival.
#[tokio::test(start_paused = true)]
async fn test_publication_resets_alert_timer() {
    let dispatcher = MockDispatcher::new();
    let manager = manager(dispatcher.clone(), None);
    let recorder = Recorder::default();
    let qos = PeriodicSubscriptionQos::new(500, 1_000, 0).unwrap();

    let id = subscribe_acknowledged(&manager, &dispatcher, attribute_subscription(qos, &recorder)).await;

    sleep(Duration::from_millis(800)).await;
    manager.handle_publication(SubscriptionPublication::new(id.clone(), vec![json!("radio-2")]));

    sleep(Duration::from_millis(700)).await;
    assert_eq!(recorder.missed(), 0);
    assert_eq!(recorder.received(), vec![vec![json!("radio-2")]]);
    assert!(manager.subscription_information(&id).unwrap().last_publication_ms > 0);

    sleep(Duration::from_millis(400)).await;
    assert_eq!(recorder.missed(), 1);

    manager
        .unregister_subscription(&id, Default::default())
        .await
        .unwrap();
}

/// INTENTION: After unsubscribe no alert fires, publications are dropped and
/// a second unsubscribe reports the id as unknown.
#[tokio::test(start_paused = true)]
async fn test_unsubscribe_stops_everything() {
    let dispatcher = MockDispatcher::new();
    let manager = manager(dispatcher.clone(), None);
    let recorder = Recorder::default();
    let qos = PeriodicSubscriptionQos::new(500, 1_000, 0).unwrap();

    let id = subscribe_acknowledged(&manager, &dispatcher, attribute_subscription(qos, &recorder)).await;
    manager
        .unregister_subscription(&id, Default::default())
        .await
        .unwrap();
    assert_eq!(dispatcher.subscription_stops.lock().unwrap().len(), 1);

    manager.handle_publication(SubscriptionPublication::new(id.clone(), vec![json!("late")]));
    sleep(Duration::from_millis(5_000)).await;

    assert!(recorder.received().is_empty());
    assert_eq!(recorder.missed(), 0);
    let err = manager
        .unregister_subscription(&id, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlexusError::SubscriptionNotFound(_)));
}

/// INTENTION: Error publications reach the error callback, not the receive one.
#[tokio::test]
async fn test_error_publication_reaches_error_callback() {
    let dispatcher = MockDispatcher::new();
    let manager = manager(dispatcher.clone(), None);
    let recorder = Recorder::default();
    let qos = OnChangeSubscriptionQos::new(0, 0).unwrap();

    let id = subscribe_acknowledged(&manager, &dispatcher, attribute_subscription(qos, &recorder)).await;
    manager.handle_publication(SubscriptionPublication::failed(
        id,
        ProviderException::provider_runtime("tuner broken"),
    ));

    assert!(recorder.received().is_empty());
    let errors = recorder.errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("tuner broken"));
}

/// INTENTION: A provider rejecting the request fails the registration and
/// removes the subscription.
#[tokio::test]
async fn test_rejected_subscription_is_removed() {
    let dispatcher = MockDispatcher::new();
    let manager = manager(dispatcher.clone(), None);
    let recorder = Recorder::default();
    let qos = OnChangeSubscriptionQos::new(0, 0).unwrap();
    let subscription = attribute_subscription(qos, &recorder).with_subscription_id("sub-rejected");

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.register_subscription(subscription).await })
    };
    while dispatcher.subscription_request_count() == 0 {
        tokio::task::yield_now().await;
    }
    manager.handle_subscription_reply(SubscriptionReply {
        subscription_id: "sub-rejected".to_string(),
        error: Some(ProviderException::method_invocation(
            "no attribute currentStation",
            None,
        )),
    });

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, PlexusError::MethodInvocation { .. }));
    assert_eq!(manager.subscription_state("sub-rejected"), None);
    assert_eq!(recorder.errors.lock().unwrap().len(), 1);
}

/// INTENTION: Without an acknowledgement the registration fails once the
/// request ttl has passed. Subscriptions without expiry wait the maximum ttl.
#[tokio::test(start_paused = true)]
async fn test_unacknowledged_subscription_times_out() {
    let dispatcher = MockDispatcher::new();
    let manager = manager(dispatcher.clone(), None);
    let recorder = Recorder::default();
    let qos = OnChangeSubscriptionQos::new(0, 0).unwrap();

    let err = manager
        .register_subscription(attribute_subscription(qos, &recorder))
        .await
        .unwrap_err();

    assert!(matches!(err, PlexusError::SubscriptionRequestTimeout(_)));
    assert!(!manager.has_open_subscriptions());
}

/// INTENTION: A partially populated filter and partitions on a selective
/// broadcast are rejected before anything is sent.
#[tokio::test]
async fn test_invalid_selective_broadcast_is_rejected_before_dispatch() {
    let dispatcher = MockDispatcher::new();
    let manager = manager(dispatcher.clone(), None);
    let qos = OnChangeSubscriptionQos::new(0, 0).unwrap();
    let broadcast = || {
        BroadcastSubscription::new(
            "proxy-1",
            test_provider_entry(PROVIDER_PID),
            "weakSignal",
            vec!["String".to_string()],
            qos.clone(),
        )
    };

    let partial = BroadcastFilterParameters::new(["country", "station"]).with("country", "DE");
    let err = manager
        .register_broadcast_subscription(broadcast().selective(Some(partial)))
        .await
        .unwrap_err();
    assert!(matches!(err, PlexusError::InvalidArgument(_)));

    let err = manager
        .register_broadcast_subscription(broadcast().selective(None).with_partitions(["europe"]))
        .await
        .unwrap_err();
    assert!(matches!(err, PlexusError::InvalidArgument(_)));

    let err = manager
        .register_broadcast_subscription(broadcast().with_partitions(["*", "berlin"]))
        .await
        .unwrap_err();
    assert!(matches!(err, PlexusError::InvalidArgument(_)));

    assert_eq!(dispatcher.subscription_request_count(), 0);
    assert!(!manager.has_open_subscriptions());
}

/// INTENTION: Multicast subscriptions are active once sent and receive every
/// publication whose multicast id matches their partition pattern.
#[tokio::test]
async fn test_multicast_wildcard_delivery() {
    let dispatcher = MockDispatcher::new();
    let manager = manager(dispatcher.clone(), None);
    let recorder = Recorder::default();
    let everything = Recorder::default();

    let europe = BroadcastSubscription::new(
        "proxy-1",
        test_provider_entry(PROVIDER_PID),
        "newStation",
        vec!["String".to_string()],
        MulticastSubscriptionQos::new(0),
    )
    .with_partitions(["europe", "+"])
    .with_listener(recorder.listener());
    let europe_id = manager.register_broadcast_subscription(europe).await.unwrap();
    assert_eq!(
        manager.subscription_state(&europe_id),
        Some(SubscriptionState::Active)
    );
    assert_eq!(recorder.subscribed.load(Ordering::SeqCst), 1);

    let all = BroadcastSubscription::new(
        "proxy-1",
        test_provider_entry(PROVIDER_PID),
        "newStation",
        vec!["String".to_string()],
        MulticastSubscriptionQos::new(0),
    )
    .with_partitions(["*"])
    .with_listener(everything.listener());
    manager.register_broadcast_subscription(all).await.unwrap();

    let sent = dispatcher.multicast_subscription_requests.lock().unwrap()[0]
        .payload
        .multicast_id
        .clone();
    assert_eq!(sent, format!("{PROVIDER_PID}/newStation/europe/+"));

    manager.handle_multicast_publication(MulticastPublication::new(
        format!("{PROVIDER_PID}/newStation/europe/berlin"),
        vec![json!("jazz")],
    ));
    manager.handle_multicast_publication(MulticastPublication::new(
        format!("{PROVIDER_PID}/newStation/asia/tokyo"),
        vec![json!("pop")],
    ));
    manager.handle_multicast_publication(MulticastPublication::new(
        format!("{PROVIDER_PID}/newStation"),
        vec![json!("news")],
    ));

    assert_eq!(recorder.received(), vec![vec![json!("jazz")]]);
    assert_eq!(
        everything.received(),
        vec![vec![json!("jazz")], vec![json!("pop")], vec![json!("news")]]
    );

    manager
        .unregister_subscription(&europe_id, Default::default())
        .await
        .unwrap();
    assert_eq!(dispatcher.multicast_subscription_stops.lock().unwrap().len(), 1);
}

/// INTENTION: Active subscriptions are written to the key/value store and
/// removed from it on unsubscribe.
#[tokio::test]
async fn test_active_subscriptions_are_persisted() {
    let dispatcher = MockDispatcher::new();
    let store = Arc::new(InMemoryKeyValueStore::new());
    let manager = manager(dispatcher.clone(), Some(store.clone()));
    let recorder = Recorder::default();
    let qos = OnChangeSubscriptionQos::new(100, 0).unwrap();

    let id = subscribe_acknowledged(&manager, &dispatcher, attribute_subscription(qos, &recorder)).await;

    let persisted = manager.persisted_subscriptions().unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].subscription_id, id);
    assert_eq!(persisted[0].subscribed_to_name, "currentStation");
    assert_eq!(persisted[0].provider_participant_id(), PROVIDER_PID);

    manager
        .unregister_subscription(&id, Default::default())
        .await
        .unwrap();
    assert!(manager.persisted_subscriptions().unwrap().is_empty());
    assert!(store.is_empty());
}

/// INTENTION: Terminating sends a stop for every open subscription; after
/// shutdown registrations are refused.
#[tokio::test]
async fn test_terminate_and_shutdown() {
    let dispatcher = MockDispatcher::new();
    let manager = manager(dispatcher.clone(), None);
    let recorder = Recorder::default();

    for _ in 0..2 {
        let qos = OnChangeSubscriptionQos::new(0, 0).unwrap();
        subscribe_acknowledged(&manager, &dispatcher, attribute_subscription(qos, &recorder)).await;
    }
    let multicast = BroadcastSubscription::new(
        "proxy-1",
        test_provider_entry(PROVIDER_PID),
        "newStation",
        Vec::new(),
        MulticastSubscriptionQos::new(0),
    )
    .with_listener(recorder.listener());
    manager.register_broadcast_subscription(multicast).await.unwrap();

    manager.terminate_subscriptions(1_000).await.unwrap();
    assert_eq!(dispatcher.stop_count(), 3);
    assert!(!manager.has_open_subscriptions());

    manager.shutdown();
    let qos = OnChangeSubscriptionQos::new(0, 0).unwrap();
    let err = manager
        .register_subscription(attribute_subscription(qos, &recorder))
        .await
        .unwrap_err();
    assert!(matches!(err, PlexusError::ManagerClosed(_)));
}

/// INTENTION: A selective broadcast with a complete filter is sent with that
/// filter, becomes active on acknowledgement and receives its publications.
#[tokio::test]
async fn test_selective_broadcast_with_complete_filter() {
    timeout(Duration::from_secs(10), async {
        let dispatcher = MockDispatcher::new();
        let manager = manager(dispatcher.clone(), None);
        let recorder = Recorder::default();
        let filter = BroadcastFilterParameters::new(["country", "station"])
            .with("country", "DE")
            .with("station", "radio-1");
        let subscription = BroadcastSubscription::new(
            "proxy-1",
            test_provider_entry(PROVIDER_PID),
            "weakSignal",
            vec!["String".to_string()],
            OnChangeSubscriptionQos::new(0, 0).unwrap(),
        )
        .selective(Some(filter.clone()))
        .with_listener(recorder.listener());

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.register_broadcast_subscription(subscription).await })
        };
        while dispatcher.broadcast_subscription_requests.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        let request = dispatcher.broadcast_subscription_requests.lock().unwrap()[0]
            .payload
            .clone();
        assert_eq!(request.subscribed_to_name, "weakSignal");
        assert_eq!(request.filter_parameters, Some(filter));

        manager.handle_subscription_reply(SubscriptionReply::ok(request.subscription_id.clone()));
        let id = pending.await.unwrap().unwrap();
        assert_eq!(id, request.subscription_id);
        assert_eq!(manager.subscription_state(&id), Some(SubscriptionState::Active));
        assert_eq!(recorder.subscribed.load(Ordering::SeqCst), 1);
        assert!(manager.subscription_information(&id).unwrap().multicast_id.is_none());

        manager.handle_publication(SubscriptionPublication::new(id.clone(), vec![json!("radio-1")]));
        assert_eq!(recorder.received(), vec![vec![json!("radio-1")]]);

        manager
            .unregister_subscription(&id, Default::default())
            .await
            .unwrap();
        assert_eq!(dispatcher.subscription_stops.lock().unwrap().len(), 1);
        assert!(dispatcher.multicast_subscription_stops.lock().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

/// INTENTION: Subscribing again with an existing id replaces the
/// subscription: the old alert schedule and callbacks are dropped and only
/// the new schedule fires.
#[tokio::test(start_paused = true)]
async fn test_resubscribe_with_same_id_replaces_alert_schedule() {
    let dispatcher = MockDispatcher::new();
    let manager = manager(dispatcher.clone(), None);
    let first = Recorder::default();
    let second = Recorder::default();

    let qos = PeriodicSubscriptionQos::new(500, 1_000, 0).unwrap();
    let id = subscribe_acknowledged(
        &manager,
        &dispatcher,
        attribute_subscription(qos, &first).with_subscription_id("sub-update"),
    )
    .await;
    sleep(Duration::from_millis(600)).await;

    let qos = PeriodicSubscriptionQos::new(1_000, 3_000, 0).unwrap();
    let updated = subscribe_acknowledged(
        &manager,
        &dispatcher,
        attribute_subscription(qos, &second).with_subscription_id("sub-update"),
    )
    .await;
    assert_eq!(updated, id);
    assert_eq!(dispatcher.subscription_requests.lock().unwrap().len(), 2);
    assert_eq!(
        manager
            .subscription_information(&id)
            .unwrap()
            .qos
            .alert_after_interval_ms(),
        3_000
    );

    // the first schedule would have alerted at 1000 and 2000
    sleep(Duration::from_millis(2_900)).await;
    assert_eq!(first.missed(), 0);
    assert_eq!(second.missed(), 0);

    // the second schedule alerts 3000 after the update at 600
    sleep(Duration::from_millis(200)).await;
    assert_eq!(first.missed(), 0);
    assert_eq!(second.missed(), 1);

    manager
        .unregister_subscription(&id, Default::default())
        .await
        .unwrap();
    assert_eq!(dispatcher.subscription_stops.lock().unwrap().len(), 1);
}

/// INTENTION: A proxy handle subscribes to attributes, multicast and
/// selective broadcasts of its provider, addressed from the proxy, and
/// unsubscribes with its own messaging qos.
#[tokio::test]
async fn test_proxy_handle_subscriptions() {
    timeout(Duration::from_secs(10), async {
        let dispatcher = MockDispatcher::new();
        let subscriptions = manager(dispatcher.clone(), None);
        let request_reply = RequestReplyManager::new(
            dispatcher.clone(),
            Arc::new(TypeRegistry::new()),
            Duration::from_millis(100),
            &create_test_logger(),
        );
        let handle = ProxyHandle::new(
            "proxy-7".to_string(),
            test_provider_entry(PROVIDER_PID),
            MessagingQos::with_ttl(5_000),
            request_reply,
            subscriptions.clone(),
        );
        let recorder = Recorder::default();

        let attribute = {
            let handle = handle.clone();
            let listener = recorder.listener();
            tokio::spawn(async move {
                handle
                    .subscribe_to_attribute(
                        "currentStation",
                        "String",
                        OnChangeSubscriptionQos::new(0, 0).unwrap(),
                        listener,
                    )
                    .await
            })
        };
        while dispatcher.subscription_requests.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        let sent = dispatcher.subscription_requests.lock().unwrap()[0].clone();
        assert_eq!(sent.from, "proxy-7");
        assert_eq!(sent.to_discovery_entry.participant_id(), PROVIDER_PID);
        assert_eq!(sent.payload.subscribed_to_name, "currentStation");
        subscriptions.handle_subscription_reply(SubscriptionReply::ok(
            sent.payload.subscription_id.clone(),
        ));
        let attribute_id = attribute.await.unwrap().unwrap();

        let multicast_id = handle
            .subscribe_to_broadcast(
                "newStation",
                vec!["String".to_string()],
                MulticastSubscriptionQos::new(0),
                vec!["europe".to_string()],
                recorder.listener(),
            )
            .await
            .unwrap();
        let sent = dispatcher.multicast_subscription_requests.lock().unwrap()[0].clone();
        assert_eq!(sent.from, "proxy-7");
        assert_eq!(
            sent.payload.multicast_id,
            format!("{PROVIDER_PID}/newStation/europe")
        );

        let selective = {
            let handle = handle.clone();
            let listener = recorder.listener();
            let filter = BroadcastFilterParameters::new(["country"]).with("country", "DE");
            tokio::spawn(async move {
                handle
                    .subscribe_to_selective_broadcast(
                        "weakSignal",
                        vec!["String".to_string()],
                        OnChangeSubscriptionQos::new(0, 0).unwrap(),
                        Some(filter),
                        listener,
                    )
                    .await
            })
        };
        while dispatcher.broadcast_subscription_requests.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        let sent = dispatcher.broadcast_subscription_requests.lock().unwrap()[0].clone();
        assert_eq!(sent.from, "proxy-7");
        subscriptions.handle_subscription_reply(SubscriptionReply::ok(
            sent.payload.subscription_id.clone(),
        ));
        let selective_id = selective.await.unwrap().unwrap();
        assert_eq!(recorder.subscribed.load(Ordering::SeqCst), 3);

        for id in [&attribute_id, &multicast_id, &selective_id] {
            handle.unsubscribe(id).await.unwrap();
        }
        let stops = dispatcher.subscription_stops.lock().unwrap().clone();
        assert_eq!(stops.len(), 2);
        assert!(stops.iter().all(|stop| stop.messaging_qos.ttl_ms == 5_000));
        assert_eq!(dispatcher.multicast_subscription_stops.lock().unwrap().len(), 1);
        assert!(!subscriptions.has_open_subscriptions());

        let err = handle.unsubscribe(&attribute_id).await.unwrap_err();
        assert!(matches!(err, PlexusError::SubscriptionNotFound(_)));
    })
    .await
    .expect("test timed out");
}
