// Tests for the arbitrator
//
// Time is paused in the retry tests so the lookup count is an exact function
// of discovery timeout and retry delay.

use anyhow::anyhow;
use plexus_node::types::{
    DiscoveryEntry, DiscoveryEntryWithMetaInfo, DiscoveryQos, ProviderQos, ProviderScope, Version,
};
use plexus_node::{strategies, ArbitrationRequest, Arbitrator, PlexusError};
use plexus_test_utils::{
    create_test_logger, test_entry, test_provider_entry, MockCapabilityLookup, RADIO_INTERFACE,
    TEST_DOMAIN,
};
use std::sync::Arc;
use std::time::Duration;

fn request(qos: DiscoveryQos) -> ArbitrationRequest {
    ArbitrationRequest::new(TEST_DOMAIN, RADIO_INTERFACE, qos, Version::new(1, 0))
}

/// INTENTION: With nothing to find, the arbitrator looks up once per retry
/// delay until the discovery timeout: ceil(1000 / 300) = 4 lookups.
#[tokio::test(start_paused = true)]
async fn test_retries_until_discovery_timeout() {
    let lookup = MockCapabilityLookup::returning(Vec::new());
    let arbitrator = Arbitrator::new(lookup.clone(), &create_test_logger());
    let qos = DiscoveryQos::new().with_timeout(1_000).with_retry_delay(300);

    let err = arbitrator.start_arbitration(request(qos)).await.unwrap_err();

    assert!(matches!(err, PlexusError::DiscoveryTimeout { .. }));
    assert_eq!(lookup.call_count(), 4);
}

/// INTENTION: Lookup errors are retried like empty results; the last one is
/// reported with the timeout.
#[tokio::test(start_paused = true)]
async fn test_lookup_errors_are_retried_and_reported() {
    let lookup = MockCapabilityLookup::failing("directory unreachable");
    let arbitrator = Arbitrator::new(lookup.clone(), &create_test_logger());
    let qos = DiscoveryQos::new().with_timeout(500).with_retry_delay(200);

    let err = arbitrator.start_arbitration(request(qos)).await.unwrap_err();

    match err {
        PlexusError::DiscoveryTimeout { last_error, .. } => {
            assert!(last_error.unwrap_or_default().contains("directory unreachable"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(lookup.call_count(), 3);
}

/// INTENTION: A provider showing up between retries ends the arbitration.
#[tokio::test(start_paused = true)]
async fn test_provider_found_on_a_later_attempt() {
    let lookup = MockCapabilityLookup::returning(Vec::new());
    let arbitrator = Arc::new(Arbitrator::new(lookup.clone(), &create_test_logger()));
    let qos = DiscoveryQos::new().with_timeout(10_000).with_retry_delay(1_000);

    let pending = {
        let arbitrator = arbitrator.clone();
        tokio::spawn(async move { arbitrator.start_arbitration(request(qos)).await })
    };
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    lookup.set_result(vec![test_provider_entry("late-radio")]);

    let providers = pending.await.unwrap().unwrap();
    assert_eq!(providers[0].participant_id(), "late-radio");
    assert_eq!(lookup.call_count(), 3);
}

/// INTENTION: A strategy that fails ends the arbitration immediately instead
/// of retrying until the timeout.
#[tokio::test(start_paused = true)]
async fn test_failing_strategy_ends_arbitration_immediately() {
    let lookup = MockCapabilityLookup::returning(vec![test_provider_entry("radio")]);
    let arbitrator = Arbitrator::new(lookup.clone(), &create_test_logger());
    let qos = DiscoveryQos::new()
        .with_timeout(60_000)
        .with_retry_delay(1_000)
        .with_strategy(Arc::new(
            |_: &[DiscoveryEntryWithMetaInfo]| -> anyhow::Result<Vec<DiscoveryEntryWithMetaInfo>> {
                Err(anyhow!("ambiguous providers"))
            },
        ));

    let err = arbitrator.start_arbitration(request(qos)).await.unwrap_err();

    assert!(matches!(err, PlexusError::ArbitrationStrategy(_)));
    assert_eq!(lookup.call_count(), 1);
}

/// INTENTION: Providers are filtered by version before the strategy ranks them.
#[tokio::test(start_paused = true)]
async fn test_incompatible_providers_are_filtered_before_ranking() {
    let newer = test_entry("radio-v2", Version::new(2, 0), ProviderScope::Local).with_meta_info(true);
    let low = DiscoveryEntry::new(
        TEST_DOMAIN,
        RADIO_INTERFACE,
        "radio-low",
        Version::new(1, 0),
        ProviderQos::default().with_priority(1),
    )
    .with_meta_info(false);
    let high = DiscoveryEntry::new(
        TEST_DOMAIN,
        RADIO_INTERFACE,
        "radio-high",
        Version::new(1, 3),
        ProviderQos::default().with_priority(9),
    )
    .with_meta_info(false);
    let lookup = MockCapabilityLookup::returning(vec![newer, low, high]);
    let arbitrator = Arbitrator::new(lookup, &create_test_logger());
    let qos = DiscoveryQos::new().with_strategy(strategies::highest_priority());

    let providers = arbitrator.start_arbitration(request(qos)).await.unwrap();

    let ids: Vec<&str> = providers.iter().map(|p| p.participant_id()).collect();
    assert_eq!(ids, vec!["radio-high", "radio-low"]);
}

/// INTENTION: Only incompatible versions until the timeout yields
/// NoCompatibleProviderFound listing what was seen.
#[tokio::test(start_paused = true)]
async fn test_only_incompatible_versions_found() {
    let newer = test_entry("radio-v2", Version::new(2, 0), ProviderScope::Local).with_meta_info(true);
    let lookup = MockCapabilityLookup::returning(vec![newer]);
    let arbitrator = Arbitrator::new(lookup, &create_test_logger());
    let qos = DiscoveryQos::new().with_timeout(1_000).with_retry_delay(400);

    let err = arbitrator.start_arbitration(request(qos)).await.unwrap_err();

    match err {
        PlexusError::NoCompatibleProviderFound {
            discovered_versions,
            ..
        } => assert_eq!(discovered_versions, vec![Version::new(2, 0)]),
        other => panic!("unexpected error: {other}"),
    }
}

/// INTENTION: Shutting the arbitrator down rejects arbitrations in flight and
/// every later call.
#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_pending_arbitrations() {
    let lookup = MockCapabilityLookup::returning(Vec::new());
    let arbitrator = Arc::new(Arbitrator::new(lookup, &create_test_logger()));
    let qos = DiscoveryQos::new().with_timeout(60_000).with_retry_delay(1_000);

    let pending = {
        let arbitrator = arbitrator.clone();
        let qos = qos.clone();
        tokio::spawn(async move { arbitrator.start_arbitration(request(qos)).await })
    };
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    arbitrator.shutdown();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, PlexusError::ManagerClosed(_)));
    let err = arbitrator.start_arbitration(request(qos)).await.unwrap_err();
    assert!(matches!(err, PlexusError::ManagerClosed(_)));
}

/// INTENTION: Static arbitration picks from the provisioned capabilities
/// without any lookup.
#[tokio::test]
async fn test_static_arbitration_uses_provisioned_capabilities() {
    let lookup = MockCapabilityLookup::returning(Vec::new());
    let arbitrator = Arbitrator::new(lookup.clone(), &create_test_logger())
        .with_static_capabilities(vec![test_provider_entry("provisioned-radio")]);
    let qos = DiscoveryQos::new().with_strategy(strategies::nothing());

    let providers = arbitrator
        .start_arbitration(request(qos).with_static_arbitration())
        .await
        .unwrap();

    assert_eq!(providers[0].participant_id(), "provisioned-radio");
    assert_eq!(lookup.call_count(), 0);
}
