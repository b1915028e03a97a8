// Global capabilities cache
//
// Holds entries received from the global directory. Freshness is bounded per
// lookup by the caller's cache max age.

use std::time::Duration;

use crate::capabilities::store::CapabilitiesStore;
use crate::types::GlobalDiscoveryEntry;

#[derive(Default)]
pub struct GlobalCapabilitiesCache {
    store: CapabilitiesStore<GlobalDiscoveryEntry>,
}

impl GlobalCapabilitiesCache {
    pub fn new() -> Self {
        Self {
            store: CapabilitiesStore::new(),
        }
    }

    pub fn add(&self, entry: GlobalDiscoveryEntry) {
        self.store.add(entry);
    }

    /// Cached entries for `domain`/`interface_name` stored at most `max_age_ms` ago
    pub fn lookup(
        &self,
        domain: &str,
        interface_name: &str,
        max_age_ms: u64,
    ) -> Vec<GlobalDiscoveryEntry> {
        self.store
            .lookup(domain, interface_name, Some(Duration::from_millis(max_age_ms)))
    }

    pub fn lookup_by_participant(&self, participant_id: &str, max_age_ms: u64) -> Option<GlobalDiscoveryEntry> {
        self.store
            .lookup_by_participant(participant_id, Some(Duration::from_millis(max_age_ms)))
    }

    pub fn remove(&self, participant_id: &str) -> Option<GlobalDiscoveryEntry> {
        self.store.remove(participant_id)
    }

    /// Drop entries whose expiry date lies before `now_ms`; returns how many were dropped
    pub fn evict_expired(&self, now_ms: i64) -> usize {
        self.store
            .remove_where(|global| {
                global.entry.expiry_date_ms != 0 && global.entry.expiry_date_ms < now_ms
            })
            .len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiscoveryEntry, ProviderQos, Version};

    fn global(participant: &str, expiry_date_ms: i64) -> GlobalDiscoveryEntry {
        let mut entry = DiscoveryEntry::new(
            "d",
            "radio",
            participant,
            Version::new(1, 0),
            ProviderQos::default(),
        );
        entry.expiry_date_ms = expiry_date_ms;
        GlobalDiscoveryEntry::new(entry, "{}")
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_age_only_sees_entries_cached_right_now() {
        let cache = GlobalCapabilitiesCache::new();
        cache.add(global("p1", 0));
        assert_eq!(cache.lookup("d", "radio", 0).len(), 1);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.lookup("d", "radio", 0).is_empty());
        assert_eq!(cache.lookup("d", "radio", 10).len(), 1);
    }

    #[test]
    fn evict_expired_keeps_unexpiring_and_future_entries() {
        let cache = GlobalCapabilitiesCache::new();
        cache.add(global("old", 1_000));
        cache.add(global("future", 10_000));
        cache.add(global("never", 0));
        assert_eq!(cache.evict_expired(5_000), 1);
        assert!(cache.lookup_by_participant("old", u64::MAX).is_none());
        assert_eq!(cache.len(), 2);
    }
}
