// Capabilities store: in-memory index of discovery entries
//
// Entries are keyed by participant id with a secondary (domain, interface)
// index. Each entry remembers when it was stored so lookups can bound its age.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{DiscoveryEntry, GlobalDiscoveryEntry};

/// Anything that wraps a discovery entry can be stored
pub trait StoredEntry: Clone + Send + Sync + 'static {
    fn discovery_entry(&self) -> &DiscoveryEntry;
}

impl StoredEntry for DiscoveryEntry {
    fn discovery_entry(&self) -> &DiscoveryEntry {
        self
    }
}

impl StoredEntry for GlobalDiscoveryEntry {
    fn discovery_entry(&self) -> &DiscoveryEntry {
        &self.entry
    }
}

#[derive(Clone)]
struct StoreRecord<E> {
    entry: E,
    registered_at: Instant,
}

impl<E> StoreRecord<E> {
    fn fresh_enough(&self, max_age: Option<Duration>) -> bool {
        match max_age {
            Some(max_age) => self.registered_at.elapsed() <= max_age,
            None => true,
        }
    }
}

type DomainInterfaceKey = (String, String);

pub struct CapabilitiesStore<E: StoredEntry = DiscoveryEntry> {
    by_participant: DashMap<String, StoreRecord<E>>,
    // (domain, interface) -> participant ids in insertion order
    by_domain_interface: DashMap<DomainInterfaceKey, Vec<String>>,
}

impl<E: StoredEntry> Default for CapabilitiesStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: StoredEntry> CapabilitiesStore<E> {
    pub fn new() -> Self {
        Self {
            by_participant: DashMap::new(),
            by_domain_interface: DashMap::new(),
        }
    }

    pub fn with_entries(entries: impl IntoIterator<Item = E>) -> Self {
        let store = Self::new();
        for entry in entries {
            store.add(entry);
        }
        store
    }

    /// Add or replace the entry of its participant
    pub fn add(&self, entry: E) {
        let participant_id = entry.discovery_entry().participant_id.clone();
        self.remove(&participant_id);

        let key = (
            entry.discovery_entry().domain.clone(),
            entry.discovery_entry().interface_name.clone(),
        );
        self.by_participant.insert(
            participant_id.clone(),
            StoreRecord {
                entry,
                registered_at: Instant::now(),
            },
        );
        let mut ids = self.by_domain_interface.entry(key).or_default();
        if !ids.contains(&participant_id) {
            ids.push(participant_id);
        }
    }

    /// Entries registered for `domain`/`interface_name` no older than `max_age`
    pub fn lookup(
        &self,
        domain: &str,
        interface_name: &str,
        max_age: Option<Duration>,
    ) -> Vec<E> {
        let key = (domain.to_string(), interface_name.to_string());
        let ids = match self.by_domain_interface.get(&key) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.by_participant.get(id))
            .filter(|record| record.fresh_enough(max_age))
            .map(|record| record.entry.clone())
            .collect()
    }

    pub fn lookup_by_participant(&self, participant_id: &str, max_age: Option<Duration>) -> Option<E> {
        self.by_participant
            .get(participant_id)
            .filter(|record| record.fresh_enough(max_age))
            .map(|record| record.entry.clone())
    }

    pub fn remove(&self, participant_id: &str) -> Option<E> {
        let (_, record) = self.by_participant.remove(participant_id)?;
        let entry = record.entry.discovery_entry();
        let key = (entry.domain.clone(), entry.interface_name.clone());
        let now_empty = match self.by_domain_interface.get_mut(&key) {
            Some(mut ids) => {
                ids.retain(|id| id != participant_id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_domain_interface.remove_if(&key, |_, ids| ids.is_empty());
        }
        Some(record.entry)
    }

    /// Remove every entry matching `predicate`, returning the removed entries
    pub fn remove_where(&self, predicate: impl Fn(&E) -> bool) -> Vec<E> {
        let doomed: Vec<String> = self
            .by_participant
            .iter()
            .filter(|record| predicate(&record.entry))
            .map(|record| record.key().clone())
            .collect();
        doomed.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn entries(&self) -> Vec<E> {
        self.by_participant
            .iter()
            .map(|record| record.entry.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_participant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_participant.is_empty()
    }
}
