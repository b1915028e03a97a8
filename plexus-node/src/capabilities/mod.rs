// Capabilities: where providers are registered and how they are found

pub mod arbitration;
pub mod cache;
pub mod directory;
pub mod discovery;
pub mod store;

pub use arbitration::{strategies, ArbitrationRequest, Arbitrator, CapabilityLookup};
pub use cache::GlobalCapabilitiesCache;
pub use directory::{GlobalCapabilitiesDirectory, RemoteGlobalCapabilitiesDirectory};
pub use discovery::{CapabilityDiscovery, TTL_30_DAYS_MS};
pub use store::{CapabilitiesStore, StoredEntry};
