// Public modules
pub mod capabilities;
pub mod config;
pub mod dispatching;
pub mod error;
pub mod persistence;
pub mod provider;
pub mod proxy;
pub mod routing;
pub mod runtime;
pub mod type_registry;
pub mod types;

// Re-export the main types from the runtime module
pub use runtime::{DirectoryConnection, PlexusRuntime, RuntimeCollaborators};

pub use config::RuntimeConfig;
pub use error::{PlexusError, ProviderException, ProviderExceptionKind, Result};

// Re-export the capabilities entry points
pub use capabilities::{
    strategies, ArbitrationRequest, Arbitrator, CapabilitiesStore, CapabilityDiscovery,
    CapabilityLookup, GlobalCapabilitiesCache, GlobalCapabilitiesDirectory,
};

// Re-export the dispatching entry points
pub use dispatching::{
    AttributeSubscription, BroadcastSubscription, Dispatcher, RequestReplyManager,
    SubscriptionInformation, SubscriptionListener, SubscriptionManager, SubscriptionState,
};

pub use persistence::{InMemoryKeyValueStore, KeyValueStore};
pub use provider::Provider;
pub use proxy::{ProxyBuilder, ProxyHandle, ProxySettings};
pub use routing::{Address, MessageRouter};
pub use type_registry::TypeRegistry;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
