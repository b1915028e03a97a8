// Data model shared by every component

pub mod discovery;
pub mod messages;
pub mod qos;

pub use discovery::{
    CustomParameter, DiscoveryEntry, DiscoveryEntryWithMetaInfo, GlobalDiscoveryEntry, ProviderQos,
    ProviderScope, Version,
};
pub use messages::{
    BroadcastFilterParameters, BroadcastSubscriptionRequest, MulticastPublication,
    MulticastSubscriptionRequest, MulticastSubscriptionStop, OneWayRequest, Reply, Request,
    RequestEnvelope, SubscriptionPublication, SubscriptionReply, SubscriptionRequest,
    SubscriptionStop,
};
pub use qos::{
    ArbitrationStrategy, DiscoveryQos, DiscoveryScope, MessagingQos, MulticastSubscriptionQos,
    OnChangeSubscriptionQos, OnChangeWithKeepAliveSubscriptionQos, PeriodicSubscriptionQos,
    SubscriptionQos,
};
