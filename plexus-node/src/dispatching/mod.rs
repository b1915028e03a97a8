// Dispatching: the dispatcher seam and the managers sitting on top of it

pub mod dispatcher;
pub mod multicast;
pub mod request_reply;
pub mod subscription;

pub use dispatcher::Dispatcher;
pub use request_reply::{resolve_method, MethodTarget, ReplySender, RequestReplyManager};
pub use subscription::{
    new_subscription_id, AttributeSubscription, BroadcastSubscription, OnError, OnReceive,
    OnSubscribed, SubscriptionInformation, SubscriptionKind, SubscriptionListener,
    SubscriptionManager, SubscriptionState,
};
