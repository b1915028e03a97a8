// Message payloads exchanged with the dispatcher
//
// Every payload is plain serde data. Values travel as serde_json::Value, the
// type registry turns them into typed values at the edges.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{PlexusError, ProviderException, Result};
use crate::types::discovery::DiscoveryEntryWithMetaInfo;
use crate::types::qos::{MessagingQos, SubscriptionQos};

pub fn new_request_reply_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Two-way RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_reply_id: String,
    pub method_name: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub param_datatypes: Vec<String>,
}

impl Request {
    pub fn new(method_name: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            request_reply_id: new_request_reply_id(),
            method_name: method_name.into(),
            params,
            param_datatypes: Vec::new(),
        }
    }

    pub fn with_request_reply_id(mut self, id: impl Into<String>) -> Self {
        self.request_reply_id = id.into();
        self
    }

    pub fn with_param_datatypes(mut self, datatypes: Vec<String>) -> Self {
        self.param_datatypes = datatypes;
        self
    }
}

/// Fire-and-forget request, no reply is correlated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneWayRequest {
    pub method_name: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub param_datatypes: Vec<String>,
}

impl OneWayRequest {
    pub fn new(method_name: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method_name: method_name.into(),
            params,
            param_datatypes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub request_reply_id: String,
    #[serde(default)]
    pub response: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderException>,
}

impl Reply {
    pub fn response(request_reply_id: impl Into<String>, response: Vec<Value>) -> Self {
        Self {
            request_reply_id: request_reply_id.into(),
            response,
            error: None,
        }
    }

    pub fn error(request_reply_id: impl Into<String>, error: ProviderException) -> Self {
        Self {
            request_reply_id: request_reply_id.into(),
            response: Vec::new(),
            error: Some(error),
        }
    }
}

/// Filter values of a selective broadcast.
///
/// The declared parameter names are fixed by the broadcast; a value of `None`
/// means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastFilterParameters {
    pub filter_parameters: BTreeMap<String, Option<String>>,
}

impl BroadcastFilterParameters {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filter_parameters: names.into_iter().map(|n| (n.into(), None)).collect(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_parameters.insert(name.into(), Some(value.into()));
        self
    }

    pub fn is_unset(&self) -> bool {
        self.filter_parameters.values().all(Option::is_none)
    }

    pub fn is_fully_populated(&self) -> bool {
        self.filter_parameters.values().all(Option::is_some)
    }

    /// Either no value or every value must be set
    pub fn validate(&self) -> Result<()> {
        if self.is_unset() || self.is_fully_populated() {
            return Ok(());
        }
        let missing = self
            .filter_parameters
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Err(PlexusError::InvalidArgument(format!(
            "filter parameters are only partially set, missing: {missing}"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub subscription_id: String,
    pub subscribed_to_name: String,
    pub qos: SubscriptionQos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSubscriptionRequest {
    pub subscription_id: String,
    pub subscribed_to_name: String,
    pub qos: SubscriptionQos,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_parameters: Option<BroadcastFilterParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastSubscriptionRequest {
    pub multicast_id: String,
    pub subscription_id: String,
    pub subscribed_to_name: String,
    pub qos: SubscriptionQos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStop {
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastSubscriptionStop {
    pub multicast_id: String,
    pub subscription_stop: SubscriptionStop,
}

/// Provider acknowledgement of a subscription request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionReply {
    pub subscription_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderException>,
}

impl SubscriptionReply {
    pub fn ok(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPublication {
    pub subscription_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderException>,
}

impl SubscriptionPublication {
    pub fn new(subscription_id: impl Into<String>, response: Vec<Value>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            response: Some(response),
            error: None,
        }
    }

    pub fn failed(subscription_id: impl Into<String>, error: ProviderException) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            response: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastPublication {
    pub multicast_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderException>,
}

impl MulticastPublication {
    pub fn new(multicast_id: impl Into<String>, response: Vec<Value>) -> Self {
        Self {
            multicast_id: multicast_id.into(),
            response: Some(response),
            error: None,
        }
    }
}

/// Addressing and qos around a payload handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope<T> {
    pub from: String,
    pub to_discovery_entry: DiscoveryEntryWithMetaInfo,
    pub messaging_qos: MessagingQos,
    pub payload: T,
}

impl<T> RequestEnvelope<T> {
    pub fn new(
        from: impl Into<String>,
        to_discovery_entry: DiscoveryEntryWithMetaInfo,
        messaging_qos: MessagingQos,
        payload: T,
    ) -> Self {
        Self {
            from: from.into(),
            to_discovery_entry,
            messaging_qos,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_parameters_must_be_all_or_nothing() {
        let declared = BroadcastFilterParameters::new(["country", "station"]);
        assert!(declared.validate().is_ok());

        let partial = declared.clone().with("country", "DE");
        let err = partial.validate().unwrap_err();
        assert!(err.to_string().contains("station"));

        let full = partial.with("station", "radio-1");
        assert!(full.validate().is_ok());
    }

    #[test]
    fn error_reply_has_no_response() {
        let reply = Reply::error("rr-1", ProviderException::provider_runtime("boom"));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["requestReplyId"], "rr-1");
        assert_eq!(json["response"], serde_json::json!([]));
        assert_eq!(json["error"]["kind"], "ProviderRuntime");
    }

    #[test]
    fn requests_get_unique_ids() {
        let a = Request::new("getName", vec![]);
        let b = Request::new("getName", vec![]);
        assert_ne!(a.request_reply_id, b.request_reply_id);
    }
}
