// Discovery data model
//
// DiscoveryEntry describes one provider registration. Local entries live in the
// capabilities store, remote ones arrive from the global directory as
// GlobalDiscoveryEntry (entry + serialized transport address).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PlexusError;

/// Interface version of a provider (or of the proxy asking for one)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub major_version: i32,
    pub minor_version: i32,
}

impl Version {
    pub fn new(major_version: i32, minor_version: i32) -> Self {
        Self {
            major_version,
            minor_version,
        }
    }

    /// A provider of this version can serve a proxy built for `requested`:
    /// same major version and at least the requested minor version.
    pub fn is_compatible_with(&self, requested: &Version) -> bool {
        self.major_version == requested.major_version
            && self.minor_version >= requested.minor_version
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major_version, self.minor_version)
    }
}

/// Visibility of a provider registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderScope {
    Local,
    Global,
}

impl ProviderScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderScope::Local => "LOCAL",
            ProviderScope::Global => "GLOBAL",
        }
    }
}

impl TryFrom<&str> for ProviderScope {
    type Error = PlexusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "LOCAL" => Ok(ProviderScope::Local),
            "GLOBAL" => Ok(ProviderScope::Global),
            other => Err(PlexusError::UnknownProviderScope(other.to_string())),
        }
    }
}

impl TryFrom<String> for ProviderScope {
    type Error = PlexusError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ProviderScope::try_from(value.as_str())
    }
}

impl From<ProviderScope> for String {
    fn from(scope: ProviderScope) -> Self {
        scope.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomParameter {
    pub name: String,
    pub value: String,
}

impl CustomParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Quality of service announced by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderQos {
    pub custom_parameters: Vec<CustomParameter>,
    pub priority: i64,
    pub scope: ProviderScope,
    pub supports_on_change_subscriptions: bool,
}

impl Default for ProviderQos {
    fn default() -> Self {
        Self {
            custom_parameters: Vec::new(),
            priority: 0,
            scope: ProviderScope::Global,
            supports_on_change_subscriptions: false,
        }
    }
}

impl ProviderQos {
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scope(mut self, scope: ProviderScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_on_change_support(mut self, supported: bool) -> Self {
        self.supports_on_change_subscriptions = supported;
        self
    }

    pub fn with_custom_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_parameters.push(CustomParameter::new(name, value));
        self
    }

    pub fn custom_parameter(&self, name: &str) -> Option<&str> {
        self.custom_parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// One provider registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEntry {
    pub provider_version: Version,
    pub domain: String,
    pub interface_name: String,
    pub participant_id: String,
    pub qos: ProviderQos,
    pub last_seen_date_ms: i64,
    pub expiry_date_ms: i64,
    pub public_key_id: String,
}

impl DiscoveryEntry {
    pub fn new(
        domain: impl Into<String>,
        interface_name: impl Into<String>,
        participant_id: impl Into<String>,
        provider_version: Version,
        qos: ProviderQos,
    ) -> Self {
        Self {
            provider_version,
            domain: domain.into(),
            interface_name: interface_name.into(),
            participant_id: participant_id.into(),
            qos,
            last_seen_date_ms: 0,
            expiry_date_ms: 0,
            public_key_id: String::new(),
        }
    }

    pub fn scope(&self) -> ProviderScope {
        self.qos.scope
    }

    pub fn with_meta_info(self, is_local: bool) -> DiscoveryEntryWithMetaInfo {
        DiscoveryEntryWithMetaInfo {
            entry: self,
            is_local,
        }
    }

    /// Refresh last seen and expiry. Expiry never falls behind last seen.
    pub fn touch(&mut self, now_ms: i64, ttl_ms: i64) {
        self.last_seen_date_ms = now_ms;
        self.expiry_date_ms = now_ms.saturating_add(ttl_ms.max(0));
    }
}

/// A discovery entry tagged with whether it was found locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEntryWithMetaInfo {
    #[serde(flatten)]
    pub entry: DiscoveryEntry,
    pub is_local: bool,
}

impl DiscoveryEntryWithMetaInfo {
    pub fn participant_id(&self) -> &str {
        &self.entry.participant_id
    }
}

/// Registration as stored in the global directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalDiscoveryEntry {
    #[serde(flatten)]
    pub entry: DiscoveryEntry,
    /// Serialized transport address of the provider's cluster controller
    pub address: String,
}

impl GlobalDiscoveryEntry {
    pub fn new(entry: DiscoveryEntry, address: impl Into<String>) -> Self {
        Self {
            entry,
            address: address.into(),
        }
    }
}
