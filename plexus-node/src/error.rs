use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::Version;

/// Error types for the plexus core
#[derive(Error, Debug)]
pub enum PlexusError {
    #[error("Discovery timed out for domain {domain} interface {interface_name}{}", fmt_last_error(.last_error))]
    DiscoveryTimeout {
        domain: String,
        interface_name: String,
        last_error: Option<String>,
    },

    #[error("No compatible provider found for domain {domain} interface {interface_name}, discovered versions: {}", fmt_versions(.discovered_versions))]
    NoCompatibleProviderFound {
        domain: String,
        interface_name: String,
        discovered_versions: Vec<Version>,
    },

    #[error("Arbitration strategy failed: {0}")]
    ArbitrationStrategy(String),

    #[error("Unknown provider scope: {0}")]
    UnknownProviderScope(String),

    #[error("Lookup supports exactly one domain, got {0}")]
    MultiDomainLookup(usize),

    #[error("Request with id \"{0}\" failed: ttl expired")]
    RequestTimeout(String),

    #[error("Method invocation failed: {message}")]
    MethodInvocation {
        message: String,
        provider_version: Option<Version>,
    },

    #[error("Provider runtime error: {0}")]
    ProviderRuntime(String),

    #[error("Application error {error_name}: {message}")]
    Application { error_name: String, message: String },

    #[error("Publication missed for subscription {0}: alertAfterIntervalMs period exceeded")]
    PublicationMissed(String),

    #[error("Cannot find subscription with id: {0}")]
    SubscriptionNotFound(String),

    #[error("Subscription request with id {0} failed: ttl expired")]
    SubscriptionRequestTimeout(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is already shut down")]
    ManagerClosed(&'static str),

    #[error("Global directory error: {0}")]
    Directory(String),

    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn fmt_last_error(last_error: &Option<String>) -> String {
    match last_error {
        Some(err) => format!(", last error: {err}"),
        None => String::new(),
    }
}

fn fmt_versions(versions: &[Version]) -> String {
    versions
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, PlexusError>;

/// Kind of a failure raised on the provider side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderExceptionKind {
    MethodInvocation,
    ProviderRuntime,
    /// Application defined error, named by `error_name`
    Application,
}

/// Serializable provider failure carried inside `Reply.error` and error publications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderException {
    pub kind: ProviderExceptionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_name: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_version: Option<Version>,
}

impl ProviderException {
    pub fn method_invocation(message: impl Into<String>, provider_version: Option<Version>) -> Self {
        Self {
            kind: ProviderExceptionKind::MethodInvocation,
            error_name: None,
            message: message.into(),
            provider_version,
        }
    }

    pub fn provider_runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderExceptionKind::ProviderRuntime,
            error_name: None,
            message: message.into(),
            provider_version: None,
        }
    }

    pub fn application(error_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderExceptionKind::Application,
            error_name: Some(error_name.into()),
            message: message.into(),
            provider_version: None,
        }
    }
}

impl fmt::Display for ProviderException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_name {
            Some(name) => write!(f, "{:?}({name}): {}", self.kind, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ProviderException {}

impl From<ProviderException> for PlexusError {
    fn from(exception: ProviderException) -> Self {
        match exception.kind {
            ProviderExceptionKind::MethodInvocation => PlexusError::MethodInvocation {
                message: exception.message,
                provider_version: exception.provider_version,
            },
            ProviderExceptionKind::ProviderRuntime => {
                PlexusError::ProviderRuntime(exception.message)
            }
            ProviderExceptionKind::Application => PlexusError::Application {
                error_name: exception.error_name.unwrap_or_default(),
                message: exception.message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_exception_maps_to_typed_error() {
        let err: PlexusError =
            ProviderException::method_invocation("no op", Some(Version::new(1, 2))).into();
        match err {
            PlexusError::MethodInvocation {
                message,
                provider_version,
            } => {
                assert_eq!(message, "no op");
                assert_eq!(provider_version, Some(Version::new(1, 2)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn provider_exception_survives_json() {
        let exception = ProviderException::application("TOO_HOT", "temperature above limit");
        let json = serde_json::to_value(&exception).unwrap();
        assert_eq!(json["kind"], "Application");
        assert_eq!(json["errorName"], "TOO_HOT");
        let back: ProviderException = serde_json::from_value(json).unwrap();
        assert_eq!(back, exception);
    }

    #[test]
    fn timeout_message_includes_last_lookup_error() {
        let err = PlexusError::DiscoveryTimeout {
            domain: "d".into(),
            interface_name: "i".into(),
            last_error: Some("directory unreachable".into()),
        };
        assert!(err.to_string().ends_with("last error: directory unreachable"));
    }
}
