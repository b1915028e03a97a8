// Quality of service parameters
//
// DiscoveryQos drives one arbitration, MessagingQos one message and
// SubscriptionQos the lifetime and alerting of one subscription.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::capabilities::arbitration::strategies;
use crate::error::{PlexusError, Result};
use crate::types::discovery::DiscoveryEntryWithMetaInfo;

/// Largest ttl a message may carry: 30 days
pub const MAX_MESSAGING_TTL_MS: u64 = 2_592_000_000;
pub const DEFAULT_MESSAGING_TTL_MS: u64 = 60_000;

/// `expiry_date_ms` value meaning "never expires"
pub const NO_EXPIRY_DATE: i64 = 0;
pub const NO_ALERT_AFTER_INTERVAL: u64 = 0;
pub const MAX_ALERT_AFTER_INTERVAL_MS: u64 = 2_592_000_000;
pub const DEFAULT_PUBLICATION_TTL_MS: u64 = 10_000;
pub const MIN_PUBLICATION_TTL_MS: u64 = 100;
pub const MAX_PUBLICATION_TTL_MS: u64 = 2_592_000_000;
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 1_000;
pub const MAX_MIN_INTERVAL_MS: u64 = 2_592_000_000;
pub const DEFAULT_MAX_INTERVAL_MS: u64 = 60_000;
pub const MIN_MAX_INTERVAL_MS: u64 = 50;
pub const MAX_MAX_INTERVAL_MS: u64 = 2_592_000_000;
pub const DEFAULT_PERIOD_MS: u64 = 60_000;
pub const MIN_PERIOD_MS: u64 = 50;
pub const MAX_PERIOD_MS: u64 = 2_592_000_000;

pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_DISCOVERY_RETRY_DELAY_MS: u64 = 10_000;
pub const DEFAULT_CACHE_MAX_AGE_MS: u64 = 0;

/// Where a lookup is allowed to look
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryScope {
    LocalOnly,
    LocalThenGlobal,
    GlobalOnly,
    LocalAndGlobal,
}

/// Ranks and filters arbitration candidates. An `Err` marks the candidate
/// set as unusable and ends the arbitration.
pub type ArbitrationStrategy = Arc<
    dyn Fn(&[DiscoveryEntryWithMetaInfo]) -> anyhow::Result<Vec<DiscoveryEntryWithMetaInfo>>
        + Send
        + Sync,
>;

/// Parameters of a single arbitration
#[derive(Clone)]
pub struct DiscoveryQos {
    pub discovery_scope: DiscoveryScope,
    pub cache_max_age_ms: u64,
    pub discovery_timeout_ms: u64,
    pub discovery_retry_delay_ms: u64,
    pub provider_must_support_on_change: bool,
    pub arbitration_strategy: ArbitrationStrategy,
    pub additional_parameters: HashMap<String, String>,
}

impl Default for DiscoveryQos {
    fn default() -> Self {
        Self {
            discovery_scope: DiscoveryScope::LocalThenGlobal,
            cache_max_age_ms: DEFAULT_CACHE_MAX_AGE_MS,
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
            discovery_retry_delay_ms: DEFAULT_DISCOVERY_RETRY_DELAY_MS,
            provider_must_support_on_change: false,
            arbitration_strategy: strategies::last_seen(),
            additional_parameters: HashMap::new(),
        }
    }
}

impl DiscoveryQos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, scope: DiscoveryScope) -> Self {
        self.discovery_scope = scope;
        self
    }

    pub fn with_cache_max_age(mut self, max_age_ms: u64) -> Self {
        self.cache_max_age_ms = max_age_ms;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.discovery_timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay_ms: u64) -> Self {
        self.discovery_retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_on_change_required(mut self, required: bool) -> Self {
        self.provider_must_support_on_change = required;
        self
    }

    pub fn with_strategy(mut self, strategy: ArbitrationStrategy) -> Self {
        self.arbitration_strategy = strategy;
        self
    }

    pub fn with_additional_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_parameters.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for DiscoveryQos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryQos")
            .field("discovery_scope", &self.discovery_scope)
            .field("cache_max_age_ms", &self.cache_max_age_ms)
            .field("discovery_timeout_ms", &self.discovery_timeout_ms)
            .field("discovery_retry_delay_ms", &self.discovery_retry_delay_ms)
            .field(
                "provider_must_support_on_change",
                &self.provider_must_support_on_change,
            )
            .field("additional_parameters", &self.additional_parameters)
            .finish_non_exhaustive()
    }
}

/// Per message quality of service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingQos {
    pub ttl_ms: u64,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

impl Default for MessagingQos {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_MESSAGING_TTL_MS,
            custom_headers: HashMap::new(),
        }
    }
}

impl MessagingQos {
    pub fn with_ttl(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            custom_headers: HashMap::new(),
        }
    }

    pub fn with_custom_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(key.into(), value.into());
        self
    }
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(PlexusError::InvalidArgument(format!(
            "{name} with value {value} must be within [{min}, {max}]"
        )));
    }
    Ok(())
}

fn check_alert_after_interval(alert_after_interval_ms: u64, max_interval_ms: u64) -> Result<()> {
    if alert_after_interval_ms == NO_ALERT_AFTER_INTERVAL {
        return Ok(());
    }
    if alert_after_interval_ms < max_interval_ms {
        return Err(PlexusError::InvalidArgument(format!(
            "Wrong alertAfterIntervalMs with value {alert_after_interval_ms}: it shall be higher than the specified maxIntervalMs of {max_interval_ms}"
        )));
    }
    if alert_after_interval_ms > MAX_ALERT_AFTER_INTERVAL_MS {
        return Err(PlexusError::InvalidArgument(format!(
            "Wrong alertAfterIntervalMs with value {alert_after_interval_ms}: it shall be lower than {MAX_ALERT_AFTER_INTERVAL_MS}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodicSubscriptionQos {
    pub period_ms: u64,
    pub alert_after_interval_ms: u64,
    pub expiry_date_ms: i64,
    pub publication_ttl_ms: u64,
}

impl PeriodicSubscriptionQos {
    pub fn new(period_ms: u64, alert_after_interval_ms: u64, expiry_date_ms: i64) -> Result<Self> {
        check_range("periodMs", period_ms, MIN_PERIOD_MS, MAX_PERIOD_MS)?;
        check_alert_after_interval(alert_after_interval_ms, period_ms)?;
        Ok(Self {
            period_ms,
            alert_after_interval_ms,
            expiry_date_ms,
            publication_ttl_ms: DEFAULT_PUBLICATION_TTL_MS,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChangeSubscriptionQos {
    pub min_interval_ms: u64,
    pub expiry_date_ms: i64,
    pub publication_ttl_ms: u64,
}

impl OnChangeSubscriptionQos {
    pub fn new(min_interval_ms: u64, expiry_date_ms: i64) -> Result<Self> {
        check_range("minIntervalMs", min_interval_ms, 0, MAX_MIN_INTERVAL_MS)?;
        Ok(Self {
            min_interval_ms,
            expiry_date_ms,
            publication_ttl_ms: DEFAULT_PUBLICATION_TTL_MS,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChangeWithKeepAliveSubscriptionQos {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub alert_after_interval_ms: u64,
    pub expiry_date_ms: i64,
    pub publication_ttl_ms: u64,
}

impl OnChangeWithKeepAliveSubscriptionQos {
    pub fn new(
        min_interval_ms: u64,
        max_interval_ms: u64,
        alert_after_interval_ms: u64,
        expiry_date_ms: i64,
    ) -> Result<Self> {
        check_range("minIntervalMs", min_interval_ms, 0, MAX_MIN_INTERVAL_MS)?;
        check_range(
            "maxIntervalMs",
            max_interval_ms,
            MIN_MAX_INTERVAL_MS,
            MAX_MAX_INTERVAL_MS,
        )?;
        if max_interval_ms < min_interval_ms {
            return Err(PlexusError::InvalidArgument(format!(
                "Wrong maxIntervalMs with value {max_interval_ms}: it shall be higher than the specified minIntervalMs of {min_interval_ms}"
            )));
        }
        check_alert_after_interval(alert_after_interval_ms, max_interval_ms)?;
        Ok(Self {
            min_interval_ms,
            max_interval_ms,
            alert_after_interval_ms,
            expiry_date_ms,
            publication_ttl_ms: DEFAULT_PUBLICATION_TTL_MS,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastSubscriptionQos {
    pub expiry_date_ms: i64,
    pub publication_ttl_ms: u64,
}

impl MulticastSubscriptionQos {
    pub fn new(expiry_date_ms: i64) -> Self {
        Self {
            expiry_date_ms,
            publication_ttl_ms: DEFAULT_PUBLICATION_TTL_MS,
        }
    }
}

/// Quality of service of one subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_typeName")]
pub enum SubscriptionQos {
    Periodic(PeriodicSubscriptionQos),
    OnChange(OnChangeSubscriptionQos),
    OnChangeWithKeepAlive(OnChangeWithKeepAliveSubscriptionQos),
    Multicast(MulticastSubscriptionQos),
}

impl SubscriptionQos {
    pub fn expiry_date_ms(&self) -> i64 {
        match self {
            SubscriptionQos::Periodic(q) => q.expiry_date_ms,
            SubscriptionQos::OnChange(q) => q.expiry_date_ms,
            SubscriptionQos::OnChangeWithKeepAlive(q) => q.expiry_date_ms,
            SubscriptionQos::Multicast(q) => q.expiry_date_ms,
        }
    }

    /// Zero when the subscription never alerts
    pub fn alert_after_interval_ms(&self) -> u64 {
        match self {
            SubscriptionQos::Periodic(q) => q.alert_after_interval_ms,
            SubscriptionQos::OnChangeWithKeepAlive(q) => q.alert_after_interval_ms,
            SubscriptionQos::OnChange(_) | SubscriptionQos::Multicast(_) => {
                NO_ALERT_AFTER_INTERVAL
            }
        }
    }

    pub fn min_interval_ms(&self) -> Option<u64> {
        match self {
            SubscriptionQos::OnChange(q) => Some(q.min_interval_ms),
            SubscriptionQos::OnChangeWithKeepAlive(q) => Some(q.min_interval_ms),
            SubscriptionQos::Periodic(_) | SubscriptionQos::Multicast(_) => None,
        }
    }

    pub fn publication_ttl_ms(&self) -> u64 {
        match self {
            SubscriptionQos::Periodic(q) => q.publication_ttl_ms,
            SubscriptionQos::OnChange(q) => q.publication_ttl_ms,
            SubscriptionQos::OnChangeWithKeepAlive(q) => q.publication_ttl_ms,
            SubscriptionQos::Multicast(q) => q.publication_ttl_ms,
        }
    }

    pub fn has_expiry(&self) -> bool {
        self.expiry_date_ms() != NO_EXPIRY_DATE
    }

    /// Messaging ttl for the subscription request: the time left until expiry,
    /// capped at [`MAX_MESSAGING_TTL_MS`]. Subscriptions without expiry use the cap.
    pub fn messaging_ttl_ms(&self, now_ms: i64) -> u64 {
        if !self.has_expiry() {
            return MAX_MESSAGING_TTL_MS;
        }
        let remaining = self.expiry_date_ms().saturating_sub(now_ms).max(0) as u64;
        remaining.min(MAX_MESSAGING_TTL_MS)
    }

    /// Re-run the range checks. Used for qos values that arrive deserialized.
    pub fn validate(&self) -> Result<()> {
        match self {
            SubscriptionQos::Periodic(q) => {
                check_range("periodMs", q.period_ms, MIN_PERIOD_MS, MAX_PERIOD_MS)?;
                check_alert_after_interval(q.alert_after_interval_ms, q.period_ms)?;
            }
            SubscriptionQos::OnChange(q) => {
                check_range("minIntervalMs", q.min_interval_ms, 0, MAX_MIN_INTERVAL_MS)?;
            }
            SubscriptionQos::OnChangeWithKeepAlive(q) => {
                OnChangeWithKeepAliveSubscriptionQos::new(
                    q.min_interval_ms,
                    q.max_interval_ms,
                    q.alert_after_interval_ms,
                    q.expiry_date_ms,
                )?;
            }
            SubscriptionQos::Multicast(_) => {}
        }
        check_range(
            "publicationTtlMs",
            self.publication_ttl_ms(),
            MIN_PUBLICATION_TTL_MS,
            MAX_PUBLICATION_TTL_MS,
        )
    }
}

impl From<PeriodicSubscriptionQos> for SubscriptionQos {
    fn from(qos: PeriodicSubscriptionQos) -> Self {
        SubscriptionQos::Periodic(qos)
    }
}

impl From<OnChangeSubscriptionQos> for SubscriptionQos {
    fn from(qos: OnChangeSubscriptionQos) -> Self {
        SubscriptionQos::OnChange(qos)
    }
}

impl From<OnChangeWithKeepAliveSubscriptionQos> for SubscriptionQos {
    fn from(qos: OnChangeWithKeepAliveSubscriptionQos) -> Self {
        SubscriptionQos::OnChangeWithKeepAlive(qos)
    }
}

impl From<MulticastSubscriptionQos> for SubscriptionQos {
    fn from(qos: MulticastSubscriptionQos) -> Self {
        SubscriptionQos::Multicast(qos)
    }
}
