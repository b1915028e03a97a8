// Configuration Module
//
// Runtime wide settings: identity of this cluster controller, the defaults
// applied to discovery and messaging, timer intervals and logging.
//
// ## Examples
//
// ```rust
// use plexus_node::config::{LoggingConfig, LogLevel, RuntimeConfig};
//
// let config = RuntimeConfig::new("cc-1")
//     .with_discovery_timeout(30_000)
//     .with_logging_config(LoggingConfig::new().with_default_level(LogLevel::Debug));
// ```

use std::time::Duration;

pub use plexus_common::logging::{ComponentKey, LogLevel, LoggingConfig};

use crate::routing::Address;
use crate::types::qos::{
    DiscoveryQos, DiscoveryScope, DEFAULT_CACHE_MAX_AGE_MS, DEFAULT_DISCOVERY_RETRY_DELAY_MS,
    DEFAULT_DISCOVERY_TIMEOUT_MS, DEFAULT_MESSAGING_TTL_MS, MAX_MESSAGING_TTL_MS,
};

/// How often expired reply callers are swept
pub const DEFAULT_REPLY_SWEEP_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_GLOBAL_CAPABILITIES_DOMAIN: &str = "io.plexus";
/// How long shutdown waits for subscription stops to be sent
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 1_000;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Id of this cluster controller, also the participant id used for logging
    pub cluster_controller_id: String,

    /// Domain under which the global capabilities directory is registered
    pub global_capabilities_domain: String,

    pub default_discovery_scope: DiscoveryScope,
    pub default_discovery_timeout_ms: u64,
    pub default_discovery_retry_delay_ms: u64,
    pub default_cache_max_age_ms: u64,

    /// Messaging ttl used when the caller does not give one
    pub default_messaging_ttl_ms: u64,
    pub max_messaging_ttl_ms: u64,

    pub reply_sweep_interval_ms: u64,

    /// Upper bound for stopping open subscriptions on shutdown
    pub shutdown_timeout_ms: u64,

    /// Address next hops for locally created proxies point to
    pub local_address: Address,

    /// Logging configuration options
    pub logging_config: Option<LoggingConfig>,
}

impl RuntimeConfig {
    pub fn new(cluster_controller_id: impl Into<String>) -> Self {
        Self {
            cluster_controller_id: cluster_controller_id.into(),
            global_capabilities_domain: DEFAULT_GLOBAL_CAPABILITIES_DOMAIN.to_string(),
            default_discovery_scope: DiscoveryScope::LocalThenGlobal,
            default_discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
            default_discovery_retry_delay_ms: DEFAULT_DISCOVERY_RETRY_DELAY_MS,
            default_cache_max_age_ms: DEFAULT_CACHE_MAX_AGE_MS,
            default_messaging_ttl_ms: DEFAULT_MESSAGING_TTL_MS,
            max_messaging_ttl_ms: MAX_MESSAGING_TTL_MS,
            reply_sweep_interval_ms: DEFAULT_REPLY_SWEEP_INTERVAL_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            local_address: Address::InProcess,
            logging_config: Some(LoggingConfig::default_info()),
        }
    }

    pub fn with_global_capabilities_domain(mut self, domain: impl Into<String>) -> Self {
        self.global_capabilities_domain = domain.into();
        self
    }

    pub fn with_discovery_scope(mut self, scope: DiscoveryScope) -> Self {
        self.default_discovery_scope = scope;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout_ms: u64) -> Self {
        self.default_discovery_timeout_ms = timeout_ms;
        self
    }

    pub fn with_discovery_retry_delay(mut self, retry_delay_ms: u64) -> Self {
        self.default_discovery_retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_cache_max_age(mut self, max_age_ms: u64) -> Self {
        self.default_cache_max_age_ms = max_age_ms;
        self
    }

    /// Set the default messaging ttl; values above the maximum are capped
    pub fn with_messaging_ttl(mut self, ttl_ms: u64) -> Self {
        self.default_messaging_ttl_ms = ttl_ms.min(self.max_messaging_ttl_ms);
        self
    }

    pub fn with_reply_sweep_interval(mut self, interval_ms: u64) -> Self {
        self.reply_sweep_interval_ms = interval_ms.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout_ms: u64) -> Self {
        self.shutdown_timeout_ms = timeout_ms;
        self
    }

    pub fn with_local_address(mut self, address: Address) -> Self {
        self.local_address = address;
        self
    }

    pub fn with_logging_config(mut self, config: LoggingConfig) -> Self {
        self.logging_config = Some(config);
        self
    }

    pub fn without_logging_config(mut self) -> Self {
        self.logging_config = None;
        self
    }

    /// DiscoveryQos carrying this configuration's defaults
    pub fn default_discovery_qos(&self) -> DiscoveryQos {
        DiscoveryQos::new()
            .with_scope(self.default_discovery_scope)
            .with_timeout(self.default_discovery_timeout_ms)
            .with_retry_delay(self.default_discovery_retry_delay_ms)
            .with_cache_max_age(self.default_cache_max_age_ms)
    }

    pub fn reply_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.reply_sweep_interval_ms)
    }
}

impl std::fmt::Display for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RuntimeConfig: cluster_controller_id:{} directory_domain:{} discovery_scope:{:?} discovery_timeout:{}ms retry_delay:{}ms messaging_ttl:{}ms",
            self.cluster_controller_id,
            self.global_capabilities_domain,
            self.default_discovery_scope,
            self.default_discovery_timeout_ms,
            self.default_discovery_retry_delay_ms,
            self.default_messaging_ttl_ms
        )?;

        if let Some(logging) = &self.logging_config {
            write!(f, " log_level:{:?}", logging.default_level)?;
        }

        Ok(())
    }
}
