// Logging utilities for the Plexus middleware
//
// This module provides:
// - Component-based structured logging
// - Participant ID tracking through logger inheritance
// - Optional per-call context (request reply id, subscription id, ...)
// - Per-component level overrides on top of the `log` facade

use log::{debug, error, info, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Arguments, Display, Formatter};
use std::sync::{Once, RwLock};

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Runtime,
    Discovery,
    Arbitration,
    RequestReply,
    Subscription,
    ProxyBuilder,
    Routing,
    Custom(&'static str),
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &str {
        match self {
            Component::Runtime => "Runtime",
            Component::Discovery => "Discovery",
            Component::Arbitration => "Arbitration",
            Component::RequestReply => "RequestReply",
            Component::Subscription => "Subscription",
            Component::ProxyBuilder => "ProxyBuilder",
            Component::Routing => "Routing",
            Component::Custom(name) => name,
        }
    }

    fn key(&self) -> ComponentKey {
        match self {
            Component::Runtime => ComponentKey::Runtime,
            Component::Discovery => ComponentKey::Discovery,
            Component::Arbitration => ComponentKey::Arbitration,
            Component::RequestReply => ComponentKey::RequestReply,
            Component::Subscription => ComponentKey::Subscription,
            Component::ProxyBuilder => ComponentKey::ProxyBuilder,
            Component::Routing => ComponentKey::Routing,
            Component::Custom(name) => ComponentKey::Custom((*name).to_string()),
        }
    }
}

/// Owned key used to configure per-component levels
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKey {
    Runtime,
    Discovery,
    Arbitration,
    RequestReply,
    Subscription,
    ProxyBuilder,
    Routing,
    Custom(String),
}

/// Log level used in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

static LOGGER_INIT: Once = Once::new();
// (default filter, per-component overrides); None until a config was applied
static COMPONENT_LEVELS: RwLock<Option<(LevelFilter, HashMap<ComponentKey, LevelFilter>)>> =
    RwLock::new(None);

fn component_enabled(component: Component, level: log::Level) -> bool {
    let levels = match COMPONENT_LEVELS.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match levels.as_ref() {
        Some((default_filter, overrides)) => {
            let filter = overrides.get(&component.key()).unwrap_or(default_filter);
            level <= *filter
        }
        None => log::log_enabled!(level),
    }
}

/// Logging configuration: a default level plus per-component overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub default_level: LogLevel,
    pub component_levels: HashMap<ComponentKey, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::default_info()
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default_info()
    }

    pub fn default_info() -> Self {
        Self {
            default_level: LogLevel::Info,
            component_levels: HashMap::new(),
        }
    }

    pub fn with_default_level(mut self, level: LogLevel) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_component_level(mut self, component: ComponentKey, level: LogLevel) -> Self {
        self.component_levels.insert(component, level);
        self
    }

    /// Install the configuration.
    ///
    /// The `env_logger` backend is installed once per process; later calls only
    /// update the level filters, so tests can call this freely.
    pub fn apply(&self) {
        let default_filter = self.default_level.to_level_filter();
        let max_filter = self
            .component_levels
            .values()
            .map(|level| level.to_level_filter())
            .fold(default_filter, |acc, filter| acc.max(filter));

        LOGGER_INIT.call_once(|| {
            let _ = env_logger::Builder::new()
                .filter_level(LevelFilter::Trace)
                .format_timestamp_millis()
                .try_init();
        });
        log::set_max_level(max_filter);

        let overrides = self
            .component_levels
            .iter()
            .map(|(key, level)| (key.clone(), level.to_level_filter()))
            .collect::<HashMap<_, _>>();
        let mut levels = match COMPONENT_LEVELS.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *levels = Some((default_filter, overrides));
    }
}

struct ComponentPrefixDisplay {
    parent: Option<Component>,
    component: Component,
}

impl Display for ComponentPrefixDisplay {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.parent {
            Some(parent) if parent != Component::Runtime => {
                write!(f, "{}.{}", parent.as_str(), self.component.as_str())
            }
            _ => write!(f, "{}", self.component.as_str()),
        }
    }
}

struct MaybeContextDisplay<'a>(Option<&'a str>);

impl Display for MaybeContextDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(context) = self.0 {
            write!(f, "|{context}")
        } else {
            Ok(())
        }
    }
}

/// A helper for creating component-specific loggers with participant ID tracking
#[derive(Clone, Debug)]
pub struct Logger {
    component: Component,
    /// Participant (or cluster controller) id the messages belong to
    participant_id: String,
    parent_component: Option<Component>,
    /// Free-form context such as a request reply id
    context: Option<String>,
}

impl Logger {
    /// Create a new root logger for a specific component and participant ID.
    pub fn new_root(component: Component, participant_id: &str) -> Self {
        Self {
            component,
            participant_id: participant_id.to_string(),
            parent_component: None,
            context: None,
        }
    }

    /// Create a child logger with the same participant ID but a different component
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            participant_id: self.participant_id.clone(),
            parent_component: Some(self.component),
            context: self.context.clone(),
        }
    }

    /// Create a logger that tags every message with `context`
    pub fn with_context(&self, context: impl Into<String>) -> Self {
        Self {
            component: self.component,
            participant_id: self.participant_id.clone(),
            parent_component: self.parent_component,
            context: Some(context.into()),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    fn prefix(&self) -> ComponentPrefixDisplay {
        ComponentPrefixDisplay {
            parent: self.parent_component,
            component: self.component,
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.debug_args(format_args!("{}", message.into()));
    }

    /// Log a debug message using fmt::Arguments (avoids allocating message String)
    pub fn debug_args(&self, args: Arguments) {
        if component_enabled(self.component, log::Level::Debug) {
            debug!(
                "[{}][{}{}] {}",
                self.participant_id,
                self.prefix(),
                MaybeContextDisplay(self.context()),
                args
            );
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.info_args(format_args!("{}", message.into()));
    }

    pub fn info_args(&self, args: Arguments) {
        if component_enabled(self.component, log::Level::Info) {
            info!(
                "[{}][{}{}] {}",
                self.participant_id,
                self.prefix(),
                MaybeContextDisplay(self.context()),
                args
            );
        }
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.warn_args(format_args!("{}", message.into()));
    }

    pub fn warn_args(&self, args: Arguments) {
        if component_enabled(self.component, log::Level::Warn) {
            warn!(
                "[{}][{}{}] {}",
                self.participant_id,
                self.prefix(),
                MaybeContextDisplay(self.context()),
                args
            );
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        self.error_args(format_args!("{}", message.into()));
    }

    pub fn error_args(&self, args: Arguments) {
        if component_enabled(self.component, log::Level::Error) {
            error!(
                "[{}][{}{}] {}",
                self.participant_id,
                self.prefix(),
                MaybeContextDisplay(self.context()),
                args
            );
        }
    }
}
