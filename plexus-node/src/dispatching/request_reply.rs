// Request/Reply Manager
//
// INTENTION: Correlate outgoing requests with their replies and serve incoming
// requests from registered providers.
//
// Outgoing: every request registers a reply caller keyed by its requestReplyId
// with a deadline of now + messaging ttl. A periodic sweep fails callers whose
// deadline passed. Incoming: the method name is resolved against the provider
// registered for the target participant (operation first, then attribute
// getter/setter) and the outcome is turned into a Reply.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use plexus_common::{log_debug, log_error, log_info, log_warn, Component, Logger};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};

use crate::dispatching::dispatcher::Dispatcher;
use crate::error::{PlexusError, ProviderException, ProviderExceptionKind, Result};
use crate::provider::{AttributeGetter, AttributeSetter, OperationHandler, Provider};
use crate::type_registry::TypeRegistry;
use crate::types::{OneWayRequest, Reply, Request, RequestEnvelope};

const MANAGER_NAME: &str = "RequestReplyManager";

/// Completion handle of an outgoing request
pub type ReplySender = oneshot::Sender<Result<Vec<Value>>>;

struct ReplyCaller {
    sender: ReplySender,
    expires_at: Instant,
}

/// What an incoming method name resolved to
#[derive(Clone)]
pub enum MethodTarget {
    Operation(OperationHandler),
    Getter {
        attribute: String,
        getter: AttributeGetter,
    },
    Setter {
        attribute: String,
        setter: AttributeSetter,
    },
}

impl std::fmt::Debug for MethodTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodTarget::Operation(_) => f.write_str("Operation"),
            MethodTarget::Getter { attribute, .. } => write!(f, "Getter({attribute})"),
            MethodTarget::Setter { attribute, .. } => write!(f, "Setter({attribute})"),
        }
    }
}

/// Resolve `method_name` against `provider`.
///
/// An operation with exactly that name wins. Otherwise a `get`/`set` prefix
/// addresses an attribute, tried with the remaining name as given and then
/// with its first letter lowercased.
pub fn resolve_method(
    provider: &Provider,
    method_name: &str,
) -> std::result::Result<MethodTarget, ProviderException> {
    if let Some(handler) = provider.operation(method_name) {
        return Ok(MethodTarget::Operation(handler.clone()));
    }

    let not_found = || {
        ProviderException::method_invocation(
            format!("Could not find an operation \"{method_name}\" in the provider"),
            Some(provider.version()),
        )
    };

    let (is_getter, rest) = if let Some(rest) = method_name.strip_prefix("get") {
        (true, rest)
    } else if let Some(rest) = method_name.strip_prefix("set") {
        (false, rest)
    } else {
        return Err(not_found());
    };
    if rest.is_empty() {
        return Err(not_found());
    }

    let lowered = lower_first(rest);
    let (attribute_name, attribute) = match provider.attribute(rest) {
        Some(attribute) => (rest.to_string(), attribute),
        None => match provider.attribute(&lowered) {
            Some(attribute) => (lowered, attribute),
            None => return Err(not_found()),
        },
    };

    if is_getter {
        attribute
            .getter
            .clone()
            .map(|getter| MethodTarget::Getter {
                attribute: attribute_name,
                getter,
            })
            .ok_or_else(not_found)
    } else {
        attribute
            .setter
            .clone()
            .map(|setter| MethodTarget::Setter {
                attribute: attribute_name,
                setter,
            })
            .ok_or_else(not_found)
    }
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub struct RequestReplyManager {
    dispatcher: Arc<dyn Dispatcher>,
    type_registry: Arc<TypeRegistry>,
    reply_callers: DashMap<String, ReplyCaller>,
    request_callers: DashMap<String, Arc<Provider>>,
    shut_down: AtomicBool,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    logger: Logger,
}

impl RequestReplyManager {
    /// Create the manager and start the expiry sweep running every
    /// `sweep_interval`. Must be called inside a tokio runtime.
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        type_registry: Arc<TypeRegistry>,
        sweep_interval: Duration,
        logger: &Logger,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            dispatcher,
            type_registry,
            reply_callers: DashMap::new(),
            request_callers: DashMap::new(),
            shut_down: AtomicBool::new(false),
            sweep_task: Mutex::new(None),
            logger: logger.with_component(Component::RequestReply),
        });

        let task = tokio::spawn(Self::run_sweep(Arc::downgrade(&manager), sweep_interval));
        if let Ok(mut slot) = manager.sweep_task.lock() {
            *slot = Some(task);
        }
        manager
    }

    async fn run_sweep(manager: Weak<Self>, sweep_interval: Duration) {
        let mut ticker = interval(sweep_interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match manager.upgrade() {
                Some(manager) => manager.sweep_expired(),
                None => break,
            }
        }
    }

    /// Fail every reply caller whose deadline has passed
    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .reply_callers
            .iter()
            .filter(|caller| caller.expires_at <= now)
            .map(|caller| caller.key().clone())
            .collect();
        for id in expired {
            if let Some((id, caller)) = self.reply_callers.remove(&id) {
                log_debug!(self.logger, "request {id} expired without reply");
                let _ = caller.sender.send(Err(PlexusError::RequestTimeout(id)));
            }
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(PlexusError::ManagerClosed(MANAGER_NAME));
        }
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its reply or for its ttl to pass.
    pub async fn send_request(&self, envelope: RequestEnvelope<Request>) -> Result<Vec<Value>> {
        self.check_open()?;
        let request_reply_id = envelope.payload.request_reply_id.clone();
        let (sender, receiver) = oneshot::channel();
        self.add_reply_caller(
            request_reply_id.clone(),
            sender,
            envelope.messaging_qos.ttl_ms,
        )?;

        log_debug!(
            self.logger,
            "sending request {} \"{}\" to {}",
            request_reply_id,
            envelope.payload.method_name,
            envelope.to_discovery_entry.participant_id()
        );
        if let Err(e) = self.dispatcher.send_request(envelope).await {
            self.reply_callers.remove(&request_reply_id);
            return Err(PlexusError::Transport(e));
        }

        match receiver.await {
            Ok(result) => result,
            // the caller was dropped without an answer: only happens on teardown
            Err(_) => Err(PlexusError::ManagerClosed(MANAGER_NAME)),
        }
    }

    /// Send a request and augment each output parameter with its declared type
    pub async fn send_typed_request(
        &self,
        envelope: RequestEnvelope<Request>,
        output_types: &[String],
    ) -> Result<Vec<Value>> {
        let response = self.send_request(envelope).await?;
        response
            .into_iter()
            .enumerate()
            .map(|(i, value)| match output_types.get(i) {
                Some(type_name) => self.type_registry.augment(value, type_name),
                None => Ok(value),
            })
            .collect()
    }

    /// Register a pending reply for `request_reply_id`, failing it after `ttl_ms`.
    /// An id that is already pending is rejected.
    pub fn add_reply_caller(
        &self,
        request_reply_id: impl Into<String>,
        sender: ReplySender,
        ttl_ms: u64,
    ) -> Result<()> {
        self.check_open()?;
        let expires_at = Instant::now() + Duration::from_millis(ttl_ms);
        match self.reply_callers.entry(request_reply_id.into()) {
            Entry::Occupied(occupied) => {
                log_error!(
                    self.logger,
                    "a reply caller for request {} is already registered",
                    occupied.key()
                );
                Err(PlexusError::InvalidArgument(format!(
                    "duplicate requestReplyId {}",
                    occupied.key()
                )))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ReplyCaller { sender, expires_at });
                Ok(())
            }
        }
    }

    pub fn pending_reply_count(&self) -> usize {
        self.reply_callers.len()
    }

    /// Complete the reply caller of `reply.request_reply_id`. Replies nobody
    /// waits for (late or unknown) are logged and dropped.
    pub fn handle_reply(&self, reply: Reply) {
        let caller = match self.reply_callers.remove(&reply.request_reply_id) {
            Some((_, caller)) => caller,
            None => {
                log_error!(
                    self.logger,
                    "error handling reply {}: no reply caller found, the request may have expired",
                    reply.request_reply_id
                );
                return;
            }
        };
        let result = match reply.error {
            Some(exception) => Err(PlexusError::from(exception)),
            None => Ok(reply.response),
        };
        if caller.sender.send(result).is_err() {
            log_debug!(
                self.logger,
                "caller of request {} is gone, dropping reply",
                reply.request_reply_id
            );
        }
    }

    pub async fn send_one_way_request(&self, envelope: RequestEnvelope<OneWayRequest>) -> Result<()> {
        self.check_open()?;
        self.dispatcher
            .send_one_way_request(envelope)
            .await
            .map_err(PlexusError::Transport)
    }

    /// Serve requests addressed to `participant_id` from `provider`
    pub fn add_request_caller(&self, participant_id: impl Into<String>, provider: Arc<Provider>) {
        let participant_id = participant_id.into();
        log_info!(
            self.logger,
            "registered request caller {} for {}",
            participant_id,
            provider.interface_name()
        );
        self.request_callers.insert(participant_id, provider);
    }

    pub fn remove_request_caller(&self, participant_id: &str) -> Option<Arc<Provider>> {
        self.request_callers
            .remove(participant_id)
            .map(|(_, provider)| provider)
    }

    /// Execute `request` on the provider registered for `provider_participant_id`.
    /// Failures are reported inside the returned Reply.
    pub async fn handle_request(&self, provider_participant_id: &str, request: Request) -> Reply {
        let request_reply_id = request.request_reply_id.clone();
        match self.invoke(provider_participant_id, request).await {
            Ok(response) => Reply::response(request_reply_id, response),
            Err(exception) => Reply::error(request_reply_id, exception),
        }
    }

    /// Execute a one-way request. Nobody waits for the outcome, failures are
    /// only logged.
    pub async fn handle_one_way_request(&self, provider_participant_id: &str, request: OneWayRequest) {
        let method_name = request.method_name.clone();
        let as_request = Request::new(request.method_name, request.params)
            .with_param_datatypes(request.param_datatypes);
        if let Err(exception) = self.invoke(provider_participant_id, as_request).await {
            log_warn!(
                self.logger,
                "one-way request \"{method_name}\" for {provider_participant_id} failed: {exception}"
            );
        }
    }

    async fn invoke(
        &self,
        provider_participant_id: &str,
        request: Request,
    ) -> std::result::Result<Vec<Value>, ProviderException> {
        if self.is_shut_down() {
            return Err(ProviderException::method_invocation(
                format!("{MANAGER_NAME} is already shut down"),
                None,
            ));
        }
        let provider = match self.request_callers.get(provider_participant_id) {
            Some(provider) => provider.value().clone(),
            None => {
                return Err(ProviderException::method_invocation(
                    format!(
                        "error handling request \"{}\": no provider registered for participantId {provider_participant_id}",
                        request.method_name
                    ),
                    None,
                ))
            }
        };

        let target = resolve_method(&provider, &request.method_name)?;
        log_debug!(
            self.logger,
            "request {} \"{}\" resolved to {:?}",
            request.request_reply_id,
            request.method_name,
            target
        );
        match target {
            MethodTarget::Operation(handler) => handler(request.params).await.map_err(|e| {
                match e.downcast_ref::<ProviderException>() {
                    Some(exception) => exception.clone(),
                    None => ProviderException::provider_runtime(format!(
                        "operation \"{}\" reported an error: {e:#}",
                        request.method_name
                    )),
                }
            }),
            MethodTarget::Getter { attribute, getter } => getter()
                .await
                .map(|value| vec![value])
                .map_err(|e| wrap_attribute_error("getter", &attribute, e)),
            MethodTarget::Setter { attribute, setter } => {
                let value = request.params.into_iter().next().ok_or_else(|| {
                    ProviderException::method_invocation(
                        format!("setter of attribute {attribute} called without a value"),
                        Some(provider.version()),
                    )
                })?;
                setter(value)
                    .await
                    .map(|_| Vec::new())
                    .map_err(|e| wrap_attribute_error("setter", &attribute, e))
            }
        }
    }

    /// Stop the sweep and reject every pending reply caller
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.sweep_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        let pending: Vec<String> = self
            .reply_callers
            .iter()
            .map(|caller| caller.key().clone())
            .collect();
        for id in pending {
            if let Some((_, caller)) = self.reply_callers.remove(&id) {
                let _ = caller.sender.send(Err(PlexusError::ManagerClosed(MANAGER_NAME)));
            }
        }
        log_info!(self.logger, "{MANAGER_NAME} shut down");
    }
}

fn wrap_attribute_error(kind: &str, attribute: &str, error: anyhow::Error) -> ProviderException {
    match error.downcast_ref::<ProviderException>() {
        Some(exception) if exception.kind == ProviderExceptionKind::ProviderRuntime => {
            exception.clone()
        }
        _ => ProviderException::provider_runtime(format!(
            "{kind} method of attribute {attribute} reported an error: {error:#}"
        )),
    }
}
