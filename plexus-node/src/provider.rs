// Provider abstraction
//
// INTENTION: Describe what a provider offers as plain data: named attributes
// with getter/setter handlers and named operations. The request/reply manager
// resolves incoming method names against this description; nothing is found
// through reflection at call time.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::types::Version;

/// Future returned by provider handlers
pub type ProviderFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

pub type AttributeGetter = Arc<dyn Fn() -> ProviderFuture<Value> + Send + Sync>;
pub type AttributeSetter = Arc<dyn Fn(Value) -> ProviderFuture<()> + Send + Sync>;
/// Operation handler: input parameters in, output parameters out
pub type OperationHandler = Arc<dyn Fn(Vec<Value>) -> ProviderFuture<Vec<Value>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProviderAttribute {
    pub getter: Option<AttributeGetter>,
    pub setter: Option<AttributeSetter>,
}

/// Capabilities of one registered provider
#[derive(Clone)]
pub struct Provider {
    interface_name: String,
    version: Version,
    attributes: HashMap<String, ProviderAttribute>,
    operations: HashMap<String, OperationHandler>,
}

impl Provider {
    pub fn new(interface_name: impl Into<String>, version: Version) -> Self {
        Self {
            interface_name: interface_name.into(),
            version,
            attributes: HashMap::new(),
            operations: HashMap::new(),
        }
    }

    pub fn with_attribute(
        mut self,
        name: impl Into<String>,
        getter: AttributeGetter,
        setter: Option<AttributeSetter>,
    ) -> Self {
        self.attributes.insert(
            name.into(),
            ProviderAttribute {
                getter: Some(getter),
                setter,
            },
        );
        self
    }

    pub fn with_operation(mut self, name: impl Into<String>, handler: OperationHandler) -> Self {
        self.operations.insert(name.into(), handler);
        self
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn attribute(&self, name: &str) -> Option<&ProviderAttribute> {
        self.attributes.get(name)
    }

    pub fn operation(&self, name: &str) -> Option<&OperationHandler> {
        self.operations.get(name)
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut attributes: Vec<_> = self.attributes.keys().collect();
        attributes.sort();
        let mut operations: Vec<_> = self.operations.keys().collect();
        operations.sort();
        f.debug_struct("Provider")
            .field("interface_name", &self.interface_name)
            .field("version", &self.version)
            .field("attributes", &attributes)
            .field("operations", &operations)
            .finish()
    }
}

/// Wrap a closure returning a future into an [`AttributeGetter`]
pub fn getter<F, Fut>(f: F) -> AttributeGetter
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move || -> ProviderFuture<Value> { Box::pin(f()) })
}

pub fn setter<F, Fut>(f: F) -> AttributeSetter
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |value| -> ProviderFuture<()> { Box::pin(f(value)) })
}

pub fn operation<F, Fut>(f: F) -> OperationHandler
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Value>>> + Send + 'static,
{
    Arc::new(move |params| -> ProviderFuture<Vec<Value>> { Box::pin(f(params)) })
}
