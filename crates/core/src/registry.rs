//! Method registry.
//!
//! Maps method names to the handlers that service remote `invoke` frames.
//! At most one handler per name; re-registering a taken name is an error,
//! never an overwrite.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};

/// Future returned by a method handler.
pub type MethodFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Handler for a remotely invocable method.
///
/// Receives the argument list of the `invoke` frame. An `Err` is reported
/// to the caller as an `error` response carrying the error's message.
/// Identity is by allocation: keep a clone around to `unregister` it later.
#[derive(Clone)]
pub struct MethodHandler(Arc<dyn Fn(Vec<Value>) -> MethodFuture + Send + Sync>);

impl MethodHandler {
    /// Wrap an asynchronous handler.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self(Arc::new(move |args| Box::pin(f(args))))
    }

    /// Wrap a handler that completes immediately.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(move |args| std::future::ready(f(args)))
    }

    pub fn call(&self, args: Vec<Value>) -> MethodFuture {
        (self.0)(args)
    }
}

impl PartialEq for MethodHandler {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

impl Eq for MethodHandler {}

impl fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MethodHandler")
            .field(&(Arc::as_ptr(&self.0) as *const ()))
            .finish()
    }
}

/// Name → handler table.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodHandler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: String, handler: MethodHandler) -> Result<()> {
        validate_name(&name, "method")?;
        if self.methods.contains_key(&name) {
            return Err(Error::InvalidArgument(format!(
                "method {name:?} already registered"
            )));
        }
        self.methods.insert(name, handler);
        Ok(())
    }

    /// Remove `name` only if it is currently bound to this exact handler.
    /// Returns whether anything was removed.
    pub fn unregister(&mut self, name: &str, handler: &MethodHandler) -> Result<bool> {
        validate_name(name, "method")?;
        match self.methods.get(name) {
            Some(current) if current == handler => {
                self.methods.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MethodHandler> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Names must be non-empty.
pub(crate) fn validate_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "{what} name must not be an empty string"
        )));
    }
    Ok(())
}
