//! # Context
//!
//! A [`Flow`] carrying named groups of injected dependencies:
//!
//! * **properties** - plain values, grouped by name
//! * **functions** - async callables, grouped by name, each built from a
//!   [`Resolver`] the first time it is looked up and cached afterwards
//!
//! Factories receive a [`WeakContext`] of the owning context, so one function
//! can call another, and tests can swap any of them for a plain value or a
//! failure. The handle is weak because resolved callables live inside the
//! context they were built for.
//!
//! ```rust,ignore
//! let ctx = Context::builder()
//!     .function("actions", "three", Resolver::value(3))
//!     .function("actions", "add", Resolver::factory(|ctx| {
//!         let ctx = ctx.clone();
//!         Resolver::function(move |n| {
//!             let ctx = ctx.clone();
//!             async move {
//!                 let three = ctx.call("actions", "three", Value::Null).await?;
//!                 Ok(json!(n.as_i64().unwrap_or(0) + three.as_i64().unwrap_or(0)))
//!             }
//!         })
//!     }))
//!     .build();
//!
//! assert_eq!(ctx.call("actions", "add", json!(2)).await?, json!(5));
//! ```

pub mod error;
pub mod resolver;

pub use error::ContextError;
pub use resolver::{Callable, Factory, Resolver};

use indexmap::IndexMap;
use serde_json::Value;
use std::ops::Deref;
use std::sync::{Arc, OnceLock, Weak};
use topicflow_runtime::Flow;

struct Entry {
    resolver: Resolver,
    resolved: OnceLock<Callable>,
}

struct ContextInner {
    flow: Flow,
    properties: IndexMap<String, IndexMap<String, Value>>,
    functions: IndexMap<String, IndexMap<String, Entry>>,
}

/// Shared handle; clones refer to the same registry and flow.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// Non-owning handle to a [`Context`], handed to factories.
#[derive(Clone)]
pub struct WeakContext {
    inner: Weak<ContextInner>,
}

impl WeakContext {
    pub fn upgrade(&self) -> Option<Context> {
        self.inner.upgrade().map(|inner| Context { inner })
    }

    /// Look up and invoke a function of the context, if it is still alive.
    pub async fn call(&self, group: &str, name: &str, args: Value) -> Result<Value, ContextError> {
        let context = self.upgrade().ok_or_else(|| ContextError::Dropped {
            group: group.to_string(),
            name: name.to_string(),
        })?;
        context.call(group, name, args).await
    }
}

impl std::fmt::Debug for WeakContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakContext")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn flow(&self) -> &Flow {
        &self.inner.flow
    }

    /// A property group, if it was registered.
    pub fn property(&self, group: &str) -> Option<&IndexMap<String, Value>> {
        self.inner.properties.get(group)
    }

    /// The function `name` of `group`, resolved on first access.
    pub fn function(&self, group: &str, name: &str) -> Result<Callable, ContextError> {
        let entry = self
            .inner
            .functions
            .get(group)
            .ok_or_else(|| ContextError::UnknownGroup {
                group: group.to_string(),
            })?
            .get(name)
            .ok_or_else(|| ContextError::UnknownFunction {
                group: group.to_string(),
                name: name.to_string(),
            })?;

        if let Some(callable) = entry.resolved.get() {
            return Ok(callable.clone());
        }

        // Factories may look up other entries, so resolve outside the cell.
        let callable = entry.resolver.resolve(&self.downgrade());
        tracing::debug!(group, name, "context function resolved");
        Ok(entry.resolved.get_or_init(|| callable).clone())
    }

    /// Look up and invoke a function.
    pub async fn call(&self, group: &str, name: &str, args: Value) -> Result<Value, ContextError> {
        let callable = self.function(group, name)?;
        Ok(callable(args).await?)
    }

    /// Names of the functions of `group` resolved so far, in registration order.
    pub fn resolved_functions(&self, group: &str) -> Vec<String> {
        self.inner
            .functions
            .get(group)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, entry)| entry.resolved.get().is_some())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Deref for Context {
    type Target = Flow;

    fn deref(&self) -> &Flow {
        &self.inner.flow
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("properties", &self.inner.properties.keys().collect::<Vec<_>>())
            .field("functions", &self.inner.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    flow: Option<Flow>,
    properties: IndexMap<String, IndexMap<String, Value>>,
    functions: IndexMap<String, IndexMap<String, Entry>>,
}

impl ContextBuilder {
    /// Run on top of an existing flow instead of a fresh one.
    pub fn flow(mut self, flow: &Flow) -> Self {
        self.flow = Some(Flow::import(flow));
        self
    }

    pub fn property(mut self, group: &str, key: &str, value: impl Into<Value>) -> Self {
        self.properties
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }

    pub fn properties(mut self, group: &str, values: IndexMap<String, Value>) -> Self {
        self.properties
            .entry(group.to_string())
            .or_default()
            .extend(values);
        self
    }

    pub fn function(mut self, group: &str, name: &str, resolver: impl Into<Resolver>) -> Self {
        self.functions.entry(group.to_string()).or_default().insert(
            name.to_string(),
            Entry {
                resolver: resolver.into(),
                resolved: OnceLock::new(),
            },
        );
        self
    }

    pub fn build(self) -> Context {
        Context {
            inner: Arc::new(ContextInner {
                flow: self.flow.unwrap_or_default(),
                properties: self.properties,
                functions: self.functions,
            }),
        }
    }
}
