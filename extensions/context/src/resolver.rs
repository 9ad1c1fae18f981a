use crate::WeakContext;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use topicflow_core::FlowError;

/// An injected async function: one argument value in, one value out.
pub type Callable = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, FlowError>> + Send + Sync>;

/// Factory run once, on first lookup, with a weak handle to the owning
/// context. Callables it builds are cached inside that context, so they must
/// not keep it alive.
pub type Factory = Arc<dyn Fn(&WeakContext) -> Resolver + Send + Sync>;

/// How a registry entry turns into a [`Callable`].
#[derive(Clone)]
pub enum Resolver {
    /// Shortcut for a function returning this value. Handy for mocks.
    Value(Value),
    /// A function that always fails with this error.
    Fail(FlowError),
    Function(Callable),
    /// Called with the context; whatever it returns is resolved in turn.
    Factory(Factory),
}

impl Resolver {
    pub fn value(value: impl Into<Value>) -> Self {
        Resolver::Value(value.into())
    }

    pub fn fail(err: impl Into<FlowError>) -> Self {
        Resolver::Fail(err.into())
    }

    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, FlowError>> + Send + 'static,
    {
        Resolver::Function(Arc::new(move |args: Value| f(args).boxed()))
    }

    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&WeakContext) -> Resolver + Send + Sync + 'static,
    {
        Resolver::Factory(Arc::new(f))
    }

    /// Reduce to a callable, running factories against `context`.
    pub(crate) fn resolve(&self, context: &WeakContext) -> Callable {
        match self {
            Resolver::Value(value) => constant(Ok(value.clone())),
            Resolver::Fail(err) => constant(Err(err.clone())),
            Resolver::Function(callable) => callable.clone(),
            Resolver::Factory(factory) => factory(context).resolve(context),
        }
    }
}

fn constant(outcome: Result<Value, FlowError>) -> Callable {
    Arc::new(move |_: Value| {
        let outcome = outcome.clone();
        async move { outcome }.boxed()
    })
}

impl From<Value> for Resolver {
    fn from(value: Value) -> Self {
        Resolver::Value(value)
    }
}

impl From<FlowError> for Resolver {
    fn from(err: FlowError) -> Self {
        Resolver::Fail(err)
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolver::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolver::Fail(err) => f.debug_tuple("Fail").field(err).finish(),
            Resolver::Function(_) => f.write_str("Function(..)"),
            Resolver::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}
