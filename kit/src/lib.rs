//! Topicflow facade crate.
//!
//! Re-exports the core store primitives, the runtime (`Flow`, `Action`) and,
//! behind features, the context registry and tracing bootstrap.

pub use topicflow_core as core;
pub use topicflow_runtime as runtime;
#[cfg(feature = "context")]
pub use topicflow_context as context;
#[cfg(feature = "observe")]
pub use topicflow_observe as observe;

pub use topicflow_core::{FlowConfig, FlowError, Signal, StreamBridge, TopicFuture, UsageError};
pub use topicflow_runtime::{Action, ActionBody, Flow};
#[cfg(feature = "context")]
pub use topicflow_context::{Context, ContextError, Resolver, WeakContext};

pub mod prelude {
    pub use topicflow_core::prelude::*;
    pub use topicflow_runtime::prelude::*;
    #[cfg(feature = "context")]
    pub use topicflow_context::{Context, ContextError, Resolver, WeakContext};
}
