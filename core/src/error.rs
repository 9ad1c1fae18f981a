use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// A failure travelling on the error channel of a flow.
///
/// Every payload published on the `"error"` topic becomes a `FlowError`.
/// The first one latches the store; all pending futures reject with it.
/// It is `Clone` because one error settles many shared futures.
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    /// A caller-supplied failure message.
    #[error("{0}")]
    Raised(String),

    /// A plain value that was published on the error topic.
    #[error("{}", display_value(.0))]
    Published(Value),

    /// Synthesized by the timeout supervisor.
    #[error(
        "Topic/s ({}) timed out, pending topics ({}), queue state {queue_state}",
        .timed_out.join(","),
        or_none(.pending)
    )]
    Timeout {
        timed_out: Vec<String>,
        pending: Vec<String>,
        queue_state: String,
    },

    /// A stream bridge failed while moving items downstream.
    #[error("stream on topic `{topic}` failed: {reason}")]
    Stream { topic: String, reason: String },

    /// The store went away before the future for `topic` settled.
    #[error("topic store dropped before `{topic}` settled")]
    Closed { topic: String },

    /// A settled value did not match the type it was decoded into.
    #[error("payload on `{topic}` could not be decoded: {reason}")]
    Decode { topic: String, reason: String },

    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

impl FlowError {
    pub fn raised(message: impl Into<String>) -> Self {
        FlowError::Raised(message.into())
    }

    /// Turn an arbitrary value published on the error topic into an error.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(message) => FlowError::Raised(message),
            other => FlowError::Published(other),
        }
    }

    /// The error as a plain payload: published values come back as they
    /// were, everything else as its message.
    pub fn to_value(&self) -> Value {
        match self {
            FlowError::Published(value) => value.clone(),
            other => Value::String(other.to_string()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FlowError::Timeout { .. })
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        FlowError::Other(Arc::new(err))
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Raised(err.to_string())
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn or_none(topics: &[String]) -> String {
    if topics.is_empty() {
        "none".to_string()
    } else {
        topics.join(",")
    }
}

/// Programmer misuse, raised synchronously at the call site.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("action `{label}` is already activated and cannot be added to another action")]
    AlreadyActivated { label: String },

    #[error("action `{label}` already belongs to another action")]
    AlreadyAttached { label: String },

    #[error("action `{label}` cannot be added to itself or to one of its descendants")]
    Cycle { label: String },
}
