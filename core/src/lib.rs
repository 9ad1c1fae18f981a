//! Topicflow core: the topic store and the primitives built directly on it.
//!
//! * [`TopicStore`] - per-topic history, memoized futures, error latch
//! * [`Publisher`] - write handle bound to one or more topics
//! * [`StreamBridge`] - pull-based, backpressure-aware view of a topic
//! * [`Signal`] - the value-or-failure payload every topic carries

pub mod config;
pub mod error;
pub mod future;
pub mod publisher;
pub mod signal;
pub mod snapshot;
pub mod store;
pub mod stream;
pub mod topics;

/// The error channel. Emitting on it latches the store.
pub const ERROR_TOPIC: &str = "error";

/// Topic used by a publisher bound to no name.
pub const DEFAULT_TOPIC: &str = "data";

/// Suffix of the companion topic a stream emits when it ends.
pub const END_SUFFIX: &str = ":end";

/// `"<topic>:end"`
pub fn end_topic(topic: &str) -> String {
    format!("{topic}{END_SUFFIX}")
}

pub mod prelude {
    pub use crate::config::{FlowConfig, UnhandledErrors};
    pub use crate::error::{FlowError, UsageError};
    pub use crate::future::{TopicFuture, TopicResult};
    pub use crate::publisher::Publisher;
    pub use crate::signal::{Publication, Signal, TopicEvent};
    pub use crate::snapshot::StoreSnapshot;
    pub use crate::store::TopicStore;
    pub use crate::stream::StreamBridge;
    pub use crate::topics::Topics;
    pub use crate::{DEFAULT_TOPIC, END_SUFFIX, ERROR_TOPIC};
}

pub use config::{ConfigError, FlowConfig, UnhandledErrors};
pub use error::{FlowError, UsageError};
pub use future::{TopicFuture, TopicResult};
pub use publisher::Publisher;
pub use signal::{Publication, Signal, TopicEvent};
pub use snapshot::StoreSnapshot;
pub use store::{Handler, SubscriptionId, TopicStore, WeakTopicStore, WildcardHandler};
pub use stream::StreamBridge;
pub use topics::Topics;
