use crate::signal::Signal;
use crate::store::TopicStore;
use crate::topics::Topics;
use crate::{DEFAULT_TOPIC, ERROR_TOPIC};
use serde::Serialize;

/// Publishing handle bound to one or more topics.
///
/// Data goes to every bound topic; a fault goes to the error channel only.
/// Once the store is latched, publishing is a no-op.
#[derive(Clone, Debug)]
pub struct Publisher {
    topics: Vec<String>,
    store: TopicStore,
}

impl Publisher {
    /// Bind to `topics`; an empty set binds to the default topic.
    pub fn new(store: TopicStore, topics: impl Into<Topics>) -> Self {
        let mut topics = topics.into().into_vec();
        if topics.is_empty() {
            topics.push(DEFAULT_TOPIC.to_string());
        }
        Publisher { topics, store }
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn publish(&self, signal: impl Into<Signal>) {
        if self.store.is_latched() {
            tracing::trace!(topics = ?self.topics, "publish after error ignored");
            return;
        }
        match signal.into() {
            fault @ Signal::Fault(_) => self.store.emit(ERROR_TOPIC, fault),
            data => {
                for topic in &self.topics {
                    self.store.emit(topic, data.clone());
                }
            }
        }
    }

    pub fn publish_serialized<T: Serialize + ?Sized>(&self, value: &T) {
        self.publish(Signal::serialize(value));
    }

    /// Publish the end-of-stream marker.
    pub fn end(&self) {
        self.publish(Signal::end());
    }
}
