//! # Flow
//!
//! The entry point callers compose against. A `Flow` is a cheap handle over a
//! [`TopicStore`]: producers `define` topics, consumers `consume` them, and
//! neither side needs to know whether the other attached first.
//!
//! ```rust,ignore
//! let flow = Flow::new();
//! flow.define_with("total", |publisher, flow| {
//!     let flow = flow.clone();
//!     let publisher = publisher.clone();
//!     tokio::spawn(async move {
//!         let price = flow.consume("price").await?;
//!         publisher.publish(price);
//!         Ok::<_, FlowError>(())
//!     });
//! })
//! .define("price", 42)
//! .timeout("total", Duration::from_millis(50));
//!
//! assert_eq!(flow.consume("total").await?, json!(42));
//! ```
//!
//! Callbacks registered by a flow only keep a weak handle to the store, so a
//! dropped flow does not stay alive through its own listeners.

use crate::timeout;
use futures_util::future::try_join_all;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use topicflow_core::{
    ERROR_TOPIC, FlowConfig, FlowError, Publication, Publisher, Signal, StoreSnapshot,
    StreamBridge, TopicFuture, TopicStore, Topics, WeakTopicStore, end_topic,
};
use tracing::Instrument;

#[derive(Clone, Debug, Default)]
pub struct Flow {
    store: TopicStore,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FlowConfig) -> Self {
        Self::from_store(TopicStore::with_config(config))
    }

    pub fn from_store(store: TopicStore) -> Self {
        Flow { store }
    }

    /// A new flow sharing `other`'s store: publishes and subscriptions of
    /// either are visible to both.
    pub fn import(other: &Flow) -> Self {
        Flow {
            store: other.store.clone(),
        }
    }

    pub fn store(&self) -> &TopicStore {
        &self.store
    }

    pub fn shares_store_with(&self, other: &Flow) -> bool {
        self.store.same_store(&other.store)
    }

    /// Publish a plain value on `topics`.
    pub fn define(&self, topics: impl Into<Topics>, payload: impl Into<Signal>) -> &Self {
        let publisher = self.publisher(topics);
        tracing::debug!(topics = ?publisher.topics(), "define");
        publisher.publish(payload);
        self
    }

    pub fn define_serialized<T: Serialize + ?Sized>(
        &self,
        topics: impl Into<Topics>,
        payload: &T,
    ) -> &Self {
        self.define(topics, Signal::serialize(payload))
    }

    /// Run `producer` with a publisher bound to `topics`.
    ///
    /// Whatever it returns is published right away unless it is `()` or
    /// `None`, in which case the producer is expected to publish on its own.
    pub fn define_with<F, R>(&self, topics: impl Into<Topics>, producer: F) -> &Self
    where
        F: FnOnce(&Publisher, &Flow) -> R,
        R: Publication,
    {
        let publisher = self.publisher(topics);
        tracing::debug!(topics = ?publisher.topics(), "define with producer");
        if let Some(signal) = producer(&publisher, self).into_publication() {
            publisher.publish(signal);
        }
        self
    }

    /// Publish the outcome of `future` once it completes; an `Err` goes to the
    /// error channel. Spawned on the current tokio runtime.
    pub fn define_future<Fut, T>(&self, topics: impl Into<Topics>, future: Fut) -> &Self
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Into<Signal> + Send + 'static,
    {
        let publisher = self.publisher(topics);
        let span = tracing::info_span!("Flow.define_future", topics = ?publisher.topics());
        tokio::spawn(
            async move {
                let outcome = future.await;
                publisher.publish(outcome);
            }
            .instrument(span),
        );
        self
    }

    /// A publisher bound to `topics`, for deferred or repeated publishing.
    pub fn publisher(&self, topics: impl Into<Topics>) -> Publisher {
        Publisher::new(self.store.clone(), topics)
    }

    /// The memoized future of `topic`.
    pub fn consume(&self, topic: &str) -> TopicFuture {
        self.store.future(topic)
    }

    /// Call `callback` for every value published on `topic`, history first.
    ///
    /// On the error topic the callback receives each failure as a payload
    /// (see [`FlowError::to_value`]) and counts as an error handler.
    pub fn consume_with<F>(&self, topic: &str, callback: F) -> &Self
    where
        F: Fn(Value, &Flow) + Send + Sync + 'static,
    {
        let weak = self.store.downgrade();
        let is_error = topic == ERROR_TOPIC;
        tracing::debug!(topic, "consume with callback");
        self.store.subscribe(topic, move |signal| {
            let value = match signal {
                Signal::Data(value) => value.clone(),
                Signal::Fault(err) if is_error => err.to_value(),
                Signal::Fault(_) => return,
            };
            if let Some(flow) = upgrade(&weak) {
                callback(value, &flow);
            }
        });
        self
    }

    /// One future per distinct topic, in first-seen order.
    pub fn consume_all(&self, topics: impl Into<Topics>) -> IndexMap<String, TopicFuture> {
        topics
            .into()
            .unique()
            .into_iter()
            .map(|topic| {
                let future = self.store.future(&topic);
                (topic, future)
            })
            .collect()
    }

    /// Wait for every topic, then call `callback` once with all values.
    ///
    /// If the flow fails first the callback is never called. The callback
    /// runs on a spawned task: a panic inside it ends that task only and is
    /// reported through `tracing::error!`, it does not reach the caller.
    pub fn consume_all_with<F>(&self, topics: impl Into<Topics>, callback: F) -> &Self
    where
        F: FnOnce(IndexMap<String, Value>, &Flow) + Send + 'static,
    {
        let futures = self.consume_all(topics);
        let weak = self.store.downgrade();
        let span = tracing::info_span!("Flow.consume_all", topics = futures.len());

        let task = tokio::spawn(
            async move {
                let (names, waits): (Vec<String>, Vec<TopicFuture>) = futures.into_iter().unzip();
                match try_join_all(waits).await {
                    Ok(values) => {
                        let Some(flow) = upgrade(&weak) else {
                            return;
                        };
                        callback(names.into_iter().zip(values).collect(), &flow);
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "consume_all abandoned");
                    }
                }
            }
            .instrument(span.clone()),
        );
        tokio::spawn(
            async move {
                if let Err(err) = task.await {
                    if err.is_panic() {
                        tracing::error!(error = %err, "consume_all callback panicked");
                    }
                }
            }
            .instrument(span),
        );
        self
    }

    /// Open a stream over `topic`. Its `:end` companion is tracked as pending.
    pub fn consume_stream(&self, topic: &str) -> StreamBridge {
        self.consume(&end_topic(topic));
        StreamBridge::new(self.store.clone(), topic)
    }

    pub fn consume_stream_with<F>(&self, topic: &str, callback: F) -> &Self
    where
        F: FnOnce(StreamBridge),
    {
        callback(self.consume_stream(topic));
        self
    }

    /// Handle errors of this flow. Registering one marks failures as handled.
    pub fn catch<F>(&self, handler: F) -> &Self
    where
        F: Fn(FlowError, &Flow) + Send + Sync + 'static,
    {
        let weak = self.store.downgrade();
        self.store.subscribe(ERROR_TOPIC, move |signal| {
            if let Some(flow) = upgrade(&weak) {
                handler(signal.clone().into_error(), &flow);
            }
        });
        self
    }

    /// Fail the flow unless every topic in `topics` resolves within `duration`.
    pub fn timeout(&self, topics: impl Into<Topics>, duration: Duration) -> &Self {
        timeout::supervise(self, topics.into(), duration);
        self
    }

    pub fn state(&self) -> StoreSnapshot {
        self.store.snapshot()
    }
}

impl From<&Flow> for Flow {
    fn from(other: &Flow) -> Self {
        Flow::import(other)
    }
}

fn upgrade(weak: &WeakTopicStore) -> Option<Flow> {
    weak.upgrade().map(Flow::from_store)
}
