//! Pull-based view of a topic.
//!
//! A [`StreamBridge`] subscribes to its topic for its whole life and turns the
//! pushed deliveries into a [`Stream`] of values. Items move through two
//! queues: the readable queue the consumer polls from, capped by the
//! high-water mark, and an unbounded overflow buffer that fills while the
//! readable queue is saturated. Polling drains the overflow back into the
//! readable queue in arrival order.

use crate::end_topic;
use crate::error::FlowError;
use crate::signal::Signal;
use crate::store::{SubscriptionId, TopicStore};
use futures_core::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

#[derive(Default)]
struct BridgeState {
    /// Readable queue handed to the consumer.
    sink: VecDeque<Value>,
    /// Items that arrived while the readable queue was saturated.
    buffer: VecDeque<Value>,
    paused: bool,
    stopped: bool,
    ended: bool,
    end_emitted: bool,
    waker: Option<Waker>,
}

struct BridgeShared {
    topic: String,
    store: TopicStore,
    high_water_mark: usize,
    state: Mutex<BridgeState>,
}

/// What to do once the state lock is released.
#[derive(Default)]
struct Effects {
    wake: Option<Waker>,
    emit_end: bool,
}

impl BridgeShared {
    fn on_signal(&self, signal: &Signal) {
        match signal {
            Signal::Data(value) => self.accept(value.clone()),
            Signal::Fault(err) => self.fail(err.clone()),
        }
    }

    fn accept(&self, value: Value) {
        let effects = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            if value.is_null() {
                state.stopped = true;
            }
            if state.paused {
                state.buffer.push_back(value);
                return;
            }
            let mut effects = Effects::default();
            self.forward(&mut state, value, &mut effects);
            effects.wake = state.waker.take();
            effects
        };
        self.apply(effects);
    }

    /// Hand one item to the readable queue.
    fn forward(&self, state: &mut BridgeState, value: Value, effects: &mut Effects) {
        if value.is_null() {
            state.stopped = true;
            state.ended = true;
            state.paused = true;
            if !state.end_emitted {
                state.end_emitted = true;
                effects.emit_end = true;
            }
            tracing::debug!(topic = %self.topic, "stream reached end");
            return;
        }
        state.sink.push_back(value);
        state.paused = state.sink.len() >= self.high_water_mark;
        if state.paused {
            tracing::trace!(topic = %self.topic, "stream saturated");
        }
    }

    /// Consumer is ready: clear `paused` and drain the overflow buffer.
    fn pull(&self, state: &mut BridgeState, effects: &mut Effects) {
        state.paused = false;
        while !state.paused {
            let Some(value) = state.buffer.pop_front() else {
                break;
            };
            self.forward(state, value, effects);
        }
    }

    fn close(&self) {
        let wake = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.ended = true;
            state.sink.clear();
            state.buffer.clear();
            state.waker.take()
        };
        tracing::debug!(topic = %self.topic, "stream closed");
        if let Some(waker) = wake {
            waker.wake();
        }
    }

    fn fail(&self, err: FlowError) {
        let effects = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.ended = true;
            state.sink.clear();
            state.buffer.clear();
            let emit_end = !state.end_emitted;
            state.end_emitted = true;
            Effects {
                wake: state.waker.take(),
                emit_end,
            }
        };
        tracing::warn!(topic = %self.topic, error = %err, "stream failed");
        self.apply(effects);
        self.store.emit_error(err);
    }

    fn apply(&self, effects: Effects) {
        if let Some(waker) = effects.wake {
            waker.wake();
        }
        if effects.emit_end {
            self.store.emit(&end_topic(&self.topic), Signal::end());
        }
    }
}

/// Backpressure-aware stream over the values published on one topic.
///
/// History published before the bridge was created is replayed into it.
/// The end marker (`Value::Null`) ends the stream and emits `"<topic>:end"`.
pub struct StreamBridge {
    shared: Arc<BridgeShared>,
    subscription: SubscriptionId,
}

impl StreamBridge {
    /// Bridge `topic` using the store's configured high-water mark.
    pub fn new(store: TopicStore, topic: &str) -> Self {
        let high_water_mark = store.config().stream_high_water_mark;
        Self::with_high_water_mark(store, topic, high_water_mark)
    }

    pub fn with_high_water_mark(store: TopicStore, topic: &str, high_water_mark: usize) -> Self {
        let shared = Arc::new(BridgeShared {
            topic: topic.to_string(),
            store: store.clone(),
            high_water_mark: high_water_mark.max(1),
            state: Mutex::new(BridgeState::default()),
        });

        let weak: Weak<BridgeShared> = Arc::downgrade(&shared);
        let subscription = store.subscribe(topic, move |signal| {
            if let Some(shared) = weak.upgrade() {
                shared.on_signal(signal);
            }
        });
        tracing::debug!(topic, high_water_mark, "stream bridge opened");

        StreamBridge {
            shared,
            subscription,
        }
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    /// Items waiting in the overflow buffer, end marker included.
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// Forced close: drop everything queued and stop listening. No `:end` is emitted.
    pub fn close(&self) {
        self.shared.close();
        self.shared.store.unsubscribe(self.subscription);
    }

    /// Stop accepting deliveries; the stream ends after what was already accepted.
    pub fn finish(&self) {
        self.shared.accept(Value::Null);
    }

    /// Fail the stream and raise `err` on the error channel.
    pub fn fail(&self, err: FlowError) {
        self.shared.fail(err);
    }
}

impl Stream for StreamBridge {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        let shared = &self.shared;
        let mut effects = Effects::default();
        let poll = {
            let mut state = shared.state.lock();
            if !state.ended && state.sink.len() < shared.high_water_mark {
                shared.pull(&mut state, &mut effects);
            }
            match state.sink.pop_front() {
                Some(value) => Poll::Ready(Some(value)),
                None if state.ended => Poll::Ready(None),
                None => {
                    state.waker = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
        };
        shared.apply(effects);
        poll
    }
}

impl Drop for StreamBridge {
    fn drop(&mut self) {
        self.shared.store.unsubscribe(self.subscription);
    }
}

impl std::fmt::Debug for StreamBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("StreamBridge")
            .field("topic", &self.shared.topic)
            .field("readable", &state.sink.len())
            .field("buffered", &state.buffer.len())
            .field("paused", &state.paused)
            .field("stopped", &state.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FlowConfig, UnhandledErrors};
    use futures_util::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_overflow_buffer_flushes_in_order() {
        let store = TopicStore::new();
        let stream = StreamBridge::new(store.clone(), "foo");

        for n in 1..=19 {
            store.emit("foo", n);
        }
        assert_eq!(StreamBridge::buffered(&stream), 3);
        {
            let state = stream.shared.state.lock();
            assert_eq!(
                state.buffer.iter().cloned().collect::<Vec<_>>(),
                vec![json!(17), json!(18), json!(19)]
            );
        }

        store.emit("foo", Signal::end());
        assert!(stream.is_stopped());
        // end marker is queued behind the overflow, not signalled yet
        assert!(store.history("foo:end").is_empty());

        let items: Vec<Value> = stream.collect().await;
        assert_eq!(items, (1..=19).map(|n| json!(n)).collect::<Vec<_>>());
        assert_eq!(store.history("foo:end").len(), 1);
    }

    #[tokio::test]
    async fn test_end_without_backlog_signals_immediately() {
        let store = TopicStore::new();
        let stream = StreamBridge::new(store.clone(), "foo");
        store.emit("foo", "a");
        store.emit("foo", Signal::end());
        store.emit("foo", "ignored");

        assert_eq!(store.history("foo:end").len(), 1);
        let items: Vec<Value> = stream.collect().await;
        assert_eq!(items, vec![json!("a")]);
    }

    #[tokio::test]
    async fn test_history_is_replayed_into_late_bridge() {
        let store = TopicStore::new();
        store.emit("foo", 1);
        store.emit("foo", 2);
        let stream = StreamBridge::new(store.clone(), "foo");
        store.emit("foo", Signal::end());

        let items: Vec<Value> = stream.collect().await;
        assert_eq!(items, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_consumer_waits_for_live_items() {
        let store = TopicStore::new();
        let mut stream = StreamBridge::new(store.clone(), "foo");

        let producer = store.clone();
        tokio::spawn(async move {
            producer.emit("foo", "late");
            producer.emit("foo", Signal::end());
        });

        assert_eq!(stream.next().await, Some(json!("late")));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_custom_high_water_mark() {
        let store = TopicStore::with_config(FlowConfig::default().with_high_water_mark(2));
        let stream = StreamBridge::new(store.clone(), "foo");
        for n in 1..=5 {
            store.emit("foo", n);
        }
        assert_eq!(StreamBridge::buffered(&stream), 3);
        stream.finish();
        let items: Vec<Value> = stream.collect().await;
        assert_eq!(items.len(), 5);
    }

    #[tokio::test]
    async fn test_close_discards_and_stops() {
        let store = TopicStore::new();
        let stream = StreamBridge::new(store.clone(), "foo");
        for n in 1..=20 {
            store.emit("foo", n);
        }
        stream.close();
        store.emit("foo", 21);

        assert_eq!(StreamBridge::buffered(&stream), 0);
        assert!(store.history("foo:end").is_empty());
        let items: Vec<Value> = stream.collect().await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_fault_on_topic_fails_stream_and_latches() {
        let store = TopicStore::with_config(
            FlowConfig::default().with_unhandled_errors(UnhandledErrors::Log),
        );
        let stream = StreamBridge::new(store.clone(), "foo");
        store.emit("foo", 1);
        store.emit("foo", FlowError::raised("Boom"));

        assert_eq!(store.history("foo:end").len(), 1);
        assert_eq!(store.last_error().unwrap().to_string(), "Boom");
        let items: Vec<Value> = stream.collect().await;
        assert!(items.is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let store = TopicStore::new();
        let stream = StreamBridge::new(store.clone(), "foo");
        let subscription = stream.subscription;
        drop(stream);
        assert!(!store.unsubscribe(subscription));
    }
}
