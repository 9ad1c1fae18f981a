//! # Topic Store
//!
//! The store is the multiplexer every flow shares. It keeps, per topic, the
//! append-only history of published signals, whether the topic has resolved,
//! and the memoized [`TopicFuture`]. A single error latch covers the whole
//! store.
//!
//! ## Delivery rules
//!
//! * Subscribers get the topic's history replayed before any live delivery,
//!   so producers and consumers may attach in any order.
//! * Once an error is emitted the store is latched: non-error topics still
//!   record history but no listener is called any more.
//! * Wildcard subscribers are served by a dispatcher task, strictly after the
//!   synchronous delivery of the same event to topic listeners.
//!
//! Handlers run on the emitting thread with no store lock held, so they may
//! publish, subscribe or consume re-entrantly.

use crate::config::{FlowConfig, UnhandledErrors};
use crate::error::FlowError;
use crate::future::TopicFuture;
use crate::signal::{Signal, TopicEvent};
use crate::snapshot::StoreSnapshot;
use crate::ERROR_TOPIC;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Listener for a single topic.
pub type Handler = Arc<dyn Fn(&Signal) + Send + Sync>;

/// Listener for every topic.
pub type WildcardHandler = Arc<dyn Fn(&TopicEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Listener {
    id: SubscriptionId,
    handler: Handler,
    once: bool,
    /// Registered by [`TopicStore::future`]; never counts as an error handler.
    internal: bool,
}

#[derive(Default)]
struct StoreState {
    queue: IndexMap<String, Vec<Signal>>,
    /// Store-wide publish order as (topic, index into that topic's history).
    journal: Vec<(String, usize)>,
    resolved: IndexMap<String, bool>,
    futures: HashMap<String, TopicFuture>,
    listeners: HashMap<String, Vec<Listener>>,
    wildcard: Vec<(SubscriptionId, WildcardHandler)>,
    last_error: Option<FlowError>,
}

impl StoreState {
    fn record(&mut self, topic: &str, signal: Signal) {
        let history = self.queue.entry(topic.to_string()).or_default();
        history.push(signal);
        let index = history.len() - 1;
        self.journal.push((topic.to_string(), index));
    }

    /// Handlers to call for a live delivery on `topic`; one-shot listeners are dropped.
    fn take_targets(&mut self, topic: &str) -> Vec<Handler> {
        let Some(listeners) = self.listeners.get_mut(topic) else {
            return Vec::new();
        };
        let targets = listeners.iter().map(|l| l.handler.clone()).collect();
        listeners.retain(|l| !l.once);
        targets
    }

    /// True if `topic` has a listener registered by user code.
    fn has_handler(&self, topic: &str) -> bool {
        self.listeners
            .get(topic)
            .is_some_and(|listeners| listeners.iter().any(|l| !l.internal))
    }

    fn journal_event(&self, position: usize) -> Option<TopicEvent> {
        let (topic, index) = self.journal.get(position)?;
        let signal = self.queue.get(topic)?.get(*index)?.clone();
        Some(TopicEvent {
            topic: topic.clone(),
            signal,
        })
    }
}

struct StoreInner {
    config: FlowConfig,
    state: Mutex<StoreState>,
    next_id: AtomicU64,
    dispatcher: Mutex<Option<mpsc::UnboundedSender<TopicEvent>>>,
}

/// Shared handle to a topic store. Clones refer to the same store.
#[derive(Clone)]
pub struct TopicStore {
    inner: Arc<StoreInner>,
}

/// Non-owning handle, used by listeners that need the store back.
#[derive(Clone)]
pub struct WeakTopicStore {
    inner: Weak<StoreInner>,
}

impl WeakTopicStore {
    pub fn upgrade(&self) -> Option<TopicStore> {
        self.inner.upgrade().map(|inner| TopicStore { inner })
    }
}

impl Default for TopicStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicStore {
    pub fn new() -> Self {
        Self::with_config(FlowConfig::default())
    }

    pub fn with_config(config: FlowConfig) -> Self {
        TopicStore {
            inner: Arc::new(StoreInner {
                config,
                state: Mutex::new(StoreState::default()),
                next_id: AtomicU64::new(1),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakTopicStore {
        WeakTopicStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// True if both handles point at the same store.
    pub fn same_store(&self, other: &TopicStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_latched(&self) -> bool {
        self.inner.state.lock().last_error.is_some()
    }

    pub fn last_error(&self) -> Option<FlowError> {
        self.inner.state.lock().last_error.clone()
    }

    /// Everything ever published on `topic`, oldest first.
    pub fn history(&self, topic: &str) -> Vec<Signal> {
        self.inner
            .state
            .lock()
            .queue
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Publish `signal` on `topic`.
    ///
    /// The signal is always recorded. Emitting on the error topic latches the
    /// store (first error wins) and always reaches error listeners; other
    /// topics are delivered only while the store is not latched.
    pub fn emit(&self, topic: &str, signal: impl Into<Signal>) {
        let signal = signal.into();
        let is_error = topic == ERROR_TOPIC;

        let (targets, handled, has_wildcard) = {
            let mut state = self.inner.state.lock();
            state.record(topic, signal.clone());

            if is_error {
                if state.last_error.is_none() {
                    let err = signal.clone().into_error();
                    tracing::warn!(error = %err, "flow latched on error");
                    state.last_error = Some(err);
                }
            } else {
                state.resolved.insert(topic.to_string(), true);
            }

            let handled = is_error && state.has_handler(topic);
            let targets = if is_error || state.last_error.is_none() {
                state.take_targets(topic)
            } else {
                tracing::trace!(topic, "store latched, delivery suppressed");
                Vec::new()
            };
            (targets, handled, !state.wildcard.is_empty())
        };

        tracing::debug!(topic, listeners = targets.len(), "emit");

        for handler in &targets {
            handler(&signal);
        }

        // futures only observe the error, someone has to handle it
        if is_error && !handled {
            self.unhandled(&signal);
        }

        if has_wildcard {
            self.broadcast(TopicEvent {
                topic: topic.to_string(),
                signal,
            });
        }
    }

    /// Publish `err` on the error channel.
    pub fn emit_error(&self, err: FlowError) {
        self.emit(ERROR_TOPIC, Signal::Fault(err));
    }

    /// Listen to every future delivery on `topic`, after replaying its history.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(handler), false, false)
    }

    /// Like [`subscribe`](Self::subscribe), but deregisters after the next
    /// live delivery. The history replay is not limited.
    pub fn subscribe_once<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(handler), true, false)
    }

    /// Listen to every topic. History of all topics is replayed first, in
    /// store-wide publish order.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TopicEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let handler: WildcardHandler = Arc::new(handler);
        let mut replayed = 0;

        loop {
            let backlog: Vec<TopicEvent> = {
                let mut state = self.inner.state.lock();
                let backlog: Vec<TopicEvent> = (replayed..state.journal.len())
                    .filter_map(|position| state.journal_event(position))
                    .collect();
                if backlog.is_empty() {
                    state.wildcard.push((id, handler));
                    break;
                }
                backlog
            };
            replayed += backlog.len();
            tracing::trace!(entries = backlog.len(), "wildcard replay");
            for event in &backlog {
                handler(event);
            }
        }

        id
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.inner.state.lock();
        let mut removed = false;
        for listeners in state.listeners.values_mut() {
            let before = listeners.len();
            listeners.retain(|l| l.id != id);
            removed |= listeners.len() != before;
        }
        let before = state.wildcard.len();
        state.wildcard.retain(|(wid, _)| *wid != id);
        removed | (state.wildcard.len() != before)
    }

    /// The memoized future of `topic`.
    ///
    /// It settles to the first value ever published on `topic`, or rejects
    /// with the error that latches the store, whichever comes first.
    pub fn future(&self, topic: &str) -> TopicFuture {
        if let Some(existing) = self.inner.state.lock().futures.get(topic) {
            return existing.clone();
        }

        let (settle, future) = TopicFuture::pending(topic);
        {
            let mut state = self.inner.state.lock();
            if let Some(existing) = state.futures.get(topic) {
                return existing.clone();
            }
            state.futures.insert(topic.to_string(), future.clone());
        }

        // whichever side settles first drops the other listener
        let ids: Arc<Mutex<Vec<SubscriptionId>>> = Arc::default();
        let release = {
            let ids = ids.clone();
            let store = self.downgrade();
            move || {
                let ids = std::mem::take(&mut *ids.lock());
                if let Some(store) = store.upgrade() {
                    for id in ids {
                        store.unsubscribe(id);
                    }
                }
            }
        };

        if topic != ERROR_TOPIC {
            let on_value = settle.clone();
            let release = release.clone();
            let id = self.register(
                topic,
                Arc::new(move |signal: &Signal| {
                    if on_value.settle(signal.clone().into_result()) {
                        release();
                    }
                }),
                true,
                true,
            );
            ids.lock().push(id);
        }
        if !future.is_settled() {
            // the error channel's own future rejects as well
            let on_error = release.clone();
            let id = self.register(
                ERROR_TOPIC,
                Arc::new(move |signal: &Signal| {
                    if settle.settle(Err(signal.clone().into_error())) {
                        on_error();
                    }
                }),
                true,
                true,
            );
            ids.lock().push(id);
        }
        if future.is_settled() {
            release();
        }

        future
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.inner.state.lock();
        StoreSnapshot {
            queue: state
                .queue
                .iter()
                .filter(|(_, history)| !history.is_empty())
                .map(|(topic, history)| (topic.clone(), history.len()))
                .collect(),
            pending: state
                .resolved
                .iter()
                .filter(|(_, resolved)| !**resolved)
                .map(|(topic, _)| topic.clone())
                .collect(),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register(
        &self,
        topic: &str,
        handler: Handler,
        once: bool,
        internal: bool,
    ) -> SubscriptionId {
        let id = self.next_id();
        let mut replayed = 0;

        loop {
            let backlog: Vec<Signal> = {
                let mut state = self.inner.state.lock();
                if replayed == 0 && topic != ERROR_TOPIC {
                    state.resolved.entry(topic.to_string()).or_insert(false);
                }
                let backlog = state
                    .queue
                    .get(topic)
                    .map(|history| history[replayed..].to_vec())
                    .unwrap_or_default();
                if backlog.is_empty() {
                    state
                        .listeners
                        .entry(topic.to_string())
                        .or_default()
                        .push(Listener {
                            id,
                            handler: handler.clone(),
                            once,
                            internal,
                        });
                    break;
                }
                backlog
            };
            replayed += backlog.len();
            tracing::trace!(topic, entries = backlog.len(), "replay");
            for signal in &backlog {
                handler(signal);
            }
        }

        id
    }

    fn unhandled(&self, signal: &Signal) {
        let err = signal.clone().into_error();
        match self.inner.config.unhandled_errors {
            UnhandledErrors::Log => {
                tracing::error!(error = %err, "unhandled flow error");
            }
            UnhandledErrors::Panic => {
                tracing::error!(error = %err, "unhandled flow error");
                panic!("unhandled flow error: {err}");
            }
        }
    }

    fn broadcast(&self, event: TopicEvent) {
        let event = {
            let mut slot = self.inner.dispatcher.lock();
            let event = match slot.as_ref() {
                Some(tx) => match tx.send(event) {
                    Ok(()) => return,
                    Err(mpsc::error::SendError(event)) => event,
                },
                None => event,
            };
            *slot = None;

            match Handle::try_current() {
                Ok(handle) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    handle.spawn(dispatch_wildcard(self.downgrade(), rx));
                    match tx.send(event) {
                        Ok(()) => {
                            *slot = Some(tx);
                            return;
                        }
                        Err(mpsc::error::SendError(event)) => event,
                    }
                }
                Err(_) => event,
            }
        };

        tracing::trace!(topic = %event.topic, "no async runtime, wildcard delivered inline");
        self.deliver_wildcard(&event);
    }

    fn deliver_wildcard(&self, event: &TopicEvent) {
        let handlers: Vec<WildcardHandler> = self
            .inner
            .state
            .lock()
            .wildcard
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in &handlers {
            handler(event);
        }
    }
}

async fn dispatch_wildcard(store: WeakTopicStore, mut rx: mpsc::UnboundedReceiver<TopicEvent>) {
    while let Some(event) = rx.recv().await {
        match store.upgrade() {
            Some(store) => store.deliver_wildcard(&event),
            None => break,
        }
    }
}

impl std::fmt::Debug for TopicStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TopicStore")
            .field("topics", &state.queue.len())
            .field("futures", &state.futures.len())
            .field("latched", &state.last_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnhandledErrors;
    use serde_json::{Value, json};

    fn collect(store: &TopicStore, topic: &str) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(topic, move |signal| {
            if let Some(value) = signal.as_value() {
                sink.lock().push(value.clone());
            }
        });
        seen
    }

    #[test]
    fn test_future_pending_until_emit() {
        let store = TopicStore::new();
        let future = store.future("foo");
        assert!(!future.is_settled());

        store.emit("foo", "bar");
        assert_eq!(future.try_get().unwrap().unwrap(), json!("bar"));

        let again = store.future("foo");
        assert!(again.ptr_eq(&future));
    }

    #[test]
    fn test_first_value_wins_but_history_grows() {
        let store = TopicStore::new();
        store.emit("data", "ok");
        store.emit("data", "ok2");

        let future = store.future("data");
        assert_eq!(future.try_get().unwrap().unwrap(), json!("ok"));
        assert_eq!(store.snapshot().queue.get("data"), Some(&2));
    }

    #[test]
    fn test_replay_then_live_in_order() {
        let store = TopicStore::new();
        store.emit("data", "ok");
        let seen = collect(&store, "data");
        store.emit("data", "ok2");
        assert_eq!(*seen.lock(), vec![json!("ok"), json!("ok2")]);
    }

    #[test]
    fn test_once_listener_gets_full_replay_then_one_live() {
        let store = TopicStore::new();
        store.emit("n", 1);
        store.emit("n", 2);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe_once("n", move |signal| {
            sink.lock().push(signal.as_value().cloned().unwrap_or_default());
        });
        store.emit("n", 3);
        store.emit("n", 4);

        assert_eq!(*seen.lock(), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_replay_includes_entries_published_during_replay() {
        let store = TopicStore::new();
        store.emit("n", 1);

        let weak = store.downgrade();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe("n", move |signal| {
            let value = signal.as_value().cloned().unwrap_or_default();
            sink.lock().push(value.clone());
            if value == json!(1) {
                if let Some(store) = weak.upgrade() {
                    store.emit("n", 2);
                }
            }
        });

        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_error_latches_store() {
        let store = TopicStore::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        store.subscribe(ERROR_TOPIC, move |signal| {
            sink.lock().push(signal.clone().into_error().to_string());
        });
        let seen = collect(&store, "foo");

        store.emit("foo", "before");
        store.emit_error(FlowError::raised("Boom"));
        store.emit("foo", "after");
        store.emit_error(FlowError::raised("Boom2"));

        assert!(store.is_latched());
        assert_eq!(store.last_error().unwrap().to_string(), "Boom");
        assert_eq!(*seen.lock(), vec![json!("before")]);
        assert_eq!(*errors.lock(), vec!["Boom", "Boom2"]);
        // history is still recorded
        assert_eq!(store.history("foo").len(), 2);
    }

    fn logging_store() -> TopicStore {
        TopicStore::with_config(FlowConfig::default().with_unhandled_errors(UnhandledErrors::Log))
    }

    fn error_listeners(store: &TopicStore) -> usize {
        store
            .inner
            .state
            .lock()
            .listeners
            .get(ERROR_TOPIC)
            .map_or(0, Vec::len)
    }

    #[test]
    fn test_error_rejects_pending_future() {
        let store = logging_store();
        let future = store.future("foo");
        store.emit_error(FlowError::raised("Boom"));
        assert_eq!(future.try_get().unwrap().unwrap_err().to_string(), "Boom");
    }

    #[test]
    fn test_future_after_error_rejects_from_history() {
        let store = logging_store();
        store.emit_error(FlowError::raised("Boom"));
        let future = store.future("data");
        assert_eq!(future.try_get().unwrap().unwrap_err().to_string(), "Boom");
        assert_eq!(error_listeners(&store), 0);
    }

    #[test]
    fn test_settled_future_ignores_later_error() {
        let store = logging_store();
        let future = store.future("foo");
        store.emit("foo", "bar");
        store.emit_error(FlowError::raised("Boom"));
        assert_eq!(future.try_get().unwrap().unwrap(), json!("bar"));
    }

    #[test]
    fn test_settled_futures_release_error_listeners() {
        let store = TopicStore::new();
        for n in 0..10 {
            let topic = format!("topic{n}");
            store.future(&topic);
            store.emit(&topic, n);
        }
        store.emit("ready", true);
        store.future("ready");

        assert_eq!(error_listeners(&store), 0);
        assert!(store.inner.state.lock().listeners.values().all(Vec::is_empty));
    }

    #[test]
    #[should_panic(expected = "unhandled flow error: Boom")]
    fn test_pending_future_does_not_handle_error() {
        let store = TopicStore::new();
        let _future = store.future("foo");
        store.emit_error(FlowError::raised("Boom"));
    }

    #[test]
    #[should_panic(expected = "unhandled flow error: Boom")]
    fn test_dropped_future_does_not_handle_error() {
        let store = TopicStore::new();
        drop(store.future("foo"));
        drop(store.future("bar"));
        store.emit("foo", 1);
        store.emit_error(FlowError::raised("Boom"));
    }

    #[test]
    #[should_panic(expected = "unhandled flow error: Boom2")]
    fn test_second_error_without_handler_panics() {
        let store = TopicStore::new();
        store.subscribe_once(ERROR_TOPIC, |_| {});
        store.emit_error(FlowError::raised("Boom"));
        assert!(store.is_latched());
        store.emit_error(FlowError::raised("Boom2"));
    }

    #[test]
    #[should_panic(expected = "unhandled flow error: Boom")]
    fn test_unhandled_error_panics_by_default() {
        let store = TopicStore::new();
        store.emit_error(FlowError::raised("Boom"));
    }

    #[test]
    fn test_unhandled_error_can_be_logged() {
        let store = TopicStore::with_config(
            FlowConfig::default().with_unhandled_errors(UnhandledErrors::Log),
        );
        store.emit_error(FlowError::raised("Boom"));
        assert!(store.is_latched());
    }

    #[test]
    fn test_snapshot() {
        let store = TopicStore::new();
        store.future("foo");
        store.future("bar");
        store.future("bar");
        store.future("qaz");
        store.emit("foo", "");

        let snapshot = store.snapshot();
        assert_eq!(snapshot.pending, vec!["bar", "qaz"]);
        assert_eq!(snapshot.queue_json(), r#"{"foo":1}"#);
    }

    #[test]
    fn test_unsubscribe() {
        let store = TopicStore::new();
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        let id = store.subscribe("foo", move |_| *sink.lock() += 1);
        store.emit("foo", 1);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.emit("foo", 2);
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_wildcard_replay_is_chronological() {
        let store = TopicStore::new();
        store.emit("foo", "a");
        store.emit("bar", "b");
        store.emit("foo", "c");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe_all(move |event| {
            let value = event.signal.as_value().cloned().unwrap_or_default();
            sink.lock().push(format!("{}={}", event.topic, value));
        });

        assert_eq!(
            *seen.lock(),
            vec![r#"foo="a""#, r#"bar="b""#, r#"foo="c""#]
        );
    }

    #[test]
    fn test_wildcard_without_runtime_follows_topic_listeners() {
        let store = TopicStore::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let sink = order.clone();
        store.subscribe_all(move |event| sink.lock().push(format!("*:{}", event.topic)));
        let sink = order.clone();
        store.subscribe("foo", move |_| sink.lock().push("foo".to_string()));

        store.emit("foo", "bar");
        assert_eq!(*order.lock(), vec!["foo", "*:foo"]);
    }

    #[tokio::test]
    async fn test_wildcard_is_deferred_to_dispatcher() {
        let store = TopicStore::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));

        let sink = order.clone();
        store.subscribe_all(move |event| {
            sink.lock().push(format!("*:{}", event.topic));
            if event.topic == "qaz" {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            }
        });
        let sink = order.clone();
        store.subscribe("foo", move |_| sink.lock().push("foo".to_string()));

        store.emit("foo", "bar");
        assert_eq!(*order.lock(), vec!["foo"]);
        store.emit("qaz", "wsx");

        rx.await.unwrap();
        assert_eq!(*order.lock(), vec!["foo", "*:foo", "*:qaz"]);
    }
}
