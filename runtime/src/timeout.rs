use crate::flow::Flow;
use futures_util::future::try_join_all;
use std::time::Duration;
use topicflow_core::{ERROR_TOPIC, FlowError, Signal, StoreSnapshot, TopicStore, Topics};
use tracing::Instrument;

/// Build the timeout failure from the store's current state.
///
/// Pending topics inside `watched` are reported as timed out, the others as
/// merely pending.
pub fn timeout_error(snapshot: &StoreSnapshot, watched: &[String]) -> FlowError {
    let (timed_out, pending): (Vec<String>, Vec<String>) = snapshot
        .pending
        .iter()
        .cloned()
        .partition(|topic| watched.contains(topic));

    FlowError::Timeout {
        timed_out,
        pending,
        queue_state: snapshot.queue_json(),
    }
}

/// Race the watched topics against a timer; raise on the error channel if
/// the timer wins.
pub(crate) fn supervise(flow: &Flow, topics: Topics, duration: Duration) {
    let watched = topics.unique();
    let waits: Vec<_> = flow.consume_all(watched.clone()).into_values().collect();
    let store = flow.store().downgrade();
    let span = tracing::info_span!(
        "Flow.timeout",
        topics = ?watched,
        timeout_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    );

    tokio::spawn(
        async move {
            tokio::select! {
                resolved = try_join_all(waits) => {
                    match resolved {
                        Ok(_) => tracing::debug!("watched topics resolved, timer cleared"),
                        Err(err) => tracing::trace!(error = %err, "flow failed before timeout"),
                    }
                }
                _ = tokio::time::sleep(duration) => {
                    if let Some(store) = store.upgrade() {
                        expire(store, &watched);
                    }
                }
            }
        }
        .instrument(span),
    );
}

/// Raise the timeout failure. Without an error handler it is treated like
/// any other unhandled error.
fn expire(store: TopicStore, watched: &[String]) {
    let err = timeout_error(&store.snapshot(), watched);
    tracing::warn!(error = %err, "flow timed out");
    Flow::from_store(store).define(ERROR_TOPIC, Signal::Fault(err));
}
