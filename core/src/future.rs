use crate::error::FlowError;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

pub type TopicResult = Result<Value, FlowError>;

/// Settles a [`TopicFuture`]. Only the first call has any effect.
#[derive(Clone)]
pub(crate) struct Settle {
    tx: Arc<Mutex<Option<oneshot::Sender<TopicResult>>>>,
}

impl Settle {
    pub(crate) fn settle(&self, outcome: TopicResult) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// The memoized one-shot value of a topic.
///
/// Clones share one settlement: the first value ever published on the topic,
/// or the error that latched the store.
#[derive(Clone)]
pub struct TopicFuture {
    topic: Arc<str>,
    inner: Shared<BoxFuture<'static, TopicResult>>,
}

impl TopicFuture {
    pub(crate) fn pending(topic: &str) -> (Settle, Self) {
        let (tx, rx) = oneshot::channel();
        let closed = topic.to_string();
        let inner = async move {
            rx.await
                .unwrap_or_else(|_| Err(FlowError::Closed { topic: closed }))
        }
        .boxed()
        .shared();

        let settle = Settle {
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        let future = TopicFuture {
            topic: Arc::from(topic),
            inner,
        };
        (settle, future)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// True if both handles wait on the same settlement.
    pub fn ptr_eq(&self, other: &TopicFuture) -> bool {
        self.inner.ptr_eq(&other.inner)
    }

    /// The settled outcome, if there is one already.
    pub fn try_get(&self) -> Option<TopicResult> {
        self.inner.clone().now_or_never()
    }

    pub fn is_settled(&self) -> bool {
        self.try_get().is_some()
    }

    /// Wait for the value and deserialize it into `T`.
    pub async fn decode<T: DeserializeOwned>(self) -> Result<T, FlowError> {
        let topic = self.topic.to_string();
        let value = self.await?;
        serde_json::from_value(value).map_err(|err| FlowError::Decode {
            topic,
            reason: err.to_string(),
        })
    }
}

impl Future for TopicFuture {
    type Output = TopicResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl std::fmt::Debug for TopicFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicFuture")
            .field("topic", &self.topic)
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_settlement_wins() {
        let (settle, future) = TopicFuture::pending("foo");
        assert!(!future.is_settled());
        assert!(settle.settle(Ok(json!("ok"))));
        assert!(!settle.settle(Ok(json!("ok2"))));
        assert_eq!(future.try_get().unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_clones_share_settlement() {
        let (settle, future) = TopicFuture::pending("foo");
        let other = future.clone();
        assert!(future.ptr_eq(&other));
        settle.settle(Err(FlowError::raised("Boom")));
        assert_eq!(other.await.unwrap_err().to_string(), "Boom");
        assert_eq!(future.await.unwrap_err().to_string(), "Boom");
    }

    #[tokio::test]
    async fn test_dropped_settle_closes() {
        let (settle, future) = TopicFuture::pending("foo");
        drop(settle);
        assert!(matches!(future.await, Err(FlowError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_decode() {
        let (settle, future) = TopicFuture::pending("count");
        settle.settle(Ok(json!(3)));
        let n: u32 = future.clone().decode().await.unwrap();
        assert_eq!(n, 3);
        let err = future.decode::<String>().await.unwrap_err();
        assert!(matches!(err, FlowError::Decode { .. }));
    }
}
