use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use topicflow::prelude::*;

#[tokio::test]
async fn test_stream_buffers_until_consumer_attaches() {
    let flow = Flow::new();
    let stream = flow.consume_stream("numbers");

    for n in 1..=19 {
        flow.define("numbers", n);
    }
    flow.define("numbers", Signal::end());
    assert!(stream.is_stopped());
    assert!(topicflow::StreamBridge::buffered(&stream) > 0);

    let end = flow.consume("numbers:end");
    assert!(end.try_get().is_none());

    let items: Vec<Value> = stream.collect().await;
    assert_eq!(items, (1..=19).map(|n| json!(n)).collect::<Vec<_>>());
    assert_eq!(end.await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_stream_consumed_while_producer_runs() {
    let flow = Flow::new();
    let mut stream = flow.consume_stream("ticks");

    let producer = flow.publisher("ticks");
    tokio::spawn(async move {
        for n in 0..40 {
            producer.publish(n);
            tokio::task::yield_now().await;
        }
        producer.end();
    });

    let mut total = 0;
    let mut count = 0;
    while let Some(value) = stream.next().await {
        total += value.as_i64().unwrap_or(0);
        count += 1;
    }
    assert_eq!(count, 40);
    assert_eq!(total, (0..40).sum::<i64>());
}

#[tokio::test]
async fn test_stream_failure_latches_flow() {
    let flow = Flow::new();
    let caught = Arc::new(Mutex::new(Vec::new()));
    let sink = caught.clone();
    flow.catch(move |err, _| sink.lock().push(err.to_string()));

    let end = flow.consume("upload:end");
    let stream = flow.consume_stream("upload");
    flow.define("upload", "chunk");
    stream.fail(FlowError::Stream {
        topic: "upload".into(),
        reason: "disk full".into(),
    });

    assert_eq!(end.await.unwrap(), Value::Null);
    assert_eq!(
        *caught.lock(),
        vec!["stream on topic `upload` failed: disk full"]
    );
    assert!(flow.store().is_latched());
}

#[test]
fn test_action_tree_runs_pre_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let step = |name: &'static str| {
        let order = order.clone();
        move |_: &Action| order.lock().push(name)
    };

    let base = Action::new("base", step("base"));
    let child_a = Action::new("a", step("a"));
    let child_b = Action::new("b", step("b"));
    base.add(child_a).unwrap().add(child_b).unwrap();

    base.activate();
    assert_eq!(*order.lock(), vec!["base", "a", "b"]);

    base.activate();
    assert_eq!(order.lock().len(), 3);
}

#[tokio::test]
async fn test_action_children_share_parent_flow() {
    struct Pricing;

    impl ActionBody for Pricing {
        fn run(&self, action: &Action) {
            action.flow().define_with("total", |publisher, flow| {
                let publisher = publisher.clone();
                flow.consume_with("price", move |price, _| {
                    publisher.publish(price.as_i64().unwrap_or(0) * 2);
                });
            });
        }
    }

    let base = Action::empty("checkout");
    base.add(Action::new("pricing", Pricing))
        .unwrap()
        .add(|action: &Action| {
            action.flow().define("price", 21);
        })
        .unwrap();

    let total = base.activate().flow().consume("total");
    assert_eq!(total.await.unwrap(), json!(42));
}

#[test]
fn test_activated_action_cannot_be_attached() {
    let started = Action::empty("started");
    started.activate();

    let err = Action::empty("base").add(started).unwrap_err();
    assert_eq!(
        err.to_string(),
        "action `started` is already activated and cannot be added to another action"
    );
}
