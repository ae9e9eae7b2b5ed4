//! Outbound middleware ordering across the publisher and broker tiers.

use std::sync::Arc;

use sourced_bus::bus::{CallArgs, InMemoryBroker, Publisher, PublishMiddleware};

use crate::support::{Log, Probe, Stamp, Tag};

#[tokio::test]
async fn last_registered_runs_first() {
    let log = Log::default();
    let mut publisher = Publisher::builder("orders")
        .middleware(Tag::new("A", &log))
        .middleware(Tag::new("B", &log))
        .build();
    publisher.setup(Arc::new(InMemoryBroker::new()), None, "/");

    publisher.publish("hi", CallArgs::new()).await.unwrap();
    assert_eq!(log.entries(), vec!["B:before", "A:before", "A:after", "B:after"]);
}

#[tokio::test]
async fn broker_tier_wraps_publisher_tier() {
    let log = Log::default();
    let mut publisher = Publisher::builder("orders")
        .middleware(Tag::new("pub", &log))
        .broker_middleware(Probe::new("broker1", &log))
        .broker_middleware(Probe::new("broker2", &log))
        .build();
    publisher.setup(Arc::new(InMemoryBroker::new()), None, "/");

    publisher.publish("hi", CallArgs::new()).await.unwrap();
    assert_eq!(
        log.entries(),
        vec![
            "broker2:before",
            "broker1:before",
            "pub:before",
            "pub:after",
            "broker1:after",
            "broker2:after",
        ]
    );
}

#[tokio::test]
async fn call_middlewares_replace_broker_tier() {
    let log = Log::default();
    let mut publisher = Publisher::builder("orders")
        .middleware(Tag::new("pub", &log))
        .broker_middleware(Probe::new("broker", &log))
        .build();
    publisher.setup(Arc::new(InMemoryBroker::new()), None, "/");

    publisher
        .publish("hi", CallArgs::new().middleware(Tag::new("call", &log)))
        .await
        .unwrap();
    assert_eq!(
        log.entries(),
        vec!["call:before", "pub:before", "pub:after", "call:after"]
    );
}

#[tokio::test]
async fn empty_call_list_keeps_broker_tier() {
    let log = Log::default();
    let mut publisher = Publisher::builder("orders")
        .broker_middleware(Probe::new("broker", &log))
        .build();
    publisher.setup(Arc::new(InMemoryBroker::new()), None, "/");

    let none: Vec<Arc<dyn PublishMiddleware>> = Vec::new();
    publisher
        .publish("hi", CallArgs::new().middlewares(none))
        .await
        .unwrap();
    assert_eq!(log.entries(), vec!["broker:before", "broker:after"]);
}

#[tokio::test]
async fn middleware_can_rewrite_the_envelope() {
    let broker = InMemoryBroker::new();
    let mut publisher = Publisher::builder("orders").middleware(Stamp("signed")).build();
    publisher.setup(Arc::new(broker.clone()), None, "/");

    publisher.publish("hi", CallArgs::new()).await.unwrap();
    let headers = broker.published()[0].headers();
    assert_eq!(headers.get("signed").map(String::as_str), Some("yes"));
}

#[tokio::test]
async fn order_is_the_same_for_requests() {
    let log = Log::default();
    let broker = InMemoryBroker::new();
    broker.respond("ping", |_| Some(sourced_bus::bus::RawMessage::new("pong")));

    let mut publisher = Publisher::builder("ping")
        .middleware(Tag::new("A", &log))
        .middleware(Tag::new("B", &log))
        .build();
    publisher.setup(Arc::new(broker), None, "/");

    publisher.request("hi", CallArgs::new()).await.unwrap();
    assert_eq!(log.entries(), vec!["B:before", "A:before", "A:after", "B:after"]);
}
