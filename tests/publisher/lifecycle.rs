//! Setup, end-to-end publishing, and error propagation.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use sourced_bus::bus::{
    CallArgs, Delivery, InMemoryBroker, LegacyRpc, MessageOptions, Payload, Publisher,
    PublisherConfig, Queue, RawMessage, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT,
};
use sourced_bus::BusError;

use crate::support::Unreachable;

fn connected(builder: sourced_bus::bus::PublisherBuilder) -> (Publisher, InMemoryBroker) {
    let broker = InMemoryBroker::new();
    let mut publisher = builder.build();
    publisher.setup(Arc::new(broker.clone()), Some("checkout".into()), "/shop");
    (publisher, broker)
}

#[tokio::test]
async fn publish_before_setup_is_not_connected() {
    let publisher = Publisher::builder("orders").build();
    let err = publisher.publish(b"hi", CallArgs::new()).await.unwrap_err();
    assert!(matches!(err, BusError::NotConnected));
}

#[tokio::test]
async fn end_to_end_publish() {
    let (publisher, broker) = connected(Publisher::builder("orders").exchange("events"));

    let delivery = publisher
        .publish(b"hi", CallArgs::new().routing_key("orders.created"))
        .await
        .unwrap();
    assert!(delivery.confirmation().is_some());

    let sent = broker.published();
    assert_eq!(sent.len(), 1);
    let envelope = &sent[0];
    assert_eq!(envelope.payload, b"hi");
    assert_eq!(envelope.routing_key, "orders.created");
    assert_eq!(envelope.exchange, "events");
    assert!(!envelope.correlation_id.is_empty());
    assert!(!envelope.message_id.is_empty());
    assert_eq!(envelope.app_id.as_deref(), Some("checkout"));
    assert_eq!(envelope.virtual_host, "/shop");
}

#[tokio::test]
async fn setup_again_overwrites() {
    let first = InMemoryBroker::new();
    let second = InMemoryBroker::new();
    let mut publisher = Publisher::builder("orders").build();
    publisher.setup(Arc::new(first.clone()), None, "/");
    publisher.setup(Arc::new(second.clone()), Some("v2".into()), "/v2");

    publisher.publish("hi", CallArgs::new()).await.unwrap();
    assert!(first.is_empty());
    assert_eq!(second.published()[0].app_id.as_deref(), Some("v2"));
}

#[tokio::test]
async fn caller_ids_and_timestamp_are_kept() {
    let (publisher, broker) = connected(Publisher::builder("orders"));
    let at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

    publisher
        .publish(
            "hi",
            CallArgs::new()
                .correlation_id("corr-1")
                .message_id("msg-1")
                .timestamp(at),
        )
        .await
        .unwrap();

    let envelope = broker.find_by_routing("orders").unwrap();
    assert_eq!(envelope.correlation_id, "corr-1");
    assert_eq!(envelope.message_id, "msg-1");
    assert_eq!(envelope.timestamp, at);
}

#[tokio::test]
async fn options_merge_defaults_then_call() {
    let (publisher, broker) = connected(
        Publisher::builder("orders").options(
            MessageOptions::new()
                .persist(true)
                .priority(1)
                .header("source", "defaults")
                .reply_to("order-replies"),
        ),
    );

    publisher
        .publish(
            "hi",
            CallArgs::new().options(MessageOptions::new().priority(7).header("trace", "t1")),
        )
        .await
        .unwrap();

    let options = &broker.published()[0].options;
    assert_eq!(options.persist, Some(true));
    assert_eq!(options.priority, Some(7));
    assert_eq!(options.reply_to.as_deref(), Some("order-replies"));
    let headers = options.headers.clone().unwrap();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers.get("trace").map(String::as_str), Some("t1"));
}

#[tokio::test]
async fn content_type_follows_payload_unless_set() {
    let (publisher, broker) = connected(Publisher::builder("orders"));

    publisher.publish("text", CallArgs::new()).await.unwrap();
    let json = Payload::json(&serde_json::json!({ "id": 1 })).unwrap();
    publisher.publish(json, CallArgs::new()).await.unwrap();
    publisher
        .publish(
            "forced",
            CallArgs::new().options(MessageOptions::new().content_type("application/x-custom")),
        )
        .await
        .unwrap();
    publisher.publish(b"raw", CallArgs::new()).await.unwrap();

    let types: Vec<Option<String>> = broker
        .published()
        .into_iter()
        .map(|e| e.options.content_type)
        .collect();
    assert_eq!(
        types,
        vec![
            Some(CONTENT_TYPE_TEXT.to_string()),
            Some(CONTENT_TYPE_JSON.to_string()),
            Some("application/x-custom".to_string()),
            None,
        ]
    );
}

#[tokio::test]
async fn transport_errors_pass_through() {
    let mut publisher = Publisher::builder("orders").build();
    publisher.setup(Arc::new(Unreachable), None, "/");

    let err = publisher.publish("hi", CallArgs::new()).await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.to_string(), "connection refused");

    let err = publisher.request("hi", CallArgs::new()).await.unwrap_err();
    assert!(err.is_transport());
    assert!(!err.is_timeout());
}

#[tokio::test]
async fn prefix_does_not_leak_into_shared_queue() {
    let shared = Arc::new(Queue::new("orders"));
    let broker = InMemoryBroker::new();

    let mut prefixed = Publisher::builder_shared(Arc::clone(&shared)).build();
    let mut plain = Publisher::builder_shared(Arc::clone(&shared)).build();
    prefixed.add_prefix("x.");
    prefixed.setup(Arc::new(broker.clone()), None, "/");
    plain.setup(Arc::new(broker.clone()), None, "/");

    prefixed.publish("a", CallArgs::new()).await.unwrap();
    plain.publish("b", CallArgs::new()).await.unwrap();

    let routes: Vec<String> = broker.published().into_iter().map(|e| e.routing_key).collect();
    assert_eq!(routes, vec!["x.orders", "orders"]);
}

#[tokio::test]
async fn from_config_publisher_sends() {
    let config: PublisherConfig = serde_json::from_str(
        r#"{ "queue": "orders", "exchange": "events", "priority": 2, "timeout_ms": 250 }"#,
    )
    .unwrap();
    let (publisher, broker) = connected(Publisher::from_config(&config).unwrap());

    publisher.publish("hi", CallArgs::new()).await.unwrap();
    let envelope = &broker.published()[0];
    assert_eq!(envelope.exchange, "events");
    assert_eq!(envelope.options.priority, Some(2));
    assert_eq!(envelope.options.mandatory, Some(true));
    assert_eq!(envelope.options.timeout, Some(Duration::from_millis(250)));
}

#[tokio::test]
#[allow(deprecated)]
async fn legacy_rpc_flags_still_work() {
    let (publisher, broker) = connected(Publisher::builder("ping"));
    broker.respond("ping", |_| Some(RawMessage::new("pong")));

    let delivery = publisher
        .publish_rpc("hi", CallArgs::new(), LegacyRpc::blocking(Some(Duration::from_secs(1)), false))
        .await
        .unwrap();
    let reply = delivery.into_reply().unwrap();
    assert_eq!(reply.body, b"pong");

    let delivery = publisher
        .publish_rpc("hi", CallArgs::new(), LegacyRpc::default())
        .await
        .unwrap();
    assert!(matches!(delivery, Delivery::Sent(Some(_))));
}

#[tokio::test(start_paused = true)]
#[allow(deprecated)]
async fn legacy_rpc_timeout_without_raise_returns_no_reply() {
    let (publisher, _broker) = connected(Publisher::builder("void"));

    let delivery = publisher
        .publish_rpc(
            "hi",
            CallArgs::new(),
            LegacyRpc::blocking(Some(Duration::from_millis(20)), false),
        )
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::NoReply);

    let err = publisher
        .publish_rpc(
            "hi",
            CallArgs::new(),
            LegacyRpc::blocking(Some(Duration::from_millis(20)), true),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}
