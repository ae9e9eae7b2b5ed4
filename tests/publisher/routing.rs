//! Routing key and exchange precedence through a real publish.

use std::sync::Arc;

use sourced_bus::bus::{CallArgs, Exchange, InMemoryBroker, Publisher, PublisherBuilder, Queue};
use sourced_bus::BusError;

async fn route(builder: PublisherBuilder, args: CallArgs) -> Result<(String, String), BusError> {
    let broker = InMemoryBroker::new();
    let mut publisher = builder.build();
    publisher.setup(Arc::new(broker.clone()), None, "/");
    publisher.publish("hi", args).await?;
    let envelope = broker.published().remove(0);
    Ok((envelope.routing_key, envelope.exchange))
}

#[tokio::test]
async fn explicit_key_beats_everything() {
    let (routing, _) = route(
        Publisher::builder("orders").routing_key("bound"),
        CallArgs::new().routing_key("explicit").queue("payments"),
    )
    .await
    .unwrap();
    assert_eq!(routing, "explicit");
}

#[tokio::test]
async fn bound_key_beats_queue_override() {
    let (routing, _) = route(
        Publisher::builder("orders").routing_key("bound"),
        CallArgs::new().queue("payments"),
    )
    .await
    .unwrap();
    assert_eq!(routing, "bound");
}

#[tokio::test]
async fn queue_override_beats_bound_queue() {
    let (routing, _) = route(Publisher::builder("orders"), CallArgs::new().queue("payments"))
        .await
        .unwrap();
    assert_eq!(routing, "payments");

    let (routing, _) = route(
        Publisher::builder("orders"),
        CallArgs::new().queue(Queue::new("payments").with_routing_key("payments.eu")),
    )
    .await
    .unwrap();
    assert_eq!(routing, "payments.eu");
}

#[tokio::test]
async fn empty_values_count_as_absent() {
    let (routing, exchange) = route(
        Publisher::builder("orders").exchange("events"),
        CallArgs::new().routing_key("").queue("").exchange(""),
    )
    .await
    .unwrap();
    assert_eq!(routing, "orders");
    assert_eq!(exchange, "events");
}

#[tokio::test]
async fn exchange_override() {
    let (_, exchange) = route(
        Publisher::builder("orders").exchange("events"),
        CallArgs::new().exchange(Exchange::new("audit")),
    )
    .await
    .unwrap();
    assert_eq!(exchange, "audit");

    let (_, exchange) = route(Publisher::builder("orders"), CallArgs::new())
        .await
        .unwrap();
    assert_eq!(exchange, "");
}

#[tokio::test]
async fn invalid_override_is_a_validation_error() {
    let err = route(Publisher::builder("orders"), CallArgs::new().queue("bad\u{0}queue"))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Validation { .. }));

    let err = route(
        Publisher::builder("orders"),
        CallArgs::new().exchange("x".repeat(300)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BusError::Validation { .. }));
}
