//! Integration tests for [`RedpandaQueue`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Declare is idempotent
//! - Publish/subscribe round-trip with the durable header
//! - A nacked message is redelivered and flagged
//! - An acked message is not redelivered to the group
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they require
//! Docker and take a while to spin up Kafka:
//!
//! ```bash
//! cargo test -p user-service-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use user_service_core::queue::{Delivery, DeliveryStream, MessageQueue, QueueMessage};
use user_service_redpanda::RedpandaQueue;

/// Start Kafka and return the container with its broker address.
async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "false")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

/// Build a queue client, retrying until the broker accepts a declare.
async fn ready_queue(brokers: &str, group: &str, queue_name: &str) -> RedpandaQueue {
    for _ in 0..60 {
        if let Ok(queue) = RedpandaQueue::builder()
            .brokers(brokers)
            .consumer_group(group)
            .partitions(1)
            .build()
        {
            if queue.declare_queue(queue_name).await.is_ok() {
                // Let topic metadata propagate
                tokio::time::sleep(Duration::from_secs(2)).await;
                return queue;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("Kafka failed to become ready");
}

async fn next_delivery(stream: &mut DeliveryStream) -> Delivery {
    tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .expect("Timed out waiting for delivery")
        .expect("Stream ended")
        .expect("Delivery error")
}

#[tokio::test]
#[ignore]
async fn declare_is_idempotent() {
    let (_kafka, brokers) = start_kafka().await;
    let queue = ready_queue(&brokers, "declare-group", "task_queue").await;

    queue
        .declare_queue("task_queue")
        .await
        .expect("Second declare should succeed");
}

#[tokio::test]
#[ignore]
async fn publish_and_subscribe_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let queue = ready_queue(&brokers, "round-trip-group", "task_queue").await;

    let payload = serde_json::json!({ "action": "create" }).to_string();
    queue
        .publish(
            "task_queue",
            &QueueMessage::durable("user-1", payload.clone().into_bytes()),
        )
        .await
        .expect("Publish should succeed");

    let mut stream = queue.subscribe("task_queue").await.expect("Subscribe failed");
    let delivery = next_delivery(&mut stream).await;

    assert_eq!(delivery.payload(), payload.as_bytes());
    assert_eq!(delivery.message().key, "user-1");
    assert!(delivery.message().durable);
    assert!(!delivery.is_redelivered());
    delivery.ack().expect("Ack should succeed");
}

#[tokio::test]
#[ignore]
async fn nacked_message_is_redelivered() {
    let (_kafka, brokers) = start_kafka().await;
    let queue = ready_queue(&brokers, "nack-group", "task_queue").await;

    queue
        .publish("task_queue", &QueueMessage::durable("user-1", b"first".to_vec()))
        .await
        .expect("Publish should succeed");
    queue
        .publish("task_queue", &QueueMessage::durable("user-1", b"second".to_vec()))
        .await
        .expect("Publish should succeed");

    let mut stream = queue.subscribe("task_queue").await.expect("Subscribe failed");

    let first = next_delivery(&mut stream).await;
    assert_eq!(first.payload(), b"first");
    first.nack().expect("Nack should succeed");

    let again = next_delivery(&mut stream).await;
    assert_eq!(again.payload(), b"first");
    assert!(again.is_redelivered());
    again.ack().expect("Ack should succeed");

    let second = next_delivery(&mut stream).await;
    assert_eq!(second.payload(), b"second");
    second.ack().expect("Ack should succeed");
}

#[tokio::test]
#[ignore]
async fn acked_message_is_not_redelivered_after_resubscribe() {
    let (_kafka, brokers) = start_kafka().await;
    let queue = ready_queue(&brokers, "resubscribe-group", "task_queue").await;

    queue
        .publish("task_queue", &QueueMessage::durable("user-1", b"only".to_vec()))
        .await
        .expect("Publish should succeed");

    {
        let mut stream = queue.subscribe("task_queue").await.expect("Subscribe failed");
        next_delivery(&mut stream).await.ack().expect("Ack should succeed");
        // Give the async commit time to reach the broker
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    queue
        .publish("task_queue", &QueueMessage::durable("user-1", b"later".to_vec()))
        .await
        .expect("Publish should succeed");

    let mut stream = queue.subscribe("task_queue").await.expect("Subscribe failed");
    let delivery = next_delivery(&mut stream).await;
    assert_eq!(delivery.payload(), b"later");
    delivery.ack().expect("Ack should succeed");
}
