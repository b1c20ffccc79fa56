//! Integration tests for `UserService` and `EventPublisher`
//!
//! Drives the service against the in-memory store and queue and checks what
//! reached the queue after each call.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use user_service_core::event::{UserAction, UserEvent};
use user_service_core::queue::{MessageQueue, QueueError, QueueMessage};
use user_service_core::store::{StoreError, UniqueField, UserStore};
use user_service_core::user::{UserId, ValidationError};
use user_service_runtime::publisher::PublishError;
use user_service_runtime::service::ServiceError;
use user_service_testing::fixtures::{self, QUEUE, service_with_memory};
use user_service_testing::InMemoryQueue;

fn some(s: &str) -> Option<String> {
    Some(s.to_string())
}

// ============================================================================
// Mutations and their events
// ============================================================================

#[tokio::test]
async fn test_create_publishes_one_durable_create_event() {
    let (service, store, queue) = service_with_memory();

    let user = service
        .create_user(some("alice"), some("alice@example.com"))
        .await
        .unwrap();

    assert_eq!(user.username, "alice");
    assert_eq!(store.get(user.id).await.unwrap(), user);

    let messages = queue.published(QUEUE);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].durable);
    assert_eq!(messages[0].key, user.id.to_string());

    let event = UserEvent::from_bytes(&messages[0].payload).unwrap();
    assert_eq!(event.id, user.id);
    assert_eq!(event.action, UserAction::Create);
    assert_eq!(event.username, "alice");
    assert_eq!(event.email, "alice@example.com");
}

#[tokio::test]
async fn test_duplicate_create_conflicts_and_publishes_nothing() {
    let (service, store, queue) = service_with_memory();
    service
        .create_user(some("alice"), some("alice@example.com"))
        .await
        .unwrap();

    let err = service
        .create_user(some("alice"), some("other@example.com"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ServiceError::Store(StoreError::Conflict {
            field: UniqueField::Username,
            value: "alice".to_string(),
        })
    );

    let err = service
        .create_user(some("bob"), some("alice@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Store(StoreError::Conflict { field: UniqueField::Email, .. })
    ));

    assert_eq!(store.len(), 1);
    assert_eq!(queue.published(QUEUE).len(), 1);
}

#[tokio::test]
async fn test_invalid_input_touches_nothing() {
    let (service, store, queue) = service_with_memory();

    let err = service.create_user(some("alice"), None).await.unwrap_err();
    assert_eq!(err, ServiceError::Validation(ValidationError::Missing("email")));

    let err = service
        .create_user(some("alice"), some("not-an-email"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(ValidationError::InvalidEmail(_))));

    assert!(store.is_empty());
    assert!(queue.published(QUEUE).is_empty());
}

#[tokio::test]
async fn test_update_unknown_user_is_not_found_and_silent() {
    let (service, _store, queue) = service_with_memory();
    let id = UserId::new();

    let err = service.update_user(id, some("ghost"), None).await.unwrap_err();
    assert_eq!(err, ServiceError::Store(StoreError::NotFound(id)));
    assert!(queue.published(QUEUE).is_empty());
}

#[tokio::test]
async fn test_empty_update_is_rejected_before_the_store() {
    let (service, _store, queue) = service_with_memory();
    let user = service
        .create_user(some("alice"), some("alice@example.com"))
        .await
        .unwrap();

    let err = service.update_user(user.id, None, None).await.unwrap_err();
    assert_eq!(err, ServiceError::Validation(ValidationError::EmptyChanges));
    assert_eq!(queue.published(QUEUE).len(), 1);
}

#[tokio::test]
async fn test_partial_update_publishes_full_snapshot() {
    let (service, _store, queue) = service_with_memory();
    let user = service
        .create_user(some("alice"), some("alice@example.com"))
        .await
        .unwrap();

    let updated = service
        .update_user(user.id, None, some("alice@new.example.com"))
        .await
        .unwrap();
    assert_eq!(updated.username, "alice");
    assert_eq!(updated.email, "alice@new.example.com");

    let events = queue.published_events(QUEUE);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].action, UserAction::Update);
    assert_eq!(events[1].username, "alice");
    assert_eq!(events[1].email, "alice@new.example.com");
}

#[tokio::test]
async fn test_delete_publishes_last_known_fields() {
    let (service, store, queue) = service_with_memory();
    let user = service
        .create_user(some("alice"), some("alice@example.com"))
        .await
        .unwrap();

    let removed = service.delete_user(user.id).await.unwrap();
    assert_eq!(removed, user);
    assert!(store.is_empty());

    let events = queue.published_events(QUEUE);
    let delete = events.last().unwrap();
    assert_eq!(delete.action, UserAction::Delete);
    assert_eq!(delete.id, user.id);
    assert_eq!(delete.email, "alice@example.com");

    let err = service.delete_user(user.id).await.unwrap_err();
    assert_eq!(err, ServiceError::Store(StoreError::NotFound(user.id)));
    assert_eq!(queue.published(QUEUE).len(), 2);
}

#[tokio::test]
async fn test_events_for_one_user_follow_mutation_order() {
    let (service, _store, queue) = service_with_memory();
    let user = service
        .create_user(some("alice"), some("alice@example.com"))
        .await
        .unwrap();
    service.update_user(user.id, some("alice2"), None).await.unwrap();
    service.delete_user(user.id).await.unwrap();

    let actions: Vec<UserAction> = queue
        .published_events(QUEUE)
        .into_iter()
        .filter(|e| e.id == user.id)
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![UserAction::Create, UserAction::Update, UserAction::Delete]
    );
}

#[tokio::test]
async fn test_get_is_repeatable_and_never_publishes() {
    let (service, _store, queue) = service_with_memory();
    let user = service
        .create_user(some("alice"), some("alice@example.com"))
        .await
        .unwrap();

    let first = service.get_user(user.id).await.unwrap();
    let second = service.get_user(user.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(queue.published(QUEUE).len(), 1);
}

// ============================================================================
// Publish failures
// ============================================================================

#[tokio::test]
async fn test_publish_failure_does_not_undo_the_mutation() {
    let (service, store, queue) = service_with_memory();
    queue.set_offline(true);

    let user = service
        .create_user(some("alice"), some("alice@example.com"))
        .await
        .unwrap();

    assert_eq!(store.get(user.id).await.unwrap(), user);
    assert!(queue.published(QUEUE).is_empty());
}

#[tokio::test]
async fn test_transient_publish_failure_is_retried() {
    let (service, _store, queue) = service_with_memory();
    queue.fail_next_publishes(1);

    service
        .create_user(some("alice"), some("alice@example.com"))
        .await
        .unwrap();

    assert_eq!(queue.published(QUEUE).len(), 1);
}

#[tokio::test]
async fn test_queue_is_declared_once() {
    let (service, _store, queue) = service_with_memory();
    for i in 0..3 {
        service
            .create_user(some(&format!("user{i}")), some(&format!("user{i}@example.com")))
            .await
            .unwrap();
    }

    assert!(queue.is_declared(QUEUE));
    assert_eq!(queue.declare_calls(), 1);
    assert_eq!(queue.published(QUEUE).len(), 3);
}

#[tokio::test]
async fn test_failed_declare_is_retried_on_next_publish() {
    let queue = InMemoryQueue::new();
    let publisher = fixtures::publisher(&queue);
    let user = user_service_core::user::User {
        id: UserId::new(),
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
    };

    queue.set_offline(true);
    let err = publisher.publish(&UserEvent::created(&user)).await.unwrap_err();
    assert!(matches!(err, PublishError::Transport(_)));

    queue.set_offline(false);
    publisher.publish(&UserEvent::created(&user)).await.unwrap();
    assert_eq!(queue.published(QUEUE).len(), 1);
}

#[tokio::test]
async fn test_broker_outage_declare_is_retried_within_a_publish() {
    let queue = InMemoryQueue::new();
    let publisher = fixtures::publisher(&queue);
    queue.set_offline(true);

    let err = publisher.ensure_declared().await.unwrap_err();
    assert!(matches!(err, QueueError::ConnectionFailed(_)));
    assert_eq!(queue.declare_calls(), 2); // Initial + 1 retry
}

#[tokio::test]
async fn test_refused_declare_is_not_retried() {
    let queue = InMemoryQueue::new();
    let publisher = fixtures::publisher(&queue);
    queue.refuse_declares(true);

    let err = publisher.ensure_declared().await.unwrap_err();
    assert!(matches!(err, QueueError::DeclareFailed { .. }));
    assert_eq!(queue.declare_calls(), 1);

    queue.refuse_declares(false);
    publisher.ensure_declared().await.unwrap();
    assert_eq!(queue.declare_calls(), 2);
}

#[tokio::test]
async fn test_hung_publish_gives_up_at_the_deadline() {
    let queue = InMemoryQueue::new();
    let publisher = fixtures::publisher(&queue).with_publish_timeout(Duration::from_millis(50));
    publisher.ensure_declared().await.unwrap();
    queue.stall_publishes(true);

    let user = user_service_core::user::User {
        id: UserId::new(),
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
    };
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        publisher.publish(&UserEvent::created(&user)),
    )
    .await
    .expect("publish must not outlive its deadline")
    .unwrap_err();

    assert_eq!(err, PublishError::TimedOut(Duration::from_millis(50)));
    assert!(queue.published(QUEUE).is_empty());
}

#[tokio::test]
async fn test_hung_broker_does_not_hold_the_request() {
    let queue = InMemoryQueue::new();
    let store = user_service_testing::InMemoryUserStore::new();
    let publisher = fixtures::publisher(&queue).with_publish_timeout(Duration::from_millis(50));
    let service = user_service_runtime::service::UserService::new(
        Arc::new(store.clone()),
        Arc::new(publisher),
    );
    queue.declare_queue(QUEUE).await.unwrap();
    queue.stall_publishes(true);

    let user = tokio::time::timeout(
        Duration::from_secs(5),
        service.create_user(some("alice"), some("alice@example.com")),
    )
    .await
    .expect("request must complete despite the hung broker")
    .unwrap();

    assert_eq!(store.get(user.id).await.unwrap(), user);
}

#[tokio::test]
async fn test_publisher_accepts_shared_queue() {
    let queue = InMemoryQueue::new();
    let publisher = user_service_runtime::publisher::EventPublisher::new(
        Arc::new(queue.clone()),
        "other_queue",
    );
    assert_eq!(publisher.queue_name(), "other_queue");

    publisher.ensure_declared().await.unwrap();
    assert!(queue.is_declared("other_queue"));
    assert_eq!(queue.published("other_queue"), Vec::<QueueMessage>::new());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_store_never_holds_duplicates(
        attempts in prop::collection::vec((0..4usize, 0..4usize), 1..20)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (service, store, queue) = service_with_memory();
            let mut created = 0;

            for (u, e) in attempts {
                let result = service
                    .create_user(Some(format!("user{u}")), Some(format!("mail{e}@example.com")))
                    .await;
                match result {
                    Ok(_) => created += 1,
                    Err(ServiceError::Store(StoreError::Conflict { .. })) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }

            let users = store.users();
            let usernames: HashSet<_> = users.iter().map(|u| u.username.clone()).collect();
            let emails: HashSet<_> = users.iter().map(|u| u.email.clone()).collect();
            assert_eq!(usernames.len(), users.len());
            assert_eq!(emails.len(), users.len());
            assert_eq!(users.len(), created);
            assert_eq!(queue.published(QUEUE).len(), created);
        });
    }
}
