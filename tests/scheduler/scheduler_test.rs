//! Tests for `src/scheduler.rs`: single-consumer publishing.

use std::sync::Arc;
use std::time::Duration;

use discord_relay::content::RenderedContent;
use discord_relay::publisher::Publisher;
use discord_relay::scheduler::{PublishScheduler, SchedulerConfig};
use discord_relay::store::sqlite::SqliteMessageStore;
use discord_relay::store::{Message, MessageId, MessageStore, RemoteId, RequestToken};

use crate::support::{memory_store, FakePublisher};

fn config() -> SchedulerConfig {
    SchedulerConfig {
        queue_capacity: 8,
        store_timeout: Duration::from_secs(5),
        publish_timeout: Duration::from_secs(5),
    }
}

fn spawn(
    store: &Arc<SqliteMessageStore>,
    publisher: &Arc<FakePublisher>,
    config: SchedulerConfig,
) -> PublishScheduler {
    PublishScheduler::spawn(
        Arc::clone(store) as Arc<dyn MessageStore>,
        Arc::clone(publisher) as Arc<dyn Publisher>,
        config,
    )
}

async fn load(store: &SqliteMessageStore, id: &MessageId) -> Message {
    store
        .get_by_id(id)
        .await
        .expect("get should succeed")
        .expect("message should exist")
}

async fn create(store: &SqliteMessageStore, token: &str, text: &str) -> MessageId {
    store
        .create_message(&RequestToken::from(token), &RenderedContent::text(text))
        .await
        .expect("create should succeed")
}

async fn append(store: &SqliteMessageStore, id: &MessageId, token: &str, text: &str) {
    store
        .append_version(id, &RequestToken::from(token), &RenderedContent::text(text))
        .await
        .expect("append should succeed");
}

#[tokio::test]
async fn publishes_unpublished_message() {
    let store = memory_store().await;
    let publisher = FakePublisher::new();
    let scheduler = spawn(&store, &publisher, config());

    let id = create(&store, "tok-1", "Hello").await;
    scheduler.schedule(id.clone()).await.expect("schedule");
    scheduler.wait_idle().await;

    assert_eq!(publisher.publishes(), vec![RenderedContent::text("Hello")]);
    assert!(publisher.updates().is_empty());

    let message = load(&store, &id).await;
    assert_eq!(message.remote_id, Some(RemoteId::from("R1")));
    assert_eq!(message.last_published_token, Some(RequestToken::from("tok-1")));
    assert_eq!(scheduler.outstanding(), 0);
}

#[tokio::test]
async fn updates_published_message_in_place() {
    let store = memory_store().await;
    let publisher = FakePublisher::new();
    let scheduler = spawn(&store, &publisher, config());

    let id = create(&store, "tok-1", "Hello").await;
    scheduler.schedule(id.clone()).await.expect("schedule");
    scheduler.wait_idle().await;

    append(&store, &id, "tok-2", "Hello v2").await;
    scheduler.schedule(id.clone()).await.expect("schedule");
    scheduler.wait_idle().await;

    assert_eq!(publisher.publishes().len(), 1);
    assert_eq!(
        publisher.updates(),
        vec![(RemoteId::from("R1"), RenderedContent::text("Hello v2"))]
    );

    let message = load(&store, &id).await;
    assert_eq!(message.remote_id, Some(RemoteId::from("R1")));
    assert_eq!(message.last_published_token, Some(RequestToken::from("tok-2")));
}

#[tokio::test]
async fn overlapping_enqueues_publish_latest_version_once() {
    let store = memory_store().await;
    let publisher = FakePublisher::new();
    let scheduler = spawn(&store, &publisher, config());

    let id = create(&store, "tok-1", "Hello").await;
    append(&store, &id, "tok-2", "Hello v2").await;

    // Both units are queued before the consumer gets to run.
    scheduler.schedule(id.clone()).await.expect("schedule");
    scheduler.schedule(id.clone()).await.expect("schedule");
    scheduler.wait_idle().await;

    assert_eq!(publisher.publishes(), vec![RenderedContent::text("Hello v2")]);
    assert_eq!(
        publisher.updates(),
        vec![(RemoteId::from("R1"), RenderedContent::text("Hello v2"))]
    );

    let message = load(&store, &id).await;
    assert_eq!(message.remote_id, Some(RemoteId::from("R1")));
    assert_eq!(message.last_published_token, Some(RequestToken::from("tok-2")));
}

#[tokio::test]
async fn publish_failure_leaves_message_unpublished() {
    let store = memory_store().await;
    let publisher = FakePublisher::new();
    publisher.fail_publish(true);
    let scheduler = spawn(&store, &publisher, config());

    let id = create(&store, "tok-1", "Hello").await;
    scheduler.schedule(id.clone()).await.expect("schedule");
    scheduler.wait_idle().await;

    let message = load(&store, &id).await;
    assert!(message.remote_id.is_none());
    assert!(message.last_published_token.is_none());

    // Not retried automatically; the loop keeps serving new work.
    assert!(scheduler.is_ready());
    publisher.fail_publish(false);
    scheduler.schedule(id.clone()).await.expect("schedule");
    scheduler.wait_idle().await;

    let message = load(&store, &id).await;
    assert_eq!(message.remote_id, Some(RemoteId::from("R1")));
    assert_eq!(publisher.publishes().len(), 1);
}

#[tokio::test]
async fn update_failure_keeps_previous_pointer() {
    let store = memory_store().await;
    let publisher = FakePublisher::new();
    let scheduler = spawn(&store, &publisher, config());

    let id = create(&store, "tok-1", "Hello").await;
    scheduler.schedule(id.clone()).await.expect("schedule");
    scheduler.wait_idle().await;

    publisher.fail_update(true);
    append(&store, &id, "tok-2", "Hello v2").await;
    scheduler.schedule(id.clone()).await.expect("schedule");
    scheduler.wait_idle().await;

    let message = load(&store, &id).await;
    assert_eq!(message.remote_id, Some(RemoteId::from("R1")));
    assert_eq!(message.last_published_token, Some(RequestToken::from("tok-1")));
    assert!(!message.is_up_to_date());
}

#[tokio::test]
async fn slow_publish_times_out() {
    let store = memory_store().await;
    let publisher = FakePublisher::new();
    publisher.set_delay(Duration::from_millis(500));
    let scheduler = spawn(
        &store,
        &publisher,
        SchedulerConfig {
            publish_timeout: Duration::from_millis(50),
            ..config()
        },
    );

    let id = create(&store, "tok-1", "Hello").await;
    scheduler.schedule(id.clone()).await.expect("schedule");
    tokio::time::timeout(Duration::from_secs(2), scheduler.wait_idle())
        .await
        .expect("timed-out unit should still complete");

    assert!(publisher.publishes().is_empty());
    let message = load(&store, &id).await;
    assert!(message.remote_id.is_none());
    assert!(message.last_published_token.is_none());
}

#[tokio::test]
async fn unknown_id_is_dropped() {
    let store = memory_store().await;
    let publisher = FakePublisher::new();
    let scheduler = spawn(&store, &publisher, config());

    scheduler
        .schedule(MessageId::from("missing"))
        .await
        .expect("schedule");
    scheduler.wait_idle().await;

    assert!(publisher.publishes().is_empty());
    assert_eq!(scheduler.outstanding(), 0);
    assert!(scheduler.is_ready());
}

#[tokio::test]
async fn readiness_follows_consumer_lifecycle() {
    let store = memory_store().await;
    let publisher = FakePublisher::new();
    let scheduler = spawn(&store, &publisher, config());
    let readiness = scheduler.readiness();

    // The consumer task has not been polled yet on this runtime.
    assert!(!scheduler.is_ready());

    assert!(readiness.wait_ready().await);
    assert!(scheduler.is_ready());

    scheduler.shutdown().await;
    assert!(!readiness.is_ready());
}

#[tokio::test]
async fn shutdown_drains_queued_work() {
    let store = memory_store().await;
    let publisher = FakePublisher::new();
    let scheduler = spawn(&store, &publisher, config());

    let first = create(&store, "tok-1", "one").await;
    let second = create(&store, "tok-2", "two").await;
    scheduler.schedule(first.clone()).await.expect("schedule");
    scheduler.schedule(second.clone()).await.expect("schedule");
    scheduler.shutdown().await;

    assert_eq!(publisher.publishes().len(), 2);
    assert!(load(&store, &first).await.remote_id.is_some());
    assert!(load(&store, &second).await.remote_id.is_some());
}

#[tokio::test]
async fn full_queue_blocks_producers() {
    let store = memory_store().await;
    let (publisher, entered, release) = FakePublisher::gated();
    let scheduler = spawn(
        &store,
        &publisher,
        SchedulerConfig {
            queue_capacity: 1,
            ..config()
        },
    );

    let id = create(&store, "tok-1", "Hello").await;

    // First unit is taken by the consumer and held inside publish.
    scheduler.schedule(id.clone()).await.expect("schedule");
    entered.notified().await;

    // Second unit fills the single queue slot.
    scheduler.schedule(id.clone()).await.expect("schedule");

    // Third has nowhere to go.
    let blocked =
        tokio::time::timeout(Duration::from_millis(100), scheduler.schedule(id.clone())).await;
    assert!(blocked.is_err(), "producer should wait for queue space");
    assert_eq!(scheduler.outstanding(), 2);

    release.notify_one();
    scheduler.wait_idle().await;

    assert_eq!(publisher.publishes().len(), 1);
    assert_eq!(publisher.updates().len(), 1);
    assert_eq!(scheduler.outstanding(), 0);
}
