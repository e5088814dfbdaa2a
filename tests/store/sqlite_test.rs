//! Tests for `src/store/sqlite.rs`.

use std::sync::Arc;
use std::time::Duration;

use discord_relay::content::{Embed, EmbedField, RenderedContent};
use discord_relay::store::sqlite::SqliteMessageStore;
use discord_relay::store::{MessageId, MessageStore, RemoteId, RequestToken, StoreError};

async fn setup_store() -> SqliteMessageStore {
    SqliteMessageStore::in_memory()
        .await
        .expect("in-memory store should open")
}

fn token(value: &str) -> RequestToken {
    RequestToken::from(value)
}

fn text(value: &str) -> RenderedContent {
    RenderedContent::text(value)
}

#[tokio::test]
async fn create_stores_single_unpublished_version() {
    let store = setup_store().await;
    let content = text("Hello").with_embeds(vec![Embed {
        title: "Flow measure".to_owned(),
        color: 0xff0000,
        fields: vec![EmbedField {
            name: "Level".to_owned(),
            value: "FL300".to_owned(),
            inline: true,
        }],
        ..Embed::default()
    }]);

    let id = store
        .create_message(&token("tok-1"), &content)
        .await
        .expect("create should succeed");

    let message = store
        .get_by_id(&id)
        .await
        .expect("get should succeed")
        .expect("message should exist");
    assert_eq!(message.id, id);
    assert!(message.remote_id.is_none());
    assert!(message.last_published_token.is_none());
    assert_eq!(message.versions.len(), 1);
    assert_eq!(message.versions[0].client_request_token, token("tok-1"));
    assert_eq!(message.versions[0].content, content);
}

#[tokio::test]
async fn create_with_used_token_is_rejected() {
    let store = setup_store().await;
    let first = store
        .create_message(&token("tok-1"), &text("first"))
        .await
        .expect("first create");

    let err = store
        .create_message(&token("tok-1"), &text("second"))
        .await
        .expect_err("should fail");
    assert!(matches!(err, StoreError::DuplicateToken(t) if t == token("tok-1")));

    let owner = store
        .find_by_token(&token("tok-1"))
        .await
        .expect("lookup")
        .expect("token should resolve");
    assert_eq!(owner.id, first);
    assert_eq!(owner.versions[0].content, text("first"));
}

#[tokio::test]
async fn tokens_are_unique_across_messages() {
    let store = setup_store().await;
    let a = store.create_message(&token("tok-a"), &text("A")).await.expect("create A");
    store.create_message(&token("tok-b"), &text("B")).await.expect("create B");

    let err = store
        .append_version(&a, &token("tok-b"), &text("A v2"))
        .await
        .expect_err("should fail");
    assert!(matches!(err, StoreError::DuplicateToken(_)));

    let message = store.get_by_id(&a).await.expect("get").expect("exists");
    assert_eq!(message.versions.len(), 1);
}

#[tokio::test]
async fn appended_versions_keep_submission_order() {
    let store = setup_store().await;
    let id = store.create_message(&token("tok-1"), &text("v1")).await.expect("create");
    store.append_version(&id, &token("tok-2"), &text("v2")).await.expect("append 2");
    store.append_version(&id, &token("tok-3"), &text("v3")).await.expect("append 3");

    let message = store.get_by_id(&id).await.expect("get").expect("exists");
    let tokens: Vec<&str> = message
        .versions
        .iter()
        .map(|v| v.client_request_token.as_str())
        .collect();
    assert_eq!(tokens, ["tok-1", "tok-2", "tok-3"]);
    assert!(message
        .versions
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));
    assert_eq!(
        message.latest_version().map(|v| v.content.clone()),
        Some(text("v3"))
    );
}

#[tokio::test]
async fn append_to_unknown_message_is_not_found() {
    let store = setup_store().await;
    let err = store
        .append_version(&MessageId::from("missing"), &token("tok-1"), &text("x"))
        .await
        .expect_err("should fail");
    assert!(matches!(err, StoreError::NotFound(id) if id.as_str() == "missing"));

    // The failed append must not have claimed the token.
    store
        .create_message(&token("tok-1"), &text("x"))
        .await
        .expect("token should still be free");
}

#[tokio::test]
async fn find_by_token_matches_any_version() {
    let store = setup_store().await;
    let id = store.create_message(&token("tok-1"), &text("v1")).await.expect("create");
    store.append_version(&id, &token("tok-2"), &text("v2")).await.expect("append");

    let found = store
        .find_by_token(&token("tok-2"))
        .await
        .expect("lookup")
        .expect("should match the appended version");
    assert_eq!(found.id, id);
    assert_eq!(found.versions.len(), 2);

    assert!(store
        .find_by_token(&token("tok-unknown"))
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn get_unknown_message_returns_none() {
    let store = setup_store().await;
    assert!(store
        .get_by_id(&MessageId::from("missing"))
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn publish_pointer_updates() {
    let store = setup_store().await;
    let id = store.create_message(&token("tok-1"), &text("v1")).await.expect("create");

    store
        .set_remote_id_and_last_published(&id, &RemoteId::from("R1"), &token("tok-1"))
        .await
        .expect("first publish recorded");
    let message = store.get_by_id(&id).await.expect("get").expect("exists");
    assert_eq!(message.remote_id, Some(RemoteId::from("R1")));
    assert_eq!(message.last_published_token, Some(token("tok-1")));
    assert!(message.is_up_to_date());

    store.append_version(&id, &token("tok-2"), &text("v2")).await.expect("append");
    let message = store.get_by_id(&id).await.expect("get").expect("exists");
    assert!(!message.is_up_to_date());

    store
        .set_last_published(&id, &token("tok-2"))
        .await
        .expect("update recorded");
    let message = store.get_by_id(&id).await.expect("get").expect("exists");
    assert_eq!(message.remote_id, Some(RemoteId::from("R1")));
    assert_eq!(message.last_published_token, Some(token("tok-2")));
}

#[tokio::test]
async fn pointer_must_name_own_version() {
    let store = setup_store().await;
    let a = store.create_message(&token("tok-a"), &text("A")).await.expect("create A");
    store.create_message(&token("tok-b"), &text("B")).await.expect("create B");

    let err = store.set_last_published(&a, &token("tok-b")).await.expect_err("should fail");
    assert!(matches!(err, StoreError::UnknownVersion { .. }));

    let err = store
        .set_remote_id_and_last_published(&a, &RemoteId::from("R1"), &token("nope"))
        .await
        .expect_err("should fail");
    assert!(matches!(err, StoreError::UnknownVersion { .. }));

    let message = store.get_by_id(&a).await.expect("get").expect("exists");
    assert!(message.remote_id.is_none());
    assert!(message.last_published_token.is_none());
}

#[tokio::test]
async fn pointer_on_unknown_message_is_not_found() {
    let store = setup_store().await;
    let err = store
        .set_last_published(&MessageId::from("missing"), &token("tok-1"))
        .await
        .expect_err("should fail");
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("nested").join("relay.db");

    let id = {
        let store = SqliteMessageStore::open(&path, Duration::from_secs(5))
            .await
            .expect("open");
        let id = store.create_message(&token("tok-1"), &text("v1")).await.expect("create");
        store.append_version(&id, &token("tok-2"), &text("v2")).await.expect("append");
        store.pool().close().await;
        id
    };

    let store = SqliteMessageStore::open(&path, Duration::from_secs(5))
        .await
        .expect("reopen");
    let message = store.get_by_id(&id).await.expect("get").expect("exists");
    assert_eq!(message.versions.len(), 2);
    assert_eq!(message.versions[1].client_request_token, token("tok-2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_creates_with_same_token_admit_one() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(
        SqliteMessageStore::open(&dir.path().join("relay.db"), Duration::from_secs(5))
            .await
            .expect("open"),
    );

    let tasks: Vec<_> = (0..2)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .create_message(&token("tok-race"), &text(&format!("attempt {i}")))
                    .await
            })
        })
        .collect();

    let mut created = 0;
    let mut duplicates = 0;
    for task in tasks {
        match task.await.expect("task should not panic") {
            Ok(_) => created += 1,
            Err(StoreError::DuplicateToken(_)) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(duplicates, 1);
}
