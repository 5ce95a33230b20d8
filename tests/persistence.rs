mod common;

use common::all_collections;
use common::connect;
use common::record;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use wb_persist::prelude::*;
use wb_persist::store::MemoryStore;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::test]
async fn user_data_lifecycle_in_write_through_mode() -> TestResult {
    let store = MemoryStore::new();
    let persistence = connect(&store, all_collections(false)).await;
    let users = store.memory_collection(common::USERS);
    let data = record(json!({"name": "a"}));

    assert_eq!(persistence.update_user_data(42, &data).await?, SyncOutcome::Inserted);
    assert_eq!(users.peek(&json!(42)), Some(record(json!({"_id": 42, "name": "a"}))));

    let writes = users.counts().mutations();
    assert_eq!(persistence.update_user_data(42, &data).await?, SyncOutcome::Unchanged);
    assert_eq!(users.counts().mutations(), writes);

    assert_eq!(persistence.drop_user_data(42).await?, SyncOutcome::Removed);
    assert!(users.peek(&json!(42)).is_none());
    assert!(!persistence.get_user_data().await?.contains_key(&42));

    assert_eq!(persistence.drop_user_data(42).await?, SyncOutcome::Absent);
    Ok(())
}

#[tokio::test]
async fn chat_data_is_kept_apart_from_user_data() -> TestResult {
    let store = MemoryStore::new();
    let persistence = connect(&store, all_collections(false)).await;

    persistence.update_chat_data(-100, &record(json!({"title": "group"}))).await?;
    persistence.update_user_data(-100, &record(json!({"name": "u"}))).await?;

    assert_eq!(
        store.memory_collection(common::CHATS).peek(&json!(-100)),
        Some(record(json!({"_id": -100, "title": "group"})))
    );
    let chats = persistence.get_chat_data().await?;
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[&-100], record(json!({"title": "group"})));

    let mut local = record(json!({"title": "group"}));
    store
        .memory_collection(common::CHATS)
        .update_fields(&json!(-100), record(json!({"members": 3})))
        .await?;
    assert_eq!(persistence.refresh_chat_data(-100, &mut local).await?, SyncOutcome::Refreshed);
    assert_eq!(local, record(json!({"title": "group", "members": 3})));

    assert_eq!(persistence.drop_chat_data(-100).await?, SyncOutcome::Removed);
    assert!(persistence.get_chat_data().await?.is_empty());
    assert_eq!(persistence.get_user_data().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn hydrates_from_existing_documents() -> TestResult {
    let store = MemoryStore::new();
    let users = store.memory_collection(common::USERS);
    users.insert_one(record(json!({"_id": 1, "name": "one"}))).await?;
    users.insert_one(record(json!({"_id": 2, "name": "two"}))).await?;

    let persistence = connect(&store, all_collections(true)).await;
    let all = persistence.get_user_data().await?;

    assert_eq!(all.len(), 2);
    assert_eq!(all[&2], record(json!({"name": "two"})));

    let mut local = Record::new();
    assert_eq!(persistence.refresh_user_data(1, &mut local).await?, SyncOutcome::Skipped);
    Ok(())
}

#[tokio::test]
async fn bot_data_is_wrapped_in_a_singleton_document() -> TestResult {
    let store = MemoryStore::new();
    let persistence = connect(&store, all_collections(false)).await;
    let bot = store.memory_collection(common::BOT);

    assert!(persistence.get_bot_data().await?.is_empty());

    let data = record(json!({"k": "v"}));
    assert_eq!(persistence.update_bot_data(&data).await?, SyncOutcome::Inserted);
    assert_eq!(persistence.get_bot_data().await?, data);
    assert_eq!(bot.peek(&json!(0)), Some(record(json!({"_id": 0, "content": {"k": "v"}}))));

    assert_eq!(persistence.update_bot_data(&data).await?, SyncOutcome::Unchanged);

    let changed = record(json!({"k": "w"}));
    assert_eq!(persistence.update_bot_data(&changed).await?, SyncOutcome::Updated);
    assert_eq!(bot.peek(&json!(0)), Some(record(json!({"_id": 0, "content": {"k": "w"}}))));
    assert_eq!(bot.counts().mutations(), 2);
    Ok(())
}

#[tokio::test]
async fn bot_data_is_read_from_the_store_once() -> TestResult {
    let store = MemoryStore::new();
    let bot = store.memory_collection(common::BOT);
    bot.insert_one(record(json!({"_id": 0, "content": {"counter": 1}})))
        .await?;
    let persistence = connect(&store, all_collections(false)).await;

    assert_eq!(persistence.get_bot_data().await?, record(json!({"counter": 1})));
    bot.update_fields(&json!(0), record(json!({"content": {"counter": 2}})))
        .await?;
    assert_eq!(persistence.get_bot_data().await?, record(json!({"counter": 1})));
    assert_eq!(bot.counts().find_one, 1);

    let mut local = record(json!({"counter": 1, "local": true}));
    assert_eq!(persistence.refresh_bot_data(&mut local).await?, SyncOutcome::Refreshed);
    assert_eq!(local, record(json!({"counter": 2, "local": true})));
    assert_eq!(persistence.get_bot_data().await?, local);
    Ok(())
}

#[tokio::test]
async fn malformed_bot_document_is_reported() {
    let store = MemoryStore::new();
    store
        .memory_collection(common::BOT)
        .insert_one(record(json!({"_id": 0, "content": 5})))
        .await
        .unwrap();
    let persistence = connect(&store, all_collections(false)).await;

    let err = persistence.get_bot_data().await.unwrap_err();
    assert!(matches!(err, Error::MalformedDocument { .. }), "got {err:?}");
}

#[tokio::test]
async fn ignored_fields_apply_per_entity() -> TestResult {
    let store = MemoryStore::new();
    let config = PersistenceConfig::builder()
        .write_back(false)
        .user_collection(common::USERS)
        .bot_collection(common::BOT)
        .ignored_fields(["session".to_string()])
        .bot_ignored_fields(["scratch".to_string()])
        .build()?;
    let persistence = connect(&store, config).await;

    persistence
        .update_user_data(1, &record(json!({"session": 1, "scratch": 2, "name": "x"})))
        .await?;
    persistence
        .update_bot_data(&record(json!({"session": 1, "scratch": 2, "name": "x"})))
        .await?;

    assert_eq!(
        store.memory_collection(common::USERS).peek(&json!(1)),
        Some(record(json!({"_id": 1, "scratch": 2, "name": "x"})))
    );
    assert_eq!(
        store.memory_collection(common::BOT).peek(&json!(0)),
        Some(record(json!({"_id": 0, "content": {"name": "x"}})))
    );
    assert_eq!(persistence.get_bot_data().await?, record(json!({"name": "x"})));
    Ok(())
}

#[tokio::test]
async fn conversations_are_merged_field_by_field() -> TestResult {
    let store = MemoryStore::new();
    let conversations = store.memory_collection(common::CONVERSATIONS);
    conversations
        .insert_one(record(json!({"_id": "survey", "(7, 8)": "DONE"})))
        .await?;
    let persistence = connect(&store, all_collections(false)).await;

    let first = ConversationKey::new(1, 2);
    let second = ConversationKey::new(-3, 4);

    let outcome = persistence
        .update_conversation("survey", first, Some(json!("ASKING")))
        .await?;
    assert_eq!(outcome, SyncOutcome::Updated);
    let outcome = persistence
        .update_conversation("survey", second, Some(json!({"step": 2})))
        .await?;
    assert_eq!(outcome, SyncOutcome::Updated);

    assert_eq!(
        conversations.peek(&json!("survey")),
        Some(record(json!({
            "_id": "survey",
            "(7, 8)": "DONE",
            "(1, 2)": "ASKING",
            "(-3, 4)": {"step": 2}
        })))
    );

    // Ending a conversation keeps its field, with a null state.
    assert_eq!(
        persistence.update_conversation("survey", first, None).await?,
        SyncOutcome::Updated
    );
    assert_eq!(
        conversations.peek(&json!("survey")).and_then(|doc| doc.get("(1, 2)").cloned()),
        Some(serde_json::Value::Null)
    );
    assert_eq!(
        persistence.update_conversation("survey", first, None).await?,
        SyncOutcome::Unchanged
    );

    let map = persistence.get_conversations("survey").await?;
    assert_eq!(map.len(), 3);
    assert_eq!(map[&first], None);
    assert_eq!(map[&ConversationKey::new(7, 8)], Some(json!("DONE")));
    Ok(())
}

#[tokio::test]
async fn conversation_handlers_get_their_own_documents() -> TestResult {
    let store = MemoryStore::new();
    let persistence = connect(&store, all_collections(false)).await;
    let key = ConversationKey::from((10, 20));

    assert!(persistence.get_conversations("order").await?.is_empty());
    assert_eq!(
        persistence.update_conversation("order", key, Some(json!(1))).await?,
        SyncOutcome::Inserted
    );
    assert_eq!(
        persistence.update_conversation("greeting", key, None).await?,
        SyncOutcome::Unchanged
    );

    let conversations = store.memory_collection(common::CONVERSATIONS);
    assert_eq!(conversations.len(), 1);
    assert_eq!(
        conversations.peek(&json!("order")),
        Some(record(json!({"_id": "order", "(10, 20)": 1})))
    );
    Ok(())
}

#[tokio::test]
async fn malformed_conversation_keys_are_surfaced() {
    let store = MemoryStore::new();
    store
        .memory_collection(common::CONVERSATIONS)
        .insert_one(record(json!({"_id": "broken", "(1, 2)": "A", "(1, two)": "B"})))
        .await
        .unwrap();
    let persistence = connect(&store, all_collections(false)).await;

    let err = persistence.get_conversations("broken").await.unwrap_err();
    assert!(matches!(err, Error::MalformedKey { .. }), "got {err:?}");
}

#[tokio::test]
async fn write_back_flushes_every_entity_class() -> TestResult {
    let store = MemoryStore::new();
    let persistence = connect(&store, all_collections(true)).await;

    for id in [1, 2, 3] {
        assert_eq!(
            persistence.update_user_data(id, &record(json!({"n": id}))).await?,
            SyncOutcome::Deferred
        );
    }
    persistence.update_chat_data(7, &record(json!({"title": "t"}))).await?;
    persistence.update_bot_data(&record(json!({"k": "v"}))).await?;
    persistence
        .update_conversation("survey", ConversationKey::new(1, 1), Some(json!("A")))
        .await?;

    for name in [common::USERS, common::CHATS, common::BOT, common::CONVERSATIONS] {
        assert_eq!(store.memory_collection(name).counts().mutations(), 0, "{name} was written early");
    }

    let report = persistence.flush().await?;
    assert_eq!(
        report,
        FlushReport {
            user_data:     3,
            chat_data:     1,
            bot_data:      1,
            conversations: 1,
        }
    );
    assert_eq!(report.total(), 6);

    assert_eq!(
        store.memory_collection(common::USERS).peek(&json!(2)),
        Some(record(json!({"_id": 2, "n": 2})))
    );
    assert_eq!(
        store.memory_collection(common::BOT).peek(&json!(0)),
        Some(record(json!({"_id": 0, "content": {"k": "v"}})))
    );
    assert_eq!(
        store.memory_collection(common::CONVERSATIONS).peek(&json!("survey")),
        Some(record(json!({"_id": "survey", "(1, 1)": "A"})))
    );
    Ok(())
}

#[tokio::test]
async fn write_back_flush_updates_existing_documents() -> TestResult {
    let store = MemoryStore::new();
    let users = store.memory_collection(common::USERS);
    let bot = store.memory_collection(common::BOT);
    let conversations = store.memory_collection(common::CONVERSATIONS);
    users.insert_one(record(json!({"_id": 1, "n": 0}))).await?;
    bot.insert_one(record(json!({"_id": 0, "content": {"k": "old", "extra": 1}})))
        .await?;
    conversations
        .insert_one(record(json!({"_id": "survey", "(1, 1)": "A", "(2, 2)": "B"})))
        .await?;

    let persistence = connect(&store, all_collections(true)).await;
    persistence.update_user_data(1, &record(json!({"n": 1}))).await?;
    assert_eq!(
        persistence.update_bot_data(&record(json!({"k": "new"}))).await?,
        SyncOutcome::Deferred
    );
    persistence
        .update_conversation("survey", ConversationKey::new(1, 1), Some(json!("Z")))
        .await?;

    let report = persistence.flush().await?;
    assert_eq!(
        report,
        FlushReport {
            user_data:     1,
            chat_data:     0,
            bot_data:      1,
            conversations: 1,
        }
    );

    assert_eq!(users.counts().replace_one, 1);
    assert_eq!(users.peek(&json!(1)), Some(record(json!({"_id": 1, "n": 1}))));
    assert_eq!(bot.counts().update_fields, 1);
    assert_eq!(bot.peek(&json!(0)), Some(record(json!({"_id": 0, "content": {"k": "new"}}))));
    assert_eq!(conversations.counts().update_fields, 1);
    assert_eq!(
        conversations.peek(&json!("survey")),
        Some(record(json!({"_id": "survey", "(1, 1)": "Z", "(2, 2)": "B"})))
    );
    Ok(())
}

#[tokio::test]
async fn failed_flush_leaves_the_facade_open() -> TestResult {
    let store = MemoryStore::new();
    let persistence = connect(&store, all_collections(true)).await;
    persistence.update_user_data(1, &record(json!({"a": 1}))).await?;

    store.set_offline(true);
    let err = persistence.flush().await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::Transport(_))), "got {err:?}");
    assert!(!persistence.is_closed());
    assert!(!store.is_closed());

    store.set_offline(false);
    assert_eq!(persistence.flush().await?.user_data, 1);
    assert!(persistence.is_closed());
    assert_eq!(
        store.memory_collection(common::USERS).peek(&json!(1)),
        Some(record(json!({"_id": 1, "a": 1})))
    );
    Ok(())
}

#[tokio::test]
async fn write_through_retries_after_store_failure() -> TestResult {
    let store = MemoryStore::new();
    let persistence = connect(&store, all_collections(false)).await;
    let data = record(json!({"a": 1}));
    let key = ConversationKey::new(1, 2);
    assert!(persistence.get_conversations("survey").await?.is_empty());

    store.set_offline(true);
    assert!(persistence.update_user_data(1, &data).await.is_err());
    assert!(persistence.update_bot_data(&data).await.is_err());
    assert!(persistence
        .update_conversation("survey", key, Some(json!("A")))
        .await
        .is_err());
    store.set_offline(false);

    assert!(persistence.get_conversations("survey").await?.is_empty());
    assert_eq!(persistence.update_user_data(1, &data).await?, SyncOutcome::Inserted);
    assert_eq!(persistence.update_bot_data(&data).await?, SyncOutcome::Inserted);
    assert_eq!(
        persistence.update_conversation("survey", key, Some(json!("A"))).await?,
        SyncOutcome::Inserted
    );

    assert_eq!(
        store.memory_collection(common::USERS).peek(&json!(1)),
        Some(record(json!({"_id": 1, "a": 1})))
    );
    assert_eq!(
        store.memory_collection(common::BOT).peek(&json!(0)),
        Some(record(json!({"_id": 0, "content": {"a": 1}})))
    );
    assert_eq!(
        store.memory_collection(common::CONVERSATIONS).peek(&json!("survey")),
        Some(record(json!({"_id": "survey", "(1, 2)": "A"})))
    );
    Ok(())
}

#[tokio::test]
async fn null_conversation_state_means_ended() -> TestResult {
    let store = MemoryStore::new();
    let persistence = connect(&store, all_collections(false)).await;
    let key = ConversationKey::new(5, 6);

    assert_eq!(
        persistence
            .update_conversation("survey", key, Some(serde_json::Value::Null))
            .await?,
        SyncOutcome::Unchanged
    );

    persistence.update_conversation("survey", key, Some(json!("A"))).await?;
    assert_eq!(
        persistence
            .update_conversation("survey", key, Some(serde_json::Value::Null))
            .await?,
        SyncOutcome::Updated
    );
    assert_eq!(persistence.get_conversations("survey").await?[&key], None);

    // Same answer from a process that only sees the stored document.
    let restarted = connect(&store, all_collections(false)).await;
    assert_eq!(restarted.get_conversations("survey").await?[&key], None);
    Ok(())
}

#[tokio::test]
async fn flush_closes_the_facade_and_the_store() -> TestResult {
    let store = MemoryStore::new();
    let persistence = connect(&store, all_collections(false)).await;
    persistence.update_user_data(1, &record(json!({"a": 1}))).await?;

    assert_eq!(persistence.flush().await?, FlushReport::default());
    assert!(persistence.is_closed());
    assert!(store.is_closed());

    assert!(matches!(persistence.get_user_data().await, Err(Error::Closed)));
    assert!(matches!(
        persistence.update_bot_data(&record(json!({"a": 1}))).await,
        Err(Error::Closed)
    ));
    assert!(matches!(persistence.flush().await, Err(Error::Closed)));
    Ok(())
}

#[tokio::test]
async fn unconfigured_entities_are_inert() -> TestResult {
    let store = MemoryStore::new();
    let config = PersistenceConfig::builder()
        .write_back(false)
        .user_collection(common::USERS)
        .update_interval(Duration::from_secs(5))
        .build()?;
    let persistence = connect(&store, config).await;

    assert_eq!(
        persistence.store_flags(),
        StoreFlags {
            bot_data:      false,
            chat_data:     false,
            user_data:     true,
            callback_data: false,
        }
    );
    assert_eq!(persistence.update_interval(), Duration::from_secs(5));

    let data = record(json!({"a": 1}));
    assert!(persistence.get_chat_data().await?.is_empty());
    assert_eq!(persistence.update_chat_data(1, &data).await?, SyncOutcome::Inactive);
    assert_eq!(persistence.drop_chat_data(1).await?, SyncOutcome::Inactive);
    assert!(persistence.get_bot_data().await?.is_empty());
    assert_eq!(persistence.update_bot_data(&data).await?, SyncOutcome::Inactive);
    assert!(persistence.get_conversations("any").await?.is_empty());
    assert_eq!(
        persistence
            .update_conversation("any", ConversationKey::new(1, 2), Some(json!(1)))
            .await?,
        SyncOutcome::Inactive
    );

    assert_eq!(persistence.get_callback_data().await?, None);
    assert_eq!(persistence.update_callback_data(&json!({"x": 1})).await?, SyncOutcome::Inactive);

    assert!(!store.has_collection(common::CHATS));
    assert!(!store.has_collection(common::BOT));
    Ok(())
}

#[tokio::test]
async fn collections_can_be_created_on_connect() -> TestResult {
    let store = MemoryStore::new();
    store.create_collection(common::USERS).await?;

    let config = PersistenceConfig::builder()
        .create_collection_if_missing(true)
        .user_collection(common::USERS)
        .chat_collection(common::CHATS)
        .build()?;
    let persistence = Persistence::connect(store.clone(), config).await?;

    assert!(store.has_collection(common::CHATS));
    assert!(persistence.store_flags().chat_data);
    Ok(())
}

#[tokio::test]
async fn connect_fails_when_collections_cannot_be_created() {
    let store = MemoryStore::new();
    store.set_offline(true);

    let config = PersistenceConfig::builder()
        .create_collection_if_missing(true)
        .user_collection(common::USERS)
        .build()
        .unwrap();

    let err = Persistence::connect(store.clone(), config).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::Transport(_))), "got {err:?}");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name:  String,
    langs: Vec<String>,
}

#[tokio::test]
async fn typed_records_survive_a_restart() -> TestResult {
    let store = MemoryStore::new();
    let profile = Profile {
        name:  "ann".into(),
        langs: vec!["en".into(), "de".into()],
    };

    let persistence = connect(&store, all_collections(true)).await;
    persistence.update_user_data(5, &to_record(&profile)?).await?;
    persistence.flush().await?;

    // A fresh process against the same data.
    let restarted = MemoryStore::new();
    let users = restarted.memory_collection(common::USERS);
    let stored = store
        .memory_collection(common::USERS)
        .peek(&json!(5))
        .ok_or("profile was not flushed")?;
    users.insert_one(stored).await?;

    let persistence = connect(&restarted, all_collections(true)).await;
    let loaded: Profile = from_record(&persistence.get_user_data().await?[&5])?;
    assert_eq!(loaded, profile);
    Ok(())
}
