#![allow(dead_code)]

use serde_json::Value;
use std::sync::Arc;
use wb_persist::prelude::*;
use wb_persist::store::MemoryStore;

pub const USERS: &str = "users";
pub const CHATS: &str = "chats";
pub const BOT: &str = "bot";
pub const CONVERSATIONS: &str = "conversations";

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

pub fn all_collections(write_back: bool) -> PersistenceConfig {
    PersistenceConfig::builder()
        .write_back(write_back)
        .user_collection(USERS)
        .chat_collection(CHATS)
        .bot_collection(BOT)
        .conversations_collection(CONVERSATIONS)
        .build()
        .unwrap()
}

pub async fn connect(store: &Arc<MemoryStore>, config: PersistenceConfig) -> Persistence {
    Persistence::connect(store.clone(), config).await.unwrap()
}
