//! Entity-level persistence surface for a host application.
//!
//! Four entity classes are mirrored:
//!
//! | Entity | Keying | Stored as |
//! | ------ | ------ | --------- |
//! | user data | `i64` id | `{_id: id, ...record}` |
//! | chat data | `i64` id | `{_id: id, ...record}` |
//! | bot data | singleton | `{_id: 0, content: record}` |
//! | conversations | handler name, then [`ConversationKey`] | `{_id: name, "(chat, user)": state, ...}` |
//!
//! Callback data is reserved and never persisted.

use fieldx::fxstruct;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PersistenceConfig;
use crate::entity_cache::ConversationCache;
use crate::entity_cache::ConversationMap;
use crate::entity_cache::ConversationState;
use crate::entity_cache::EntityCache;
use crate::entity_cache::SingletonCache;
use crate::error::Error;
use crate::error::Result;
use crate::error::StoreError;
use crate::key_codec::ConversationKey;
use crate::sync_engine::SyncEngine;
use crate::traits::DocumentStore;
use crate::traits::StoreClient;
use crate::types::FlushReport;
use crate::types::Record;
use crate::types::StoreFlags;
use crate::types::SyncOutcome;

#[fxstruct(sync, no_new, default(off), builder)]
pub struct Persistence {
    #[fieldx(get(clone))]
    client: Arc<dyn StoreClient>,

    #[fieldx(get)]
    config: PersistenceConfig,

    #[fieldx(get(copy))]
    engine: SyncEngine,

    #[fieldx(get)]
    user_data: EntityCache<i64>,

    #[fieldx(get)]
    chat_data: EntityCache<i64>,

    #[fieldx(get)]
    bot_data: SingletonCache,

    #[fieldx(get)]
    conversations: ConversationCache,

    #[fieldx(inner_mut, private, get(copy), set, builder(off), default(false))]
    closed: bool,
}

impl Persistence {
    /// Bind every configured entity class to its collection, creating collections first if the configuration says
    /// so.
    pub async fn connect(client: Arc<dyn StoreClient>, config: PersistenceConfig) -> Result<Self> {
        let users = Self::open_collection(&client, &config, config.user_collection()).await?;
        let chats = Self::open_collection(&client, &config, config.chat_collection()).await?;
        let bot = Self::open_collection(&client, &config, config.bot_collection()).await?;
        let conversations = Self::open_collection(&client, &config, config.conversations_collection()).await?;

        let persistence = Self::builder()
            .engine(SyncEngine::new(config.write_back()))
            .user_data(EntityCache::new("user_data", users, config.user_filter())?)
            .chat_data(EntityCache::new("chat_data", chats, config.chat_filter())?)
            .bot_data(SingletonCache::new("bot_data", bot, config.bot_filter())?)
            .conversations(ConversationCache::new("conversations", conversations)?)
            .client(client)
            .config(config)
            .build()
            .map_err(|err| Error::Config(err.to_string()))?;

        log::debug!("Persistence connected: {:?}", persistence.store_flags());
        Ok(persistence)
    }

    async fn open_collection(
        client: &Arc<dyn StoreClient>,
        config: &PersistenceConfig,
        name: Option<&str>,
    ) -> Result<Option<Arc<dyn DocumentStore>>> {
        let Some(name) = name
        else {
            return Ok(None);
        };

        if config.create_collection_if_missing() {
            match client.create_collection(name).await {
                Ok(()) => log::info!("Created collection '{name}'"),
                Err(StoreError::AlreadyExists(_)) => log::warn!("Collection '{name}' already exists"),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Some(client.collection(name)))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed() {
            Err(Error::Closed)
        }
        else {
            Ok(())
        }
    }

    pub fn store_flags(&self) -> StoreFlags {
        StoreFlags {
            bot_data:      self.bot_data().exists(),
            chat_data:     self.chat_data().exists(),
            user_data:     self.user_data().exists(),
            callback_data: false,
        }
    }

    pub fn update_interval(&self) -> Duration {
        self.config().update_interval()
    }

    pub fn is_closed(&self) -> bool {
        self.closed()
    }

    pub async fn get_user_data(&self) -> Result<HashMap<i64, Record>> {
        self.ensure_open()?;
        self.engine().read_all(self.user_data()).await
    }

    pub async fn update_user_data(&self, user_id: i64, data: &Record) -> Result<SyncOutcome> {
        self.ensure_open()?;
        self.engine().write(self.user_data(), &user_id, data).await
    }

    pub async fn refresh_user_data(&self, user_id: i64, user_data: &mut Record) -> Result<SyncOutcome> {
        self.ensure_open()?;
        self.engine().refresh(self.user_data(), &user_id, user_data).await
    }

    pub async fn drop_user_data(&self, user_id: i64) -> Result<SyncOutcome> {
        self.ensure_open()?;
        self.engine().drop_record(self.user_data(), &user_id).await
    }

    pub async fn get_chat_data(&self) -> Result<HashMap<i64, Record>> {
        self.ensure_open()?;
        self.engine().read_all(self.chat_data()).await
    }

    pub async fn update_chat_data(&self, chat_id: i64, data: &Record) -> Result<SyncOutcome> {
        self.ensure_open()?;
        self.engine().write(self.chat_data(), &chat_id, data).await
    }

    pub async fn refresh_chat_data(&self, chat_id: i64, chat_data: &mut Record) -> Result<SyncOutcome> {
        self.ensure_open()?;
        self.engine().refresh(self.chat_data(), &chat_id, chat_data).await
    }

    pub async fn drop_chat_data(&self, chat_id: i64) -> Result<SyncOutcome> {
        self.ensure_open()?;
        self.engine().drop_record(self.chat_data(), &chat_id).await
    }

    pub async fn get_bot_data(&self) -> Result<Record> {
        self.ensure_open()?;
        self.engine().read_singleton(self.bot_data()).await
    }

    pub async fn update_bot_data(&self, data: &Record) -> Result<SyncOutcome> {
        self.ensure_open()?;
        self.engine().write_singleton(self.bot_data(), data).await
    }

    pub async fn refresh_bot_data(&self, bot_data: &mut Record) -> Result<SyncOutcome> {
        self.ensure_open()?;
        self.engine().refresh_singleton(self.bot_data(), bot_data).await
    }

    pub async fn get_conversations(&self, name: &str) -> Result<ConversationMap> {
        self.ensure_open()?;
        self.engine().read_conversations(self.conversations(), name).await
    }

    pub async fn update_conversation(
        &self,
        name: &str,
        key: ConversationKey,
        new_state: ConversationState,
    ) -> Result<SyncOutcome> {
        self.ensure_open()?;
        self.engine()
            .write_conversation(self.conversations(), name, key, new_state)
            .await
    }

    /// Callback data is not persisted; there is never anything to return.
    pub async fn get_callback_data(&self) -> Result<Option<Value>> {
        self.ensure_open()?;
        Ok(None)
    }

    pub async fn update_callback_data(&self, _data: &Value) -> Result<SyncOutcome> {
        self.ensure_open()?;
        Ok(SyncOutcome::Inactive)
    }

    /// Write deferred state out, if any, and close the store connection. The instance is unusable afterwards.
    pub async fn flush(&self) -> Result<FlushReport> {
        self.ensure_open()?;

        let mut report = FlushReport::default();
        let engine = self.engine();
        if engine.is_write_back() {
            report.user_data = engine.load_all(self.user_data()).await?;
            report.chat_data = engine.load_all(self.chat_data()).await?;
            report.bot_data = engine.flush_singleton(self.bot_data()).await?;
            report.conversations = engine.flush_conversations(self.conversations()).await?;
            log::info!("Flushed {} document(s)", report.total());
        }

        self.set_closed(true);
        self.client().close().await?;
        Ok(report)
    }
}

impl Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("engine", &self.engine())
            .field("user_data", self.user_data())
            .field("chat_data", self.chat_data())
            .field("bot_data", self.bot_data())
            .field("conversations", self.conversations())
            .field("closed", &self.closed())
            .finish()
    }
}
