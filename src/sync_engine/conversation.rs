use tracing::instrument;

use super::SyncEngine;
use crate::entity_cache::ConversationCache;
use crate::entity_cache::ConversationMap;
use crate::entity_cache::ConversationState;
use crate::error::Result;
use crate::key_codec;
use crate::key_codec::ConversationKey;
use crate::traits::DocumentStore;
use crate::types::split_document;
use crate::types::Document;
use crate::types::SyncOutcome;
use crate::types::ID_FIELD;

fn encode_conversations(conversations: &ConversationMap) -> Document {
    conversations
        .iter()
        .map(|(key, state)| (key_codec::encode(key), ConversationCache::encode_state(state)))
        .collect()
}

impl SyncEngine {
    /// All conversations of handler `name`. The handler's document is loaded on first access only.
    #[instrument(level = "trace", skip(self, cache))]
    pub async fn read_conversations(&self, cache: &ConversationCache, name: &str) -> Result<ConversationMap> {
        let Some(collection) = cache.collection()
        else {
            return Ok(ConversationMap::new());
        };

        if let Some(conversations) = cache.get(name).await {
            return Ok(conversations);
        }

        let conversations = match collection.find_one(&ConversationCache::doc_id(name)).await? {
            Some(doc) => ConversationCache::decode_document(split_document(doc).1)?,
            None => ConversationMap::new(),
        };
        log::debug!(
            "[{}] loaded {} conversation(s) of '{name}'",
            cache.name(),
            conversations.len()
        );

        cache.put(name, conversations.clone()).await;
        Ok(conversations)
    }

    /// Record a new state of one conversation. Other conversations under the same handler are never touched: the
    /// handler document is updated field-by-field rather than replaced.
    #[instrument(level = "trace", skip(self, cache, state))]
    pub async fn write_conversation(
        &self,
        cache: &ConversationCache,
        name: &str,
        key: ConversationKey,
        state: ConversationState,
    ) -> Result<SyncOutcome> {
        let Some(collection) = cache.collection()
        else {
            return Ok(SyncOutcome::Inactive);
        };

        // A JSON null is what an ended conversation is stored as, so it reads back as one.
        let state = state.filter(|value| !value.is_null());

        let mut conversations = self.read_conversations(cache, name).await?;
        let previous = conversations.get(&key).cloned();
        // A missing conversation and an ended one are the same thing.
        if previous.clone().flatten() == state {
            return Ok(SyncOutcome::Unchanged);
        }

        let mut fields = Document::new();
        fields.insert(key_codec::encode(&key), ConversationCache::encode_state(&state));

        conversations.insert(key, state);
        cache.put(name, conversations).await;

        if self.write_back {
            return Ok(SyncOutcome::Deferred);
        }

        let outcome = merge_conversation_document(collection.as_ref(), name, fields).await;
        if outcome.is_err() {
            cache.restore(name, &key, previous).await;
        }
        outcome
    }

    /// Flush-time synchronization of every cached conversation handler.
    ///
    /// Returns the number of documents written.
    pub async fn flush_conversations(&self, cache: &ConversationCache) -> Result<usize> {
        let Some(collection) = cache.collection()
        else {
            return Ok(0);
        };

        let handlers = cache.snapshot();
        log::info!("Flushing {} cache; count={}", cache.name(), handlers.len());

        let mut written = 0;
        for (name, conversations) in handlers {
            let fields = encode_conversations(&conversations);
            if fields.is_empty() {
                continue;
            }
            if merge_conversation_document(collection.as_ref(), &name, fields)
                .await?
                .is_store_write()
            {
                written += 1;
            }
        }
        Ok(written)
    }
}

/// Insert the handler document or update those of its fields whose values differ.
#[instrument(level = "trace", skip(collection, fields), fields(collection = %collection.name()))]
async fn merge_conversation_document(collection: &dyn DocumentStore, name: &str, fields: Document) -> Result<SyncOutcome> {
    let id = ConversationCache::doc_id(name);
    Ok(match collection.find_one(&id).await? {
        None => {
            let mut doc = fields;
            doc.insert(ID_FIELD.to_string(), id);
            collection.insert_one(doc).await?;
            SyncOutcome::Inserted
        }
        Some(old) => {
            let changed = fields
                .into_iter()
                .filter(|(field, value)| old.get(field) != Some(value))
                .collect::<Document>();
            if changed.is_empty() {
                SyncOutcome::Unchanged
            }
            else {
                collection.update_fields(&id, changed).await?;
                SyncOutcome::Updated
            }
        }
    })
}
