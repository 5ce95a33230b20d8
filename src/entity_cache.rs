//! In-memory mirrors of the persisted entity classes.
//!
//! Every mirror is bound to its collection once, at construction. A mirror without a collection belongs to an entity
//! class that is not persisted and stays empty forever.
//!
//! The keyed and conversation mirrors are [moka](https://crates.io/crates/moka) caches with no capacity bound: the
//! mirror is the authoritative read source and must never evict.

use fieldx::fxstruct;
use moka::future::Cache;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::instrument;

use crate::error::Error;
use crate::error::Result;
use crate::field_filter::FieldFilter;
use crate::key_codec;
use crate::key_codec::ConversationKey;
use crate::traits::DocumentStore;
use crate::traits::EntityKey;
use crate::types::split_document;
use crate::types::DocId;
use crate::types::Record;
use crate::types::CONTENT_FIELD;

/// State of a single conversation. `None` marks an ended conversation.
pub type ConversationState = Option<Value>;

/// All conversations stored under one conversation handler name.
pub type ConversationMap = HashMap<ConversationKey, ConversationState>;

fn config_error(err: impl ToString) -> Error {
    Error::Config(err.to_string())
}

/// Mirror of a keyed entity class: entity id to record.
#[fxstruct(sync, no_new, builder)]
pub struct EntityCache<K>
where
    K: EntityKey,
{
    /// Entity class name, used in logs.
    #[fieldx(get, builder(into))]
    name: String,

    #[fieldx(optional, get(clone))]
    collection: Arc<dyn DocumentStore>,

    #[fieldx(get, default(FieldFilter::default()))]
    filter: FieldFilter,

    #[fieldx(lazy, private, get(clone), builder(off))]
    mirror: Arc<Cache<K, Record>>,

    #[fieldx(inner_mut, private, get(copy), set, builder(off), default(false))]
    populated: bool,
}

impl<K> EntityCache<K>
where
    K: EntityKey,
{
    pub fn new(name: &str, collection: Option<Arc<dyn DocumentStore>>, filter: FieldFilter) -> Result<Self> {
        let mut builder = Self::builder().name(name).filter(filter);
        if let Some(collection) = collection {
            builder = builder.collection(collection);
        }
        builder.build().map_err(config_error)
    }

    fn build_mirror(&self) -> Arc<Cache<K, Record>> {
        Arc::new(Cache::builder().name(self.name()).build())
    }

    /// True iff the entity class is configured for persistence.
    #[inline]
    pub fn exists(&self) -> bool {
        self.collection().is_some()
    }

    pub fn is_populated(&self) -> bool {
        self.populated()
    }

    /// Load the whole collection into the mirror, once per cache lifetime. Records put into the mirror before the
    /// scan win over their stored counterparts.
    ///
    /// Returns `true` if a scan took place.
    #[instrument(level = "trace", skip(self), fields(entity = %self.name()))]
    pub async fn populate_if_needed(&self) -> Result<bool> {
        let Some(collection) = self.collection()
        else {
            return Ok(false);
        };
        if self.populated() {
            return Ok(false);
        }

        let mirror = self.mirror();
        let mut cursor = collection.find_many().await?;
        let mut loaded = 0usize;
        while let Some(doc) = cursor.next().await {
            let (id, record) = split_document(doc?);
            let key = id.as_ref().and_then(K::from_doc_id).ok_or_else(|| {
                Error::malformed_document(
                    collection.name(),
                    format!("document id {id:?} is not a valid {} key", self.name()),
                )
            })?;
            let _ = mirror.entry(key).or_insert(self.filter().apply_owned(record)).await;
            loaded += 1;
        }

        self.set_populated(true);
        log::debug!("[{}] populated mirror with {loaded} stored record(s)", self.name());
        Ok(true)
    }

    pub async fn get(&self, id: &K) -> Option<Record> {
        self.mirror().get(id).await
    }

    pub async fn put(&self, id: K, record: Record) {
        self.mirror().insert(id, record).await;
    }

    pub async fn remove(&self, id: &K) -> Option<Record> {
        self.mirror().remove(id).await
    }

    /// Put back what [`get`](Self::get) returned before a failed store round-trip.
    pub(crate) async fn restore(&self, id: &K, previous: Option<Record>) {
        match previous {
            Some(record) => self.put(id.clone(), record).await,
            None => {
                self.remove(id).await;
            }
        }
    }

    /// Copy of every cached record.
    pub fn snapshot(&self) -> HashMap<K, Record> {
        self.mirror()
            .iter()
            .map(|(key, record)| ((*key).clone(), record))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.mirror().iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Debug for EntityCache<K>
where
    K: EntityKey,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("name", self.name())
            .field("exists", &self.exists())
            .field("populated", &self.populated())
            .field("ignored", self.filter().fields())
            .finish()
    }
}

/// Mirror of the singleton entity class. Its only document is `{_id: BOT_DATA_KEY, content: <record>}`.
#[fxstruct(sync, no_new, builder)]
pub struct SingletonCache {
    #[fieldx(get, builder(into))]
    name: String,

    #[fieldx(optional, get(clone))]
    collection: Arc<dyn DocumentStore>,

    #[fieldx(get, default(FieldFilter::default()))]
    filter: FieldFilter,

    // None until loaded from the store or written by the user.
    #[fieldx(inner_mut, private, get, get_mut, builder(off), default(None))]
    content: Option<Record>,
}

impl SingletonCache {
    pub fn new(name: &str, collection: Option<Arc<dyn DocumentStore>>, filter: FieldFilter) -> Result<Self> {
        let mut builder = Self::builder().name(name).filter(filter);
        if let Some(collection) = collection {
            builder = builder.collection(collection);
        }
        builder.build().map_err(config_error)
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.collection().is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.content().is_some()
    }

    pub fn get(&self) -> Option<Record> {
        self.content().clone()
    }

    pub fn put(&self, record: Record) {
        *self.content_mut() = Some(record);
    }

    pub(crate) fn restore(&self, previous: Option<Record>) {
        *self.content_mut() = previous;
    }

    /// Extract the record out of a stored singleton document.
    pub(crate) fn unwrap_document(&self, collection: &str, doc: Record) -> Result<Record> {
        match doc.get(CONTENT_FIELD) {
            Some(Value::Object(content)) => Ok(self.filter().apply(content)),
            Some(Value::Null) | None => Ok(Record::new()),
            Some(other) => Err(Error::malformed_document(
                collection,
                format!("'{CONTENT_FIELD}' must be an object, got {other}"),
            )),
        }
    }
}

impl Debug for SingletonCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonCache")
            .field("name", self.name())
            .field("exists", &self.exists())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Mirror of the conversation entity class: handler name to the conversations under it.
///
/// One document per handler name; every field other than `_id` is an encoded [`ConversationKey`].
#[fxstruct(sync, no_new, builder)]
pub struct ConversationCache {
    #[fieldx(get, builder(into))]
    name: String,

    #[fieldx(optional, get(clone))]
    collection: Arc<dyn DocumentStore>,

    #[fieldx(lazy, private, get(clone), builder(off))]
    mirror: Arc<Cache<String, ConversationMap>>,
}

impl ConversationCache {
    pub fn new(name: &str, collection: Option<Arc<dyn DocumentStore>>) -> Result<Self> {
        let mut builder = Self::builder().name(name);
        if let Some(collection) = collection {
            builder = builder.collection(collection);
        }
        builder.build().map_err(config_error)
    }

    fn build_mirror(&self) -> Arc<Cache<String, ConversationMap>> {
        Arc::new(Cache::builder().name(self.name()).build())
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.collection().is_some()
    }

    pub async fn get(&self, name: &str) -> Option<ConversationMap> {
        self.mirror().get(name).await
    }

    pub async fn put(&self, name: &str, conversations: ConversationMap) {
        self.mirror().insert(name.to_string(), conversations).await;
    }

    /// Reset one conversation of `name` to its state before a failed store round-trip. `None` means the key wasn't
    /// known at all.
    pub(crate) async fn restore(&self, name: &str, key: &ConversationKey, previous: Option<ConversationState>) {
        let mut conversations = self.get(name).await.unwrap_or_default();
        match previous {
            Some(state) => conversations.insert(*key, state),
            None => conversations.remove(key),
        };
        self.put(name, conversations).await;
    }

    pub fn snapshot(&self) -> HashMap<String, ConversationMap> {
        self.mirror()
            .iter()
            .map(|(name, conversations)| ((*name).clone(), conversations))
            .collect()
    }

    /// Document id of a handler name.
    pub(crate) fn doc_id(name: &str) -> DocId {
        Value::from(name)
    }

    /// Decode the fields of a stored conversation document. A field that is not a valid key is a data-integrity
    /// fault and fails the whole document.
    pub(crate) fn decode_document(record: Record) -> Result<ConversationMap> {
        record
            .into_iter()
            .map(|(field, state)| {
                let key = key_codec::decode(&field)?;
                Ok((key, (!state.is_null()).then_some(state)))
            })
            .collect()
    }

    pub(crate) fn encode_state(state: &ConversationState) -> Value {
        state.clone().unwrap_or(Value::Null)
    }
}

impl Debug for ConversationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationCache")
            .field("name", self.name())
            .field("exists", &self.exists())
            .finish()
    }
}
