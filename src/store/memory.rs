//! In-process document store.
//!
//! Behaves like a schemaless document database: collections spring into existence on first use, documents are
//! addressed by their `_id` field. Every operation is counted, which makes the store handy for verifying what the
//! engine actually sends over the wire. The store can also be switched offline to simulate transport failures.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::StoreError;
use crate::traits::DocumentStore;
use crate::traits::DocumentStream;
use crate::traits::StoreClient;
use crate::types::DocId;
use crate::types::Document;
use crate::types::ID_FIELD;

/// Snapshot of a collection's operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpCounts {
    pub find_one:      usize,
    pub find_many:     usize,
    pub insert_one:    usize,
    pub replace_one:   usize,
    pub update_fields: usize,
    pub delete_one:    usize,
}

impl OpCounts {
    /// Number of operations that could have modified the collection.
    pub fn mutations(&self) -> usize {
        self.insert_one + self.replace_one + self.update_fields + self.delete_one
    }
}

#[derive(Debug, Default)]
struct Counters {
    find_one:      AtomicUsize,
    find_many:     AtomicUsize,
    insert_one:    AtomicUsize,
    replace_one:   AtomicUsize,
    update_fields: AtomicUsize,
    delete_one:    AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OpCounts {
        OpCounts {
            find_one:      self.find_one.load(Ordering::Relaxed),
            find_many:     self.find_many.load(Ordering::Relaxed),
            insert_one:    self.insert_one.load(Ordering::Relaxed),
            replace_one:   self.replace_one.load(Ordering::Relaxed),
            update_fields: self.update_fields.load(Ordering::Relaxed),
            delete_one:    self.delete_one.load(Ordering::Relaxed),
        }
    }
}

// Connection state shared by the store and all of its collections.
#[derive(Debug, Default)]
struct Link {
    closed:  AtomicBool,
    offline: AtomicBool,
}

impl Link {
    fn check(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        }
        else if self.offline.load(Ordering::Acquire) {
            Err(StoreError::Transport("store is unreachable".into()))
        }
        else {
            Ok(())
        }
    }
}

#[derive(Debug)]
pub struct MemoryCollection {
    name:      String,
    link:      Arc<Link>,
    documents: RwLock<BTreeMap<String, Document>>,
    counters:  Counters,
}

impl MemoryCollection {
    fn new(name: &str, link: Arc<Link>) -> Self {
        Self {
            name: name.to_string(),
            link,
            documents: RwLock::new(BTreeMap::new()),
            counters: Counters::default(),
        }
    }

    // Ids are JSON values; their serialized form is unique per value and good enough as a map key.
    fn slot(id: &DocId) -> String {
        id.to_string()
    }

    pub fn counts(&self) -> OpCounts {
        self.counters.snapshot()
    }

    /// Direct, uncounted look at a stored document.
    pub fn peek(&self, id: &DocId) -> Option<Document> {
        self.documents.read().get(&Self::slot(id)).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, id: &DocId) -> Result<Option<Document>, StoreError> {
        self.link.check()?;
        Counters::bump(&self.counters.find_one);
        Ok(self.peek(id))
    }

    async fn find_many(&self) -> Result<DocumentStream, StoreError> {
        self.link.check()?;
        Counters::bump(&self.counters.find_many);
        let documents = self.documents.read().values().cloned().collect::<Vec<_>>();
        Ok(Box::pin(tokio_stream::iter(documents.into_iter().map(Ok))))
    }

    async fn insert_one(&self, doc: Document) -> Result<(), StoreError> {
        self.link.check()?;
        Counters::bump(&self.counters.insert_one);
        let id = doc.get(ID_FIELD).cloned().unwrap_or_default();
        let slot = Self::slot(&id);
        let mut documents = self.documents.write();
        if documents.contains_key(&slot) {
            return Err(StoreError::DuplicateKey {
                collection: self.name.clone(),
                id:         slot,
            });
        }
        documents.insert(slot, doc);
        Ok(())
    }

    async fn replace_one(&self, id: &DocId, mut doc: Document) -> Result<(), StoreError> {
        self.link.check()?;
        Counters::bump(&self.counters.replace_one);
        let mut documents = self.documents.write();
        if let Some(stored) = documents.get_mut(&Self::slot(id)) {
            doc.insert(ID_FIELD.to_string(), id.clone());
            *stored = doc;
        }
        Ok(())
    }

    async fn update_fields(&self, id: &DocId, fields: Document) -> Result<(), StoreError> {
        self.link.check()?;
        Counters::bump(&self.counters.update_fields);
        let mut documents = self.documents.write();
        if let Some(stored) = documents.get_mut(&Self::slot(id)) {
            stored.extend(fields.into_iter().filter(|(field, _)| field != ID_FIELD));
        }
        Ok(())
    }

    async fn delete_one(&self, id: &DocId) -> Result<(), StoreError> {
        self.link.check()?;
        Counters::bump(&self.counters.delete_one);
        self.documents.write().remove(&Self::slot(id));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    link:        Arc<Link>,
    collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The concrete collection behind [`StoreClient::collection`], with counters and direct access.
    pub fn memory_collection(&self, name: &str) -> Arc<MemoryCollection> {
        if let Some(collection) = self.collections.read().get(name) {
            return Arc::clone(collection);
        }
        let mut collections = self.collections.write();
        Arc::clone(
            collections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryCollection::new(name, Arc::clone(&self.link)))),
        )
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    /// Make every subsequent operation fail with a transport error, or bring the store back.
    pub fn set_offline(&self, offline: bool) {
        self.link.offline.store(offline, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    fn collection(&self, name: &str) -> Arc<dyn DocumentStore> {
        self.memory_collection(name)
    }

    async fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        self.link.check()?;
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        collections.insert(
            name.to_string(),
            Arc::new(MemoryCollection::new(name, Arc::clone(&self.link))),
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.link.closed.store(true, Ordering::Release);
        Ok(())
    }
}
