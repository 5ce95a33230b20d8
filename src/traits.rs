use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::fmt::Display;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

use crate::error::StoreError;
use crate::types::DocId;
use crate::types::Document;

/// Cursor over a full collection scan.
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<Document, StoreError>> + Send>>;

/// One collection of a document store.
///
/// Implementations must be safe for concurrent use: flushes dispatch per-document operations in parallel.
#[async_trait]
pub trait DocumentStore: Debug + Send + Sync + 'static {
    /// Collection name. Most useful for logging and error reports.
    fn name(&self) -> &str;

    async fn find_one(&self, id: &DocId) -> Result<Option<Document>, StoreError>;
    async fn find_many(&self) -> Result<DocumentStream, StoreError>;
    async fn insert_one(&self, doc: Document) -> Result<(), StoreError>;
    async fn replace_one(&self, id: &DocId, doc: Document) -> Result<(), StoreError>;
    /// Set the given top-level fields of an existing document, leaving the others intact.
    async fn update_fields(&self, id: &DocId, fields: Document) -> Result<(), StoreError>;
    async fn delete_one(&self, id: &DocId) -> Result<(), StoreError>;
}

/// The store connection: hands out collections and owns the connection lifetime.
#[async_trait]
pub trait StoreClient: Debug + Send + Sync + 'static {
    /// Obtain a handle to a collection. Like most document stores, this doesn't require the collection to exist.
    fn collection(&self, name: &str) -> Arc<dyn DocumentStore>;

    /// Fails with [`StoreError::AlreadyExists`] if there is such collection already.
    async fn create_collection(&self, name: &str) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}

/// Key type of a keyed entity class and its mapping onto a document `_id`.
pub trait EntityKey: Debug + Display + Hash + Clone + Eq + Sized + Send + Sync + 'static {
    fn to_doc_id(&self) -> DocId;
    /// `None` if the stored id doesn't represent a key of this type.
    fn from_doc_id(id: &DocId) -> Option<Self>;
}

impl EntityKey for i64 {
    fn to_doc_id(&self) -> DocId {
        Value::from(*self)
    }

    fn from_doc_id(id: &DocId) -> Option<Self> {
        id.as_i64()
    }
}

impl EntityKey for String {
    fn to_doc_id(&self) -> DocId {
        Value::from(self.as_str())
    }

    fn from_doc_id(id: &DocId) -> Option<Self> {
        id.as_str().map(str::to_string)
    }
}
