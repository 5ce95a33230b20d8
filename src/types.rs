use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::fmt::Display;

use crate::error::Result;

/// One entity's state: field name to value, without the document identifier.
pub type Record = Map<String, Value>;

/// A stored document, identifier field included.
pub type Document = Map<String, Value>;

/// Document identifier as the store sees it.
pub type DocId = Value;

/// Name of the identifier field of every stored document.
pub const ID_FIELD: &str = "_id";

/// The singleton bot record lives under this field of its document.
pub const CONTENT_FIELD: &str = "content";

/// Fixed `_id` of the singleton bot document.
pub const BOT_DATA_KEY: i64 = 0;

/// What a synchronization step ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The entity class has no collection configured.
    Inactive,
    /// Nothing to do: empty record submitted or refresh found no document.
    Skipped,
    /// Mirror and/or store already held the same state.
    Unchanged,
    /// The mirror was updated, the store write waits for flush.
    Deferred,
    Inserted,
    Replaced,
    /// Store document updated field-by-field.
    Updated,
    Removed,
    /// Drop of an id that neither the mirror nor the store knows about.
    Absent,
    /// Store state merged into the mirror and the caller's record.
    Refreshed,
}

impl SyncOutcome {
    /// True if the outcome involved a store mutation.
    pub fn is_store_write(&self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced | Self::Updated | Self::Removed)
    }
}

impl Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Inactive => "inactive",
            Self::Skipped => "skipped",
            Self::Unchanged => "unchanged",
            Self::Deferred => "deferred",
            Self::Inserted => "inserted",
            Self::Replaced => "replaced",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Absent => "absent",
            Self::Refreshed => "refreshed",
        };
        f.write_str(name)
    }
}

/// Which entity classes are backed by a collection. Callback data is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreFlags {
    pub bot_data:      bool,
    pub chat_data:     bool,
    pub user_data:     bool,
    pub callback_data: bool,
}

/// Number of documents each entity class wrote to the store during a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub user_data:     usize,
    pub chat_data:     usize,
    pub bot_data:      usize,
    pub conversations: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.user_data + self.chat_data + self.bot_data + self.conversations
    }
}

/// Serialize an application struct into a record. Anything but a JSON object is rejected.
pub fn to_record<T: Serialize>(value: &T) -> Result<Record> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(<serde_json::Error as serde::ser::Error>::custom(format!("expected an object, got {other}")).into()),
    }
}

pub fn from_record<T: DeserializeOwned>(record: &Record) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(record.clone()))?)
}

/// Build the keyed-entity document `{_id: id} ∪ record`.
pub(crate) fn document_of(id: DocId, record: &Record) -> Document {
    let mut doc = Document::new();
    doc.insert(ID_FIELD.to_string(), id);
    doc.extend(record.iter().map(|(k, v)| (k.clone(), v.clone())));
    doc
}

/// Strip the identifier off a stored document, returning both parts.
pub(crate) fn split_document(mut doc: Document) -> (Option<DocId>, Record) {
    let id = doc.remove(ID_FIELD);
    (id, doc)
}
