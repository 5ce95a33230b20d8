use serde_json::Value;
use tracing::instrument;

use super::merge_into;
use super::SyncEngine;
use crate::entity_cache::SingletonCache;
use crate::error::Result;
use crate::traits::DocumentStore;
use crate::types::Document;
use crate::types::Record;
use crate::types::SyncOutcome;
use crate::types::BOT_DATA_KEY;
use crate::types::CONTENT_FIELD;
use crate::types::ID_FIELD;

fn singleton_id() -> Value {
    Value::from(BOT_DATA_KEY)
}

fn singleton_document(record: &Record) -> Document {
    let mut doc = Document::new();
    doc.insert(ID_FIELD.to_string(), singleton_id());
    doc.insert(CONTENT_FIELD.to_string(), Value::Object(record.clone()));
    doc
}

impl SyncEngine {
    /// The singleton record. The stored document is only read once; afterwards the mirror answers.
    pub async fn read_singleton(&self, cache: &SingletonCache) -> Result<Record> {
        let Some(collection) = cache.collection()
        else {
            return Ok(Record::new());
        };

        if let Some(content) = cache.get() {
            return Ok(content);
        }

        let content = match collection.find_one(&singleton_id()).await? {
            Some(doc) => cache.unwrap_document(collection.name(), doc)?,
            None => Record::new(),
        };

        // A write may have landed while the store was being queried; it is newer than what we've got.
        if let Some(written) = cache.get() {
            return Ok(written);
        }
        cache.put(content.clone());
        Ok(content)
    }

    #[instrument(level = "trace", skip(self, cache, record), fields(entity = %cache.name()))]
    pub async fn write_singleton(&self, cache: &SingletonCache, record: &Record) -> Result<SyncOutcome> {
        let Some(collection) = cache.collection()
        else {
            return Ok(SyncOutcome::Inactive);
        };

        let record = cache.filter().apply(record);
        if record.is_empty() {
            return Ok(SyncOutcome::Skipped);
        }
        let previous = cache.get();
        if previous.as_ref() == Some(&record) {
            return Ok(SyncOutcome::Unchanged);
        }

        cache.put(record.clone());

        if self.write_back {
            return Ok(SyncOutcome::Deferred);
        }

        let outcome = upsert_singleton(collection.as_ref(), &record).await;
        if outcome.is_err() {
            cache.restore(previous);
        }
        outcome
    }

    /// Same as [`refresh`](Self::refresh) for the singleton: the stored content is merged into `local` and the
    /// mirror. A no-op in write-back mode.
    #[instrument(level = "trace", skip(self, cache, local), fields(entity = %cache.name()))]
    pub async fn refresh_singleton(&self, cache: &SingletonCache, local: &mut Record) -> Result<SyncOutcome> {
        let Some(collection) = cache.collection()
        else {
            return Ok(SyncOutcome::Inactive);
        };
        if self.write_back {
            return Ok(SyncOutcome::Skipped);
        }

        let Some(doc) = collection.find_one(&singleton_id()).await?
        else {
            return Ok(SyncOutcome::Skipped);
        };
        let stored = cache.unwrap_document(collection.name(), doc)?;

        Ok(merge_into(local, stored, |merged| async move {
            let merged = cache.filter().apply(&merged);
            if cache.get().as_ref() != Some(&merged) {
                cache.put(merged);
                true
            }
            else {
                false
            }
        })
        .await)
    }

    /// Flush-time synchronization of the singleton. Nothing is written unless the record was loaded or updated and
    /// is not empty.
    pub async fn flush_singleton(&self, cache: &SingletonCache) -> Result<usize> {
        let Some(collection) = cache.collection()
        else {
            return Ok(0);
        };
        let Some(content) = cache.get().filter(|c| !c.is_empty())
        else {
            return Ok(0);
        };

        log::info!("Flushing {} cache", cache.name());
        let outcome = upsert_singleton(collection.as_ref(), &content).await?;
        Ok(usize::from(outcome.is_store_write()))
    }
}

/// Diff-then-write of the wrapped singleton document. An existing document only gets its content field updated.
#[instrument(level = "trace", skip(collection, record), fields(collection = %collection.name()))]
async fn upsert_singleton(collection: &dyn DocumentStore, record: &Record) -> Result<SyncOutcome> {
    let new_doc = singleton_document(record);
    Ok(match collection.find_one(&singleton_id()).await? {
        None => {
            collection.insert_one(new_doc).await?;
            SyncOutcome::Inserted
        }
        Some(old) if old == new_doc => SyncOutcome::Unchanged,
        Some(_) => {
            let mut fields = Document::new();
            fields.insert(CONTENT_FIELD.to_string(), Value::Object(record.clone()));
            collection.update_fields(&singleton_id(), fields).await?;
            SyncOutcome::Updated
        }
    })
}
