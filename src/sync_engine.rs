//! Read/write/diff/flush algorithms over the entity mirrors.
//!
//! The engine works in one of two modes:
//!
//! - **write-through**: every accepted update lands in the mirror and, after a diff against the stored document, in
//!   the store;
//! - **write-back**: updates land in the mirror only; the store catches up when [`SyncEngine::load_all`] (and its
//!   singleton/conversation counterparts) run at flush time.
//!
//! Either way a store write happens only when the new document differs from both the cached and the stored one.
//! The diff and the write are not atomic: concurrent writers to the same id end up with last-write-wins.

mod conversation;
mod singleton;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::instrument;

use crate::entity_cache::EntityCache;
use crate::error::Result;
use crate::traits::DocumentStore;
use crate::traits::EntityKey;
use crate::types::document_of;
use crate::types::split_document;
use crate::types::DocId;
use crate::types::Document;
use crate::types::Record;
use crate::types::SyncOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncEngine {
    write_back: bool,
}

impl SyncEngine {
    pub fn new(write_back: bool) -> Self {
        Self { write_back }
    }

    #[inline]
    pub fn is_write_back(&self) -> bool {
        self.write_back
    }

    /// Cached record of `id`, populating the mirror on first use.
    pub async fn read<K: EntityKey>(&self, cache: &EntityCache<K>, id: &K) -> Result<Option<Record>> {
        if !cache.exists() {
            return Ok(None);
        }
        cache.populate_if_needed().await?;
        Ok(cache.get(id).await)
    }

    /// Copy of every cached record, populating the mirror on first use.
    pub async fn read_all<K: EntityKey>(&self, cache: &EntityCache<K>) -> Result<HashMap<K, Record>> {
        if !cache.exists() {
            return Ok(HashMap::new());
        }
        cache.populate_if_needed().await?;
        Ok(cache.snapshot())
    }

    /// Accept a new state of `id`. Empty records, whether submitted so or emptied by the field filter, are never
    /// persisted; deleting goes through [`drop_record`](Self::drop_record).
    #[instrument(level = "trace", skip(self, cache, record), fields(entity = %cache.name()))]
    pub async fn write<K: EntityKey>(&self, cache: &EntityCache<K>, id: &K, record: &Record) -> Result<SyncOutcome> {
        let Some(collection) = cache.collection()
        else {
            return Ok(SyncOutcome::Inactive);
        };

        let record = cache.filter().apply(record);
        if record.is_empty() {
            return Ok(SyncOutcome::Skipped);
        }

        let previous = cache.get(id).await;
        if previous.as_ref() == Some(&record) {
            log::debug!("[{}] record {id} is unchanged", cache.name());
            return Ok(SyncOutcome::Unchanged);
        }

        cache.put(id.clone(), record.clone()).await;

        if self.write_back {
            log::debug!("[{}] record {id} deferred until flush", cache.name());
            return Ok(SyncOutcome::Deferred);
        }

        let doc_id = id.to_doc_id();
        let doc = document_of(doc_id.clone(), &record);
        let outcome = upsert_document(collection.as_ref(), &doc_id, doc).await;
        if outcome.is_err() {
            // The store didn't take it; the next identical write must retry.
            cache.restore(id, previous).await;
        }
        outcome
    }

    /// Pull the stored state of `id` and merge it, stored fields winning, into `local` and the mirror. The store is
    /// not the source of truth while writes are deferred, so this is a no-op in write-back mode.
    #[instrument(level = "trace", skip(self, cache, local), fields(entity = %cache.name()))]
    pub async fn refresh<K: EntityKey>(
        &self,
        cache: &EntityCache<K>,
        id: &K,
        local: &mut Record,
    ) -> Result<SyncOutcome> {
        let Some(collection) = cache.collection()
        else {
            return Ok(SyncOutcome::Inactive);
        };
        if self.write_back {
            return Ok(SyncOutcome::Skipped);
        }

        let Some(doc) = collection.find_one(&id.to_doc_id()).await?
        else {
            return Ok(SyncOutcome::Skipped);
        };
        let (_, stored) = split_document(doc);

        Ok(merge_into(local, cache.filter().apply_owned(stored), |merged| async move {
            let merged = cache.filter().apply(&merged);
            if cache.get(id).await.as_ref() != Some(&merged) {
                cache.put(id.clone(), merged).await;
                true
            }
            else {
                false
            }
        })
        .await)
    }

    /// Remove `id` from the mirror and the store. Unknown ids are a no-op.
    #[instrument(level = "trace", skip(self, cache), fields(entity = %cache.name()))]
    pub async fn drop_record<K: EntityKey>(&self, cache: &EntityCache<K>, id: &K) -> Result<SyncOutcome> {
        let Some(collection) = cache.collection()
        else {
            return Ok(SyncOutcome::Inactive);
        };

        // Make sure ids only known to the store are found too.
        cache.populate_if_needed().await?;

        let Some(removed) = cache.remove(id).await
        else {
            return Ok(SyncOutcome::Absent);
        };

        if let Err(err) = collection.delete_one(&id.to_doc_id()).await {
            cache.put(id.clone(), removed).await;
            return Err(err.into());
        }
        log::debug!("[{}] record {id} removed", cache.name());
        Ok(SyncOutcome::Removed)
    }

    /// Write every cached record that differs from its stored document. Records are independent, so they are
    /// synchronized concurrently.
    ///
    /// Returns the number of documents written.
    #[instrument(level = "trace", skip(self, cache), fields(entity = %cache.name()))]
    pub async fn load_all<K: EntityKey>(&self, cache: &EntityCache<K>) -> Result<usize> {
        let Some(collection) = cache.collection()
        else {
            return Ok(0);
        };

        let records = cache.snapshot();
        log::info!("Flushing {} cache; count={}", cache.name(), records.len());

        let mut tasks = JoinSet::new();
        for (id, record) in records {
            let collection = Arc::clone(&collection);
            tasks.spawn(async move {
                let doc_id = id.to_doc_id();
                let doc = document_of(doc_id.clone(), &record);
                upsert_document(collection.as_ref(), &doc_id, doc).await
            });
        }

        let mut written = 0;
        while let Some(joined) = tasks.join_next().await {
            if joined??.is_store_write() {
                written += 1;
            }
        }

        log::debug!("[{}] flush wrote {written} document(s)", cache.name());
        Ok(written)
    }
}

/// Diff-then-write: insert if there's no stored document, replace if it differs, otherwise do nothing.
#[instrument(level = "trace", skip(collection, doc), fields(collection = %collection.name()))]
pub(crate) async fn upsert_document(collection: &dyn DocumentStore, id: &DocId, doc: Document) -> Result<SyncOutcome> {
    Ok(match collection.find_one(id).await? {
        None => {
            collection.insert_one(doc).await?;
            SyncOutcome::Inserted
        }
        Some(old) if old == doc => SyncOutcome::Unchanged,
        Some(_) => {
            collection.replace_one(id, doc).await?;
            SyncOutcome::Replaced
        }
    })
}

// Merge `stored` into `local` and hand the merged record over to `update_mirror`, which reports whether the mirror
// changed.
async fn merge_into<F, Fut>(local: &mut Record, stored: Record, update_mirror: F) -> SyncOutcome
where
    F: FnOnce(Record) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let mut local_changed = false;
    for (field, value) in stored {
        if local.get(&field) != Some(&value) {
            local.insert(field, value);
            local_changed = true;
        }
    }

    let mirror_changed = update_mirror(local.clone()).await;

    if local_changed || mirror_changed {
        SyncOutcome::Refreshed
    }
    else {
        SyncOutcome::Unchanged
    }
}
