//! # wb-persist
//!
//! Write-back/write-through synchronization cache that mirrors application state in memory and keeps it consistent
//! with a document store, while avoiding redundant round-trips.
//!
//! Think of it as an L1 cache in front of a persistence collection, built for hosts that hand over their whole state
//! on every tick and expect it back on startup.
//!
//! # The Basics
//!
//! State is organized in entity classes, each mirrored by its own cache and backed by its own collection:
//!
//! - keyed records (user and chat data): id to [`Record`](types::Record);
//! - a singleton record (bot data), stored wrapped under a `content` field of a document with a fixed id;
//! - conversations: handler name to a map of [`ConversationKey`](key_codec::ConversationKey) to state, one document
//!   per handler with the keys encoded into field names.
//!
//! An entity class without a configured collection is inert: reads return nothing, writes do nothing.
//!
//! The cache operates on the following principles:
//!
//! - It is backend-agnostic: the store is anything implementing [`StoreClient`] and [`DocumentStore`].
//! - A mirror is populated from a full collection scan on first use and is the authoritative read source from then
//!   on. External changes become visible only through the refresh operations.
//! - A store write happens only if the new document differs from both the cached and the stored one.
//! - In write-back mode all store writes are deferred until [`Persistence::flush`]; in write-through mode they happen
//!   immediately.
//! - Configured field names are stripped from every record before it reaches the mirror or the store.
//! - Fully async. As an "L1" cache, it assumes a single owning process and doesn't do any multi-writer conflict
//!   resolution.
//!
//! ```ignore
//! let store = MemoryStore::new();
//! let config = PersistenceConfig::builder()
//!     .write_back(false)
//!     .user_collection("users")
//!     .build()?;
//! let persistence = Persistence::connect(store, config).await?;
//!
//! persistence.update_user_data(42, &record).await?;
//! let users = persistence.get_user_data().await?;
//! persistence.flush().await?;
//! ```

pub mod config;
pub mod entity_cache;
pub mod error;
pub mod field_filter;
pub mod key_codec;
pub mod persistence;
pub mod store;
pub mod sync_engine;
#[cfg(feature = "tracing")]
pub mod telemetry;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use persistence::Persistence;
#[doc(inline)]
pub use sync_engine::SyncEngine;
#[doc(inline)]
pub use traits::DocumentStore;
#[doc(inline)]
pub use traits::StoreClient;

pub mod prelude {
    pub use crate::config::PersistenceConfig;
    pub use crate::entity_cache::ConversationMap;
    pub use crate::entity_cache::ConversationState;
    pub use crate::error::Error;
    pub use crate::error::Result;
    pub use crate::error::StoreError;
    pub use crate::field_filter::FieldFilter;
    pub use crate::key_codec::ConversationKey;
    pub use crate::persistence::Persistence;
    pub use crate::sync_engine::SyncEngine;
    pub use crate::traits::DocumentStore;
    pub use crate::traits::EntityKey;
    pub use crate::traits::StoreClient;
    pub use crate::types::*;
}
