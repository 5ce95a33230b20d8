use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures reported by a [`DocumentStore`](crate::traits::DocumentStore) or
/// [`StoreClient`](crate::traits::StoreClient) implementation. None of them is retried by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(String),

    #[error("collection '{0}' already exists")]
    AlreadyExists(String),

    #[error("duplicate document id {id} in collection '{collection}'")]
    DuplicateKey { collection: String, id: String },

    #[error("store connection is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed conversation key '{key}': {reason}")]
    MalformedKey { key: String, reason: String },

    #[error("malformed document in collection '{collection}': {reason}")]
    MalformedDocument { collection: String, reason: String },

    #[error("persistence has been flushed and closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("flush task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn malformed_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedKey {
            key:    key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed_document(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDocument {
            collection: collection.into(),
            reason:     reason.into(),
        }
    }

    /// True if the error came from the store collaborator rather than from the engine itself.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
