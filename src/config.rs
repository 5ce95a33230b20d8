use fieldx::fxstruct;
use std::collections::HashSet;
use std::time::Duration;

use crate::field_filter::FieldFilter;

/// Options of a [`Persistence`](crate::persistence::Persistence) instance.
///
/// ```ignore
/// let config = PersistenceConfig::builder()
///     .write_back(false)
///     .user_collection("users")
///     .bot_collection("bot")
///     .ignored_fields(["session".to_string()])
///     .build()?;
/// ```
///
/// An entity class without a collection name is not persisted at all.
#[derive(Debug, Clone)]
#[fxstruct(no_new, builder)]
pub struct PersistenceConfig {
    /// Defer all store writes until flush.
    #[fieldx(get(copy), default(true))]
    write_back: bool,

    /// Create configured collections on connect. An already existing collection is fine.
    #[fieldx(get(copy), default(false))]
    create_collection_if_missing: bool,

    #[fieldx(optional, get(off), builder(into))]
    user_collection: String,

    #[fieldx(optional, get(off), builder(into))]
    chat_collection: String,

    #[fieldx(optional, get(off), builder(into))]
    bot_collection: String,

    #[fieldx(optional, get(off), builder(into))]
    conversations_collection: String,

    /// Fields stripped from records of every entity class.
    #[fieldx(get, builder(into), default(HashSet::new()))]
    ignored_fields: HashSet<String>,

    #[fieldx(get, builder(into), default(HashSet::new()))]
    user_ignored_fields: HashSet<String>,

    #[fieldx(get, builder(into), default(HashSet::new()))]
    chat_ignored_fields: HashSet<String>,

    #[fieldx(get, builder(into), default(HashSet::new()))]
    bot_ignored_fields: HashSet<String>,

    /// How often the host is expected to push updates. The engine itself doesn't schedule anything.
    #[fieldx(get(copy), default(Duration::from_secs(60)))]
    update_interval: Duration,
}

impl PersistenceConfig {
    pub fn user_collection(&self) -> Option<&str> {
        self.user_collection.as_deref()
    }

    pub fn chat_collection(&self) -> Option<&str> {
        self.chat_collection.as_deref()
    }

    pub fn bot_collection(&self) -> Option<&str> {
        self.bot_collection.as_deref()
    }

    pub fn conversations_collection(&self) -> Option<&str> {
        self.conversations_collection.as_deref()
    }

    pub fn user_filter(&self) -> FieldFilter {
        FieldFilter::resolve(self.ignored_fields(), self.user_ignored_fields())
    }

    pub fn chat_filter(&self) -> FieldFilter {
        FieldFilter::resolve(self.ignored_fields(), self.chat_ignored_fields())
    }

    pub fn bot_filter(&self) -> FieldFilter {
        FieldFilter::resolve(self.ignored_fields(), self.bot_ignored_fields())
    }
}
