use std::collections::HashSet;

use crate::types::Record;

/// Resolved set of field names that never reach the store nor a caller.
///
/// Built once per entity class from the global and the entity-specific ignore lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFilter {
    ignored: HashSet<String>,
}

impl FieldFilter {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn resolve(global: &HashSet<String>, entity: &HashSet<String>) -> Self {
        Self {
            ignored: global.union(entity).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty()
    }

    pub fn is_ignored(&self, field: &str) -> bool {
        self.ignored.contains(field)
    }

    pub fn fields(&self) -> &HashSet<String> {
        &self.ignored
    }

    /// Copy of `record` without the ignored fields. The caller's record is left alone.
    pub fn apply(&self, record: &Record) -> Record {
        if self.is_empty() {
            return record.clone();
        }
        record
            .iter()
            .filter(|(name, _)| !self.is_ignored(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    pub(crate) fn apply_owned(&self, mut record: Record) -> Record {
        if !self.is_empty() {
            record.retain(|name, _| !self.is_ignored(name));
        }
        record
    }
}
