//! Local override list of blocked accounts.

use std::collections::HashSet;

/// Unique ids that are restricted regardless of the remote verdict.
///
/// Empty unless configured.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    ids: HashSet<String>,
}

impl BlockList {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids
                .into_iter()
                .map(Into::into)
                .filter(|id: &String| !id.is_empty())
                .collect(),
        }
    }

    pub fn insert(&mut self, unique_id: impl Into<String>) {
        self.ids.insert(unique_id.into());
    }

    #[must_use]
    pub fn contains(&self, unique_id: &str) -> bool {
        self.ids.contains(unique_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
