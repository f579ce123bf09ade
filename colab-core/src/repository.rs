//! Repository seam for durable list storage.
//!
//! The live editor only ever calls [`ListRepository::load`] (first attach to a
//! list) and [`ListRepository::save`] (explicit save). Everything else a real
//! backend offers is outside this trait.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::{List, ListId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("List not found: {0}")]
    NotFound(ListId),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Durable storage for lists.
pub trait ListRepository: Send + Sync {
    /// Load the full list, groups and items included.
    fn load(&self, list_id: ListId) -> Result<List, RepositoryError>;

    /// Persist the full list, replacing whatever was stored under its id.
    /// Returns the list as stored.
    fn save(&self, list: &List) -> Result<List, RepositoryError>;
}

/// Process-local repository, used for tests and `--in-memory` runs.
#[derive(Default)]
pub struct InMemoryListRepository {
    lists: RwLock<HashMap<ListId, List>>,
}

impl InMemoryListRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lists(lists: impl IntoIterator<Item = List>) -> Self {
        let repo = Self::new();
        for list in lists {
            repo.insert(list);
        }
        repo
    }

    /// Insert or replace a list.
    pub fn insert(&self, list: List) {
        self.write().insert(list.id, list);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every access is a single insert or lookup, so a poisoned map is still
    // consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ListId, List>> {
        self.lists.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ListId, List>> {
        self.lists.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ListRepository for InMemoryListRepository {
    fn load(&self, list_id: ListId) -> Result<List, RepositoryError> {
        self.read()
            .get(&list_id)
            .cloned()
            .ok_or(RepositoryError::NotFound(list_id))
    }

    fn save(&self, list: &List) -> Result<List, RepositoryError> {
        self.write().insert(list.id, list.clone());
        log::debug!("Saved list {} ({} groups)", list.id, list.groups.len());
        Ok(list.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Group;

    #[test]
    fn test_load_missing() {
        let repo = InMemoryListRepository::new();
        assert!(repo.is_empty());
        assert_eq!(repo.load(4), Err(RepositoryError::NotFound(4)));
    }

    #[test]
    fn test_save_then_load() {
        let repo = InMemoryListRepository::new();
        let mut list = List::new(1, "Weekend");
        list.groups.push(Group::new(1, "default"));

        let stored = repo.save(&list).unwrap();
        assert_eq!(stored, list);
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.load(1).unwrap().groups.len(), 1);
    }

    #[test]
    fn test_save_replaces() {
        let repo = InMemoryListRepository::with_lists([List::new(2, "Old")]);
        repo.save(&List::new(2, "New")).unwrap();
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.load(2).unwrap().title, "New");
    }

    #[test]
    fn test_poisoned_lock_still_serves() {
        let repo = InMemoryListRepository::with_lists([List::new(1, "Kept")]);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = repo.lists.write().unwrap();
            panic!("writer died");
        }));
        assert!(result.is_err());
        assert!(repo.lists.is_poisoned());

        assert_eq!(repo.load(1).unwrap().title, "Kept");
        repo.save(&List::new(2, "After")).unwrap();
        repo.insert(List::new(3, "Inserted"));
        assert_eq!(repo.len(), 3);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(RepositoryError::NotFound(3).to_string(), "List not found: 3");
        assert_eq!(
            RepositoryError::Storage("disk full".into()).to_string(),
            "Storage error: disk full"
        );
    }
}
