//! # colab-core: Shared list model for colablists
//!
//! Plain entities for a collaborative grocery/task list plus the repository
//! seam the live editor loads documents through.
//!
//! ```text
//! List ── Group ── Item
//!   │       │        └─ description, quantity, order, checked
//!   │       └─ name
//!   └─ title, description, creator
//! ```

use serde::{Deserialize, Serialize};

pub mod repository;

pub use repository::{InMemoryListRepository, ListRepository, RepositoryError};

pub type ListId = i64;
pub type GroupId = i64;
pub type ItemId = i64;
pub type UserId = i64;

/// An authenticated user as seen by the editor.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// Check mark of an item. `Partial` covers "some of the quantity bought".
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum CheckState {
    #[default]
    Unchecked,
    Partial,
    Checked,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub description: String,
    pub quantity: i64,
    /// Display rank within the owning group.
    pub order: i64,
    pub checked: CheckState,
}

impl Item {
    pub fn new(id: ItemId, description: impl Into<String>, order: i64) -> Self {
        Self {
            id,
            description: description.into(),
            quantity: 1,
            order,
            checked: CheckState::Unchecked,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub items: Vec<Item>,
}

impl Group {
    pub fn new(id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn item(&self, item_id: ItemId) -> Option<&Item> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: ItemId) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.id == item_id)
    }
}

/// A list as stored by a repository. Group order is display order.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct List {
    pub id: ListId,
    pub title: String,
    pub description: String,
    pub creator: Option<User>,
    pub groups: Vec<Group>,
}

impl List {
    pub fn new(id: ListId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            creator: None,
            groups: Vec::new(),
        }
    }

    pub fn group(&self, group_id: GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == group_id)
    }

    pub fn group_mut(&mut self, group_id: GroupId) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.id == group_id)
    }

    /// Largest group id in the list, 0 when there are none.
    pub fn max_group_id(&self) -> GroupId {
        self.groups.iter().map(|g| g.id).max().unwrap_or(0)
    }

    /// Largest item id across all groups, 0 when there are none.
    pub fn max_item_id(&self) -> ItemId {
        self.groups
            .iter()
            .flat_map(|g| g.items.iter())
            .map(|i| i.id)
            .max()
            .unwrap_or(0)
    }

    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> List {
        let mut list = List::new(1, "Groceries");
        let mut produce = Group::new(3, "Produce");
        produce.items.push(Item::new(7, "Apples", 0));
        produce.items.push(Item::new(2, "Pears", 1));
        list.groups.push(produce);
        list.groups.push(Group::new(5, "Dairy"));
        list
    }

    #[test]
    fn test_item_defaults() {
        let item = Item::new(1, "Milk", 4);
        assert_eq!(item.quantity, 1);
        assert_eq!(item.order, 4);
        assert_eq!(item.checked, CheckState::Unchecked);
    }

    #[test]
    fn test_max_ids() {
        let list = sample();
        assert_eq!(list.max_group_id(), 5);
        assert_eq!(list.max_item_id(), 7);
        assert_eq!(list.item_count(), 2);
    }

    #[test]
    fn test_max_ids_empty() {
        let list = List::new(9, "Empty");
        assert_eq!(list.max_group_id(), 0);
        assert_eq!(list.max_item_id(), 0);
    }

    #[test]
    fn test_lookup() {
        let mut list = sample();
        assert!(list.group(3).is_some());
        assert!(list.group(4).is_none());
        assert_eq!(list.group(3).unwrap().item(2).unwrap().description, "Pears");

        list.group_mut(5).unwrap().name = "Cheese".into();
        assert_eq!(list.group(5).unwrap().name, "Cheese");
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["title"], "Groceries");
        assert_eq!(value["groups"][0]["items"][1]["description"], "Pears");
        assert_eq!(value["groups"][0]["items"][0]["checked"], "Unchecked");
    }
}
