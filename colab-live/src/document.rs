//! Authoritative in-memory copy of one list while it is being edited.
//!
//! All mutations follow the same policy: a reference to a group or item that
//! no longer exists is a no-op (`None`), never an error. Actions arrive
//! asynchronously from many clients and routinely name entities another
//! collaborator just deleted.

use colab_core::{Group, GroupId, Item, ItemId, List, ListId};

use crate::sequencer::IdSequencer;

/// Live document state: the list plus its dirty flag and id sources.
#[derive(Debug, Clone)]
pub struct Document {
    list: List,
    dirty: bool,
    /// Bumped on every successful mutation; lets a save confirm it
    /// persisted the latest state before clearing `dirty`.
    revision: u64,
    group_ids: IdSequencer,
    item_ids: IdSequencer,
}

/// Read-only snapshot handed to the explicit save flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentView {
    pub list: List,
    pub dirty: bool,
    pub revision: u64,
}

impl Document {
    /// Wrap a freshly loaded list. Sequencers start after the largest
    /// group and item ids already present.
    pub fn load(list: List) -> Self {
        let group_ids = IdSequencer::after(list.max_group_id());
        let item_ids = IdSequencer::after(list.max_item_id());
        Self {
            list,
            dirty: false,
            revision: 0,
            group_ids,
            item_ids,
        }
    }

    pub fn id(&self) -> ListId {
        self.list.id
    }

    pub fn list(&self) -> &List {
        &self.list
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn group(&self, group_id: GroupId) -> Option<&Group> {
        self.list.group(group_id)
    }

    pub fn view(&self) -> DocumentView {
        DocumentView {
            list: self.list.clone(),
            dirty: self.dirty,
            revision: self.revision,
        }
    }

    /// Clear `dirty` if nothing changed since `revision` was snapshotted.
    pub fn mark_saved(&mut self, revision: u64) -> bool {
        if self.revision != revision {
            return false;
        }
        self.dirty = false;
        true
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.revision += 1;
    }

    /// Append a group holding one placeholder item.
    pub fn add_group(&mut self, name: &str, placeholder_item: &str) -> Group {
        let mut group = Group::new(self.group_ids.next_id(), name);
        group
            .items
            .push(Item::new(self.item_ids.next_id(), placeholder_item, 0));
        self.list.groups.push(group.clone());
        self.touch();
        group
    }

    pub fn edit_group(&mut self, group_id: GroupId, name: &str) -> Option<Group> {
        let group = self.list.group_mut(group_id)?;
        group.name = name.to_string();
        let edited = group.clone();
        self.touch();
        Some(edited)
    }

    pub fn delete_group(&mut self, group_id: GroupId) -> Option<Group> {
        let index = self.list.groups.iter().position(|g| g.id == group_id)?;
        let removed = self.list.groups.remove(index);
        self.touch();
        Some(removed)
    }

    /// Append an item at the end of the group; its order is the prior item count.
    pub fn add_item(&mut self, group_id: GroupId, description: &str) -> Option<Item> {
        let group = self.list.group_mut(group_id)?;
        let item = Item::new(self.item_ids.next_id(), description, group.items.len() as i64);
        group.items.push(item.clone());
        self.touch();
        Some(item)
    }

    /// Overwrite description and quantity. `quantity` must parse as an integer;
    /// otherwise the item is left untouched.
    pub fn edit_item(
        &mut self,
        group_id: GroupId,
        item_id: ItemId,
        description: &str,
        quantity: &str,
    ) -> Option<Item> {
        let list_id = self.list.id;
        let item = self.list.group_mut(group_id)?.item_mut(item_id)?;
        let quantity = match quantity.parse::<i64>() {
            Ok(q) => q,
            Err(e) => {
                log::warn!(
                    "List {list_id}: ignoring edit of item {item_id}, quantity {quantity:?} is not an integer: {e}"
                );
                return None;
            }
        };
        item.description = description.to_string();
        item.quantity = quantity;
        let edited = item.clone();
        self.touch();
        Some(edited)
    }

    pub fn delete_item(&mut self, group_id: GroupId, item_id: ItemId) -> Option<Item> {
        let group = self.list.group_mut(group_id)?;
        let index = group.items.iter().position(|i| i.id == item_id)?;
        let removed = group.items.remove(index);
        self.touch();
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_empty_group() -> Document {
        let mut list = List::new(1, "Groceries");
        list.groups.push(Group::new(1, "default"));
        Document::load(list)
    }

    #[test]
    fn test_load_is_clean() {
        let doc = one_empty_group();
        assert_eq!(doc.id(), 1);
        assert!(!doc.is_dirty());
        assert_eq!(doc.revision(), 0);
    }

    #[test]
    fn test_add_item_to_empty_group() {
        let mut doc = one_empty_group();
        let item = doc.add_item(1, "New Item").unwrap();

        let group = doc.group(1).unwrap();
        assert_eq!(group.items.len(), 1);
        assert_eq!(group.items[0], item);
        assert_eq!(item.description, "New Item");
        assert_eq!(item.quantity, 1);
        assert_eq!(item.order, 0);
        assert!(doc.is_dirty());
    }

    #[test]
    fn test_add_item_order_follows_count() {
        let mut doc = one_empty_group();
        doc.add_item(1, "a").unwrap();
        doc.add_item(1, "b").unwrap();
        let third = doc.add_item(1, "c").unwrap();
        assert_eq!(third.order, 2);
    }

    #[test]
    fn test_add_item_missing_group() {
        let mut doc = one_empty_group();
        assert!(doc.add_item(99, "x").is_none());
        assert!(!doc.is_dirty());
    }

    #[test]
    fn test_add_group_has_placeholder_item() {
        let mut doc = one_empty_group();
        let group = doc.add_group("New Group", "New Item");
        assert_eq!(group.id, 2);
        assert_eq!(group.name, "New Group");
        assert_eq!(group.items.len(), 1);
        assert_eq!(group.items[0].description, "New Item");
        assert_eq!(doc.list().groups.last().unwrap(), &group);
    }

    #[test]
    fn test_ids_unique_across_adds() {
        let mut doc = one_empty_group();
        let mut group_ids = vec![1];
        let mut item_ids = Vec::new();
        for _ in 0..20 {
            let g = doc.add_group("g", "i");
            group_ids.push(g.id);
            item_ids.push(g.items[0].id);
            item_ids.push(doc.add_item(g.id, "x").unwrap().id);
        }
        assert!(group_ids.windows(2).all(|w| w[0] < w[1]));
        assert!(item_ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let mut doc = one_empty_group();
        let g = doc.add_group("g", "i");
        doc.delete_group(g.id).unwrap();
        let next = doc.add_group("h", "i");
        assert!(next.id > g.id);
        assert!(next.items[0].id > g.items[0].id);
    }

    #[test]
    fn test_sequencers_start_after_loaded_ids() {
        let mut list = List::new(3, "Loaded");
        let mut group = Group::new(10, "Bakery");
        group.items.push(Item::new(40, "Bread", 0));
        list.groups.push(group);
        let mut doc = Document::load(list);

        let added = doc.add_group("More", "New Item");
        assert_eq!(added.id, 11);
        assert_eq!(added.items[0].id, 41);
    }

    #[test]
    fn test_edit_group() {
        let mut doc = one_empty_group();
        let edited = doc.edit_group(1, "Produce").unwrap();
        assert_eq!(edited.name, "Produce");
        assert_eq!(doc.group(1).unwrap().name, "Produce");
        assert!(doc.is_dirty());
    }

    #[test]
    fn test_edit_missing_group_is_noop() {
        let mut doc = one_empty_group();
        let before = doc.view();
        assert!(doc.edit_group(99, "x").is_none());
        assert_eq!(doc.view(), before);
    }

    #[test]
    fn test_delete_group_twice() {
        let mut doc = one_empty_group();
        assert!(doc.delete_group(1).is_some());
        let after_first = doc.view();
        assert!(doc.delete_group(1).is_none());
        assert_eq!(doc.view(), after_first);
        assert!(doc.list().groups.is_empty());
    }

    #[test]
    fn test_edit_item() {
        let mut doc = one_empty_group();
        let item = doc.add_item(1, "New Item").unwrap();
        let edited = doc.edit_item(1, item.id, "Milk", "3").unwrap();
        assert_eq!(edited.description, "Milk");
        assert_eq!(edited.quantity, 3);
        assert_eq!(doc.group(1).unwrap().item(item.id).unwrap(), &edited);
    }

    #[test]
    fn test_edit_item_bad_quantity_leaves_item() {
        let mut doc = one_empty_group();
        let item = doc.add_item(1, "New Item").unwrap();
        let before = doc.view();

        assert!(doc.edit_item(1, item.id, "Milk", "three").is_none());
        assert!(doc.edit_item(1, item.id, "Milk", "2.5").is_none());
        assert!(doc.edit_item(1, item.id, "Milk", "").is_none());

        assert_eq!(doc.view(), before);
        assert_eq!(doc.group(1).unwrap().item(item.id).unwrap().quantity, 1);
    }

    #[test]
    fn test_edit_item_negative_quantity_parses() {
        let mut doc = one_empty_group();
        let item = doc.add_item(1, "New Item").unwrap();
        assert_eq!(doc.edit_item(1, item.id, "Refund", "-2").unwrap().quantity, -2);
    }

    #[test]
    fn test_edit_item_missing_references() {
        let mut doc = one_empty_group();
        let item = doc.add_item(1, "New Item").unwrap();
        assert!(doc.edit_item(2, item.id, "x", "1").is_none());
        assert!(doc.edit_item(1, item.id + 100, "x", "1").is_none());
    }

    #[test]
    fn test_delete_item() {
        let mut doc = one_empty_group();
        let a = doc.add_item(1, "a").unwrap();
        let b = doc.add_item(1, "b").unwrap();
        assert_eq!(doc.delete_item(1, a.id).unwrap(), a);
        assert_eq!(doc.group(1).unwrap().items, vec![b.clone()]);

        let revision = doc.revision();
        assert!(doc.delete_item(1, a.id).is_none());
        assert!(doc.delete_item(7, b.id).is_none());
        assert_eq!(doc.revision(), revision);
    }

    #[test]
    fn test_mark_saved_matches_revision() {
        let mut doc = one_empty_group();
        doc.add_group("g", "i");
        let snapshot = doc.view();
        assert!(snapshot.dirty);

        assert!(doc.mark_saved(snapshot.revision));
        assert!(!doc.is_dirty());
    }

    #[test]
    fn test_mark_saved_stale_revision_keeps_dirty() {
        let mut doc = one_empty_group();
        doc.add_group("g", "i");
        let snapshot = doc.view();
        doc.edit_group(1, "changed after snapshot").unwrap();

        assert!(!doc.mark_saved(snapshot.revision));
        assert!(doc.is_dirty());
    }
}
