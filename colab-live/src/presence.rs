//! Who is currently looking at a list, and in which colour.
//!
//! Entries are per user, not per connection: two browser tabs of the same
//! user share one entry. The colour is a client-visible tag (any CSS colour
//! string) used to tint that collaborator's focus highlight.

use colab_core::{User, UserId};
use serde::{Deserialize, Serialize};

/// Colour handed to every newly arriving collaborator.
pub const DEFAULT_COLOR: &str = "#18d825";

/// Whether `color` is a hex colour (`#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`)
/// or a bare CSS colour keyword. Colours are written into `style`
/// attributes, so anything else is refused.
pub fn is_valid_color(color: &str) -> bool {
    match color.strip_prefix('#') {
        Some(hex) => {
            matches!(hex.len(), 3 | 4 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => (1..=32).contains(&color.len()) && color.chars().all(|c| c.is_ascii_alphabetic()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub color: String,
}

impl PresenceEntry {
    pub fn new(user: &User) -> Self {
        Self {
            user_id: user.id,
            display_name: user.name.clone(),
            color: DEFAULT_COLOR.to_string(),
        }
    }
}

/// Online collaborators of one list, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    entries: Vec<PresenceEntry>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user` unless already present. Returns the entry and whether it
    /// was created; an existing entry keeps its colour.
    pub fn add(&mut self, user: &User) -> (&PresenceEntry, bool) {
        match self.entries.iter().position(|e| e.user_id == user.id) {
            Some(index) => (&self.entries[index], false),
            None => {
                self.entries.push(PresenceEntry::new(user));
                let last = self.entries.len() - 1;
                (&self.entries[last], true)
            }
        }
    }

    pub fn remove(&mut self, user_id: UserId) -> Option<PresenceEntry> {
        let index = self.entries.iter().position(|e| e.user_id == user_id)?;
        Some(self.entries.remove(index))
    }

    pub fn find(&self, user_id: UserId) -> Option<&PresenceEntry> {
        self.entries.iter().find(|e| e.user_id == user_id)
    }

    /// Recolour a user. Returns false when the user has no entry.
    pub fn set_color(&mut self, user_id: UserId, color: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.user_id == user_id) {
            Some(entry) => {
                entry.color = color.to_string();
                true
            }
            None => false,
        }
    }

    /// Colour of `user_id`, falling back to the default for unknown users.
    pub fn color_of(&self, user_id: UserId) -> &str {
        self.find(user_id)
            .map(|e| e.color.as_str())
            .unwrap_or(DEFAULT_COLOR)
    }

    pub fn all(&self) -> &[PresenceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_new_user() {
        let mut registry = PresenceRegistry::new();
        let (entry, created) = registry.add(&User::new(1, "Ana"));
        assert!(created);
        assert_eq!(entry.display_name, "Ana");
        assert_eq!(entry.color, DEFAULT_COLOR);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_is_idempotent_and_keeps_color() {
        let mut registry = PresenceRegistry::new();
        let ana = User::new(1, "Ana");
        registry.add(&ana);
        assert!(registry.set_color(1, "#ff0000"));

        let (entry, created) = registry.add(&ana);
        assert!(!created);
        assert_eq!(entry.color, "#ff0000");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insertion_order() {
        let mut registry = PresenceRegistry::new();
        registry.add(&User::new(3, "C"));
        registry.add(&User::new(1, "A"));
        registry.add(&User::new(2, "B"));
        let ids: Vec<UserId> = registry.all().iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_remove_and_find() {
        let mut registry = PresenceRegistry::new();
        registry.add(&User::new(1, "Ana"));
        registry.add(&User::new(2, "Bo"));

        assert!(registry.find(2).is_some());
        assert_eq!(registry.remove(2).unwrap().display_name, "Bo");
        assert!(registry.find(2).is_none());
        assert!(registry.remove(2).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_color_unknown_user() {
        let mut registry = PresenceRegistry::new();
        assert!(!registry.set_color(8, "#000"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_valid_colors() {
        for color in ["#18d825", "#fff", "#FFFA", "#11223344", "tomato", "RebeccaPurple"] {
            assert!(is_valid_color(color), "{color} should be accepted");
        }
        for color in [
            "",
            "#",
            "#12",
            "#12345",
            "#ggg",
            "red; background:url(//x)",
            "rgb(1,2,3)",
            "light blue",
            "\"red\"",
        ] {
            assert!(!is_valid_color(color), "{color} should be refused");
        }
    }

    #[test]
    fn test_color_of_falls_back() {
        let mut registry = PresenceRegistry::new();
        registry.add(&User::new(1, "Ana"));
        registry.set_color(1, "rebeccapurple");
        assert_eq!(registry.color_of(1), "rebeccapurple");
        assert_eq!(registry.color_of(2), DEFAULT_COLOR);
    }
}
