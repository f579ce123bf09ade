//! Live coordinator for one list.
//!
//! A session owns the document, its presence registry and its connection
//! set behind a single mutex, so at most one operation touches a list at a
//! time. Every successful mutation renders its fragment and the save
//! indicator and hands both to the fan-out before the lock is released:
//! receivers observe changes in the order they were applied.

use std::sync::Arc;

use colab_core::{Group, GroupId, Item, ItemId, List, ListId, User, UserId};
use tokio::sync::{broadcast, Mutex};

use crate::broadcast::{Fanout, FanoutStats, Payload};
use crate::connection::{Connection, ConnectionRegistry, TransportId};
use crate::document::{Document, DocumentView};
use crate::presence::{is_valid_color, PresenceEntry, PresenceRegistry};
use crate::render::{Swap, ViewRenderer};

/// Name given to groups created by an add-group action.
pub const NEW_GROUP_NAME: &str = "New Group";
/// Description given to items created by an add-item action, and to the
/// placeholder item of a new group.
pub const NEW_ITEM_TEXT: &str = "New Item";

struct SessionState {
    document: Document,
    presence: PresenceRegistry,
    connections: ConnectionRegistry,
    /// Set once the session has been evicted; no connection may join after.
    closed: bool,
}

/// Result of removing a transport from a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetachOutcome {
    pub removed: Vec<Connection>,
    /// Users whose last connection was removed.
    pub departed: Vec<UserId>,
    pub remaining: usize,
    pub dirty: bool,
}

pub struct Session {
    list_id: ListId,
    state: Mutex<SessionState>,
    fanout: Fanout,
    renderer: Arc<dyn ViewRenderer>,
}

impl Session {
    pub fn new(list: List, fanout_capacity: usize, renderer: Arc<dyn ViewRenderer>) -> Self {
        Self {
            list_id: list.id,
            state: Mutex::new(SessionState {
                document: Document::load(list),
                presence: PresenceRegistry::new(),
                connections: ConnectionRegistry::new(),
                closed: false,
            }),
            fanout: Fanout::new(fanout_capacity),
            renderer,
        }
    }

    pub fn list_id(&self) -> ListId {
        self.list_id
    }

    /// Register a connection for `user` and broadcast the presence list.
    ///
    /// The receiver is subscribed before the presence broadcast, so the
    /// joining connection sees it too. Returns `None` if the session was
    /// evicted in the meantime; the caller must look the list up again.
    pub async fn join(&self, connection: Connection, user: &User) -> Option<broadcast::Receiver<Payload>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return None;
        }
        let outbound = self.fanout.subscribe();
        log::info!(
            "List {}: user {} joined (connection {})",
            self.list_id,
            user.id,
            connection.id
        );
        state.connections.add(connection);
        let (_, created) = state.presence.add(user);
        if created {
            log::debug!("List {}: {} is now online", self.list_id, user.name);
        }
        self.broadcast_presence(&state);
        Some(outbound)
    }

    /// Remove every connection riding on `transport`. Users left without a
    /// connection lose their presence entry; the presence list is broadcast
    /// only if someone actually left.
    pub async fn detach(&self, transport: TransportId) -> DetachOutcome {
        let mut state = self.state.lock().await;
        let removed = state.connections.remove_by_transport(transport);

        let mut departed = Vec::new();
        for connection in &removed {
            if departed.contains(&connection.user_id) {
                continue;
            }
            if state.connections.count_for_user(connection.user_id) == 0 {
                state.presence.remove(connection.user_id);
                departed.push(connection.user_id);
            }
        }
        if !departed.is_empty() {
            self.broadcast_presence(&state);
        }

        DetachOutcome {
            removed,
            departed,
            remaining: state.connections.len(),
            dirty: state.document.is_dirty(),
        }
    }

    /// Mark the session closed if it has no connections and nothing unsaved.
    pub async fn close_if_idle(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.closed {
            return true;
        }
        if state.connections.is_empty() && !state.document.is_dirty() {
            state.closed = true;
        }
        state.closed
    }

    pub async fn add_group(&self, name: &str) -> Group {
        let mut state = self.state.lock().await;
        let group = state.document.add_group(name, NEW_ITEM_TEXT);
        let fragment = self.renderer.render_group(&group, Swap::Append);
        self.broadcast_change(&state, fragment);
        group
    }

    pub async fn edit_group(&self, group_id: GroupId, name: &str) -> Option<Group> {
        let mut state = self.state.lock().await;
        let Some(group) = state.document.edit_group(group_id, name) else {
            self.missing(format_args!("edit of group {group_id}"));
            return None;
        };
        let fragment = self.renderer.render_group(&group, Swap::Replace);
        self.broadcast_change(&state, fragment);
        Some(group)
    }

    pub async fn delete_group(&self, group_id: GroupId) -> Option<Group> {
        let mut state = self.state.lock().await;
        let Some(group) = state.document.delete_group(group_id) else {
            self.missing(format_args!("delete of group {group_id}"));
            return None;
        };
        let fragment = self.renderer.render_group(&group, Swap::Delete);
        self.broadcast_change(&state, fragment);
        Some(group)
    }

    /// Append an item; the fragment is tinted with `actor`'s colour.
    pub async fn add_item(&self, group_id: GroupId, text: &str, actor: UserId) -> Option<Item> {
        let mut state = self.state.lock().await;
        let Some(item) = state.document.add_item(group_id, text) else {
            self.missing(format_args!("add of item to group {group_id}"));
            return None;
        };
        let fragment = self.render_item(&state, group_id, &item, actor, Swap::Append);
        self.broadcast_change(&state, fragment);
        Some(item)
    }

    pub async fn edit_item(
        &self,
        group_id: GroupId,
        item_id: ItemId,
        description: &str,
        quantity: &str,
        actor: UserId,
    ) -> Option<Item> {
        let mut state = self.state.lock().await;
        let Some(item) = state.document.edit_item(group_id, item_id, description, quantity) else {
            self.missing(format_args!("edit of item {group_id}/{item_id}"));
            return None;
        };
        let fragment = self.render_item(&state, group_id, &item, actor, Swap::Replace);
        self.broadcast_change(&state, fragment);
        Some(item)
    }

    pub async fn delete_item(&self, group_id: GroupId, item_id: ItemId, actor: UserId) -> Option<Item> {
        let mut state = self.state.lock().await;
        let Some(item) = state.document.delete_item(group_id, item_id) else {
            self.missing(format_args!("delete of item {group_id}/{item_id}"));
            return None;
        };
        let fragment = self.render_item(&state, group_id, &item, actor, Swap::Delete);
        self.broadcast_change(&state, fragment);
        Some(item)
    }

    /// Tell everyone `by` is looking at an item. Never touches the document.
    /// An unknown item still produces a fragment, built from a placeholder.
    pub async fn focus_item(&self, group_id: GroupId, item_id: ItemId, by: UserId) {
        let state = self.state.lock().await;
        let color = state.presence.color_of(by).to_string();
        let fragment = self.render_target(&state, group_id, item_id, &color, Swap::Focus);
        self.fanout.send(fragment);
    }

    pub async fn unfocus_item(&self, group_id: GroupId, item_id: ItemId, _by: UserId) {
        let state = self.state.lock().await;
        let fragment = self.render_target(&state, group_id, item_id, "", Swap::Unfocus);
        self.fanout.send(fragment);
    }

    /// Recolour `user_id` and broadcast the presence list. Unknown users and
    /// malformed colours are a no-op and broadcast nothing.
    pub async fn update_color(&self, user_id: UserId, color: &str) -> bool {
        if !is_valid_color(color) {
            log::warn!(
                "List {}: ignoring colour {color:?} for user {user_id}, not a hex colour or keyword",
                self.list_id
            );
            return false;
        }
        let mut state = self.state.lock().await;
        if !state.presence.set_color(user_id, color) {
            self.missing(format_args!("colour change of absent user {user_id}"));
            return false;
        }
        self.broadcast_presence(&state);
        true
    }

    /// Snapshot for the explicit save flow.
    pub async fn current_view(&self) -> DocumentView {
        self.state.lock().await.document.view()
    }

    /// Acknowledge that the snapshot at `revision` was persisted. Clears the
    /// dirty flag and broadcasts the save indicator unless the document moved
    /// on in the meantime.
    pub async fn mark_saved(&self, revision: u64) -> bool {
        let mut state = self.state.lock().await;
        if !state.document.mark_saved(revision) {
            log::debug!(
                "List {}: saved revision {revision} is stale (now {}), staying dirty",
                self.list_id,
                state.document.revision()
            );
            return false;
        }
        let indicator = self.renderer.render_save_indicator(state.document.list(), false);
        self.fanout.send(indicator);
        true
    }

    pub async fn presence(&self) -> Vec<PresenceEntry> {
        self.state.lock().await.presence.all().to_vec()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.document.is_dirty()
    }

    pub fn fanout_stats(&self) -> FanoutStats {
        self.fanout.stats()
    }

    /// Account for payloads a lagging connection skipped.
    pub fn record_lag(&self, skipped: u64) {
        self.fanout.record_lag(skipped);
    }

    fn broadcast_presence(&self, state: &SessionState) {
        let fragment = self.renderer.render_presence(state.presence.all());
        self.fanout.send(fragment);
    }

    fn broadcast_change(&self, state: &SessionState, fragment: String) {
        self.fanout.send(fragment);
        let document = &state.document;
        let indicator = self.renderer.render_save_indicator(document.list(), document.is_dirty());
        self.fanout.send(indicator);
    }

    fn render_item(&self, state: &SessionState, group_id: GroupId, item: &Item, actor: UserId, swap: Swap) -> String {
        let color = state.presence.color_of(actor);
        match state.document.group(group_id) {
            Some(group) => self.renderer.render_item(group, item, color, swap),
            None => self.renderer.render_item(&Group::new(group_id, ""), item, color, swap),
        }
    }

    fn render_target(&self, state: &SessionState, group_id: GroupId, item_id: ItemId, color: &str, swap: Swap) -> String {
        let group = state.document.group(group_id);
        match group.and_then(|g| g.item(item_id).map(|item| (g, item))) {
            Some((group, item)) => self.renderer.render_item(group, item, color, swap),
            None => {
                log::debug!(
                    "List {}: focus target {group_id}/{item_id} not found, sending placeholder",
                    self.list_id
                );
                let group = Group::new(group_id, "");
                let item = Item::new(item_id, "", 0);
                self.renderer.render_item(&group, &item, color, swap)
            }
        }
    }

    fn missing(&self, what: std::fmt::Arguments<'_>) {
        log::debug!("List {}: ignoring {what}, target no longer exists", self.list_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HtmlRenderer;
    use uuid::Uuid;

    fn session() -> Session {
        let mut list = List::new(1, "Groceries");
        list.groups.push(Group::new(1, "default"));
        Session::new(list, 64, Arc::new(HtmlRenderer))
    }

    fn drain(rx: &mut broadcast::Receiver<Payload>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            out.push(payload.to_string());
        }
        out
    }

    async fn join(session: &Session, user: &User) -> (Connection, broadcast::Receiver<Payload>) {
        let connection = Connection::new(session.list_id(), user.id, Uuid::new_v4());
        let rx = session.join(connection.clone(), user).await.unwrap();
        (connection, rx)
    }

    #[tokio::test]
    async fn test_join_broadcasts_presence() {
        let session = session();
        let (_, mut rx_a) = join(&session, &User::new(1, "Ana")).await;
        let (_, mut rx_b) = join(&session, &User::new(2, "Bo")).await;

        let a = drain(&mut rx_a);
        assert_eq!(a.len(), 2);
        assert!(a[1].contains("Ana") && a[1].contains("Bo"));

        let b = drain(&mut rx_b);
        assert_eq!(b.len(), 1);
        assert!(b[0].contains("collaborators"));
        assert_eq!(session.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_add_item_scenario() {
        let session = session();
        let (conn, mut rx) = join(&session, &User::new(1, "Ana")).await;
        drain(&mut rx);

        let item = session.add_item(1, NEW_ITEM_TEXT, conn.user_id).await.unwrap();
        assert_eq!(item.description, "New Item");
        assert_eq!(item.quantity, 1);

        let view = session.current_view().await;
        assert!(view.dirty);
        assert_eq!(view.list.groups[0].items, vec![item]);

        let payloads = drain(&mut rx);
        assert_eq!(payloads.len(), 2);
        assert!(payloads[0].contains("beforeend:#items-1"));
        assert!(payloads[1].contains("Unsaved changes"));
    }

    #[tokio::test]
    async fn test_edit_missing_group_changes_nothing() {
        let session = session();
        let (_, mut rx) = join(&session, &User::new(1, "Ana")).await;
        drain(&mut rx);
        let before = session.current_view().await;

        assert!(session.edit_group(99, "x").await.is_none());

        assert_eq!(session.current_view().await, before);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_add_group_fragment_and_indicator() {
        let session = session();
        let (_, mut rx) = join(&session, &User::new(1, "Ana")).await;
        drain(&mut rx);

        let group = session.add_group(NEW_GROUP_NAME).await;
        assert_eq!(group.name, "New Group");
        assert_eq!(group.items[0].description, NEW_ITEM_TEXT);

        let payloads = drain(&mut rx);
        assert_eq!(payloads.len(), 2);
        assert!(payloads[0].contains("beforeend:#groups"));
        assert!(payloads[0].contains(&format!("group-{}", group.id)));
        assert!(payloads[1].contains("save-state"));
    }

    #[tokio::test]
    async fn test_delete_group_twice() {
        let session = session();
        let (_, mut rx) = join(&session, &User::new(1, "Ana")).await;
        drain(&mut rx);

        assert!(session.delete_group(1).await.is_some());
        assert_eq!(drain(&mut rx).len(), 2);
        assert!(session.delete_group(1).await.is_none());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_edit_item_bad_quantity_no_broadcast() {
        let session = session();
        let (conn, mut rx) = join(&session, &User::new(1, "Ana")).await;
        let item = session.add_item(1, "Milk", conn.user_id).await.unwrap();
        drain(&mut rx);

        assert!(session.edit_item(1, item.id, "Milk", "lots", conn.user_id).await.is_none());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(session.current_view().await.list.groups[0].items[0].quantity, 1);

        let edited = session.edit_item(1, item.id, "Oat milk", "2", conn.user_id).await.unwrap();
        assert_eq!(edited.quantity, 2);
        let payloads = drain(&mut rx);
        assert!(payloads[0].contains(&format!("outerHTML:#item-1-{}", item.id)));
    }

    #[tokio::test]
    async fn test_delete_item() {
        let session = session();
        let (conn, mut rx) = join(&session, &User::new(1, "Ana")).await;
        let item = session.add_item(1, "Milk", conn.user_id).await.unwrap();
        drain(&mut rx);

        assert_eq!(session.delete_item(1, item.id, conn.user_id).await, Some(item.clone()));
        let payloads = drain(&mut rx);
        assert!(payloads[0].contains(&format!("delete:#item-1-{}", item.id)));
        assert!(session.delete_item(1, item.id, conn.user_id).await.is_none());
    }

    #[tokio::test]
    async fn test_focus_uses_actor_color_and_keeps_clean() {
        let session = session();
        let (conn, mut rx) = join(&session, &User::new(1, "Ana")).await;
        let item = session.add_item(1, "Milk", conn.user_id).await.unwrap();
        let view = session.current_view().await;
        assert!(session.mark_saved(view.revision).await);
        session.update_color(1, "tomato").await;
        drain(&mut rx);

        session.focus_item(1, item.id, 1).await;
        session.unfocus_item(1, item.id, 1).await;

        let payloads = drain(&mut rx);
        assert_eq!(payloads.len(), 2);
        assert!(payloads[0].contains("solid tomato"));
        assert!(!payloads[1].contains("outline"));
        assert!(!session.is_dirty().await);
        assert_eq!(session.current_view().await.revision, view.revision);
    }

    #[tokio::test]
    async fn test_focus_unknown_target_sends_placeholder() {
        let session = session();
        let (_, mut rx) = join(&session, &User::new(1, "Ana")).await;
        drain(&mut rx);

        session.focus_item(8, 80, 1).await;
        let payloads = drain(&mut rx);
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].contains("item-8-80"));
    }

    #[tokio::test]
    async fn test_update_color() {
        let session = session();
        let (_, mut rx) = join(&session, &User::new(1, "Ana")).await;
        drain(&mut rx);

        assert!(session.update_color(1, "#123456").await);
        assert!(drain(&mut rx)[0].contains("#123456"));

        assert!(!session.update_color(7, "#000000").await);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_update_color_refuses_css_injection() {
        let session = session();
        let (_, mut rx) = join(&session, &User::new(1, "Ana")).await;
        drain(&mut rx);

        assert!(!session.update_color(1, "red; background:url(//x)").await);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(session.presence().await[0].color, crate::presence::DEFAULT_COLOR);
    }

    #[tokio::test]
    async fn test_detach_last_connection_of_user() {
        let session = session();
        let ana = User::new(1, "Ana");
        let (first, _rx1) = join(&session, &ana).await;
        let (_second, _rx2) = join(&session, &ana).await;
        let (_, mut rx_bo) = join(&session, &User::new(2, "Bo")).await;
        drain(&mut rx_bo);

        let outcome = session.detach(first.transport).await;
        assert_eq!(outcome.removed.len(), 1);
        assert!(outcome.departed.is_empty());
        assert_eq!(session.presence().await.len(), 2);
        assert!(drain(&mut rx_bo).is_empty());
    }

    #[tokio::test]
    async fn test_detach_removes_presence() {
        let session = session();
        let (ana, _rx) = join(&session, &User::new(1, "Ana")).await;
        let (_, mut rx_bo) = join(&session, &User::new(2, "Bo")).await;
        drain(&mut rx_bo);

        let outcome = session.detach(ana.transport).await;
        assert_eq!(outcome.departed, vec![1]);
        assert_eq!(outcome.remaining, 1);

        let payloads = drain(&mut rx_bo);
        assert_eq!(payloads.len(), 1);
        assert!(!payloads[0].contains("Ana"));
        assert!(payloads[0].contains("Bo"));
    }

    #[tokio::test]
    async fn test_detach_unknown_transport() {
        let session = session();
        let outcome = session.detach(Uuid::new_v4()).await;
        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.remaining, 0);
    }

    #[tokio::test]
    async fn test_mark_saved_stale() {
        let session = session();
        session.add_group("A").await;
        let view = session.current_view().await;
        session.add_group("B").await;

        assert!(!session.mark_saved(view.revision).await);
        assert!(session.is_dirty().await);

        let latest = session.current_view().await;
        assert!(session.mark_saved(latest.revision).await);
        assert!(!session.is_dirty().await);
    }

    #[tokio::test]
    async fn test_close_if_idle() {
        let session = session();
        let (conn, _rx) = join(&session, &User::new(1, "Ana")).await;
        assert!(!session.close_if_idle().await);

        session.detach(conn.transport).await;
        assert!(session.close_if_idle().await);

        let late = Connection::new(1, 2, Uuid::new_v4());
        assert!(session.join(late, &User::new(2, "Bo")).await.is_none());
    }

    #[tokio::test]
    async fn test_dirty_session_not_closed() {
        let session = session();
        session.add_group("unsaved").await;
        assert!(!session.close_if_idle().await);
    }

    #[tokio::test]
    async fn test_concurrent_adds_get_distinct_ids() {
        let session = Arc::new(session());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..25 {
                    ids.push(session.add_item(1, "x", 1).await.unwrap().id);
                }
                ids
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 200);
        assert_eq!(session.current_view().await.list.groups[0].items.len(), 200);
    }
}
