//! Directory of live sessions, keyed by list id.
//!
//! The coordinator is the only way in and out of the live editor: attach a
//! transport to a list, dispatch decoded actions, detach, and run the
//! explicit save flow. Sessions are created on first attach by loading the
//! list through the [`ListRepository`] and evicted once nobody is attached
//! and nothing is left unsaved.

use std::collections::HashMap;
use std::sync::Arc;

use colab_core::{ListId, ListRepository, RepositoryError, User};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::broadcast::Payload;
use crate::connection::{Connection, TransportId};
use crate::document::DocumentView;
use crate::presence::PresenceEntry;
use crate::protocol::Action;
use crate::render::ViewRenderer;
use crate::session::{Session, NEW_GROUP_NAME, NEW_ITEM_TEXT};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("List not found: {0}")]
    NotFound(ListId),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("No live session for list {0}")]
    NoSession(ListId),
}

impl From<RepositoryError> for CoordinatorError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(id) => Self::NotFound(id),
            RepositoryError::Storage(msg) => Self::Storage(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Payloads buffered per connection before it starts lagging.
    pub fanout_capacity: usize,
    /// Drop sessions with no connections and no unsaved changes.
    pub evict_idle_sessions: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            fanout_capacity: 256,
            evict_idle_sessions: true,
        }
    }
}

/// A successful attach: the registered connection, the receiver its
/// outbound task drains, and the session it joined.
pub struct Attachment {
    pub connection: Connection,
    pub outbound: broadcast::Receiver<Payload>,
    pub session: Arc<Session>,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    sessions: RwLock<HashMap<ListId, Arc<Session>>>,
    /// Per-list gates held while a list is being loaded.
    loading: Mutex<HashMap<ListId, Arc<Mutex<()>>>>,
    repository: Arc<dyn ListRepository>,
    renderer: Arc<dyn ViewRenderer>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        repository: Arc<dyn ListRepository>,
        renderer: Arc<dyn ViewRenderer>,
    ) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
            repository,
            renderer,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn ListRepository> {
        &self.repository
    }

    /// Attach `transport` to `list_id` on behalf of `user`.
    ///
    /// Loads the list on first use; a load failure creates nothing and is
    /// returned to the caller. Every attach broadcasts the presence list to
    /// the whole session, the new connection included.
    pub async fn attach(
        &self,
        list_id: ListId,
        user: &User,
        transport: TransportId,
    ) -> Result<Attachment, CoordinatorError> {
        loop {
            let session = self.get_or_load(list_id).await?;
            let connection = Connection::new(list_id, user.id, transport);
            if let Some(outbound) = session.join(connection.clone(), user).await {
                return Ok(Attachment {
                    connection,
                    outbound,
                    session,
                });
            }
            // Evicted between lookup and join; the map no longer holds it.
            log::debug!("List {list_id}: session closed during attach, retrying");
        }
    }

    async fn get_or_load(&self, list_id: ListId) -> Result<Arc<Session>, CoordinatorError> {
        // Fast path: read lock
        if let Some(session) = self.session(list_id).await {
            return Ok(session);
        }

        // One loader per list; attaches to other lists never wait on it.
        let gate = self.loading.lock().await.entry(list_id).or_default().clone();
        let result = {
            let _loading = gate.lock().await;
            match self.session(list_id).await {
                Some(session) => Ok(session),
                None => self.load_session(list_id).await,
            }
        };

        let mut loading = self.loading.lock().await;
        if loading.get(&list_id).is_some_and(|current| Arc::ptr_eq(current, &gate)) {
            loading.remove(&list_id);
        }
        result
    }

    async fn load_session(&self, list_id: ListId) -> Result<Arc<Session>, CoordinatorError> {
        let repository = self.repository.clone();
        let loaded = tokio::task::spawn_blocking(move || repository.load(list_id))
            .await
            .map_err(|e| CoordinatorError::Storage(format!("Load task failed: {e}")))?;
        let list = match loaded {
            Ok(list) => list,
            Err(e) => {
                log::warn!("List {list_id}: load failed: {e}");
                return Err(e.into());
            }
        };
        log::info!(
            "List {list_id}: session opened ({} groups, {} items)",
            list.groups.len(),
            list.item_count()
        );
        let session = Arc::new(Session::new(
            list,
            self.config.fanout_capacity,
            self.renderer.clone(),
        ));
        self.sessions.write().await.insert(list_id, session.clone());
        Ok(session)
    }

    /// Apply `action` on behalf of `connection`. Actions for a list without
    /// a live session are dropped.
    pub async fn dispatch(&self, connection: &Connection, action: Action) {
        let Some(session) = self.session(connection.list_id).await else {
            log::warn!(
                "List {}: dropping {} from connection {}, no live session",
                connection.list_id,
                action.kind(),
                connection.id
            );
            return;
        };
        let actor = connection.user_id;
        log::trace!("List {}: {:?} from user {actor}", connection.list_id, action);

        match action {
            Action::FocusItem { group_id, item_id } => {
                session.focus_item(group_id, item_id, actor).await;
            }
            Action::UnfocusItem { group_id, item_id } => {
                session.unfocus_item(group_id, item_id, actor).await;
            }
            Action::UpdateColor { user_id, color } => {
                session.update_color(user_id, &color).await;
            }
            Action::AddGroup => {
                session.add_group(NEW_GROUP_NAME).await;
            }
            Action::EditGroup { group_id, text } => {
                session.edit_group(group_id, &text).await;
            }
            Action::AddItem { group_id } => {
                session.add_item(group_id, NEW_ITEM_TEXT, actor).await;
            }
            Action::DeleteGroup { group_id } => {
                session.delete_group(group_id).await;
            }
            Action::DeleteItem { group_id, item_id } => {
                session.delete_item(group_id, item_id, actor).await;
            }
            Action::EditItem {
                group_id,
                item_id,
                description,
                quantity,
            } => {
                session
                    .edit_item(group_id, item_id, &description, &quantity, actor)
                    .await;
            }
        }
    }

    /// Decode a text frame and dispatch it. Decode failures are logged and
    /// dropped; returns whether the frame was a valid action.
    pub async fn dispatch_text(&self, connection: &Connection, text: &str) -> bool {
        match Action::decode(text) {
            Ok(action) => {
                self.dispatch(connection, action).await;
                true
            }
            Err(e) => {
                log::warn!(
                    "List {}: discarding message from connection {}: {e}",
                    connection.list_id,
                    connection.id
                );
                false
            }
        }
    }

    /// Remove `connection`'s transport from its session, evicting the
    /// session if it is left idle and clean.
    pub async fn detach(&self, connection: &Connection) {
        let list_id = connection.list_id;
        let Some(session) = self.session(list_id).await else {
            return;
        };
        let outcome = session.detach(connection.transport).await;
        log::info!(
            "List {list_id}: user {} left (connection {}, {} remaining)",
            connection.user_id,
            connection.id,
            outcome.remaining
        );

        if outcome.remaining > 0 || !self.config.evict_idle_sessions {
            return;
        }
        if outcome.dirty {
            log::info!("List {list_id}: keeping idle session with unsaved changes");
            return;
        }

        let mut sessions = self.sessions.write().await;
        let same = sessions
            .get(&list_id)
            .is_some_and(|current| Arc::ptr_eq(current, &session));
        if same && session.close_if_idle().await {
            sessions.remove(&list_id);
            log::info!("List {list_id}: session evicted");
        }
    }

    /// Explicit save: snapshot, persist, then clear the dirty flag if no
    /// edit landed while the repository was writing.
    pub async fn save(&self, list_id: ListId) -> Result<DocumentView, CoordinatorError> {
        let session = self
            .session(list_id)
            .await
            .ok_or(CoordinatorError::NoSession(list_id))?;
        let view = session.current_view().await;
        let stored = self.repository.save(&view.list)?;
        let cleared = session.mark_saved(view.revision).await;
        log::info!(
            "List {list_id}: saved revision {}{}",
            view.revision,
            if cleared { "" } else { " (newer edits still pending)" }
        );
        Ok(DocumentView {
            list: stored,
            dirty: !cleared,
            revision: view.revision,
        })
    }

    pub async fn session(&self, list_id: ListId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&list_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn connection_count(&self, list_id: ListId) -> usize {
        match self.session(list_id).await {
            Some(session) => session.connection_count().await,
            None => 0,
        }
    }

    pub async fn presence(&self, list_id: ListId) -> Vec<PresenceEntry> {
        match self.session(list_id).await {
            Some(session) => session.presence().await,
            None => Vec::new(),
        }
    }

    pub async fn current_view(&self, list_id: ListId) -> Option<DocumentView> {
        match self.session(list_id).await {
            Some(session) => Some(session.current_view().await),
            None => None,
        }
    }
}
