//! # colab-live: Live collaborative editing of lists
//!
//! Holds one authoritative in-memory copy of every list being edited,
//! applies the actions editors send, and pushes rendered fragments back to
//! every editor of that list.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket       ┌─────────────┐
//! │ Browser /   │ ◄─────────────────► │ ListServer  │
//! │ ListClient  │  JSON actions  ►    └──────┬──────┘
//! └─────────────┘  ◄ HTML fragments          │
//!                                     ┌──────┴──────┐
//!                                     │ Coordinator │──► ListRepository
//!                                     └──────┬──────┘    (load / save)
//!                                            │ list id
//!                                     ┌──────┴──────┐
//!                                     │ Session     │ Document, presence,
//!                                     │ (one lock)  │ connections
//!                                     └──────┬──────┘
//!                                            │ ViewRenderer
//!                                     ┌──────┴──────┐
//!                                     │ Fanout      │ one receiver per
//!                                     └─────────────┘ connection
//! ```
//!
//! ## Modules
//!
//! - [`sequencer`]: Per-document id allocation
//! - [`document`]: Live list state with no-op-on-missing mutations
//! - [`presence`]: Online collaborators and their colours
//! - [`connection`]: Connections attached to a session
//! - [`broadcast`]: Per-session fan-out with lag accounting
//! - [`render`]: Fragment renderer seam and the htmx renderer
//! - [`session`]: One list's live coordinator
//! - [`coordinator`]: Session directory: attach, dispatch, detach, save
//! - [`protocol`]: JSON action envelope
//! - [`server`]: WebSocket endpoint
//! - [`client`]: WebSocket client
//! - [`storage`]: RocksDB list store

pub mod broadcast;
pub mod client;
pub mod connection;
pub mod coordinator;
pub mod document;
pub mod presence;
pub mod protocol;
pub mod render;
pub mod sequencer;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use broadcast::{Fanout, FanoutStats, Payload};
pub use client::{ClientError, ClientEvent, ConnectionState, ListClient};
pub use connection::{Connection, ConnectionId, ConnectionRegistry, TransportId};
pub use coordinator::{Attachment, Coordinator, CoordinatorConfig, CoordinatorError};
pub use document::{Document, DocumentView};
pub use presence::{is_valid_color, PresenceEntry, PresenceRegistry, DEFAULT_COLOR};
pub use protocol::{Action, ActionKind, ProtocolError};
pub use render::{HtmlRenderer, Swap, ViewRenderer};
pub use sequencer::IdSequencer;
pub use server::{EditorQuery, ListServer, ServerConfig, ServerStats};
pub use session::{DetachOutcome, Session, NEW_GROUP_NAME, NEW_ITEM_TEXT};
pub use storage::{ListMetadata, ListStore, StoreConfig, StoreError};
