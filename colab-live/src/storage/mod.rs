//! Durable list storage.
//!
//! ```text
//! ┌─────────────┐   load / save   ┌──────────────┐
//! │ Coordinator │ ──────────────► │ ListStore    │
//! │ (in-memory) │                 │ (RocksDB)    │
//! └─────────────┘                 └──────┬───────┘
//!                                        │ column families
//!                                        ▼
//!                     ┌──────────────────────────────────────┐
//!                     │ CF "lists":    LZ4 bincode snapshots │
//!                     │ CF "metadata": save count, sizes     │
//!                     └──────────────────────────────────────┘
//! ```
//!
//! Only whole lists are written, and only by the explicit save flow;
//! individual edits live in memory until then.

pub mod rocks;

pub use rocks::{ListMetadata, ListStore, StoreConfig, StoreError};
