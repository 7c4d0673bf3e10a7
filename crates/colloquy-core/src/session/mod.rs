//! Sessions: live objects, persistence, history, and transfer
//!
//! ```text
//!   ChatSession (live, shared handle)
//!        │  to_snapshot / from_snapshot
//!        ▼
//!   SerializedSession ──► SessionStore (live map + persisted table)
//!        │                      │ save_state
//!        │                      ▼
//!        │               StorageBackend (workspace / application scope)
//!        ▼
//!   SessionTransferBroker (profile scope, cross-workspace)
//! ```
//!
//! The store owns which sessions are live and what the persisted table looks
//! like; sessions themselves are location-blind handles that any task can
//! mutate. Transfer moves a snapshot between workspaces through a shared
//! profile-scope table with a short expiry.

pub mod types;

mod model;
mod persistence;
mod store;
mod transfer;

pub use model::{ChatRequest, ChatResponse, ChatSession, InitState};
pub use persistence::{
    SESSIONS_STORAGE_KEY, SerializedRequest, SerializedSession, encode_sessions, parse_sessions,
};
pub use store::{HistoryEntry, SessionStore};
pub use transfer::{
    SessionTransferBroker, TRANSFER_STORAGE_KEY, TransferRecord, TransferredSessionData,
};
