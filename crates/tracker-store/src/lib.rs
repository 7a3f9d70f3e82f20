//! Local persistence for the GPS tracker relay.
//!
//! This crate provides a small SQLite-backed document store: each
//! collection has a single "latest" JSON document and an append-only
//! history, plus a table of registered push tokens.
//!
//! # Example
//!
//! ```
//! use tracker_store::{HistoryQuery, Store};
//! use serde_json::json;
//!
//! let store = Store::open_in_memory()?;
//! store.put_document("status", &json!({"send_reason": 1, "bat_percent": 80}))?;
//! store.append_history("status", "3f2a", &json!({"send_reason": 1}))?;
//!
//! let latest = store.get_document("status")?;
//! let history = store.query_history(&HistoryQuery::new("status").limit(10))?;
//! assert!(latest.is_some());
//! assert_eq!(history.len(), 1);
//! # Ok::<(), tracker_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{StoredDocument, StoredHistoryEntry};
pub use queries::HistoryQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/tracker-relay/relay.db`
/// - macOS: `~/Library/Application Support/tracker-relay/relay.db`
/// - Windows: `C:\Users\<user>\AppData\Local\tracker-relay\relay.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("tracker-relay")
        .join("relay.db")
}
