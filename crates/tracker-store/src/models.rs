//! Data models for stored documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// The current-value document of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Collection name, e.g. `status` or `led_config`.
    pub collection: String,
    pub body: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One entry of a collection's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredHistoryEntry {
    /// Database row ID. Increases with insertion order.
    pub id: i64,
    pub collection: String,
    /// Caller supplied id used to ignore duplicate appends.
    pub record_id: String,
    pub body: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}
