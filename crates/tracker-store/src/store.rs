//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info};

use tracker_types::PushToken;

use crate::error::{Error, Result};
use crate::models::{StoredDocument, StoredHistoryEntry};
use crate::queries::HistoryQuery;
use crate::schema;

/// SQLite-based document store for tracker state.
///
/// Each collection has at most one current document and an append-only
/// history. Documents are stored as JSON text; the store does not look
/// inside them.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

fn to_datetime(ts: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts).map_err(|_| Error::InvalidTimestamp(ts))
}

// Document operations
impl Store {
    /// Replace the current document of a collection.
    pub fn put_document(&self, collection: &str, body: &Value) -> Result<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let text = serde_json::to_string(body)?;

        self.conn.execute(
            "INSERT INTO documents (collection, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection) DO UPDATE SET body = ?2, updated_at = ?3",
            rusqlite::params![collection, text, now],
        )?;

        debug!("Stored latest {}", collection);
        Ok(())
    }

    /// Get the current document of a collection.
    pub fn get_document(&self, collection: &str) -> Result<Option<StoredDocument>> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT body, updated_at FROM documents WHERE collection = ?",
                [collection],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(body, updated_at)| {
            Ok(StoredDocument {
                collection: collection.to_string(),
                body: serde_json::from_str(&body)?,
                updated_at: to_datetime(updated_at)?,
            })
        })
        .transpose()
    }
}

// History operations
impl Store {
    /// Append an entry to a collection's history.
    ///
    /// Appending the same `record_id` twice is a no-op. Returns whether a
    /// new row was written.
    pub fn append_history(&self, collection: &str, record_id: &str, body: &Value) -> Result<bool> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let text = serde_json::to_string(body)?;

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO history (collection, record_id, body, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![collection, record_id, text, now],
        )?;

        if inserted == 0 {
            debug!("Ignored duplicate {} history entry {}", collection, record_id);
        }
        Ok(inserted > 0)
    }

    /// Query history entries.
    pub fn query_history(&self, query: &HistoryQuery) -> Result<Vec<StoredHistoryEntry>> {
        let sql = query.build_sql();
        debug!("Executing query: {}", sql);

        let since = query.since_unix();
        let path = query.flag_path();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                query.params(&since, &path).as_slice(),
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, collection, record_id, body, recorded_at)| {
                Ok(StoredHistoryEntry {
                    id,
                    collection,
                    record_id,
                    body: serde_json::from_str(&body)?,
                    recorded_at: to_datetime(recorded_at)?,
                })
            })
            .collect()
    }

    /// Count the entries matching `query`, ignoring its limit and offset.
    pub fn count_history(&self, query: &HistoryQuery) -> Result<u64> {
        let since = query.since_unix();
        let path = query.flag_path();
        let count: i64 = self.conn.query_row(
            &query.build_count_sql(),
            query.params(&since, &path).as_slice(),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Set a top-level boolean field in one history entry's body.
    ///
    /// Returns whether an entry with that `record_id` exists.
    pub fn set_history_flag(
        &self,
        collection: &str,
        record_id: &str,
        field: &str,
        value: bool,
    ) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE history SET body = json_set(body, ?3, json(?4))
             WHERE collection = ?1 AND record_id = ?2",
            rusqlite::params![
                collection,
                record_id,
                format!("$.{field}"),
                if value { "true" } else { "false" },
            ],
        )?;
        Ok(updated > 0)
    }
}

// Push token operations
impl Store {
    /// Register or refresh a push token.
    ///
    /// There is one token per (user, device); a new token replaces the old
    /// one and keeps the original `created_at`.
    pub fn upsert_push_token(&self, token: &PushToken) -> Result<()> {
        self.conn.execute(
            "INSERT INTO push_tokens (user_id, device_id, token, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, device_id) DO UPDATE SET
                token = ?3,
                updated_at = ?5",
            rusqlite::params![
                token.user_id,
                token.device_id,
                token.token,
                token.created_at.unix_timestamp(),
                token.updated_at.unix_timestamp(),
            ],
        )?;

        info!(
            "Registered push token for {}/{}",
            token.user_id, token.device_id
        );
        Ok(())
    }

    /// All push tokens registered for a user.
    pub fn push_tokens(&self, user_id: &str) -> Result<Vec<PushToken>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, device_id, token, created_at, updated_at
             FROM push_tokens WHERE user_id = ? ORDER BY device_id",
        )?;

        let rows = stmt
            .query_map([user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(user_id, device_id, token, created_at, updated_at)| {
                Ok(PushToken {
                    user_id,
                    device_id,
                    token,
                    created_at: to_datetime(created_at)?,
                    updated_at: to_datetime(updated_at)?,
                })
            })
            .collect()
    }
}
