//! Query builder for history entries.
//!
//! # Example
//!
//! ```
//! use tracker_store::{Store, HistoryQuery};
//! use time::{OffsetDateTime, Duration};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let query = HistoryQuery::new("location")
//!     .since(yesterday)
//!     .limit(50);
//!
//! let entries = store.query_history(&query)?;
//! assert!(entries.is_empty());
//! # Ok::<(), tracker_store::Error>(())
//! ```

use rusqlite::ToSql;
use time::OffsetDateTime;

/// Fluent query builder for [`Store::query_history`](crate::Store::query_history).
///
/// Entries are returned newest first.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub collection: String,
    /// Only entries recorded at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Only entries whose boolean body field is false or absent.
    pub unset_flag: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl HistoryQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            since: None,
            unset_flag: None,
            limit: None,
            offset: None,
        }
    }

    #[must_use]
    pub fn since(mut self, since: OffsetDateTime) -> Self {
        self.since = Some(since);
        self
    }

    /// Skip entries where the top-level body field `field` is `true`.
    #[must_use]
    pub fn without_flag(mut self, field: impl Into<String>) -> Self {
        self.unset_flag = Some(field.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// `WHERE` clause shared by select and count. Parameters are `?1`
    /// collection, `?2` since and, with a flag filter, `?3` the JSON path.
    fn where_clause(&self) -> &'static str {
        if self.unset_flag.is_some() {
            "WHERE collection = ?1 AND recorded_at >= ?2
             AND COALESCE(json_extract(body, ?3), 0) = 0"
        } else {
            "WHERE collection = ?1 AND recorded_at >= ?2"
        }
    }

    pub(crate) fn build_sql(&self) -> String {
        let mut sql = format!(
            "SELECT id, collection, record_id, body, recorded_at FROM history {} ORDER BY id DESC",
            self.where_clause()
        );

        // SQLite requires a LIMIT before OFFSET; -1 means unbounded.
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        sql
    }

    /// Count matching entries. Limit and offset do not apply.
    pub(crate) fn build_count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM history {}", self.where_clause())
    }

    pub(crate) fn since_unix(&self) -> i64 {
        self.since.map_or(i64::MIN, OffsetDateTime::unix_timestamp)
    }

    pub(crate) fn flag_path(&self) -> Option<String> {
        self.unset_flag.as_ref().map(|field| format!("$.{field}"))
    }

    /// Bind values for [`build_sql`](Self::build_sql) and
    /// [`build_count_sql`](Self::build_count_sql).
    pub(crate) fn params<'a>(
        &'a self,
        since: &'a i64,
        path: &'a Option<String>,
    ) -> Vec<&'a dyn ToSql> {
        let mut params: Vec<&dyn ToSql> =
            vec![&self.collection as &dyn ToSql, since as &dyn ToSql];
        if let Some(path) = path {
            params.push(path as &dyn ToSql);
        }
        params
    }
}
