//! [`StateStore`] backed by `tracker-store`'s SQLite document store.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use tracker_store::{HistoryQuery, Store};
use tracker_types::PushToken;

use crate::entity::Entity;
use crate::error::StoreError;
use crate::traits::{HistoryFilter, StateStore};

/// SQLite state store.
///
/// The connection is not `Sync`, so every call takes the mutex. Calls are
/// short and never hold the lock across other awaits.
pub struct SqliteStateStore {
    store: Mutex<Store>,
}

impl SqliteStateStore {
    pub fn new(store: Store) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self::new(Store::open(path)?))
    }

    /// In-memory store, for tests and `--no-persist` runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Store::open_in_memory()?))
    }
}

fn to_query(entity: &Entity, filter: &HistoryFilter) -> HistoryQuery {
    let mut query = HistoryQuery::new(entity.collection());
    if let Some(since) = filter.since {
        query = query.since(since);
    }
    if filter.unread_only {
        query = query.without_flag("read");
    }
    if let Some(limit) = filter.limit {
        query = query.limit(limit);
    }
    if let Some(offset) = filter.offset {
        query = query.offset(offset);
    }
    query
}

/// The record's own `id` when it has one, so that retried appends collapse.
fn record_id(record: &Value) -> String {
    match record.get("id") {
        Some(Value::String(id)) => id.clone(),
        _ => Uuid::new_v4().to_string(),
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_latest(&self, entity: &Entity) -> Result<Option<Value>, StoreError> {
        let store = self.store.lock().await;
        Ok(store.get_document(&entity.collection())?.map(|doc| doc.body))
    }

    async fn set_latest(&self, entity: &Entity, record: Value) -> Result<(), StoreError> {
        let store = self.store.lock().await;
        store.put_document(&entity.collection(), &record)?;
        Ok(())
    }

    async fn append_history(&self, entity: &Entity, record: Value) -> Result<(), StoreError> {
        let id = record_id(&record);
        let store = self.store.lock().await;
        if !store.append_history(&entity.collection(), &id, &record)? {
            debug!("{} history already has {}", entity, id);
        }
        Ok(())
    }

    async fn query_history(
        &self,
        entity: &Entity,
        filter: &HistoryFilter,
    ) -> Result<Vec<Value>, StoreError> {
        let query = to_query(entity, filter);
        let store = self.store.lock().await;
        let entries = store.query_history(&query)?;
        Ok(entries.into_iter().map(|entry| entry.body).collect())
    }

    async fn count_history(
        &self,
        entity: &Entity,
        filter: &HistoryFilter,
    ) -> Result<u64, StoreError> {
        let query = to_query(entity, filter);
        let store = self.store.lock().await;
        Ok(store.count_history(&query)?)
    }

    async fn mark_read(&self, entity: &Entity, id: &str) -> Result<bool, StoreError> {
        let store = self.store.lock().await;
        Ok(store.set_history_flag(&entity.collection(), id, "read", true)?)
    }

    async fn upsert_push_token(&self, token: PushToken) -> Result<(), StoreError> {
        let store = self.store.lock().await;
        store.upsert_push_token(&token)?;
        Ok(())
    }

    async fn push_tokens(&self, user_id: &str) -> Result<Vec<PushToken>, StoreError> {
        let store = self.store.lock().await;
        Ok(store.push_tokens(user_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StateStoreExt;
    use serde_json::json;
    use tracker_types::{DeviceStatus, LedConfig, Notification, NotificationKind};

    #[tokio::test]
    async fn test_latest_round_trip_is_exact() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let led: LedConfig = serde_json::from_value(json!({
            "red": 12, "green": 34, "blue": 56, "enableled": true, "led_noti_ani": 4
        }))
        .unwrap();

        store.save_latest(&Entity::LedConfig, &led).await.unwrap();
        let back: LedConfig = store.load_latest(&Entity::LedConfig).await.unwrap().unwrap();
        assert_eq!(back, led);
    }

    #[tokio::test]
    async fn test_missing_latest_is_none() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let status: Option<DeviceStatus> = store.load_latest(&Entity::Status).await.unwrap();
        assert!(status.is_none());
    }

    #[tokio::test]
    async fn test_append_is_idempotent_by_record_id() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let status = DeviceStatus::new(1, 80);

        store.append(&Entity::Status, &status).await.unwrap();
        store.append(&Entity::Status, &status).await.unwrap();
        store.append(&Entity::Status, &DeviceStatus::new(2, 79)).await.unwrap();

        let history = store.get_history(&Entity::Status, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["send_reason"], 2);
    }

    #[tokio::test]
    async fn test_records_without_id_always_append() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        store
            .append_history(&Entity::DeviceLogs, json!({"message": "x"}))
            .await
            .unwrap();
        store
            .append_history(&Entity::DeviceLogs, json!({"message": "x"}))
            .await
            .unwrap();
        assert_eq!(
            store.get_history(&Entity::DeviceLogs, 10).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_unread_filter_and_mark_read() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let entity = Entity::Notifications("default_user".into());
        let mut ids = Vec::new();
        for i in 0..4 {
            let note = Notification::new(NotificationKind::Status, "Status", format!("n{i}"));
            ids.push(note.id.to_string());
            store.append(&entity, &note).await.unwrap();
        }

        assert!(store.mark_read(&entity, &ids[3]).await.unwrap());
        assert!(!store.mark_read(&entity, "unknown").await.unwrap());

        let unread = HistoryFilter {
            limit: Some(2),
            unread_only: true,
            ..HistoryFilter::default()
        };
        let page = store.query_history(&entity, &unread).await.unwrap();
        let messages: Vec<_> = page.iter().map(|n| n["message"].as_str().unwrap()).collect();
        assert_eq!(messages, vec!["n2", "n1"]);
        assert_eq!(store.count_history(&entity, &unread).await.unwrap(), 3);

        let second_page = HistoryFilter {
            offset: Some(2),
            ..unread
        };
        let page = store.query_history(&entity, &second_page).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["message"], "n0");
    }

    #[tokio::test]
    async fn test_wrong_document_shape_is_an_error() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        store
            .set_latest(&Entity::Status, json!({"bat_percent": 5}))
            .await
            .unwrap();
        let result: Result<Option<DeviceStatus>, _> = store.load_latest(&Entity::Status).await;
        assert!(matches!(result, Err(StoreError::Document(_))));
    }
}
