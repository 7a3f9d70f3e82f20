//! Trait seams between the pipeline and its external collaborators.
//!
//! The pipeline never talks to a database, broker or push service directly.
//! It goes through these traits so that the service binary can plug in
//! concrete adapters and tests can plug in the mocks from [`crate::mock`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;

use tracker_types::PushToken;

use crate::entity::Entity;
use crate::error::{PublishError, PushError, StoreError};

/// Selects a page of history records, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Only records stored at or after this instant.
    pub since: Option<OffsetDateTime>,
    /// Only records whose `read` flag is false or absent.
    pub unread_only: bool,
}

impl HistoryFilter {
    /// The `limit` most recent records.
    pub fn latest(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

/// Persistence of "latest" documents and "history" sequences per entity.
///
/// Implementations must make `append_history` idempotent on the record's
/// `id` field, so a retried append does not create a second entry.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current document of an entity, if one has been stored.
    async fn get_latest(&self, entity: &Entity) -> Result<Option<Value>, StoreError>;

    /// Overwrite the current document of an entity.
    async fn set_latest(&self, entity: &Entity, record: Value) -> Result<(), StoreError>;

    /// Append a record to an entity's history.
    async fn append_history(&self, entity: &Entity, record: Value) -> Result<(), StoreError>;

    /// History records matching `filter`, newest first.
    async fn query_history(
        &self,
        entity: &Entity,
        filter: &HistoryFilter,
    ) -> Result<Vec<Value>, StoreError>;

    /// Number of history records matching `filter`, ignoring limit and offset.
    async fn count_history(&self, entity: &Entity, filter: &HistoryFilter)
    -> Result<u64, StoreError>;

    /// Set the `read` flag of the history record with this `id`.
    /// Returns false when no such record exists.
    async fn mark_read(&self, entity: &Entity, id: &str) -> Result<bool, StoreError>;

    /// Up to `limit` history records, newest first.
    async fn get_history(&self, entity: &Entity, limit: u32) -> Result<Vec<Value>, StoreError> {
        self.query_history(entity, &HistoryFilter::latest(limit))
            .await
    }

    /// Register a push token; last write wins per (user, device).
    async fn upsert_push_token(&self, token: PushToken) -> Result<(), StoreError>;

    async fn push_tokens(&self, user_id: &str) -> Result<Vec<PushToken>, StoreError>;
}

/// Typed helpers on top of [`StateStore`].
#[async_trait]
pub trait StateStoreExt: StateStore {
    async fn load_latest<T>(&self, entity: &Entity) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_latest(entity).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn save_latest<T>(&self, entity: &Entity, record: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
    {
        self.set_latest(entity, serde_json::to_value(record)?).await
    }

    async fn append<T>(&self, entity: &Entity, record: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
    {
        self.append_history(entity, serde_json::to_value(record)?)
            .await
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

/// Outbound publish towards the device.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}

/// One push notification addressed to one device token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    /// Extra key/value pairs; gateways only accept string values.
    pub data: BTreeMap<String, String>,
}

/// Mobile push delivery.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError>;
}
