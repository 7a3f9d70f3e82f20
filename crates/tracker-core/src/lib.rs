//! Ingestion, normalization and fan-out pipeline for the GPS tracker relay.
//!
//! This crate holds everything between a transport handing over a raw
//! `(topic, payload)` pair and the resulting state updates, live events and
//! push notifications. It also owns the outbound side: turning commands into
//! device publishes.
//!
//! # Features
//!
//! - **Topic routing**: configurable topic tables for each transport layout
//! - **Strict decoding**: typed records, range validation, relay timestamps
//! - **Normalization**: GPS/LBS fallback, haversine distance, reason mapping
//! - **Fan-out**: best-effort live broadcast and per-token push delivery
//! - **Commands**: one publish per command, with a wake-wait for sleeping devices
//!
//! Transports, persistence and push delivery are reached through the traits
//! in [`traits`]; the service crate supplies the real adapters and [`mock`]
//! supplies test doubles.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use tracker_core::{
//!     LiveHub, Normalizer, Notifier, Payload, Pipeline, ReasonTable, SqliteStateStore,
//!     StateStore, TopicTable,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::open_in_memory()?);
//! let notifier = Notifier::new(store.clone(), Arc::new(LiveHub::new()), None);
//! let normalizer = Arc::new(Normalizer::new(store.clone(), notifier, ReasonTable::default()));
//!
//! let (pipeline, ingress) = Pipeline::new(256, TopicTable::exact("Tracker/from"), normalizer, store);
//! let cancel = CancellationToken::new();
//! let task = pipeline.spawn(cancel.clone());
//!
//! ingress
//!     .submit("Tracker/from/status", Payload::parse(r#"{"send_reason": 2, "bat_percent": 55}"#))
//!     .await?;
//!
//! cancel.cancel();
//! task.await?;
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod decode;
pub mod entity;
pub mod error;
pub mod events;
pub mod fanout;
pub mod geo;
pub mod mock;
pub mod normalize;
pub mod pipeline;
pub mod router;
pub mod sqlite;
pub mod traits;

pub use commands::{
    Command, CommandQueue, CommandTopics, Dispatcher, DispatcherConfig, Outbound, RequestKind,
    spawn_command_worker,
};
pub use decode::{DeviceMessage, Payload, decode};
pub use entity::Entity;
pub use error::{CommandError, DecodeError, PipelineClosed, PublishError, PushError, StoreError};
pub use events::LiveEvent;
pub use fanout::{BroadcastReport, FanoutReport, LiveHub, LiveSink, Notifier, SinkError, SubscriberId};
pub use geo::haversine_m;
pub use mock::{MockPublisher, MockPushGateway, MockSink};
pub use normalize::{Normalizer, ReasonTable, StatusReason, merge_location};
pub use pipeline::{BrokerEvent, Inbound, InboundMessage, Ingress, Pipeline};
pub use router::{TopicKind, TopicTable};
pub use sqlite::SqliteStateStore;
pub use traits::{
    CommandPublisher, HistoryFilter, PushGateway, PushMessage, StateStore, StateStoreExt,
};

// Re-export the data model so callers need only one dependency.
pub use tracker_types as types;
