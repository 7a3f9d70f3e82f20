//! Fan-out of events to live subscribers and push tokens.
//!
//! [`LiveHub`] holds the set of connected live subscribers. Delivery is best
//! effort: a subscriber whose send fails is dropped from the set, and the
//! others still get the event. Disconnects are only noticed this way, on the
//! next failed send, or when the transport unregisters the subscriber.
//!
//! When the set goes from non-empty to empty the hub tells the device that
//! no app is watching any more (`app_offline`), so it can sleep longer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use tracker_types::Notification;

use crate::commands::{Command, CommandTopics};
use crate::entity::Entity;
use crate::events::LiveEvent;
use crate::traits::{CommandPublisher, PushGateway, PushMessage, StateStore, StateStoreExt};

/// Why a frame could not be handed to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("subscriber disconnected")]
    Closed,
    #[error("subscriber is not keeping up")]
    Full,
}

/// One live subscriber, typically a WebSocket connection.
///
/// `send` must not block; implementations queue the frame and return.
pub trait LiveSink: Send + Sync {
    fn send(&self, frame: &str) -> Result<(), SinkError>;
}

/// Identifier handed out by [`LiveHub::register`].
pub type SubscriberId = u64;

/// Result of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Subscribers dropped because their send failed.
    pub dropped: Vec<SubscriberId>,
}

struct OfflineNotice {
    publisher: Arc<dyn CommandPublisher>,
    topics: CommandTopics,
}

/// The set of live subscribers.
pub struct LiveHub {
    sinks: Mutex<HashMap<SubscriberId, Arc<dyn LiveSink>>>,
    next_id: AtomicU64,
    offline: OnceLock<OfflineNotice>,
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveHub {
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            offline: OnceLock::new(),
        }
    }

    /// Publish `app_offline` through `publisher` whenever the last
    /// subscriber goes away. Only the first call has an effect.
    pub fn set_offline_publisher(&self, publisher: Arc<dyn CommandPublisher>, topics: CommandTopics) {
        if self
            .offline
            .set(OfflineNotice { publisher, topics })
            .is_err()
        {
            debug!("Offline publisher already set");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, Arc<dyn LiveSink>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.sinks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, sink: Arc<dyn LiveSink>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut sinks = self.lock();
            sinks.insert(id, sink);
            sinks.len()
        };
        info!("Live subscriber {} connected ({} total)", id, count);
        id
    }

    /// Remove a subscriber that went away on its own.
    pub async fn unregister(&self, id: SubscriberId) {
        let (removed, now_empty) = {
            let mut sinks = self.lock();
            let removed = sinks.remove(&id).is_some();
            (removed, sinks.is_empty())
        };
        if removed {
            info!("Live subscriber {} disconnected", id);
            if now_empty {
                self.announce_offline().await;
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Send an event to every subscriber, dropping the ones that fail.
    pub async fn broadcast(&self, event: &LiveEvent) -> BroadcastReport {
        let frame = match event.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Could not serialize {} event: {}", event.kind(), e);
                return BroadcastReport::default();
            }
        };
        self.broadcast_frame(&frame).await
    }

    /// Send an already serialized frame.
    pub async fn broadcast_frame(&self, frame: &str) -> BroadcastReport {
        let snapshot: Vec<(SubscriberId, Arc<dyn LiveSink>)> = self
            .lock()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        let mut report = BroadcastReport::default();
        for (id, sink) in snapshot {
            match sink.send(frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Dropping live subscriber {}: {}", id, e);
                    report.dropped.push(id);
                }
            }
        }

        if !report.dropped.is_empty() {
            let now_empty = {
                let mut sinks = self.lock();
                for id in &report.dropped {
                    sinks.remove(id);
                }
                sinks.is_empty()
            };
            if now_empty {
                self.announce_offline().await;
            }
        }

        report
    }

    async fn announce_offline(&self) {
        let Some(notice) = self.offline.get() else {
            debug!("No live subscribers left");
            return;
        };
        let outbound = match Command::AppOffline.outbound(&notice.topics) {
            Ok(outbound) => outbound,
            Err(e) => {
                warn!("Could not build app_offline: {}", e);
                return;
            }
        };
        info!("No live subscribers left, telling device the app is offline");
        if let Err(e) = notice
            .publisher
            .publish(&outbound.topic, &outbound.payload)
            .await
        {
            warn!("Failed to publish app_offline: {}", e);
        }
    }
}

/// Result of one notification dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub persisted: bool,
    pub live: BroadcastReport,
    pub push_sent: usize,
    pub push_failed: usize,
}

/// Stores notifications and sends them to every channel.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn StateStore>,
    hub: Arc<LiveHub>,
    push: Option<Arc<dyn PushGateway>>,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn StateStore>,
        hub: Arc<LiveHub>,
        push: Option<Arc<dyn PushGateway>>,
    ) -> Self {
        Self { store, hub, push }
    }

    pub fn hub(&self) -> &Arc<LiveHub> {
        &self.hub
    }

    /// Broadcast a state update to live subscribers only.
    pub async fn broadcast(&self, event: LiveEvent) -> BroadcastReport {
        self.hub.broadcast(&event).await
    }

    /// Persist a notification for `user_id`, broadcast it and push it to
    /// every token the user registered. Never fails; each stage logs its
    /// own errors.
    pub async fn dispatch(&self, notification: Notification, user_id: &str) -> FanoutReport {
        let mut report = FanoutReport::default();
        let entity = Entity::Notifications(user_id.to_string());

        match self.persist(&entity, &notification).await {
            Ok(()) => report.persisted = true,
            Err(e) => warn!("Failed to store notification {:?}: {}", notification.title, e),
        }

        report.live = self
            .hub
            .broadcast(&LiveEvent::Notification(notification.clone()))
            .await;

        if let Some(push) = &self.push {
            let (sent, failed) = self.push_all(push.as_ref(), &notification, user_id).await;
            report.push_sent = sent;
            report.push_failed = failed;
        }

        debug!(
            "Notification {:?}: {} live, {} pushed, {} push failures",
            notification.title, report.live.delivered, report.push_sent, report.push_failed
        );
        report
    }

    async fn persist(
        &self,
        entity: &Entity,
        notification: &Notification,
    ) -> Result<(), crate::error::StoreError> {
        self.store.save_latest(entity, notification).await?;
        self.store.append(entity, notification).await
    }

    async fn push_all(
        &self,
        push: &dyn PushGateway,
        notification: &Notification,
        user_id: &str,
    ) -> (usize, usize) {
        let tokens = match self.store.push_tokens(user_id).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Could not load push tokens for {}: {}", user_id, e);
                return (0, 0);
            }
        };
        if tokens.is_empty() {
            return (0, 0);
        }

        let data = notification.data_strings();
        let messages: Vec<PushMessage> = tokens
            .into_iter()
            .map(|t| PushMessage {
                token: t.token,
                title: notification.title.clone(),
                body: notification.message.clone(),
                data: data.clone(),
            })
            .collect();

        let results = join_all(messages.iter().map(|m| push.send(m))).await;
        let mut sent = 0;
        let mut failed = 0;
        for (message, result) in messages.iter().zip(results) {
            match result {
                Ok(()) => sent += 1,
                Err(e) => {
                    failed += 1;
                    warn!("Push to token {}... failed: {}", short_token(&message.token), e);
                }
            }
        }
        (sent, failed)
    }
}

fn short_token(token: &str) -> &str {
    match token.char_indices().nth(8) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}
