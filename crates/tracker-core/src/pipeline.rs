//! The ingestion coordinator.
//!
//! Transports (the broker client, the webhook endpoint) never touch shared
//! state themselves. They hand raw messages to an [`Ingress`], which queues
//! them for a single [`Pipeline`] task. That task routes, decodes and
//! normalizes one message at a time, so per-entity updates are applied in
//! the order they were received.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tracker_types::MqttStatus;

use crate::decode::{Payload, decode};
use crate::entity::Entity;
use crate::error::{PipelineClosed, StoreError};
use crate::normalize::Normalizer;
use crate::router::{TopicKind, TopicTable};
use crate::traits::{StateStore, StateStoreExt};

/// A raw message as received from a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    /// `None` when no route matched the topic.
    pub kind: Option<TopicKind>,
    pub payload: Payload,
    pub received_at: OffsetDateTime,
}

/// Connection lifecycle of the relay's own broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connecting,
    Connected { broker: String, port: u16 },
    Disconnected { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(InboundMessage),
    Broker(BrokerEvent),
}

/// Cloneable handle transports use to feed the pipeline.
#[derive(Debug, Clone)]
pub struct Ingress {
    tx: mpsc::Sender<Inbound>,
    table: Arc<TopicTable>,
}

impl Ingress {
    /// Same queue, different topic layout.
    #[must_use]
    pub fn with_table(&self, table: TopicTable) -> Self {
        Self {
            tx: self.tx.clone(),
            table: Arc::new(table),
        }
    }

    pub fn table(&self) -> &TopicTable {
        &self.table
    }

    /// Classify and queue a message. Returns the matched route, if any;
    /// unmatched messages are still queued for liveness tracking.
    pub async fn submit(
        &self,
        topic: impl Into<String>,
        payload: Payload,
    ) -> Result<Option<TopicKind>, PipelineClosed> {
        let topic = topic.into();
        let kind = self.table.route(&topic);
        let message = InboundMessage {
            topic,
            kind,
            payload,
            received_at: OffsetDateTime::now_utc(),
        };
        self.tx
            .send(Inbound::Message(message))
            .await
            .map_err(|_| PipelineClosed)?;
        Ok(kind)
    }

    pub async fn broker_event(&self, event: BrokerEvent) -> Result<(), PipelineClosed> {
        self.tx
            .send(Inbound::Broker(event))
            .await
            .map_err(|_| PipelineClosed)
    }
}

/// Single consumer of the ingestion queue.
pub struct Pipeline {
    rx: mpsc::Receiver<Inbound>,
    normalizer: Arc<Normalizer>,
    store: Arc<dyn StateStore>,
}

impl Pipeline {
    /// Create the pipeline and the ingress handle feeding it.
    pub fn new(
        capacity: usize,
        table: TopicTable,
        normalizer: Arc<Normalizer>,
        store: Arc<dyn StateStore>,
    ) -> (Self, Ingress) {
        let (tx, rx) = mpsc::channel(capacity);
        let ingress = Ingress {
            tx,
            table: Arc::new(table),
        };
        (
            Self {
                rx,
                normalizer,
                store,
            },
            ingress,
        )
    }

    /// Process messages until cancelled or every [`Ingress`] is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Ingestion pipeline started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(inbound) => self.process(inbound).await,
                    None => break,
                },
            }
        }
        info!("Ingestion pipeline stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Handle one inbound item. Never fails; errors are logged.
    pub async fn process(&self, inbound: Inbound) {
        match inbound {
            Inbound::Message(message) => self.process_message(message).await,
            Inbound::Broker(event) => {
                if let Err(e) = self.on_broker_event(event).await {
                    warn!("Failed to record broker state: {}", e);
                }
            }
        }
    }

    async fn process_message(&self, message: InboundMessage) {
        // A last will is sent by the broker on the device's behalf.
        if message.kind != Some(TopicKind::LastWill) {
            if let Err(e) = self.touch_last_msg(message.received_at).await {
                warn!("Failed to record last message time: {}", e);
            }
        }

        let Some(kind) = message.kind else {
            warn!("No handler for topic {}, dropping message", message.topic);
            return;
        };
        debug!("Received {} on {}", kind, message.topic);

        match decode(kind, &message.payload, message.received_at) {
            Ok(decoded) => self.normalizer.handle(decoded, message.received_at).await,
            Err(e) => warn!("Dropping message on {}: {}", message.topic, e),
        }
    }

    async fn mqtt_status(&self) -> Result<MqttStatus, StoreError> {
        Ok(self
            .store
            .load_latest(&Entity::MqttStatus)
            .await?
            .unwrap_or_default())
    }

    async fn touch_last_msg(&self, at: OffsetDateTime) -> Result<(), StoreError> {
        let mut status = self.mqtt_status().await?;
        status.last_msg = Some(at);
        self.store.save_latest(&Entity::MqttStatus, &status).await
    }

    async fn on_broker_event(&self, event: BrokerEvent) -> Result<(), StoreError> {
        let mut status = self.mqtt_status().await?;
        match event {
            BrokerEvent::Connecting => {
                status.connection_attempts = status.connection_attempts.saturating_add(1);
            }
            BrokerEvent::Connected { broker, port } => {
                info!("Connected to broker {}:{}", broker, port);
                status.connected = true;
                status.broker = broker;
                status.port = port;
                status.last_connected = Some(OffsetDateTime::now_utc());
            }
            BrokerEvent::Disconnected { reason } => {
                if status.connected {
                    warn!("Broker connection lost: {}", reason);
                }
                status.connected = false;
            }
        }
        self.store.save_latest(&Entity::MqttStatus, &status).await
    }
}
