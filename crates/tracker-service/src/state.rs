//! Application state shared across handlers.
//!
//! [`AppState::new`] wires the relay together: one state store, one live
//! hub, one ingestion pipeline and one command worker. The pipeline and the
//! worker are returned unstarted in [`Workers`] so the caller decides when
//! (and under which cancellation token) they run.
//!
//! # Ingestion queue
//!
//! The broker transport and the webhook handler share one bounded queue
//! (`server.ingest_buffer`, default 256). When it is full, transports wait;
//! nothing is dropped silently.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//! ingest_buffer = 512
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tracker_core::types::CommandRecord;
use tracker_core::{
    CommandPublisher, CommandQueue, Dispatcher, Ingress, LiveHub, Normalizer, Notifier,
    Pipeline, PublishError, PushGateway, StateStore, TopicTable, spawn_command_worker,
};

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// Configuration (RwLock for runtime reads from handlers).
    pub config: RwLock<Config>,
    pub store: Arc<dyn StateStore>,
    /// Persists, broadcasts and pushes notifications.
    pub notifier: Notifier,
    pub dispatcher: Arc<Dispatcher>,
    /// Queue feeding the command worker.
    pub commands: CommandQueue,
    /// Ingress for the HTTP webhook, which matches topics by suffix.
    pub webhook: Ingress,
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create the application state and its unstarted background workers.
    pub fn new(
        config: Config,
        store: Arc<dyn StateStore>,
        publisher: Arc<dyn CommandPublisher>,
        push: Option<Arc<dyn PushGateway>>,
    ) -> (Arc<Self>, Workers) {
        let topics = config.commands.topics();

        let hub = Arc::new(LiveHub::new());
        hub.set_offline_publisher(Arc::clone(&publisher), topics.clone());

        let notifier = Notifier::new(Arc::clone(&store), hub, push);
        let normalizer = Arc::new(
            Normalizer::new(Arc::clone(&store), notifier.clone(), config.reason_table())
                .with_device_client_prefix(config.mqtt.device_client_prefix.clone()),
        );

        let (pipeline, ingress) = Pipeline::new(
            config.server.ingest_buffer,
            TopicTable::exact(config.mqtt.topic_prefix.clone()),
            normalizer,
            Arc::clone(&store),
        );
        let webhook = ingress.with_table(TopicTable::suffix());

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            publisher,
            notifier.clone(),
            topics,
            config.commands.dispatcher(),
        ));
        let (commands, commands_rx) =
            CommandQueue::new(config.commands.queue_size, Arc::clone(&store));

        let state = Arc::new(Self {
            config: RwLock::new(config),
            store,
            notifier,
            dispatcher: Arc::clone(&dispatcher),
            commands,
            webhook,
            started_at: OffsetDateTime::now_utc(),
        });

        let workers = Workers {
            pipeline,
            ingress,
            dispatcher,
            commands_rx,
        };

        (state, workers)
    }

    pub fn hub(&self) -> &Arc<LiveHub> {
        self.notifier.hub()
    }
}

/// Background tasks owned by the relay, not yet running.
pub struct Workers {
    pipeline: Pipeline,
    ingress: Ingress,
    dispatcher: Arc<Dispatcher>,
    commands_rx: mpsc::Receiver<CommandRecord>,
}

impl Workers {
    /// Ingress for the broker transport, matching `<topic_prefix>/<kind>`.
    pub fn ingress(&self) -> Ingress {
        self.ingress.clone()
    }

    /// Start the pipeline and the command worker.
    pub fn spawn(self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.pipeline.spawn(cancel.clone()),
            spawn_command_worker(self.dispatcher, self.commands_rx, cancel.clone()),
        ]
    }
}

/// Publisher used when neither the MQTT client nor the broker API is enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedPublisher;

#[async_trait]
impl CommandPublisher for DisconnectedPublisher {
    async fn publish(&self, _topic: &str, _payload: &str) -> Result<(), PublishError> {
        Err(PublishError::NotConnected)
    }
}
