//! WebSocket handler for live updates.
//!
//! Each client gets a bounded queue registered with the [`LiveHub`]. A
//! client whose queue is full or closed counts as a failed send and is
//! dropped by the hub on the next broadcast.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use tracker_core::types::{DeviceStatus, GpsLocation};
use tracker_core::{Entity, LiveEvent, LiveHub, LiveSink, SinkError, StateStore, StateStoreExt};

use crate::state::AppState;

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

/// [`LiveSink`] feeding one socket's send task.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl LiveSink for ChannelSink {
    fn send(&self, frame: &str) -> Result<(), SinkError> {
        self.tx.try_send(frame.to_string()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Latest status and location, as events to replay to a new client.
pub async fn snapshot(store: &dyn StateStore) -> Vec<LiveEvent> {
    let mut events = Vec::new();
    match store.load_latest::<DeviceStatus>(&Entity::Status).await {
        Ok(Some(status)) => events.push(LiveEvent::StatusUpdate(status)),
        Ok(None) => {}
        Err(e) => warn!("Snapshot: could not read status: {}", e),
    }
    match store.load_latest::<GpsLocation>(&Entity::Location).await {
        Ok(Some(location)) => events.push(LiveEvent::LocationUpdate(location)),
        Ok(None) => {}
        Err(e) => warn!("Snapshot: could not read location: {}", e),
    }
    events
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Register before the snapshot so nothing broadcast meanwhile is missed.
    let buffer = state.config.read().await.server.ws_buffer;
    let (sink, mut rx) = ChannelSink::new(buffer);
    let hub: Arc<LiveHub> = Arc::clone(state.hub());
    let id = hub.register(Arc::new(sink));

    info!("WebSocket client {} connected", id);

    for event in snapshot(state.store.as_ref()).await {
        let json = match event.to_json() {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize snapshot: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            info!("WebSocket client disconnected during initial snapshot");
            hub.unregister(id).await;
            return;
        }
    }

    debug!("Sent initial snapshot to WebSocket client {}", id);

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => debug!("Received ping"),
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    hub.unregister(id).await;
    info!("WebSocket client {} disconnected", id);
}
