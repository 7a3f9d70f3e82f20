//! MQTT relay, HTTP REST API and live WebSocket feed for a GPS tracker.
//!
//! This crate provides a service that:
//! - Subscribes to the tracker's broker topics and feeds the ingestion pipeline
//! - Accepts the same messages over an HTTP webhook
//! - Exposes the device's latest state and history over a REST API
//! - Streams live updates to WebSocket clients
//! - Sends commands to the device over MQTT or the broker's HTTP API
//! - Delivers push notifications through an HTTP push gateway
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check (no auth required)
//! - `GET /api/mqtt/status` - Broker and device connectivity
//! - `GET /api/status/latest`, `GET /api/status/history` - Device status
//! - `GET /api/location/latest`, `GET /api/location/history` - Location
//! - `GET /api/sms/history` - Stored and received SMS
//! - `GET|PUT /api/led_config`, `/api/config`, `/api/contacts` - Device documents
//! - `GET /api/notifications` - Notification history
//! - `GET /api/notifications/unread-count` - Unread notification count
//! - `POST /api/notifications/{id}/read` - Mark a notification read
//! - `POST /api/push-tokens` - Register a push token
//! - `POST /api/commands` - Queue a command
//! - `POST /api/device/{mode/:mode,request/:what,call,sms}` - Send a command now
//! - `POST /api/webhook/mqtt` - Relay a broker message
//! - `WS /api/ws` - Live updates
//!
//! History endpoints take `limit`, `offset` and `since` (RFC 3339).
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/tracker-relay/server.toml`:
//!
//! ```toml
//! sleep_codes = [6]
//!
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [mqtt]
//! broker = "mqtts://broker.example.com:8883"
//! topic_prefix = "Tracker/from"
//!
//! [push]
//! enabled = true
//! url = "https://push.example.com/send"
//!
//! [[status_reasons]]
//! codes = [2, 3]
//! message = "Device woken up"
//! ```
//!
//! # Security
//!
//! ```toml
//! [security]
//! # Require X-API-Key header for all requests (except /api/health)
//! api_key_enabled = true
//! api_key = "your-secure-random-key-at-least-16-chars"
//! ```

pub mod api;
pub mod broker_api;
pub mod config;
pub mod middleware;
pub mod push;
pub mod state;
pub mod ws;

pub use broker_api::BrokerApiPublisher;
pub use config::{
    BrokerApiConfig, CommandsConfig, Config, ConfigError, MqttConfig, PushConfig,
    SecurityConfig, ServerConfig, StorageConfig, WebhookConfig,
};
pub use push::HttpPushGateway;
pub use state::{AppState, DisconnectedPublisher, Workers};

#[cfg(feature = "mqtt")]
pub mod mqtt;
