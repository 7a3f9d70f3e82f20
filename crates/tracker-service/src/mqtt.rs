//! Broker transport for the tracker's topics.
//!
//! The relay keeps one broker session. Its event loop runs in its own task:
//! incoming publishes are handed to the [`Ingress`] unchanged, connection
//! changes are reported as [`BrokerEvent`]s, and nothing else is touched.
//! The same session publishes outbound commands through [`MqttPublisher`].
//!
//! # Example Configuration
//!
//! ```toml
//! [mqtt]
//! enabled = true
//! broker = "mqtts://broker.example.com:8883"
//! client_id = "gps_tracker_app"
//! username = "relay"
//! password = "secret"
//! topic_prefix = "Tracker/from"
//! ```
//!
//! # Reconnection
//!
//! The event loop reconnects on its own after an error. Each attempt is
//! reported to the pipeline, so `MqttStatus.connection_attempts` counts them.
//! Subscriptions are renewed on every ConnAck.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tracker_core::{BrokerEvent, CommandPublisher, Ingress, Payload, PublishError};

use crate::config::MqttConfig;

/// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 100;

/// Publishes commands over the relay's broker session at QoS 1.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        debug!("Published to {}: {}", topic, payload);
        Ok(())
    }
}

/// The relay's broker session, before its event loop is started.
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    host: String,
    port: u16,
}

impl MqttTransport {
    /// Build the session from configuration. Does not connect yet.
    pub fn new(config: &MqttConfig) -> Result<Self, String> {
        let (host, port, use_tls) = parse_broker_url(&config.broker)?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, host.clone(), port);
        mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        if use_tls {
            mqtt_options.set_transport(Transport::tls_with_config(TlsConfiguration::Native));
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        Ok(Self {
            client,
            eventloop,
            connected: Arc::new(AtomicBool::new(false)),
            host,
            port,
        })
    }

    /// Command publisher sharing this session.
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
            connected: Arc::clone(&self.connected),
        }
    }

    /// Run the event loop until cancelled.
    pub fn spawn(self, ingress: Ingress, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(ingress, cancel))
    }

    async fn run(mut self, ingress: Ingress, cancel: CancellationToken) {
        let subscriptions = ingress.table().subscriptions();
        info!(
            "MQTT transport starting for {}:{} ({} topics)",
            self.host,
            self.port,
            subscriptions.len()
        );

        // Connecting is reported once per attempt, not once per packet.
        let mut attempting = false;

        loop {
            if !attempting && !self.connected.load(Ordering::SeqCst) {
                attempting = true;
                if ingress.broker_event(BrokerEvent::Connecting).await.is_err() {
                    break;
                }
            }

            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("MQTT connected: {:?}", ack);
                    self.connected.store(true, Ordering::SeqCst);
                    attempting = false;
                    for topic in &subscriptions {
                        if let Err(e) = self.client.try_subscribe(topic, QoS::AtLeastOnce) {
                            error!("Failed to subscribe to {}: {}", topic, e);
                        }
                    }
                    let connected = BrokerEvent::Connected {
                        broker: self.host.clone(),
                        port: self.port,
                    };
                    if ingress.broker_event(connected).await.is_err() {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!("MQTT message on {}", publish.topic);
                    let payload = Payload::from_bytes(&publish.payload);
                    if ingress.submit(publish.topic, payload).await.is_err() {
                        warn!("Pipeline closed, stopping MQTT transport");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!("MQTT subscription acknowledged: {:?}", ack.return_codes);
                }
                Ok(Event::Incoming(Packet::PingResp)) => {
                    debug!("MQTT ping response received");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {}. Reconnecting...", e);
                    let was_connected = self.connected.swap(false, Ordering::SeqCst);
                    attempting = false;
                    if was_connected {
                        let disconnected = BrokerEvent::Disconnected {
                            reason: e.to_string(),
                        };
                        if ingress.broker_event(disconnected).await.is_err() {
                            break;
                        }
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            debug!("Error disconnecting MQTT client: {}", e);
        }
        info!("MQTT transport stopped");
    }
}

/// Parse an MQTT broker URL into (host, port, use_tls).
pub fn parse_broker_url(url: &str) -> Result<(String, u16, bool), String> {
    let (use_tls, rest) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        (false, stripped)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        (true, stripped)
    } else {
        return Err("Invalid scheme: URL must start with mqtt:// or mqtts://".to_string());
    };

    let default_port = if use_tls { 8883 } else { 1883 };
    let rest = rest.trim_end_matches('/');

    let (host, port) = if let Some((h, p)) = rest.rsplit_once(':') {
        let port = p
            .parse::<u16>()
            .map_err(|_| format!("Invalid port: {}", p))?;
        (h.to_string(), port)
    } else {
        (rest.to_string(), default_port)
    };

    if host.is_empty() {
        return Err("Host cannot be empty".to_string());
    }

    Ok((host, port, use_tls))
}
