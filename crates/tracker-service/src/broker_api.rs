//! Command publishing through the broker's HTTP publish API.
//!
//! Used instead of the relay's own MQTT session when `[broker_api]` is
//! enabled. Each publish is one `POST` of `{"topic", "qos": 1, "payload"}`
//! with basic auth.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use tracker_core::{CommandPublisher, PublishError};

use crate::config::BrokerApiConfig;

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    topic: &'a str,
    qos: u8,
    payload: &'a str,
}

/// [`CommandPublisher`] backed by the broker's HTTP API.
#[derive(Debug, Clone)]
pub struct BrokerApiPublisher {
    client: reqwest::Client,
    url: String,
    api_key: String,
    api_secret: String,
}

impl BrokerApiPublisher {
    pub fn new(config: &BrokerApiConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CommandPublisher for BrokerApiPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let body = PublishRequest {
            topic,
            qos: 1,
            payload,
        };

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = response
                .text()
                .await
                .unwrap_or_else(|_| status.to_string());
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                reason: format!("{}: {}", status.as_u16(), reason),
            });
        }

        debug!("Published to {} via broker API", topic);
        Ok(())
    }
}
