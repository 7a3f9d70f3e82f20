//! HTTP push gateway.
//!
//! One request per device token. The body follows the FCM v1 message shape:
//!
//! ```json
//! {"message": {"token": "...", "notification": {"title": "...", "body": "..."}, "data": {...}}}
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use tracker_core::{PushError, PushGateway, PushMessage};

use crate::config::PushConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    message: Message<'a>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    token: &'a str,
    notification: Body<'a>,
    data: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Body<'a> {
    title: &'a str,
    body: &'a str,
}

impl<'a> From<&'a PushMessage> for Envelope<'a> {
    fn from(message: &'a PushMessage) -> Self {
        Self {
            message: Message {
                token: &message.token,
                notification: Body {
                    title: &message.title,
                    body: &message.body,
                },
                data: &message.data,
            },
        }
    }
}

/// [`PushGateway`] posting to a configured HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpPushGateway {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
}

impl HttpPushGateway {
    pub fn new(config: &PushConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        let mut request = self.client.post(&self.url).json(&Envelope::from(message));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(PushError::Gateway {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let mut data = BTreeMap::new();
        data.insert("bat_percent".to_string(), "55".to_string());
        let message = PushMessage {
            token: "token-1".to_string(),
            title: "Device Status Updated".to_string(),
            body: "Device woken up - Battery: 55%".to_string(),
            data,
        };

        let value = serde_json::to_value(Envelope::from(&message)).unwrap();
        assert_eq!(value["message"]["token"], "token-1");
        assert_eq!(value["message"]["notification"]["title"], "Device Status Updated");
        assert_eq!(value["message"]["data"]["bat_percent"], "55");
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_transport_error() {
        let gateway = HttpPushGateway::new(&PushConfig {
            enabled: true,
            url: "http://127.0.0.1:1/send".to_string(),
            auth_token: Some("secret".to_string()),
        })
        .unwrap();
        let message = PushMessage {
            token: "t".to_string(),
            title: "x".to_string(),
            body: "y".to_string(),
            data: BTreeMap::new(),
        };
        assert!(matches!(
            gateway.send(&message).await,
            Err(PushError::Transport(_))
        ));
    }
}
