//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tracker_core::{CommandTopics, DispatcherConfig, ReasonTable, StatusReason};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `send_reason` codes the device sends right before it sleeps.
    pub sleep_codes: Vec<u8>,
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Broker subscription.
    pub mqtt: MqttConfig,
    /// Broker HTTP publish API, used instead of the MQTT client for commands.
    pub broker_api: BrokerApiConfig,
    /// HTTP webhook ingestion.
    pub webhook: WebhookConfig,
    /// Mobile push delivery.
    pub push: PushConfig,
    /// Outbound commands.
    pub commands: CommandsConfig,
    /// API security.
    pub security: SecurityConfig,
    /// `send_reason` to message table. Codes not listed never notify.
    pub status_reasons: Vec<StatusReason>,
}

impl Default for Config {
    fn default() -> Self {
        let reasons = ReasonTable::default();
        Self {
            sleep_codes: reasons.sleep_codes,
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            mqtt: MqttConfig::default(),
            broker_api: BrokerApiConfig::default(),
            webhook: WebhookConfig::default(),
            push: PushConfig::default(),
            commands: CommandsConfig::default(),
            security: SecurityConfig::default(),
            status_reasons: reasons.reasons,
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// # Example
    ///
    /// ```
    /// use tracker_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.mqtt.validate());
        errors.extend(self.broker_api.validate());
        errors.extend(self.push.validate());
        errors.extend(self.commands.validate());
        errors.extend(self.security.validate());

        let mut seen = std::collections::HashSet::new();
        for (i, reason) in self.status_reasons.iter().enumerate() {
            let field = format!("status_reasons[{}]", i);
            if reason.codes.is_empty() {
                errors.push(ValidationError {
                    field: format!("{}.codes", field),
                    message: "at least one code is required".to_string(),
                });
            }
            if reason.message.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("{}.message", field),
                    message: "message cannot be empty".to_string(),
                });
            }
            for code in &reason.codes {
                if !seen.insert(*code) {
                    errors.push(ValidationError {
                        field: format!("{}.codes", field),
                        message: format!("code {} is listed more than once", code),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn reason_table(&self) -> ReasonTable {
        ReasonTable::new(self.status_reasons.clone(), self.sleep_codes.clone())
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
    /// Capacity of the ingestion queue between transports and the pipeline.
    pub ingest_buffer: usize,
    /// Frames buffered per WebSocket client before it counts as failed.
    pub ws_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            ingest_buffer: 256,
            ws_buffer: 64,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
        } else {
            let parts: Vec<&str> = self.bind.rsplitn(2, ':').collect();
            if parts.len() != 2 {
                errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                });
            } else {
                match parts[0].parse::<u16>() {
                    Ok(0) => errors.push(ValidationError {
                        field: "server.bind".to_string(),
                        message: "port cannot be 0".to_string(),
                    }),
                    Err(_) => errors.push(ValidationError {
                        field: "server.bind".to_string(),
                        message: format!("invalid port '{}': must be a number 1-65535", parts[0]),
                    }),
                    Ok(_) => {}
                }
            }
        }

        if self.ingest_buffer == 0 {
            errors.push(ValidationError {
                field: "server.ingest_buffer".to_string(),
                message: "buffer must be at least 1".to_string(),
            });
        }
        if self.ws_buffer == 0 {
            errors.push(ValidationError {
                field: "server.ws_buffer".to_string(),
                message: "buffer must be at least 1".to_string(),
            });
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: tracker_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Broker subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    /// Broker URL, `mqtt://host:port` or `mqtts://host:port`.
    pub broker: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive: u64,
    /// Prefix of the device's outbound topics, e.g. `Tracker/from`.
    pub topic_prefix: String,
    /// Broker client ids starting with this belong to the tracker.
    pub device_client_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker: "mqtt://localhost:1883".to_string(),
            client_id: "gps_tracker_app".to_string(),
            username: None,
            password: None,
            keep_alive: 60,
            topic_prefix: "Tracker/from".to_string(),
            device_client_prefix: "Tracker".to_string(),
        }
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.enabled {
            return errors;
        }

        if !(self.broker.starts_with("mqtt://") || self.broker.starts_with("mqtts://")) {
            errors.push(ValidationError {
                field: "mqtt.broker".to_string(),
                message: format!(
                    "invalid broker URL '{}': must start with mqtt:// or mqtts://",
                    self.broker
                ),
            });
        }
        if self.client_id.is_empty() {
            errors.push(ValidationError {
                field: "mqtt.client_id".to_string(),
                message: "client id cannot be empty".to_string(),
            });
        }
        if self.keep_alive < 5 {
            errors.push(ValidationError {
                field: "mqtt.keep_alive".to_string(),
                message: format!("keep alive {} is too short (minimum 5 seconds)", self.keep_alive),
            });
        }
        if self.topic_prefix.trim_matches('/').is_empty() {
            errors.push(ValidationError {
                field: "mqtt.topic_prefix".to_string(),
                message: "topic prefix cannot be empty".to_string(),
            });
        }
        if self.username.is_some() != self.password.is_some() {
            errors.push(ValidationError {
                field: "mqtt.username".to_string(),
                message: "username and password must be set together".to_string(),
            });
        }

        errors
    }
}

/// The broker's HTTP publish API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerApiConfig {
    /// Publish commands over HTTP instead of the MQTT client.
    pub enabled: bool,
    /// Full publish endpoint, e.g. `https://broker.example/api/v5/publish`.
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BrokerApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            timeout_secs: 10,
        }
    }
}

impl BrokerApiConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.enabled {
            return errors;
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "broker_api.url".to_string(),
                message: format!("invalid URL '{}': must start with http:// or https://", self.url),
            });
        }
        if self.api_key.is_empty() {
            errors.push(ValidationError {
                field: "broker_api.api_key".to_string(),
                message: "API key cannot be empty".to_string(),
            });
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "broker_api.timeout_secs".to_string(),
                message: "timeout must be at least 1 second".to_string(),
            });
        }
        errors
    }
}

/// HTTP webhook ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Push gateway settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    /// Gateway endpoint receiving one message per token.
    pub url: String,
    /// Bearer token sent with each request, if the gateway needs one.
    pub auth_token: Option<String>,
}

impl PushConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.enabled && !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "push.url".to_string(),
                message: format!("invalid URL '{}': must start with http:// or https://", self.url),
            });
        }
        errors
    }
}

/// Outbound command settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Prefix of the device's inbound topics, e.g. `Tracker/to`.
    pub topic_prefix: String,
    /// Seconds to wait for a sleeping device to wake up.
    pub wake_timeout_secs: u64,
    /// Seconds between status checks while waiting.
    pub poll_interval_secs: u64,
    /// Mode published to wake the device.
    pub wake_mode: u8,
    /// Capacity of the queue feeding the command worker.
    pub queue_size: usize,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "Tracker/to".to_string(),
            wake_timeout_secs: 30,
            poll_interval_secs: 1,
            wake_mode: 0,
            queue_size: 32,
        }
    }
}

impl CommandsConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.topic_prefix.trim_matches('/').is_empty() {
            errors.push(ValidationError {
                field: "commands.topic_prefix".to_string(),
                message: "topic prefix cannot be empty".to_string(),
            });
        }
        if self.poll_interval_secs == 0 {
            errors.push(ValidationError {
                field: "commands.poll_interval_secs".to_string(),
                message: "poll interval must be at least 1 second".to_string(),
            });
        } else if self.poll_interval_secs > self.wake_timeout_secs {
            errors.push(ValidationError {
                field: "commands.poll_interval_secs".to_string(),
                message: format!(
                    "poll interval {} is longer than the wake timeout {}",
                    self.poll_interval_secs, self.wake_timeout_secs
                ),
            });
        }
        if self.wake_mode > tracker_core::commands::MAX_MODE {
            errors.push(ValidationError {
                field: "commands.wake_mode".to_string(),
                message: format!(
                    "wake mode {} is out of range (0-{})",
                    self.wake_mode,
                    tracker_core::commands::MAX_MODE
                ),
            });
        }
        if self.queue_size == 0 {
            errors.push(ValidationError {
                field: "commands.queue_size".to_string(),
                message: "queue size must be at least 1".to_string(),
            });
        }
        errors
    }

    pub fn topics(&self) -> CommandTopics {
        CommandTopics::new(self.topic_prefix.clone())
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            wake_timeout: Duration::from_secs(self.wake_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            wake_mode: self.wake_mode,
        }
    }
}

/// Minimum API key length.
pub const MIN_API_KEY_LEN: usize = 16;

/// API security settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Require `X-API-Key` (or `?token=`) on every route except `/api/health`.
    pub api_key_enabled: bool,
    pub api_key: Option<String>,
}

impl SecurityConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.api_key_enabled {
            match &self.api_key {
                None => errors.push(ValidationError {
                    field: "security.api_key".to_string(),
                    message: "api_key is required when api_key_enabled is true".to_string(),
                }),
                Some(key) if key.len() < MIN_API_KEY_LEN => errors.push(ValidationError {
                    field: "security.api_key".to_string(),
                    message: format!("API key must be at least {} characters", MIN_API_KEY_LEN),
                }),
                Some(_) => {}
            }
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `status_reasons[0].codes`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tracker-relay")
        .join("server.toml")
}
