//! Commands sent to the device, and the dispatcher that sends them.
//!
//! Each [`Command`] maps to exactly one outbound publish. Before publishing,
//! the [`Dispatcher`] makes sure the device is awake: if the last status
//! report said it is asleep, it publishes a wake-up and polls the stored
//! status until the device reports in or the wake window runs out.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tracker_types::{
    CommandRecord, Contacts, DEFAULT_USER, DeviceSettings, DeviceStatus, LedConfig, Notification,
    NotificationKind,
};

use crate::entity::Entity;
use crate::error::{CommandError, StoreError};
use crate::fanout::Notifier;
use crate::traits::{CommandPublisher, StateStore, StateStoreExt};

/// Argument of the `request` topic selecting what the device should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestKind {
    Status = 0,
    Location = 1,
    CallStatus = 2,
    LedConfig = 3,
    Config = 4,
    Contacts = 5,
}

impl RequestKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "status" => Some(RequestKind::Status),
            "location" => Some(RequestKind::Location),
            "callstatus" | "call_status" => Some(RequestKind::CallStatus),
            "led_config" => Some(RequestKind::LedConfig),
            "config" => Some(RequestKind::Config),
            "contacts" => Some(RequestKind::Contacts),
            _ => None,
        }
    }
}

/// Highest device mode accepted by the firmware.
pub const MAX_MODE: u8 = 7;

/// A command for the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Request(RequestKind),
    SetLedConfig(LedConfig),
    SetConfig(DeviceSettings),
    SetContacts(Contacts),
    MakeCall { number: String },
    SendSms { number: String, message: String },
    /// Read back the SMS stored at a SIM index.
    GetSms { index: u32 },
    Mode(u8),
    ModeEspNow(u8),
    SendEspNow(String),
    SendIr(u32),
    Scream(bool),
    Vibrate(bool),
    /// Tell the device no client is watching any more.
    AppOffline,
}

/// A ready-to-publish message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub topic: String,
    pub payload: String,
}

/// Outbound topic layout, `<prefix>/<command>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopics {
    prefix: String,
}

impl CommandTopics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.prefix, suffix)
    }
}

impl Default for CommandTopics {
    fn default() -> Self {
        Self::new("Tracker/to")
    }
}

/// Serialize a config record for the device, without the relay's timestamp.
fn device_json<T: Serialize>(record: &T) -> Result<String, CommandError> {
    let mut value = serde_json::to_value(record).map_err(StoreError::from)?;
    if let Value::Object(map) = &mut value {
        map.remove("timestamp");
    }
    Ok(value.to_string())
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Request(RequestKind::Status) => "get_status",
            Command::Request(RequestKind::Location) => "get_location",
            Command::Request(RequestKind::CallStatus) => "get_callstatus",
            Command::Request(RequestKind::LedConfig) => "get_led_config",
            Command::Request(RequestKind::Config) => "get_config",
            Command::Request(RequestKind::Contacts) => "get_contacts",
            Command::SetLedConfig(_) => "set_led_config",
            Command::SetConfig(_) => "set_config",
            Command::SetContacts(_) => "set_contacts",
            Command::MakeCall { .. } => "make_call",
            Command::SendSms { .. } => "send_sms",
            Command::GetSms { .. } => "get_sms",
            Command::Mode(_) => "mode",
            Command::ModeEspNow(_) => "mode_espnow",
            Command::SendEspNow(_) => "send_espnow",
            Command::SendIr(_) => "send_ir",
            Command::Scream(_) => "scream",
            Command::Vibrate(_) => "vibrate",
            Command::AppOffline => "app_offline",
        }
    }

    /// Whether the device must be awake to act on this command.
    ///
    /// Mode changes are the wake-up mechanism itself, and `app_offline` is
    /// picked up whenever the device next connects.
    pub fn needs_awake(&self) -> bool {
        !matches!(self, Command::Mode(_) | Command::AppOffline)
    }

    /// Topic and payload for this command.
    pub fn outbound(&self, topics: &CommandTopics) -> Result<Outbound, CommandError> {
        let (suffix, payload) = match self {
            Command::Request(kind) => ("request", (*kind as u8).to_string()),
            Command::SetLedConfig(led) => ("set/led_config", device_json(led)?),
            Command::SetConfig(settings) => ("set/config", device_json(settings)?),
            Command::SetContacts(contacts) => ("set/contacts", device_json(contacts)?),
            Command::MakeCall { number } => ("call", number.clone()),
            Command::SendSms { number, message } => (
                "sms/send",
                serde_json::json!({ "number": number, "message": message }).to_string(),
            ),
            Command::GetSms { index } => ("sms/get", index.to_string()),
            Command::Mode(mode) => {
                if *mode > MAX_MODE {
                    return Err(CommandError::InvalidArgument {
                        command: self.name(),
                        reason: format!("mode {mode} is above {MAX_MODE}"),
                    });
                }
                ("mode", mode.to_string())
            }
            Command::ModeEspNow(mode) => ("espnow/mode", mode.to_string()),
            Command::SendEspNow(message) => ("espnow/send", message.clone()),
            Command::SendIr(code) => ("irsend", code.to_string()),
            Command::Scream(on) => ("scream", on.to_string()),
            Command::Vibrate(on) => ("vibrate", on.to_string()),
            Command::AppOffline => ("app_offline", "1".to_string()),
        };

        Ok(Outbound {
            topic: topics.topic(suffix),
            payload,
        })
    }
}

fn arg_str(command: &'static str, value: Option<&Value>) -> Result<String, CommandError> {
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(CommandError::InvalidArgument {
            command,
            reason: "expected a string argument".to_string(),
        }),
    }
}

fn arg_u64(command: &'static str, value: Option<&Value>) -> Result<u64, CommandError> {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| CommandError::InvalidArgument {
        command,
        reason: "expected a non-negative integer argument".to_string(),
    })
}

fn arg_u8(command: &'static str, value: Option<&Value>) -> Result<u8, CommandError> {
    let raw = arg_u64(command, value)?;
    u8::try_from(raw).map_err(|_| CommandError::InvalidArgument {
        command,
        reason: format!("{raw} does not fit in a byte"),
    })
}

fn arg_bool(command: &'static str, value: Option<&Value>) -> Result<bool, CommandError> {
    match value {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => Ok(n.as_u64().unwrap_or(0) != 0),
        Some(Value::String(s)) => match s.trim() {
            "true" | "1" | "on" => Ok(true),
            "false" | "0" | "off" => Ok(false),
            other => Err(CommandError::InvalidArgument {
                command,
                reason: format!("{other:?} is not a boolean"),
            }),
        },
        _ => Err(CommandError::InvalidArgument {
            command,
            reason: "expected a boolean argument".to_string(),
        }),
    }
}

/// Parse an inline config document, or fall back to the stored latest one.
async fn config_arg<T>(
    command: &'static str,
    value: Option<&Value>,
    store: &dyn StateStore,
    entity: Entity,
) -> Result<T, CommandError>
where
    T: serde::de::DeserializeOwned + Send,
{
    match value {
        Some(inline @ Value::Object(_)) => {
            serde_json::from_value(inline.clone()).map_err(|e| CommandError::InvalidArgument {
                command,
                reason: e.to_string(),
            })
        }
        _ => store
            .load_latest(&entity)
            .await?
            .ok_or_else(|| CommandError::InvalidArgument {
                command,
                reason: format!("no stored {entity} to send"),
            }),
    }
}

impl Command {
    /// Build a command from a queued record.
    ///
    /// `set_*` records without inline data send the stored latest document.
    pub async fn from_record(
        record: &CommandRecord,
        store: &dyn StateStore,
    ) -> Result<Self, CommandError> {
        let d1 = record.data1.as_ref();
        let d2 = record.data2.as_ref();

        let command = match record.command.as_str() {
            "get_status" => Command::Request(RequestKind::Status),
            "get_location" => Command::Request(RequestKind::Location),
            "get_callstatus" => Command::Request(RequestKind::CallStatus),
            "get_led_config" => Command::Request(RequestKind::LedConfig),
            "get_config" => Command::Request(RequestKind::Config),
            "get_contacts" => Command::Request(RequestKind::Contacts),
            "set_led_config" => {
                let led: LedConfig = config_arg("set_led_config", d1, store, Entity::LedConfig).await?;
                Command::SetLedConfig(led)
            }
            "set_config" => {
                let settings: DeviceSettings =
                    config_arg("set_config", d1, store, Entity::DeviceConfig).await?;
                Command::SetConfig(settings)
            }
            "set_contacts" => {
                let contacts: Contacts =
                    config_arg("set_contacts", d1, store, Entity::Contacts).await?;
                Command::SetContacts(contacts)
            }
            "make_call" => Command::MakeCall {
                number: arg_str("make_call", d1)?,
            },
            "send_sms" => match d1 {
                Some(Value::Object(map)) => Command::SendSms {
                    number: arg_str("send_sms", map.get("number"))?,
                    message: arg_str("send_sms", map.get("message"))?,
                },
                _ => Command::SendSms {
                    number: arg_str("send_sms", d1)?,
                    message: arg_str("send_sms", d2)?,
                },
            },
            "get_sms" => Command::GetSms {
                index: u32::try_from(arg_u64("get_sms", d1)?).map_err(|e| {
                    CommandError::InvalidArgument {
                        command: "get_sms",
                        reason: e.to_string(),
                    }
                })?,
            },
            "mode" => Command::Mode(arg_u8("mode", d1)?),
            "mode_espnow" => Command::ModeEspNow(arg_u8("mode_espnow", d1)?),
            "send_espnow" => Command::SendEspNow(arg_str("send_espnow", d1)?),
            "send_ir" => Command::SendIr(u32::try_from(arg_u64("send_ir", d1)?).map_err(|e| {
                CommandError::InvalidArgument {
                    command: "send_ir",
                    reason: e.to_string(),
                }
            })?),
            "scream" => Command::Scream(arg_bool("scream", d1)?),
            "vibrate" => Command::Vibrate(arg_bool("vibrate", d1)?),
            "app_offline" => Command::AppOffline,
            other => return Err(CommandError::UnknownCommand(other.to_string())),
        };

        Ok(command)
    }
}

/// Wake-wait tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// How long to wait for a sleeping device to report in.
    pub wake_timeout: Duration,
    pub poll_interval: Duration,
    /// Mode published to wake the device.
    pub wake_mode: u8,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            wake_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            wake_mode: 0,
        }
    }
}

/// Sends commands to the device.
pub struct Dispatcher {
    store: Arc<dyn StateStore>,
    publisher: Arc<dyn CommandPublisher>,
    notifier: Notifier,
    topics: CommandTopics,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn StateStore>,
        publisher: Arc<dyn CommandPublisher>,
        notifier: Notifier,
        topics: CommandTopics,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            notifier,
            topics,
            config,
        }
    }

    pub fn topics(&self) -> &CommandTopics {
        &self.topics
    }

    /// Send one command, waking the device first when needed.
    ///
    /// # Errors
    ///
    /// - [`CommandError::WakeTimeout`] if the device stayed asleep; a
    ///   high-priority notification has been sent and nothing was published.
    /// - [`CommandError::Publish`] if the transport rejected the publish.
    pub async fn dispatch(&self, command: Command) -> Result<(), CommandError> {
        // Validate before waking the device for nothing.
        let outbound = command.outbound(&self.topics)?;

        if command.needs_awake() {
            self.ensure_awake(&command).await?;
        }

        self.publisher
            .publish(&outbound.topic, &outbound.payload)
            .await?;
        info!("Sent {} to {}", command.name(), outbound.topic);
        Ok(())
    }

    /// `false` only when the last status explicitly says the device sleeps.
    async fn device_active(&self) -> bool {
        match self.store.load_latest::<DeviceStatus>(&Entity::Status).await {
            Ok(Some(status)) => status.currently_active != Some(false),
            Ok(None) => true,
            Err(e) => {
                warn!("Could not read device status, assuming awake: {}", e);
                true
            }
        }
    }

    async fn ensure_awake(&self, command: &Command) -> Result<(), CommandError> {
        if self.device_active().await {
            return Ok(());
        }

        info!("Device asleep, waking it before {}", command.name());
        let wake = Command::Mode(self.config.wake_mode).outbound(&self.topics)?;
        self.publisher.publish(&wake.topic, &wake.payload).await?;

        let deadline = Instant::now() + self.config.wake_timeout;
        while Instant::now() < deadline {
            tokio::time::sleep(self.config.poll_interval).await;
            if self.device_active().await {
                debug!("Device woke up");
                return Ok(());
            }
        }

        let waited = self.config.wake_timeout;
        warn!(
            "Device did not wake within {}s, dropping {}",
            waited.as_secs(),
            command.name()
        );
        let notification = Notification::new(
            NotificationKind::HighPriority,
            "Command Failed",
            format!(
                "Device did not wake up within {} seconds; {} was not sent",
                waited.as_secs(),
                command.name()
            ),
        )
        .with_data(serde_json::json!({ "command": command.name() }));
        self.notifier.dispatch(notification, DEFAULT_USER).await;

        Err(CommandError::WakeTimeout {
            command: command.name(),
            waited,
        })
    }

    /// Dispatch a queued command record.
    ///
    /// Records that are no longer pending are ignored and return `None`.
    /// Otherwise the stored record's `pending` flag is cleared once,
    /// whether dispatch succeeded or not.
    pub async fn process_record(&self, record: CommandRecord) -> Option<Result<(), CommandError>> {
        if !record.pending {
            debug!("Ignoring handled command {}", record.command);
            return None;
        }

        let result = match Command::from_record(&record, self.store.as_ref()).await {
            Ok(command) => self.dispatch(command).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("Command {} failed: {}", record.command, e);
        }

        if let Err(e) = self.clear_pending(&record).await {
            warn!("Could not clear pending flag for {}: {}", record.command, e);
        }
        Some(result)
    }

    async fn clear_pending(&self, record: &CommandRecord) -> Result<(), StoreError> {
        let stored: Option<CommandRecord> = self.store.load_latest(&Entity::Command).await?;
        match stored {
            // A newer command replaced this one; it owns its own flag.
            Some(current) if current.timestamp != record.timestamp => Ok(()),
            Some(current) if !current.pending => Ok(()),
            _ => {
                let mut done = record.clone();
                done.pending = false;
                self.store.save_latest(&Entity::Command, &done).await
            }
        }
    }
}

/// Queue of client-submitted command records, drained by one worker task.
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::Sender<CommandRecord>,
    store: Arc<dyn StateStore>,
}

impl CommandQueue {
    pub fn new(capacity: usize, store: Arc<dyn StateStore>) -> (Self, mpsc::Receiver<CommandRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, store }, rx)
    }

    /// Persist a record as the latest command and hand it to the worker.
    pub async fn submit(&self, record: CommandRecord) -> Result<(), CommandError> {
        self.store.save_latest(&Entity::Command, &record).await?;
        self.tx
            .send(record)
            .await
            .map_err(|_| CommandError::QueueClosed)
    }
}

/// Run the command worker until cancelled or the queue closes.
pub fn spawn_command_worker(
    dispatcher: Arc<Dispatcher>,
    mut rx: mpsc::Receiver<CommandRecord>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(record) => {
                        dispatcher.process_record(record).await;
                    }
                    None => break,
                },
            }
        }
        debug!("Command worker stopped");
    })
}
