//! Entity types the state store keeps documents for.

use std::borrow::Cow;
use std::fmt;

/// A document collection in the state store.
///
/// Each entity has one "latest" document; history-bearing entities also
/// have an append-only sequence. Notifications are kept per user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entity {
    Status,
    Location,
    CallStatus,
    LedConfig,
    DeviceConfig,
    Contacts,
    /// Combined SMS history (stored and received).
    Sms,
    SmsStored,
    SmsReceived,
    EspNow,
    DeviceLogs,
    Notifications(String),
    MqttStatus,
    /// The most recent command submitted through the command queue.
    Command,
}

impl Entity {
    /// Collection name used by the backing store.
    pub fn collection(&self) -> Cow<'static, str> {
        match self {
            Entity::Status => Cow::Borrowed("status"),
            Entity::Location => Cow::Borrowed("location"),
            Entity::CallStatus => Cow::Borrowed("call_status"),
            Entity::LedConfig => Cow::Borrowed("led_config"),
            Entity::DeviceConfig => Cow::Borrowed("device_config"),
            Entity::Contacts => Cow::Borrowed("contacts"),
            Entity::Sms => Cow::Borrowed("sms"),
            Entity::SmsStored => Cow::Borrowed("sms_stored"),
            Entity::SmsReceived => Cow::Borrowed("sms_received"),
            Entity::EspNow => Cow::Borrowed("espnow_received"),
            Entity::DeviceLogs => Cow::Borrowed("device_logs"),
            Entity::Notifications(user) => Cow::Owned(format!("notifications/{user}")),
            Entity::MqttStatus => Cow::Borrowed("mqtt_status"),
            Entity::Command => Cow::Borrowed("command"),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.collection())
    }
}
