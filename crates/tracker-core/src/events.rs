//! Live update events pushed to connected clients.
//!
//! Every event is serialized as `{"type": <kind>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

use tracker_types::{
    CallStatus, Contacts, DeviceSettings, DeviceStatus, GpsLocation, LedConfig, Notification,
    SmsMessage,
};

/// An update broadcast to every live subscriber.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event kinds
/// without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LiveEvent {
    StatusUpdate(DeviceStatus),
    LocationUpdate(GpsLocation),
    SmsUpdate(SmsMessage),
    CallUpdate(CallStatus),
    LedConfigUpdate(LedConfig),
    ConfigUpdate(DeviceSettings),
    ContactsUpdate(Contacts),
    Notification(Notification),
}

impl LiveEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LiveEvent::StatusUpdate(_) => "status_update",
            LiveEvent::LocationUpdate(_) => "location_update",
            LiveEvent::SmsUpdate(_) => "sms_update",
            LiveEvent::CallUpdate(_) => "call_update",
            LiveEvent::LedConfigUpdate(_) => "led_config_update",
            LiveEvent::ConfigUpdate(_) => "config_update",
            LiveEvent::ContactsUpdate(_) => "contacts_update",
            LiveEvent::Notification(_) => "notification",
        }
    }

    /// Serialize to the wire envelope.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
