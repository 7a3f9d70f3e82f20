//! Core record types exchanged with the tracker device.
//!
//! Every record carries a relay-assigned `timestamp`. Records that are kept
//! in a history sequence also carry an `id` so that history appends can be
//! retried without creating duplicates.

use core::fmt;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ParseError, ParseResult, check_optional_range, check_range};

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Periodic device status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Why the device sent this report. Mapped to a message by the reason table.
    pub send_reason: u8,
    #[serde(default)]
    pub bat_voltage: f32,
    /// Battery level, 0-100.
    #[serde(default)]
    pub bat_percent: u8,
    #[serde(default)]
    pub gsm_rssi: i32,
    #[serde(default)]
    pub wifi_enabled: bool,
    #[serde(default)]
    pub wifi_rssi: i32,
    /// SSID of the joined network, empty when not connected.
    #[serde(default)]
    pub wifi: String,
    #[serde(default)]
    pub in_call: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub screen_on: bool,
    #[serde(default)]
    pub light_level: i32,
    #[serde(default)]
    pub uptime: String,
    #[serde(default)]
    pub last_activity: String,
    #[serde(default)]
    pub espnow_state: i32,
    #[serde(default)]
    pub stored_sms: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_eps: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps_fix: Option<bool>,
    /// BLE beacon mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ble_beacon: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_wakeup_counter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Whether the device is awake and reachable for commands.
    ///
    /// Derived from `send_reason` when the device does not report it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currently_active: Option<bool>,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub timestamp: OffsetDateTime,
}

impl DeviceStatus {
    /// Create a status report with every optional field at its default.
    pub fn new(send_reason: u8, bat_percent: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            send_reason,
            bat_voltage: 0.0,
            bat_percent,
            gsm_rssi: 0,
            wifi_enabled: false,
            wifi_rssi: 0,
            wifi: String::new(),
            in_call: false,
            locked: false,
            screen_on: false,
            light_level: 0,
            uptime: String::new(),
            last_activity: String::new(),
            espnow_state: 0,
            stored_sms: 0,
            prd_eps: None,
            gps_fix: None,
            ble_beacon: None,
            prd_wakeup_counter: None,
            build: None,
            currently_active: None,
            timestamp: now(),
        }
    }

    /// Validate field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::OutOfRange`] if `bat_percent` exceeds 100.
    pub fn validate(&self) -> ParseResult<()> {
        check_range("bat_percent", self.bat_percent.into(), 0, 100)
    }
}

/// Location report as sent by the device.
///
/// The fix flags are optional on the wire; an absent flag means the device
/// considers the coordinates valid. Converted into a [`GpsLocation`] by the
/// normalizer, which applies the fallback rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationReport {
    pub send_reason: u8,
    pub gps_fix: Option<bool>,
    pub gps_lat: f64,
    pub gps_lon: f64,
    pub alt: f64,
    pub speed: f64,
    pub course: f64,
    pub sats: u32,
    pub lbs_fix: Option<bool>,
    pub lbs_lat: f64,
    pub lbs_lon: f64,
}

impl LocationReport {
    /// True when the GPS part of this report can be trusted.
    ///
    /// A (0.0, 0.0) position is never trusted, regardless of the flag.
    pub fn has_gps_fix(&self) -> bool {
        self.gps_fix.unwrap_or(true) && !is_null_island(self.gps_lat, self.gps_lon)
    }

    /// True when the cell tower (LBS) part of this report can be trusted.
    pub fn has_lbs_fix(&self) -> bool {
        self.lbs_fix.unwrap_or(true) && !is_null_island(self.lbs_lat, self.lbs_lon)
    }
}

fn is_null_island(lat: f64, lon: f64) -> bool {
    lat == 0.0 && lon == 0.0
}

/// Canonical merged location record.
///
/// GPS and LBS fields are merged independently: each source keeps its last
/// known-good values until the device reports a fresh fix for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsLocation {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub send_reason: u8,
    /// Whether the GPS fields were fresh in the message that produced this record.
    #[serde(default)]
    pub gps_fix: bool,
    #[serde(default)]
    pub gps_lat: f64,
    #[serde(default)]
    pub gps_lon: f64,
    #[serde(default)]
    pub alt: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub course: f64,
    #[serde(default)]
    pub sats: u32,
    #[serde(default)]
    pub lbs_fix: bool,
    #[serde(default)]
    pub lbs_lat: f64,
    #[serde(default)]
    pub lbs_lon: f64,
    /// When the GPS fields were last fresh.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub gps_age: Option<OffsetDateTime>,
    /// When the LBS fields were last fresh.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub lbs_age: Option<OffsetDateTime>,
    /// Meters moved since the previous good GPS fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub timestamp: OffsetDateTime,
}

impl GpsLocation {
    /// The last known-good GPS position, if this record has ever seen one.
    pub fn gps_position(&self) -> Option<(f64, f64)> {
        if self.gps_age.is_some() && !is_null_island(self.gps_lat, self.gps_lon) {
            Some((self.gps_lat, self.gps_lon))
        } else {
            None
        }
    }
}

/// Phone call state reported by the device.
///
/// Serialized as the numeric status code used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum CallState {
    /// No call in progress (0).
    Disconnected,
    /// Phone is ringing (2).
    Incoming,
    /// Call picked up (3).
    Connected,
    /// Any other code.
    Unknown(u8),
}

impl From<u8> for CallState {
    fn from(value: u8) -> Self {
        match value {
            0 => CallState::Disconnected,
            2 => CallState::Incoming,
            3 => CallState::Connected,
            other => CallState::Unknown(other),
        }
    }
}

impl From<CallState> for u8 {
    fn from(state: CallState) -> Self {
        match state {
            CallState::Disconnected => 0,
            CallState::Incoming => 2,
            CallState::Connected => 3,
            CallState::Unknown(code) => code,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Disconnected => write!(f, "disconnected"),
            CallState::Incoming => write!(f, "incoming"),
            CallState::Connected => write!(f, "connected"),
            CallState::Unknown(code) => write!(f, "unknown ({code})"),
        }
    }
}

/// Current call status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStatus {
    #[serde(rename = "status")]
    pub state: CallState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub timestamp: OffsetDateTime,
}

impl CallStatus {
    pub fn new(state: CallState, number: Option<String>) -> Self {
        Self {
            state,
            number,
            timestamp: now(),
        }
    }

    /// # Errors
    ///
    /// Returns [`ParseError::OutOfRange`] for [`CallState::Unknown`].
    pub fn validate(&self) -> ParseResult<()> {
        match self.state {
            CallState::Unknown(code) => Err(ParseError::OutOfRange {
                field: "status",
                value: code.into(),
                min: 0,
                max: 3,
            }),
            _ => Ok(()),
        }
    }
}

/// LED ring configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedConfig {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub enableled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_boot_ani: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_call_ani: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_noti_ani: Option<u8>,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub timestamp: OffsetDateTime,
}

impl LedConfig {
    /// Animation indexes must be in 0..=10.
    pub fn validate(&self) -> ParseResult<()> {
        check_optional_range("led_boot_ani", self.led_boot_ani, 0, 10)?;
        check_optional_range("led_call_ani", self.led_call_ani, 0, 10)?;
        check_optional_range("led_noti_ani", self.led_noti_ani, 0, 10)
    }
}

/// Device behaviour settings (the device's "config" document).
///
/// Every field is optional; the device reports only what it supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callmode: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpsmode: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootanimation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enablebuzzer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enablehaptics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootsms: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noti_sound: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noti_ppp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ringtone: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_thru_mqtt: Option<bool>,
    #[serde(
        rename = "DS_call_mode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ds_call_mode: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_wakeup: Option<bool>,
    /// Periodic wakeup interval in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_wakeup_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_sms_intvrl: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_mqtt_intvrl: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub espnow_mode: Option<u8>,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub timestamp: OffsetDateTime,
}

impl DeviceSettings {
    pub fn validate(&self) -> ParseResult<()> {
        check_optional_range("callmode", self.callmode, 0, 2)?;
        check_optional_range("gpsmode", self.gpsmode, 0, 9)?;
        check_optional_range("ringtone", self.ringtone, 0, 24)?;
        check_optional_range("DS_call_mode", self.ds_call_mode, 0, 3)?;
        check_optional_range("prd_wakeup_time", self.prd_wakeup_time, 5, 28_800)?;
        check_optional_range("prd_sms_intvrl", self.prd_sms_intvrl, 0, 10)?;
        check_optional_range("prd_mqtt_intvrl", self.prd_mqtt_intvrl, 0, 10)
    }
}

/// The device's five speed-dial contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contacts {
    #[serde(default)]
    pub nam1: String,
    #[serde(default)]
    pub num1: String,
    #[serde(default)]
    pub nam2: String,
    #[serde(default)]
    pub num2: String,
    #[serde(default)]
    pub nam3: String,
    #[serde(default)]
    pub num3: String,
    #[serde(default)]
    pub nam4: String,
    #[serde(default)]
    pub num4: String,
    #[serde(default)]
    pub nam5: String,
    #[serde(default)]
    pub num5: String,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub timestamp: OffsetDateTime,
}

impl Contacts {
    /// Name and number pairs in slot order.
    pub fn slots(&self) -> [(&str, &str); 5] {
        [
            (&self.nam1, &self.num1),
            (&self.nam2, &self.num2),
            (&self.nam3, &self.num3),
            (&self.nam4, &self.num4),
            (&self.nam5, &self.num5),
        ]
    }
}

/// Direction or origin of an SMS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsKind {
    Sent,
    #[default]
    Received,
    /// Read back from the SIM card storage.
    Stored,
}

/// A text message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsMessage {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(rename = "type", default)]
    pub kind: SmsKind,
    #[serde(default)]
    pub number: String,
    #[serde(alias = "sms", default)]
    pub message: String,
    /// Modem-formatted send time, kept as reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_sent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_sent_human: Option<String>,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub timestamp: OffsetDateTime,
}

impl SmsMessage {
    pub fn new(kind: SmsKind, number: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            number: number.into(),
            message: message.into(),
            time_sent: None,
            time_sent_human: None,
            timestamp: now(),
        }
    }
}

/// Free-form text coming from the device: ESP-NOW relays and debug logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRecord {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub message: String,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub timestamp: OffsetDateTime,
}

impl TextRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            timestamp: now(),
        }
    }
}

/// Category of a user-facing notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Status,
    Location,
    Sms,
    Call,
    System,
    HighPriority,
    #[default]
    General,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Status => "status",
            NotificationKind::Location => "location",
            NotificationKind::Sms => "sms",
            NotificationKind::Call => "call",
            NotificationKind::System => "system",
            NotificationKind::HighPriority => "high_priority",
            NotificationKind::General => "general",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-facing notification.
///
/// Only created by the relay itself, as a side effect of device events or
/// failed commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub read: bool,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub timestamp: OffsetDateTime,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            message: message.into(),
            kind,
            data: None,
            read: false,
            timestamp: now(),
        }
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Flatten `data` into string pairs, the only shape push gateways accept.
    ///
    /// String values are passed through unquoted; everything else is
    /// rendered as JSON.
    pub fn data_strings(&self) -> BTreeMap<String, String> {
        match &self.data {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let rendered = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), rendered)
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// A push notification token registered by a client app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushToken {
    pub user_id: String,
    pub device_id: String,
    pub token: String,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub updated_at: OffsetDateTime,
}

impl PushToken {
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let at = now();
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            token: token.into(),
            created_at: at,
            updated_at: at,
        }
    }
}

/// Broker connectivity, as seen by the relay and by the broker's client events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttStatus {
    /// Whether the relay's own broker session is up.
    pub connected: bool,
    pub broker: String,
    pub port: u16,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_connected: Option<OffsetDateTime>,
    /// Receipt time of the most recent inbound device message.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_msg: Option<OffsetDateTime>,
    pub connection_attempts: u32,
    /// Whether the tracker itself is connected to the broker.
    pub device_connected: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub device_last_connected: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub device_last_disconnected: Option<OffsetDateTime>,
}

/// A queued command submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data1: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data2: Option<Value>,
    #[serde(with = "time::serde::rfc3339", default = "now")]
    pub timestamp: OffsetDateTime,
    #[serde(default = "pending_default")]
    pub pending: bool,
}

fn pending_default() -> bool {
    true
}

impl CommandRecord {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            data1: None,
            data2: None,
            timestamp: now(),
            pending: true,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data1: Value, data2: Option<Value>) -> Self {
        self.data1 = Some(data1);
        self.data2 = data2;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_minimal_payload() {
        let status: DeviceStatus =
            serde_json::from_value(json!({"send_reason": 2, "bat_percent": 55})).unwrap();
        assert_eq!(status.send_reason, 2);
        assert_eq!(status.bat_percent, 55);
        assert!(status.currently_active.is_none());
        assert!(status.validate().is_ok());
    }

    #[test]
    fn test_status_keeps_ble_beacon() {
        let status: DeviceStatus =
            serde_json::from_value(json!({"send_reason": 4, "ble_beacon": true})).unwrap();
        assert_eq!(status.ble_beacon, Some(true));

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["ble_beacon"], json!(true));

        let absent = serde_json::to_value(DeviceStatus::new(4, 80)).unwrap();
        assert!(absent.get("ble_beacon").is_none());
    }

    #[test]
    fn test_status_requires_send_reason() {
        let result: Result<DeviceStatus, _> = serde_json::from_value(json!({"bat_percent": 55}));
        assert!(result.is_err());
    }

    #[test]
    fn test_status_battery_out_of_range() {
        let status = DeviceStatus::new(0, 101);
        let err = status.validate().unwrap_err();
        assert!(matches!(err, ParseError::OutOfRange { field: "bat_percent", .. }));
    }

    #[test]
    fn test_location_report_fix_rules() {
        let good = LocationReport {
            gps_lat: 12.34,
            gps_lon: 56.78,
            ..Default::default()
        };
        assert!(good.has_gps_fix());

        let flagged = LocationReport {
            gps_fix: Some(false),
            ..good.clone()
        };
        assert!(!flagged.has_gps_fix());

        let zeros = LocationReport {
            gps_fix: Some(true),
            ..Default::default()
        };
        assert!(!zeros.has_gps_fix());
        assert!(!zeros.has_lbs_fix());
    }

    #[test]
    fn test_call_state_codes() {
        assert_eq!(CallState::from(0), CallState::Disconnected);
        assert_eq!(CallState::from(2), CallState::Incoming);
        assert_eq!(CallState::from(3), CallState::Connected);
        assert_eq!(CallState::from(1), CallState::Unknown(1));
        assert_eq!(u8::from(CallState::Incoming), 2);
    }

    #[test]
    fn test_call_status_wire_shape() {
        let call: CallStatus =
            serde_json::from_value(json!({"status": 2, "number": "+15550100"})).unwrap();
        assert_eq!(call.state, CallState::Incoming);
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value["status"], 2);

        let bad: CallStatus = serde_json::from_value(json!({"status": 7})).unwrap();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_led_config_validation() {
        let mut led: LedConfig = serde_json::from_value(
            json!({"red": 255, "green": 0, "blue": 10, "enableled": true, "led_boot_ani": 3}),
        )
        .unwrap();
        assert!(led.validate().is_ok());
        led.led_call_ani = Some(11);
        assert!(led.validate().is_err());
    }

    #[test]
    fn test_device_settings_ranges() {
        let settings: DeviceSettings =
            serde_json::from_value(json!({"DS_call_mode": 2, "prd_wakeup_time": 300})).unwrap();
        assert_eq!(settings.ds_call_mode, Some(2));
        assert!(settings.validate().is_ok());

        let too_short: DeviceSettings =
            serde_json::from_value(json!({"prd_wakeup_time": 4})).unwrap();
        assert!(too_short.validate().is_err());

        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["DS_call_mode"], 2);
        assert!(value.get("callmode").is_none());
    }

    #[test]
    fn test_sms_accepts_legacy_key() {
        let sms: SmsMessage =
            serde_json::from_value(json!({"number": "+15550100", "sms": "hello"})).unwrap();
        assert_eq!(sms.message, "hello");
        assert_eq!(sms.kind, SmsKind::Received);
    }

    #[test]
    fn test_notification_data_strings() {
        let n = Notification::new(NotificationKind::Location, "Location Updated", "moved")
            .with_data(json!({"lat": 12.5, "source": "gps", "fix": true}));
        let pairs = n.data_strings();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs["fix"], "true");
        assert_eq!(pairs["lat"], "12.5");
        assert_eq!(pairs["source"], "gps");
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["type"], "location");
    }

    #[test]
    fn test_command_record_defaults_to_pending() {
        let record: CommandRecord = serde_json::from_value(json!({"command": "get_status"})).unwrap();
        assert!(record.pending);
        assert!(record.data1.is_none());
    }

    #[test]
    fn test_contacts_slots() {
        let contacts: Contacts =
            serde_json::from_value(json!({"nam1": "Home", "num1": "+15550100"})).unwrap();
        let slots = contacts.slots();
        assert_eq!(slots[0], ("Home", "+15550100"));
        assert_eq!(slots[4], ("", ""));
    }
}
