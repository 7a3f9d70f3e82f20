//! Payload decoding.
//!
//! Turns a routed payload into a typed [`DeviceMessage`]. Decoding is strict
//! about schemas and ranges; anything that does not fit is reported as a
//! [`DecodeError`] and the pipeline drops it.

use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;

use tracker_types::{
    CallState, CallStatus, Contacts, DeviceSettings, DeviceStatus, LedConfig, LocationReport,
    Notification, NotificationKind, SmsKind, SmsMessage, TextRecord, humanize_age,
    parse_device_time,
};

use crate::error::DecodeError;
use crate::router::TopicKind;

/// A raw payload, JSON when it parses as JSON and text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    /// Parse payload text, falling back to raw text.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(raw.to_string()),
        }
    }

    /// Interpret a payload forwarded by the webhook bridge.
    ///
    /// Bridges send either the payload string or an already decoded object;
    /// strings get the same JSON-or-text treatment as broker payloads.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(raw) => Payload::parse(&raw),
            other => Payload::Json(other),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Payload::parse(&String::from_utf8_lossy(bytes))
    }

    /// The payload as plain text. JSON strings are unquoted.
    pub fn as_text(&self) -> String {
        match self {
            Payload::Json(Value::String(s)) => s.clone(),
            Payload::Json(other) => other.to_string(),
            Payload::Text(s) => s.clone(),
        }
    }
}

/// A decoded device message, ready for normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    Status(DeviceStatus),
    Location(LocationReport),
    Call(CallStatus),
    LedConfig(LedConfig),
    Config(DeviceSettings),
    Contacts(Contacts),
    Sms(SmsMessage),
    EspNow(TextRecord),
    Notification(Notification),
    Log(TextRecord),
    /// A broker client connected or disconnected.
    ClientEvent { client_id: String, connected: bool },
    /// The device's last-will message; carries the will payload.
    LastWill(String),
}

/// Decode a payload for a routed topic.
///
/// `received_at` becomes the record timestamp; any device-supplied
/// timestamp is discarded.
pub fn decode(
    kind: TopicKind,
    payload: &Payload,
    received_at: OffsetDateTime,
) -> Result<DeviceMessage, DecodeError> {
    let message = match kind {
        TopicKind::Status => {
            let mut status: DeviceStatus = from_json(kind, payload)?;
            status
                .validate()
                .map_err(|source| DecodeError::Validation { kind, source })?;
            status.timestamp = received_at;
            DeviceMessage::Status(status)
        }
        TopicKind::Location => DeviceMessage::Location(from_json(kind, payload)?),
        TopicKind::Call => {
            let mut call = match payload {
                Payload::Json(Value::Number(code)) => {
                    let code = code
                        .as_u64()
                        .and_then(|c| u8::try_from(c).ok())
                        .unwrap_or(u8::MAX);
                    CallStatus::new(CallState::from(code), None)
                }
                _ => from_json::<CallStatus>(kind, payload)?,
            };
            call.validate()
                .map_err(|source| DecodeError::Validation { kind, source })?;
            call.timestamp = received_at;
            DeviceMessage::Call(call)
        }
        TopicKind::Ringing => {
            let number = payload.as_text().trim().to_string();
            let mut call = CallStatus::new(CallState::Incoming, Some(number));
            call.timestamp = received_at;
            DeviceMessage::Call(call)
        }
        TopicKind::LedConfig => {
            let mut led: LedConfig = from_json(kind, payload)?;
            led.validate()
                .map_err(|source| DecodeError::Validation { kind, source })?;
            led.timestamp = received_at;
            DeviceMessage::LedConfig(led)
        }
        TopicKind::Config => {
            let mut settings: DeviceSettings = from_json(kind, payload)?;
            settings
                .validate()
                .map_err(|source| DecodeError::Validation { kind, source })?;
            settings.timestamp = received_at;
            DeviceMessage::Config(settings)
        }
        TopicKind::Contacts => {
            let mut contacts: Contacts = from_json(kind, payload)?;
            contacts.timestamp = received_at;
            DeviceMessage::Contacts(contacts)
        }
        TopicKind::StoredSms => DeviceMessage::Sms(decode_sms(
            kind,
            SmsKind::Stored,
            payload,
            received_at,
        )?),
        TopicKind::ReceivedSms => DeviceMessage::Sms(decode_sms(
            kind,
            SmsKind::Received,
            payload,
            received_at,
        )?),
        TopicKind::EspNowReceived => {
            let mut record = TextRecord::new(payload.as_text());
            record.timestamp = received_at;
            DeviceMessage::EspNow(record)
        }
        TopicKind::Notification => {
            let mut notification = match payload {
                Payload::Json(Value::Object(_)) => from_json::<Notification>(kind, payload)?,
                _ => Notification::new(
                    NotificationKind::General,
                    "Device Notification",
                    payload.as_text(),
                ),
            };
            notification.timestamp = received_at;
            notification.read = false;
            DeviceMessage::Notification(notification)
        }
        TopicKind::Logs => {
            let mut record = TextRecord::new(payload.as_text());
            record.timestamp = received_at;
            DeviceMessage::Log(record)
        }
        TopicKind::Connection | TopicKind::Disconnection => {
            let client_id = match payload {
                Payload::Json(value) => value
                    .get("clientid")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                Payload::Text(_) => None,
            }
            .ok_or_else(|| DecodeError::NotJson {
                kind,
                payload: payload.as_text(),
            })?;
            DeviceMessage::ClientEvent {
                client_id,
                connected: kind == TopicKind::Connection,
            }
        }
        TopicKind::LastWill => DeviceMessage::LastWill(payload.as_text()),
    };

    Ok(message)
}

fn from_json<T: DeserializeOwned>(kind: TopicKind, payload: &Payload) -> Result<T, DecodeError> {
    match payload {
        Payload::Json(value) => {
            T::deserialize(value).map_err(|source| DecodeError::Schema { kind, source })
        }
        Payload::Text(text) => Err(DecodeError::NotJson {
            kind,
            payload: text.clone(),
        }),
    }
}

/// SMS payloads are either an object or, for received SMS, the bare text.
fn decode_sms(
    kind: TopicKind,
    sms_kind: SmsKind,
    payload: &Payload,
    received_at: OffsetDateTime,
) -> Result<SmsMessage, DecodeError> {
    let mut sms = match payload {
        Payload::Json(Value::Object(_)) => from_json::<SmsMessage>(kind, payload)?,
        _ if sms_kind == SmsKind::Received => SmsMessage::new(sms_kind, "", payload.as_text()),
        _ => {
            return Err(DecodeError::NotJson {
                kind,
                payload: payload.as_text(),
            });
        }
    };

    sms.kind = sms_kind;
    sms.timestamp = received_at;
    sms.time_sent_human = sms
        .time_sent
        .as_deref()
        .and_then(|raw| parse_device_time(raw).ok())
        .map(|sent| humanize_age(sent, received_at));
    Ok(sms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap()
    }

    #[test]
    fn test_payload_parse_shapes() {
        assert_eq!(Payload::parse("{\"a\":1}"), Payload::Json(json!({"a": 1})));
        assert_eq!(Payload::parse("hello there"), Payload::Text("hello there".into()));
        assert_eq!(Payload::parse("+15550100"), Payload::Text("+15550100".into()));
        assert_eq!(
            Payload::from_value(json!("{\"send_reason\":1}")),
            Payload::Json(json!({"send_reason": 1}))
        );
        assert_eq!(
            Payload::from_value(json!({"send_reason": 1})),
            Payload::Json(json!({"send_reason": 1}))
        );
        assert_eq!(Payload::Json(json!("quoted")).as_text(), "quoted");
    }

    #[test]
    fn test_status_timestamp_is_overwritten() {
        let payload = Payload::Json(json!({
            "send_reason": 2, "bat_percent": 55, "timestamp": "2001-01-01T00:00:00Z"
        }));
        match decode(TopicKind::Status, &payload, now()).unwrap() {
            DeviceMessage::Status(status) => {
                assert_eq!(status.bat_percent, 55);
                assert_eq!(status.timestamp, now());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_status_rejects_bad_battery_and_text() {
        let bad = Payload::Json(json!({"send_reason": 1, "bat_percent": 120}));
        assert!(matches!(
            decode(TopicKind::Status, &bad, now()),
            Err(DecodeError::Validation { .. })
        ));

        let text = Payload::Text("not json".into());
        assert!(matches!(
            decode(TopicKind::Status, &text, now()),
            Err(DecodeError::NotJson { .. })
        ));

        let missing = Payload::Json(json!({"bat_percent": 40}));
        assert!(matches!(
            decode(TopicKind::Status, &missing, now()),
            Err(DecodeError::Schema { .. })
        ));
    }

    #[test]
    fn test_call_codes() {
        let incoming = Payload::Json(json!({"status": 2, "number": "+15550100"}));
        match decode(TopicKind::Call, &incoming, now()).unwrap() {
            DeviceMessage::Call(call) => {
                assert_eq!(call.state, CallState::Incoming);
                assert_eq!(call.number.as_deref(), Some("+15550100"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let bare = Payload::parse("3");
        assert!(matches!(
            decode(TopicKind::Call, &bare, now()),
            Ok(DeviceMessage::Call(CallStatus { state: CallState::Connected, .. }))
        ));

        for code in [json!({"status": 1}), json!({"status": 9}), json!(400)] {
            let result = decode(TopicKind::Call, &Payload::Json(code), now());
            assert!(matches!(result, Err(DecodeError::Validation { .. })));
        }
    }

    #[test]
    fn test_ringing_carries_bare_number() {
        let payload = Payload::parse(" +15550100\n");
        match decode(TopicKind::Ringing, &payload, now()).unwrap() {
            DeviceMessage::Call(call) => {
                assert_eq!(call.state, CallState::Incoming);
                assert_eq!(call.number.as_deref(), Some("+15550100"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_received_sms_accepts_both_shapes() {
        let object = Payload::Json(json!({"number": "+15550100", "sms": "hi"}));
        match decode(TopicKind::ReceivedSms, &object, now()).unwrap() {
            DeviceMessage::Sms(sms) => {
                assert_eq!(sms.kind, SmsKind::Received);
                assert_eq!(sms.number, "+15550100");
                assert_eq!(sms.message, "hi");
            }
            other => panic!("unexpected {other:?}"),
        }

        let bare = Payload::parse("hello from the tracker");
        match decode(TopicKind::ReceivedSms, &bare, now()).unwrap() {
            DeviceMessage::Sms(sms) => assert_eq!(sms.message, "hello from the tracker"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stored_sms_requires_object() {
        let bare = Payload::parse("plain");
        assert!(decode(TopicKind::StoredSms, &bare, now()).is_err());

        let stored = Payload::Json(json!({
            "number": "+15550100",
            "message": "old",
            "time_sent": "25/06/15,14:56:40+00"
        }));
        match decode(TopicKind::StoredSms, &stored, now()).unwrap() {
            DeviceMessage::Sms(sms) => {
                assert_eq!(sms.kind, SmsKind::Stored);
                assert!(sms.time_sent_human.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_espnow_accepts_text_and_json() {
        let text = Payload::parse("ping");
        assert!(matches!(
            decode(TopicKind::EspNowReceived, &text, now()),
            Ok(DeviceMessage::EspNow(TextRecord { ref message, .. })) if message == "ping"
        ));

        let json = Payload::Json(json!({"peer": "aa:bb"}));
        match decode(TopicKind::EspNowReceived, &json, now()).unwrap() {
            DeviceMessage::EspNow(record) => assert!(record.message.contains("aa:bb")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_client_events_need_clientid() {
        let payload = Payload::Json(json!({"clientid": "Tracker_01", "username": "x"}));
        assert_eq!(
            decode(TopicKind::Disconnection, &payload, now()).unwrap(),
            DeviceMessage::ClientEvent {
                client_id: "Tracker_01".into(),
                connected: false
            }
        );
        let missing = Payload::Json(json!({"username": "x"}));
        assert!(decode(TopicKind::Connection, &missing, now()).is_err());
    }

    #[test]
    fn test_config_range_validation() {
        let bad = Payload::Json(json!({"ringtone": 99}));
        assert!(matches!(
            decode(TopicKind::Config, &bad, now()),
            Err(DecodeError::Validation { .. })
        ));
        let led = Payload::Json(json!({"red": 1, "green": 2, "blue": 3, "enableled": false}));
        assert!(matches!(
            decode(TopicKind::LedConfig, &led, now()),
            Ok(DeviceMessage::LedConfig(_))
        ));
    }
}
