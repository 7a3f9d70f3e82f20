//! Canonical data model for the GPS tracker relay.
//!
//! This crate holds the records exchanged between the tracker device, the
//! relay and its clients. It has no I/O; the pipeline lives in
//! `tracker-core` and persistence in `tracker-store`.
//!
//! # Features
//!
//! - One canonical record per entity (status, location, call, config, ...)
//! - Range validation mirroring what the device firmware accepts
//! - RFC 3339 timestamps everywhere, with a parser for the modem clock format
//!
//! # Example
//!
//! ```
//! use tracker_types::{DeviceStatus, Notification, NotificationKind};
//!
//! let status: DeviceStatus = serde_json::from_str(r#"{"send_reason": 2, "bat_percent": 55}"#)?;
//! assert!(status.validate().is_ok());
//!
//! let note = Notification::new(NotificationKind::Status, "Device Status Updated", "55%");
//! assert_eq!(note.kind.as_str(), "status");
//! # Ok::<(), serde_json::Error>(())
//! ```

pub mod age;
pub mod error;
pub mod types;

pub use age::{humanize_age, parse_device_time};
pub use error::{ParseError, ParseResult};
pub use types::{
    CallState, CallStatus, CommandRecord, Contacts, DeviceSettings, DeviceStatus, GpsLocation,
    LedConfig, LocationReport, MqttStatus, Notification, NotificationKind, PushToken, SmsKind,
    SmsMessage, TextRecord,
};

/// Default user that notifications and push tokens belong to.
///
/// The relay serves a single device and a single user.
pub const DEFAULT_USER: &str = "default_user";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::InvalidData("test message".to_string());
        assert_eq!(err.to_string(), "Invalid data: test message");

        let err = ParseError::OutOfRange {
            field: "ringtone",
            value: 30,
            min: 0,
            max: 24,
        };
        assert_eq!(err.to_string(), "ringtone out of range: 30 (expected 0..=24)");
    }

    #[test]
    fn test_notification_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&NotificationKind::HighPriority).unwrap(),
            "\"high_priority\""
        );
        assert_eq!(NotificationKind::default(), NotificationKind::General);
    }

    #[test]
    fn test_mqtt_status_defaults() {
        let status: MqttStatus = serde_json::from_str("{}").unwrap();
        assert!(!status.connected);
        assert_eq!(status.connection_attempts, 0);
        assert!(status.last_msg.is_none());
    }

    #[test]
    fn test_push_token_timestamps_match_on_create() {
        let token = PushToken::new(DEFAULT_USER, "phone-1", "abc");
        assert_eq!(token.created_at, token.updated_at);
        assert_eq!(token.user_id, "default_user");
    }
}
