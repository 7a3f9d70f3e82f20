//! Per-message business rules applied between decoding and fan-out.
//!
//! The [`Normalizer`] turns each decoded [`DeviceMessage`] into state
//! updates (latest document, optional history entry), a live event, and
//! sometimes a user notification.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use tracker_types::{
    CallState, CallStatus, DEFAULT_USER, DeviceStatus, GpsLocation, LocationReport, MqttStatus,
    Notification, NotificationKind, SmsKind, SmsMessage, TextRecord,
};

use crate::decode::DeviceMessage;
use crate::entity::Entity;
use crate::error::StoreError;
use crate::events::LiveEvent;
use crate::fanout::Notifier;
use crate::geo::haversine_m;
use crate::traits::{StateStore, StateStoreExt};

/// Characters of an SMS body shown in the notification preview.
pub const SMS_PREVIEW_CHARS: usize = 50;

/// Message for one or more `send_reason` codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReason {
    pub codes: Vec<u8>,
    pub message: String,
}

impl StatusReason {
    pub fn new(codes: &[u8], message: impl Into<String>) -> Self {
        Self {
            codes: codes.to_vec(),
            message: message.into(),
        }
    }
}

/// Lookup from `send_reason` to a human-readable reason.
///
/// Codes missing from the table are still persisted but never notify.
/// `sleep_codes` lists the codes a device sends right before sleeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonTable {
    pub reasons: Vec<StatusReason>,
    pub sleep_codes: Vec<u8>,
}

impl Default for ReasonTable {
    fn default() -> Self {
        Self {
            reasons: vec![
                StatusReason::new(&[0, 1], "Device is online"),
                StatusReason::new(&[2, 3], "Device woken up"),
                StatusReason::new(&[4], "Periodic Wake up"),
            ],
            sleep_codes: vec![6],
        }
    }
}

impl ReasonTable {
    pub fn new(reasons: Vec<StatusReason>, sleep_codes: Vec<u8>) -> Self {
        Self {
            reasons,
            sleep_codes,
        }
    }

    pub fn message(&self, code: u8) -> Option<&str> {
        self.reasons
            .iter()
            .find(|r| r.codes.contains(&code))
            .map(|r| r.message.as_str())
    }

    pub fn is_sleep(&self, code: u8) -> bool {
        self.sleep_codes.contains(&code)
    }
}

/// Merge a location report into the previous latest record.
///
/// GPS and LBS are handled independently: a source without a fresh fix keeps
/// its previous values and age. With no previous record, a stale source is
/// zeroed with no age.
pub fn merge_location(
    previous: Option<&GpsLocation>,
    report: &LocationReport,
    now: OffsetDateTime,
) -> GpsLocation {
    let mut merged = GpsLocation {
        id: uuid::Uuid::new_v4(),
        send_reason: report.send_reason,
        gps_fix: report.has_gps_fix(),
        gps_lat: 0.0,
        gps_lon: 0.0,
        alt: 0.0,
        speed: 0.0,
        course: 0.0,
        sats: 0,
        lbs_fix: report.has_lbs_fix(),
        lbs_lat: 0.0,
        lbs_lon: 0.0,
        gps_age: None,
        lbs_age: None,
        distance_m: None,
        timestamp: now,
    };

    if merged.gps_fix {
        merged.gps_lat = report.gps_lat;
        merged.gps_lon = report.gps_lon;
        merged.alt = report.alt;
        merged.speed = report.speed;
        merged.course = report.course;
        merged.sats = report.sats;
        merged.gps_age = Some(now);
        merged.distance_m = Some(
            previous
                .and_then(GpsLocation::gps_position)
                .map_or(0.0, |(lat, lon)| {
                    haversine_m(lat, lon, report.gps_lat, report.gps_lon)
                }),
        );
    } else if let Some(prev) = previous {
        merged.gps_lat = prev.gps_lat;
        merged.gps_lon = prev.gps_lon;
        merged.alt = prev.alt;
        merged.speed = prev.speed;
        merged.course = prev.course;
        merged.sats = prev.sats;
        merged.gps_age = prev.gps_age;
    }

    if merged.lbs_fix {
        merged.lbs_lat = report.lbs_lat;
        merged.lbs_lon = report.lbs_lon;
        merged.lbs_age = Some(now);
    } else if let Some(prev) = previous {
        merged.lbs_lat = prev.lbs_lat;
        merged.lbs_lon = prev.lbs_lon;
        merged.lbs_age = prev.lbs_age;
    }

    merged
}

/// First [`SMS_PREVIEW_CHARS`] characters, with an ellipsis when cut.
pub fn sms_preview(message: &str) -> String {
    match message.char_indices().nth(SMS_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}

/// Applies per-type rules and hands the results to the [`Notifier`].
pub struct Normalizer {
    store: Arc<dyn StateStore>,
    notifier: Notifier,
    reasons: ReasonTable,
    device_client_prefix: String,
}

impl Normalizer {
    pub fn new(store: Arc<dyn StateStore>, notifier: Notifier, reasons: ReasonTable) -> Self {
        Self {
            store,
            notifier,
            reasons,
            device_client_prefix: "Tracker".to_string(),
        }
    }

    /// Only broker client ids starting with `prefix` count as the device.
    #[must_use]
    pub fn with_device_client_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.device_client_prefix = prefix.into();
        self
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn reasons(&self) -> &ReasonTable {
        &self.reasons
    }

    /// Apply a message, logging instead of returning errors.
    pub async fn handle(&self, message: DeviceMessage, received_at: OffsetDateTime) {
        if let Err(e) = self.apply(message, received_at).await {
            warn!("Failed to apply device message: {}", e);
        }
    }

    pub async fn apply(
        &self,
        message: DeviceMessage,
        received_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        match message {
            DeviceMessage::Status(status) => self.on_status(status).await,
            DeviceMessage::Location(report) => self.on_location(report, received_at).await,
            DeviceMessage::Call(call) => self.on_call(call).await,
            DeviceMessage::LedConfig(led) => {
                self.store.save_latest(&Entity::LedConfig, &led).await?;
                self.notifier.broadcast(LiveEvent::LedConfigUpdate(led)).await;
                Ok(())
            }
            DeviceMessage::Config(settings) => {
                self.store.save_latest(&Entity::DeviceConfig, &settings).await?;
                self.notifier
                    .broadcast(LiveEvent::ConfigUpdate(settings))
                    .await;
                Ok(())
            }
            DeviceMessage::Contacts(contacts) => {
                self.store.save_latest(&Entity::Contacts, &contacts).await?;
                self.notifier
                    .broadcast(LiveEvent::ContactsUpdate(contacts))
                    .await;
                Ok(())
            }
            DeviceMessage::Sms(sms) => self.on_sms(sms).await,
            DeviceMessage::EspNow(record) => self.on_espnow(record).await,
            DeviceMessage::Notification(notification) => {
                self.notifier.dispatch(notification, DEFAULT_USER).await;
                Ok(())
            }
            DeviceMessage::Log(record) => {
                debug!("Device log: {}", record.message);
                self.store.append(&Entity::DeviceLogs, &record).await
            }
            DeviceMessage::ClientEvent {
                client_id,
                connected,
            } => self.on_client_event(&client_id, connected, received_at).await,
            DeviceMessage::LastWill(will) => self.on_last_will(&will, received_at).await,
        }
    }

    async fn on_status(&self, mut status: DeviceStatus) -> Result<(), StoreError> {
        if status.currently_active.is_none() {
            status.currently_active = Some(!self.reasons.is_sleep(status.send_reason));
        }

        self.store.save_latest(&Entity::Status, &status).await?;
        self.store.append(&Entity::Status, &status).await?;
        debug!(
            "Status: reason {}, battery {}%",
            status.send_reason, status.bat_percent
        );

        let notification = self.reasons.message(status.send_reason).map(|reason| {
            Notification::new(
                NotificationKind::Status,
                "Device Status Updated",
                format!("{} - Battery: {}%", reason, status.bat_percent),
            )
            .with_data(serde_json::json!({
                "send_reason": status.send_reason,
                "bat_percent": status.bat_percent,
            }))
        });

        self.notifier.broadcast(LiveEvent::StatusUpdate(status)).await;
        if let Some(notification) = notification {
            self.notifier.dispatch(notification, DEFAULT_USER).await;
        }
        Ok(())
    }

    async fn on_location(
        &self,
        report: LocationReport,
        received_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let previous: Option<GpsLocation> = match self.store.load_latest(&Entity::Location).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Could not load previous location: {}", e);
                None
            }
        };
        let merged = merge_location(previous.as_ref(), &report, received_at);

        self.store.save_latest(&Entity::Location, &merged).await?;
        if merged.gps_fix {
            self.store.append(&Entity::Location, &merged).await?;
        }

        let notification = if merged.gps_fix {
            let moved = merged.distance_m.unwrap_or(0.0);
            info!(
                "GPS fix {:.6}, {:.6}, moved {:.0} m",
                merged.gps_lat, merged.gps_lon, moved
            );
            Some(
                Notification::new(
                    NotificationKind::Location,
                    "Location Updated",
                    format!(
                        "New GPS coordinates: {:.6}, {:.6} (moved {:.0} m)",
                        merged.gps_lat, merged.gps_lon, moved
                    ),
                )
                .with_data(serde_json::json!({
                    "lat": merged.gps_lat,
                    "lon": merged.gps_lon,
                    "distance_m": moved,
                })),
            )
        } else if merged.lbs_fix {
            Some(
                Notification::new(
                    NotificationKind::Location,
                    "Location Updated",
                    format!(
                        "New cell tower position: {:.6}, {:.6}",
                        merged.lbs_lat, merged.lbs_lon
                    ),
                )
                .with_data(serde_json::json!({
                    "lat": merged.lbs_lat,
                    "lon": merged.lbs_lon,
                })),
            )
        } else {
            debug!("Location report without a fresh fix, kept last known position");
            None
        };

        self.notifier
            .broadcast(LiveEvent::LocationUpdate(merged))
            .await;
        if let Some(notification) = notification {
            self.notifier.dispatch(notification, DEFAULT_USER).await;
        }
        Ok(())
    }

    async fn on_call(&self, call: CallStatus) -> Result<(), StoreError> {
        self.store.save_latest(&Entity::CallStatus, &call).await?;

        match call.state {
            CallState::Incoming => {
                let number = call.number.clone().unwrap_or_else(|| "Unknown".to_string());
                info!("Incoming call from {}", number);
                self.notifier.broadcast(LiveEvent::CallUpdate(call)).await;
                let notification = Notification::new(
                    NotificationKind::Call,
                    "Incoming Call",
                    format!("Device receiving call from: {number}"),
                )
                .with_data(serde_json::json!({ "number": number }));
                self.notifier.dispatch(notification, DEFAULT_USER).await;
            }
            CallState::Disconnected => info!("Call disconnected"),
            CallState::Connected => info!("Call connected"),
            CallState::Unknown(code) => debug!("Ignoring call status {}", code),
        }
        Ok(())
    }

    async fn on_sms(&self, sms: SmsMessage) -> Result<(), StoreError> {
        let latest = match sms.kind {
            SmsKind::Received => Entity::SmsReceived,
            SmsKind::Stored | SmsKind::Sent => Entity::SmsStored,
        };
        self.store.save_latest(&latest, &sms).await?;
        self.store.append(&Entity::Sms, &sms).await?;

        let notification = (sms.kind == SmsKind::Received).then(|| {
            Notification::new(
                NotificationKind::Sms,
                "SMS Received",
                format!("From {}: {}", sms.number, sms_preview(&sms.message)),
            )
            .with_data(serde_json::json!({
                "number": sms.number,
                "message": sms.message,
            }))
        });

        self.notifier.broadcast(LiveEvent::SmsUpdate(sms)).await;
        if let Some(notification) = notification {
            self.notifier.dispatch(notification, DEFAULT_USER).await;
        }
        Ok(())
    }

    async fn on_espnow(&self, record: TextRecord) -> Result<(), StoreError> {
        self.store.append(&Entity::EspNow, &record).await?;
        let notification = Notification::new(
            NotificationKind::System,
            "ESP-NOW Message",
            format!("Received: {}", record.message),
        )
        .with_data(serde_json::json!({ "espnow_message": record.message }));
        self.notifier.dispatch(notification, DEFAULT_USER).await;
        Ok(())
    }

    async fn load_mqtt_status(&self) -> MqttStatus {
        match self.store.load_latest(&Entity::MqttStatus).await {
            Ok(status) => status.unwrap_or_default(),
            Err(e) => {
                warn!("Could not load broker status: {}", e);
                MqttStatus::default()
            }
        }
    }

    async fn on_client_event(
        &self,
        client_id: &str,
        connected: bool,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        if !client_id.starts_with(&self.device_client_prefix) {
            debug!("Ignoring broker event for client {}", client_id);
            return Ok(());
        }

        let mut status = self.load_mqtt_status().await;
        status.device_connected = connected;
        if connected {
            status.device_last_connected = Some(at);
        } else {
            status.device_last_disconnected = Some(at);
        }
        self.store.save_latest(&Entity::MqttStatus, &status).await?;

        let notification = if connected {
            info!("Device {} connected to broker", client_id);
            Notification::new(
                NotificationKind::System,
                "Tracker Connected",
                format!("Device {client_id} just connected"),
            )
        } else {
            info!("Device {} disconnected from broker", client_id);
            Notification::new(
                NotificationKind::System,
                "Tracker Disconnected",
                format!("Device {client_id} disconnected"),
            )
        }
        .with_data(serde_json::json!({ "clientid": client_id }));
        self.notifier.dispatch(notification, DEFAULT_USER).await;
        Ok(())
    }

    async fn on_last_will(&self, will: &str, at: OffsetDateTime) -> Result<(), StoreError> {
        warn!("Device connection lost (last will: {:?})", will);

        let mut status = self.load_mqtt_status().await;
        status.device_connected = false;
        status.device_last_disconnected = Some(at);
        self.store.save_latest(&Entity::MqttStatus, &status).await?;

        let notification = Notification::new(
            NotificationKind::HighPriority,
            "Connection Lost",
            "Tracker lost its connection to the broker",
        )
        .with_data(serde_json::json!({ "will": will }));
        self.notifier.dispatch(notification, DEFAULT_USER).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::LiveHub;
    use crate::mock::MockSink;
    use crate::sqlite::SqliteStateStore;
    use time::macros::datetime;

    struct Fixture {
        store: Arc<dyn StateStore>,
        sink: Arc<MockSink>,
        normalizer: Normalizer,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::open_in_memory().unwrap());
        let hub = Arc::new(LiveHub::new());
        let sink = Arc::new(MockSink::new());
        hub.register(sink.clone());
        let notifier = Notifier::new(store.clone(), hub, None);
        Fixture {
            normalizer: Normalizer::new(store.clone(), notifier, ReasonTable::default()),
            store,
            sink,
        }
    }

    fn frame_types(sink: &MockSink) -> Vec<String> {
        sink.frames()
            .iter()
            .map(|f| {
                let value: serde_json::Value = serde_json::from_str(f).unwrap();
                value["type"].as_str().unwrap().to_string()
            })
            .collect()
    }

    async fn notifications(store: &Arc<dyn StateStore>) -> Vec<Notification> {
        store
            .get_history(&Entity::Notifications(DEFAULT_USER.into()), 50)
            .await
            .unwrap()
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect()
    }

    fn report(lat: f64, lon: f64) -> LocationReport {
        LocationReport {
            gps_lat: lat,
            gps_lon: lon,
            alt: 100.0,
            sats: 7,
            lbs_fix: Some(false),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_reason_table() {
        let table = ReasonTable::default();
        assert_eq!(table.message(0), Some("Device is online"));
        assert_eq!(table.message(3), Some("Device woken up"));
        assert_eq!(table.message(4), Some("Periodic Wake up"));
        assert_eq!(table.message(5), None);
        assert!(table.is_sleep(6));
        assert!(!table.is_sleep(2));
    }

    #[test]
    fn test_merge_without_previous_zeroes_stale_source() {
        let now = datetime!(2025-03-01 12:00 UTC);
        let merged = merge_location(None, &report(0.0, 0.0), now);
        assert!(!merged.gps_fix);
        assert_eq!((merged.gps_lat, merged.gps_lon), (0.0, 0.0));
        assert!(merged.gps_age.is_none());
        assert!(merged.distance_m.is_none());
    }

    #[test]
    fn test_merge_invalid_fix_keeps_previous() {
        let t0 = datetime!(2025-03-01 12:00 UTC);
        let t1 = datetime!(2025-03-01 12:05 UTC);
        let first = merge_location(None, &report(12.34, 56.78), t0);
        assert_eq!(first.distance_m, Some(0.0));

        let mut flagged = report(1.0, 1.0);
        flagged.gps_fix = Some(false);
        for bad in [report(0.0, 0.0), flagged] {
            let merged = merge_location(Some(&first), &bad, t1);
            assert!(!merged.gps_fix);
            assert_eq!((merged.gps_lat, merged.gps_lon), (12.34, 56.78));
            assert_eq!(merged.alt, 100.0);
            assert_eq!(merged.sats, 7);
            assert_eq!(merged.gps_age, Some(t0));
            assert_eq!(merged.timestamp, t1);
        }
    }

    #[test]
    fn test_merge_sources_are_independent() {
        let t0 = datetime!(2025-03-01 12:00 UTC);
        let t1 = datetime!(2025-03-01 12:10 UTC);
        let mut with_lbs = report(12.34, 56.78);
        with_lbs.lbs_fix = None;
        with_lbs.lbs_lat = 12.3;
        with_lbs.lbs_lon = 56.7;
        let first = merge_location(None, &with_lbs, t0);

        // Only a cell tower fix this time.
        let lbs_only = LocationReport {
            gps_fix: Some(false),
            lbs_lat: 12.5,
            lbs_lon: 56.9,
            ..Default::default()
        };
        let merged = merge_location(Some(&first), &lbs_only, t1);
        assert_eq!(merged.gps_age, Some(t0));
        assert_eq!(merged.gps_lat, 12.34);
        assert_eq!(merged.lbs_age, Some(t1));
        assert_eq!((merged.lbs_lat, merged.lbs_lon), (12.5, 56.9));
    }

    #[test]
    fn test_merge_computes_distance_from_previous_fix() {
        let t0 = datetime!(2025-03-01 12:00 UTC);
        let first = merge_location(None, &report(0.5, 0.0), t0);
        let second = merge_location(Some(&first), &report(1.5, 0.0), t0);
        let d = second.distance_m.unwrap();
        assert!((d - 111_194.93).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_sms_preview() {
        assert_eq!(sms_preview("short"), "short");
        let long = "x".repeat(60);
        let preview = sms_preview(&long);
        assert_eq!(preview.len(), 53);
        assert!(preview.ends_with("..."));
        assert_eq!(sms_preview(&"é".repeat(50)), "é".repeat(50));
    }

    #[tokio::test]
    async fn test_status_notifies_with_reason() {
        let f = fixture();
        f.normalizer
            .apply(
                DeviceMessage::Status(DeviceStatus::new(2, 55)),
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap();

        let latest: DeviceStatus = f.store.load_latest(&Entity::Status).await.unwrap().unwrap();
        assert_eq!(latest.bat_percent, 55);
        assert_eq!(latest.currently_active, Some(true));

        let notes = notifications(&f.store).await;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].message, "Device woken up - Battery: 55%");
        assert_eq!(frame_types(&f.sink), vec!["status_update", "notification"]);
    }

    #[tokio::test]
    async fn test_unlisted_reason_persists_silently() {
        let f = fixture();
        f.normalizer
            .apply(
                DeviceMessage::Status(DeviceStatus::new(6, 40)),
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap();

        let latest: DeviceStatus = f.store.load_latest(&Entity::Status).await.unwrap().unwrap();
        assert_eq!(latest.currently_active, Some(false));
        assert!(notifications(&f.store).await.is_empty());
        assert_eq!(frame_types(&f.sink), vec!["status_update"]);
    }

    #[tokio::test]
    async fn test_explicit_active_flag_is_kept() {
        let f = fixture();
        let mut status = DeviceStatus::new(6, 40);
        status.currently_active = Some(true);
        f.normalizer
            .apply(DeviceMessage::Status(status), OffsetDateTime::now_utc())
            .await
            .unwrap();
        let latest: DeviceStatus = f.store.load_latest(&Entity::Status).await.unwrap().unwrap();
        assert_eq!(latest.currently_active, Some(true));
    }

    #[tokio::test]
    async fn test_location_history_only_on_fresh_gps() {
        let f = fixture();
        let now = OffsetDateTime::now_utc();
        f.normalizer
            .apply(DeviceMessage::Location(report(12.34, 56.78)), now)
            .await
            .unwrap();
        f.normalizer
            .apply(DeviceMessage::Location(report(0.0, 0.0)), now)
            .await
            .unwrap();

        let latest: GpsLocation = f.store.load_latest(&Entity::Location).await.unwrap().unwrap();
        assert_eq!((latest.gps_lat, latest.gps_lon), (12.34, 56.78));
        assert!(!latest.gps_fix);

        let history = f.store.get_history(&Entity::Location, 10).await.unwrap();
        assert_eq!(history.len(), 1);

        let notes = notifications(&f.store).await;
        assert_eq!(notes.len(), 1);
        assert_eq!(
            notes[0].message,
            "New GPS coordinates: 12.340000, 56.780000 (moved 0 m)"
        );
    }

    #[tokio::test]
    async fn test_call_states() {
        let f = fixture();
        let now = OffsetDateTime::now_utc();
        for state in [CallState::Connected, CallState::Connected, CallState::Disconnected] {
            f.normalizer
                .apply(DeviceMessage::Call(CallStatus::new(state, None)), now)
                .await
                .unwrap();
        }
        assert!(notifications(&f.store).await.is_empty());
        assert!(f.sink.frames().is_empty());

        let ring = CallStatus::new(CallState::Incoming, Some("+15550100".into()));
        f.normalizer
            .apply(DeviceMessage::Call(ring.clone()), now)
            .await
            .unwrap();
        f.normalizer
            .apply(DeviceMessage::Call(ring), now)
            .await
            .unwrap();

        let notes = notifications(&f.store).await;
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].message, "Device receiving call from: +15550100");
        assert_eq!(
            frame_types(&f.sink),
            vec!["call_update", "notification", "call_update", "notification"]
        );

        let latest: CallStatus = f.store.load_latest(&Entity::CallStatus).await.unwrap().unwrap();
        assert_eq!(latest.state, CallState::Incoming);
    }

    #[tokio::test]
    async fn test_received_sms() {
        let f = fixture();
        let sms = SmsMessage::new(SmsKind::Received, "+15550100", "x".repeat(80));
        f.normalizer
            .apply(DeviceMessage::Sms(sms), OffsetDateTime::now_utc())
            .await
            .unwrap();

        let notes = notifications(&f.store).await;
        assert_eq!(notes[0].title, "SMS Received");
        assert_eq!(notes[0].message, format!("From +15550100: {}...", "x".repeat(50)));
        assert_eq!(f.store.get_history(&Entity::Sms, 10).await.unwrap().len(), 1);
        assert!(f.store.get_latest(&Entity::SmsReceived).await.unwrap().is_some());
        assert!(f.store.get_latest(&Entity::SmsStored).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stored_sms_does_not_notify() {
        let f = fixture();
        let sms = SmsMessage::new(SmsKind::Stored, "+15550100", "old");
        f.normalizer
            .apply(DeviceMessage::Sms(sms), OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert!(notifications(&f.store).await.is_empty());
        assert_eq!(frame_types(&f.sink), vec!["sms_update"]);
    }

    #[tokio::test]
    async fn test_client_events_filter_by_prefix() {
        let f = fixture();
        let now = OffsetDateTime::now_utc();
        f.normalizer
            .apply(
                DeviceMessage::ClientEvent {
                    client_id: "dashboard-1".into(),
                    connected: true,
                },
                now,
            )
            .await
            .unwrap();
        assert!(f.store.get_latest(&Entity::MqttStatus).await.unwrap().is_none());

        f.normalizer
            .apply(
                DeviceMessage::ClientEvent {
                    client_id: "Tracker_01".into(),
                    connected: true,
                },
                now,
            )
            .await
            .unwrap();
        let status: MqttStatus = f.store.load_latest(&Entity::MqttStatus).await.unwrap().unwrap();
        assert!(status.device_connected);
        assert_eq!(status.device_last_connected, Some(now));

        let notes = notifications(&f.store).await;
        assert_eq!(notes[0].title, "Tracker Connected");
        assert_eq!(notes[0].message, "Device Tracker_01 just connected");
    }

    #[tokio::test]
    async fn test_last_will_marks_device_offline() {
        let f = fixture();
        let seen = datetime!(2025-03-01 12:00 UTC);
        let status = MqttStatus {
            device_connected: true,
            last_msg: Some(seen),
            ..Default::default()
        };
        f.store.save_latest(&Entity::MqttStatus, &status).await.unwrap();

        f.normalizer
            .apply(DeviceMessage::LastWill("offline".into()), OffsetDateTime::now_utc())
            .await
            .unwrap();

        let status: MqttStatus = f.store.load_latest(&Entity::MqttStatus).await.unwrap().unwrap();
        assert!(!status.device_connected);
        assert_eq!(status.last_msg, Some(seen));

        let notes = notifications(&f.store).await;
        assert_eq!(notes[0].kind, NotificationKind::HighPriority);
        assert_eq!(notes[0].title, "Connection Lost");
    }

    #[tokio::test]
    async fn test_espnow_and_logs() {
        let f = fixture();
        let now = OffsetDateTime::now_utc();
        f.normalizer
            .apply(DeviceMessage::EspNow(TextRecord::new("ping")), now)
            .await
            .unwrap();
        f.normalizer
            .apply(DeviceMessage::Log(TextRecord::new("boot ok")), now)
            .await
            .unwrap();

        assert_eq!(f.store.get_history(&Entity::EspNow, 10).await.unwrap().len(), 1);
        assert_eq!(f.store.get_history(&Entity::DeviceLogs, 10).await.unwrap().len(), 1);
        let notes = notifications(&f.store).await;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].message, "Received: ping");
    }
}
