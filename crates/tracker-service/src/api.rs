//! REST API endpoints for the tracker relay.
//!
//! # Read endpoints
//!
//! "Latest" reads return the stored document or `404 {"error": "No data
//! available"}`; history reads return a JSON array, empty when nothing is
//! stored. Persistence errors degrade the same way and are only logged.
//!
//! # Write endpoints
//!
//! `PUT` on a device document stores it as the latest value, then sends the
//! matching `set_*` command and reports `{"success": bool}`. Device endpoints
//! under `/api/device` dispatch immediately and may wait for a sleeping
//! device to wake up; `POST /api/commands` only queues and answers `202`.
//!
//! ## Error Handling
//!
//! Client errors return 4xx through [`AppError`]. A failed publish or a wake
//! timeout is not a client error: it is reported as `{"success": false}`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use tracker_core::types::{
    CommandRecord, Contacts, DEFAULT_USER, DeviceSettings, LedConfig, MqttStatus, PushToken,
};
use tracker_core::{
    Command, CommandError, Entity, HistoryFilter, LiveEvent, Payload, RequestKind, StateStore,
    StateStoreExt, StoreError,
};

use crate::state::AppState;

/// Default number of history records returned.
const DEFAULT_HISTORY_LIMIT: u32 = 50;
/// Upper bound on `limit`.
const MAX_HISTORY_LIMIT: u32 = 1000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/mqtt/status", get(mqtt_status))
        // Device state
        .route("/api/status/latest", get(status_latest))
        .route("/api/status/history", get(status_history))
        .route("/api/location/latest", get(location_latest))
        .route("/api/location/history", get(location_history))
        .route("/api/sms/history", get(sms_history))
        // Device documents
        .route("/api/led_config", get(get_led_config).put(put_led_config))
        .route("/api/config", get(get_device_config).put(put_device_config))
        .route("/api/contacts", get(get_contacts).put(put_contacts))
        // Notifications
        .route("/api/notifications", get(notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/{id}/read", post(mark_notification_read))
        .route("/api/push-tokens", post(register_push_token))
        // Commands
        .route("/api/commands", post(submit_command))
        .route("/api/device/mode/{mode}", post(device_mode))
        .route("/api/device/request/{what}", post(device_request))
        .route("/api/device/call", post(device_call))
        .route("/api/device/sms", post(device_sms))
        // Ingestion
        .route("/api/webhook/mqtt", post(webhook))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub uptime_secs: i64,
    /// Connected live clients.
    pub subscribers: usize,
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let now = OffsetDateTime::now_utc();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        uptime_secs: (now - state.started_at).whole_seconds(),
        subscribers: state.hub().subscriber_count(),
    })
}

/// Broker connectivity. Reports a default (disconnected) status before the
/// first broker event.
async fn mqtt_status(State(state): State<Arc<AppState>>) -> Json<MqttStatus> {
    match state.store.load_latest::<MqttStatus>(&Entity::MqttStatus).await {
        Ok(status) => Json(status.unwrap_or_default()),
        Err(e) => {
            warn!("Failed to read MQTT status: {}", e);
            Json(MqttStatus::default())
        }
    }
}

async fn latest(state: &AppState, entity: Entity) -> Result<Json<Value>, AppError> {
    match state.store.get_latest(&entity).await {
        Ok(Some(value)) => Ok(Json(value)),
        Ok(None) => Err(AppError::no_data()),
        Err(e) => {
            warn!("Failed to read latest {}: {}", entity, e);
            Err(AppError::no_data())
        }
    }
}

fn clamp_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

/// Query parameters for history endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of records, newest first.
    pub limit: Option<u32>,
    /// Records to skip, for paging.
    pub offset: Option<u32>,
    /// Only records stored at or after this RFC 3339 instant.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub since: Option<OffsetDateTime>,
}

impl HistoryQuery {
    fn filter(&self) -> HistoryFilter {
        HistoryFilter {
            limit: Some(clamp_limit(self.limit)),
            offset: self.offset,
            since: self.since,
            unread_only: false,
        }
    }
}

async fn history(state: &AppState, entity: Entity, filter: HistoryFilter) -> Json<Vec<Value>> {
    match state.store.query_history(&entity, &filter).await {
        Ok(records) => Json(records),
        Err(e) => {
            warn!("Failed to read {} history: {}", entity, e);
            Json(Vec::new())
        }
    }
}

async fn status_latest(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    latest(&state, Entity::Status).await
}

async fn status_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<Value>> {
    history(&state, Entity::Status, query.filter()).await
}

async fn location_latest(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    latest(&state, Entity::Location).await
}

async fn location_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<Value>> {
    history(&state, Entity::Location, query.filter()).await
}

async fn sms_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<Value>> {
    history(&state, Entity::Sms, query.filter()).await
}

async fn get_led_config(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    latest(&state, Entity::LedConfig).await
}

async fn get_device_config(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    latest(&state, Entity::DeviceConfig).await
}

async fn get_contacts(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    latest(&state, Entity::Contacts).await
}

/// Outcome of a command sent to the device.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }
}

/// Send a command now. Argument errors are the caller's fault; anything
/// else becomes `{"success": false}`.
async fn send_command(state: &AppState, command: Command) -> Result<Json<CommandResponse>, AppError> {
    let name = command.name();
    match state.dispatcher.dispatch(command).await {
        Ok(()) => Ok(Json(CommandResponse::ok())),
        Err(e @ (CommandError::InvalidArgument { .. } | CommandError::UnknownCommand(_))) => {
            Err(AppError::BadRequest(e.to_string()))
        }
        Err(e) => {
            warn!("Command {} failed: {}", name, e);
            Ok(Json(CommandResponse {
                success: false,
                error: Some(e.to_string()),
            }))
        }
    }
}

/// Update the stored LED configuration and send it to the device.
///
/// # Errors
///
/// Returns [`AppError::BadRequest`] if a field is out of range.
async fn put_led_config(
    State(state): State<Arc<AppState>>,
    Json(mut led): Json<LedConfig>,
) -> Result<Json<CommandResponse>, AppError> {
    led.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    led.timestamp = OffsetDateTime::now_utc();
    state.store.save_latest(&Entity::LedConfig, &led).await?;
    state
        .notifier
        .broadcast(LiveEvent::LedConfigUpdate(led.clone()))
        .await;
    send_command(&state, Command::SetLedConfig(led)).await
}

/// Update the stored device settings and send them to the device.
///
/// # Errors
///
/// Returns [`AppError::BadRequest`] if a field is out of range.
async fn put_device_config(
    State(state): State<Arc<AppState>>,
    Json(mut settings): Json<DeviceSettings>,
) -> Result<Json<CommandResponse>, AppError> {
    settings
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    settings.timestamp = OffsetDateTime::now_utc();
    state
        .store
        .save_latest(&Entity::DeviceConfig, &settings)
        .await?;
    state
        .notifier
        .broadcast(LiveEvent::ConfigUpdate(settings.clone()))
        .await;
    send_command(&state, Command::SetConfig(settings)).await
}

async fn put_contacts(
    State(state): State<Arc<AppState>>,
    Json(mut contacts): Json<Contacts>,
) -> Result<Json<CommandResponse>, AppError> {
    contacts.timestamp = OffsetDateTime::now_utc();
    state.store.save_latest(&Entity::Contacts, &contacts).await?;
    state
        .notifier
        .broadcast(LiveEvent::ContactsUpdate(contacts.clone()))
        .await;
    send_command(&state, Command::SetContacts(contacts)).await
}

/// Query parameters for the notification list.
#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub limit: Option<u32>,
    #[serde(default)]
    pub unread_only: bool,
    pub user_id: Option<String>,
}

fn notifications_of(user_id: Option<String>) -> Entity {
    Entity::Notifications(user_id.unwrap_or_else(|| DEFAULT_USER.to_string()))
}

/// Stored notifications, newest first. `unread_only` filters before `limit`.
async fn notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationQuery>,
) -> Json<Vec<Value>> {
    let filter = HistoryFilter {
        limit: Some(clamp_limit(query.limit)),
        unread_only: query.unread_only,
        ..HistoryFilter::default()
    };
    history(&state, notifications_of(query.user_id), filter).await
}

/// Selects whose notifications an endpoint acts on.
#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub count: u64,
}

/// Number of unread notifications. Reads as 0 when the store fails.
async fn unread_count(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Json<UnreadCount> {
    let entity = notifications_of(query.user_id);
    let filter = HistoryFilter {
        unread_only: true,
        ..HistoryFilter::default()
    };
    let count = match state.store.count_history(&entity, &filter).await {
        Ok(count) => count,
        Err(e) => {
            warn!("Failed to count unread notifications: {}", e);
            0
        }
    };
    Json(UnreadCount { count })
}

/// Mark one notification as read.
///
/// # Errors
///
/// Returns [`AppError::NotFound`] if no notification has this id.
async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Json<CommandResponse>, AppError> {
    let entity = notifications_of(query.user_id);
    if state.store.mark_read(&entity, &id).await? {
        debug!("Marked notification {} read", id);
        Ok(Json(CommandResponse::ok()))
    } else {
        Err(AppError::NotFound(format!("Notification {} not found", id)))
    }
}

/// Request body for registering a push token.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPushToken {
    pub token: String,
    pub device_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Register a push token. Re-registering a device replaces its token.
async fn register_push_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterPushToken>,
) -> Result<Json<CommandResponse>, AppError> {
    if request.token.trim().is_empty() {
        return Err(AppError::BadRequest("token cannot be empty".to_string()));
    }
    if request.device_id.trim().is_empty() {
        return Err(AppError::BadRequest("deviceId cannot be empty".to_string()));
    }

    let user = request.user_id.unwrap_or_else(|| DEFAULT_USER.to_string());
    state
        .store
        .upsert_push_token(PushToken::new(user.as_str(), request.device_id.as_str(), request.token))
        .await?;
    info!("Registered push token for {}/{}", user, request.device_id);
    Ok(Json(CommandResponse::ok()))
}

/// Queue a command record for the command worker.
///
/// # Errors
///
/// - [`AppError::BadRequest`] if the command is unknown or its arguments are invalid.
/// - [`AppError::Unavailable`] if the command worker has stopped.
async fn submit_command(
    State(state): State<Arc<AppState>>,
    Json(mut record): Json<CommandRecord>,
) -> Result<(StatusCode, Json<CommandResponse>), AppError> {
    Command::from_record(&record, state.store.as_ref())
        .await
        .map_err(|e| match e {
            CommandError::Store(e) => AppError::Store(e),
            other => AppError::BadRequest(other.to_string()),
        })?;

    record.pending = true;
    record.timestamp = OffsetDateTime::now_utc();
    let name = record.command.clone();

    state.commands.submit(record).await.map_err(|e| match e {
        CommandError::Store(e) => AppError::Store(e),
        other => AppError::Unavailable(other.to_string()),
    })?;
    debug!("Queued command {}", name);

    Ok((StatusCode::ACCEPTED, Json(CommandResponse::ok())))
}

async fn device_mode(
    State(state): State<Arc<AppState>>,
    Path(mode): Path<u8>,
) -> Result<Json<CommandResponse>, AppError> {
    send_command(&state, Command::Mode(mode)).await
}

async fn device_request(
    State(state): State<Arc<AppState>>,
    Path(what): Path<String>,
) -> Result<Json<CommandResponse>, AppError> {
    let kind = RequestKind::parse(&what)
        .ok_or_else(|| AppError::BadRequest(format!("unknown request: {}", what)))?;
    send_command(&state, Command::Request(kind)).await
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub number: String,
}

async fn device_call(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CallRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    if request.number.trim().is_empty() {
        return Err(AppError::BadRequest("number cannot be empty".to_string()));
    }
    send_command(&state, Command::MakeCall { number: request.number }).await
}

#[derive(Debug, Deserialize)]
pub struct SmsRequest {
    pub number: String,
    pub message: String,
}

async fn device_sms(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SmsRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    if request.number.trim().is_empty() {
        return Err(AppError::BadRequest("number cannot be empty".to_string()));
    }
    send_command(
        &state,
        Command::SendSms {
            number: request.number,
            message: request.message,
        },
    )
    .await
}

/// A broker message relayed over HTTP.
#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub topic: String,
    /// A JSON-encoded string, plain text or an inline object.
    #[serde(default)]
    pub payload: Value,
}

impl WebhookMessage {
    fn payload(self) -> Payload {
        Payload::from_value(self.payload)
    }
}

/// Hand a relayed broker message to the ingestion pipeline.
///
/// # Errors
///
/// - [`AppError::NotFound`] if webhook ingestion is disabled.
/// - [`AppError::Unavailable`] if the pipeline has stopped.
async fn webhook(
    State(state): State<Arc<AppState>>,
    Json(message): Json<WebhookMessage>,
) -> Result<Json<CommandResponse>, AppError> {
    if !state.config.read().await.webhook.enabled {
        return Err(AppError::NotFound("Webhook ingestion is disabled".to_string()));
    }
    if message.topic.is_empty() {
        return Err(AppError::BadRequest("topic cannot be empty".to_string()));
    }

    let topic = message.topic.clone();
    let kind = state
        .webhook
        .submit(topic.as_str(), message.payload())
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;
    if kind.is_none() {
        debug!("Webhook topic {} has no handler", topic);
    }
    Ok(Json(CommandResponse::ok()))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(StoreError),
    Unavailable(String),
    Internal(String),
}

impl AppError {
    fn no_data() -> Self {
        AppError::NotFound("No data available".to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use tracker_core::types::{DeviceStatus, Notification, NotificationKind};
    use tracker_core::{MockPublisher, SqliteStateStore};

    use crate::config::Config;
    use crate::state::Workers;

    struct TestApp {
        state: Arc<AppState>,
        publisher: Arc<MockPublisher>,
        workers: Option<Workers>,
    }

    fn create_test_app() -> TestApp {
        let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::open_in_memory().unwrap());
        let publisher = Arc::new(MockPublisher::new());
        let (state, workers) =
            AppState::new(Config::default(), store, publisher.clone(), None);
        TestApp {
            state,
            publisher,
            workers: Some(workers),
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn response_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn call(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
        let response = router()
            .with_state(Arc::clone(&app.state))
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        (status, response_json(response).await)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();
        let (status, json) = call(&app, get("/api/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
        assert_eq!(json["subscribers"], 0);
    }

    #[tokio::test]
    async fn test_latest_without_data_is_404() {
        let app = create_test_app();
        for uri in [
            "/api/status/latest",
            "/api/location/latest",
            "/api/led_config",
            "/api/config",
            "/api/contacts",
        ] {
            let (status, json) = call(&app, get(uri)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(json["error"], "No data available");
        }
    }

    #[tokio::test]
    async fn test_history_without_data_is_empty() {
        let app = create_test_app();
        for uri in [
            "/api/status/history",
            "/api/location/history?limit=5",
            "/api/sms/history",
            "/api/notifications",
        ] {
            let (status, json) = call(&app, get(uri)).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert!(json.as_array().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_status_latest_and_history() {
        let app = create_test_app();
        let status = DeviceStatus::new(2, 55);
        app.state.store.save_latest(&Entity::Status, &status).await.unwrap();
        app.state.store.append(&Entity::Status, &status).await.unwrap();

        let (code, json) = call(&app, get("/api/status/latest")).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(json["bat_percent"], 55);

        let (_, json) = call(&app, get("/api/status/history?limit=1")).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_paging_and_since() {
        let app = create_test_app();
        for reason in 0..4 {
            let status = DeviceStatus::new(reason, 50);
            app.state.store.append(&Entity::Status, &status).await.unwrap();
        }

        let (_, json) = call(&app, get("/api/status/history?limit=2&offset=1")).await;
        let reasons: Vec<_> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["send_reason"].as_u64().unwrap())
            .collect();
        assert_eq!(reasons, vec![2, 1]);

        let (status, json) =
            call(&app, get("/api/status/history?since=2100-01-01T00:00:00Z")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());

        let (_, json) = call(&app, get("/api/status/history?since=2000-01-01T00:00:00Z")).await;
        assert_eq!(json.as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_mqtt_status_default() {
        let app = create_test_app();
        let (status, json) = call(&app, get("/api/mqtt/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["connected"], false);
        assert_eq!(json["connection_attempts"], 0);
    }

    #[tokio::test]
    async fn test_put_led_config_then_read() {
        let app = create_test_app();
        let body = serde_json::json!({"red": 10, "green": 20, "blue": 30, "enableled": true});

        let (status, json) = call(&app, json_request("PUT", "/api/led_config", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);

        let (_, json) = call(&app, get("/api/led_config")).await;
        assert_eq!(json["red"], 10);
        assert_eq!(json["green"], 20);
        assert_eq!(json["blue"], 30);
        assert_eq!(json["enableled"], true);

        let published = app.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "Tracker/to/set/led_config");
        let sent: Value = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(sent["red"], 10);
        assert!(sent.get("timestamp").is_none());
    }

    #[tokio::test]
    async fn test_put_contacts_then_read() {
        let app = create_test_app();
        let body = serde_json::json!({"nam1": "Home", "num1": "+15550100"});

        let (_, json) = call(&app, json_request("PUT", "/api/contacts", body)).await;
        assert_eq!(json["success"], true);

        let (_, json) = call(&app, get("/api/contacts")).await;
        assert_eq!(json["nam1"], "Home");
        assert_eq!(json["num1"], "+15550100");
        assert_eq!(app.publisher.published()[0].0, "Tracker/to/set/contacts");
    }

    #[tokio::test]
    async fn test_put_config_publish_failure_reports_false() {
        let app = create_test_app();
        app.publisher.set_disconnected(true);
        let body = serde_json::json!({"callmode": 1});

        let (status, json) = call(&app, json_request("PUT", "/api/config", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], false);
        assert!(json["error"].is_string());

        // Stored even though the device did not get it.
        let (_, json) = call(&app, get("/api/config")).await;
        assert_eq!(json["callmode"], 1);
    }

    #[tokio::test]
    async fn test_device_mode() {
        let app = create_test_app();
        let (status, json) = call(&app, json_request("POST", "/api/device/mode/2", Value::Null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(
            app.publisher.published(),
            vec![("Tracker/to/mode".to_string(), "2".to_string())]
        );

        let (status, _) = call(&app, json_request("POST", "/api/device/mode/9", Value::Null)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_device_request() {
        let app = create_test_app();
        let (_, json) = call(
            &app,
            json_request("POST", "/api/device/request/location", Value::Null),
        )
        .await;
        assert_eq!(json["success"], true);
        assert_eq!(
            app.publisher.published(),
            vec![("Tracker/to/request".to_string(), "1".to_string())]
        );

        let (status, _) = call(
            &app,
            json_request("POST", "/api/device/request/weather", Value::Null),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_device_call_and_sms() {
        let app = create_test_app();
        call(
            &app,
            json_request("POST", "/api/device/call", serde_json::json!({"number": "+15550100"})),
        )
        .await;
        call(
            &app,
            json_request(
                "POST",
                "/api/device/sms",
                serde_json::json!({"number": "+15550100", "message": "hi"}),
            ),
        )
        .await;

        let published = app.publisher.published();
        assert_eq!(published[0], ("Tracker/to/call".to_string(), "+15550100".to_string()));
        assert_eq!(published[1].0, "Tracker/to/sms/send");
        let sms: Value = serde_json::from_str(&published[1].1).unwrap();
        assert_eq!(sms["message"], "hi");
    }

    #[tokio::test]
    async fn test_submit_command_is_queued() {
        let app = create_test_app();
        let body = serde_json::json!({"command": "scream", "data1": true});

        let (status, json) = call(&app, json_request("POST", "/api/commands", body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["success"], true);

        let stored: CommandRecord = app
            .state
            .store
            .load_latest(&Entity::Command)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.command, "scream");
        assert!(stored.pending);
    }

    #[tokio::test]
    async fn test_submit_unknown_command_is_rejected() {
        let app = create_test_app();
        let body = serde_json::json!({"command": "self_destruct"});
        let (status, json) = call(&app, json_request("POST", "/api/commands", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("self_destruct"));
    }

    #[tokio::test]
    async fn test_register_push_token() {
        let app = create_test_app();
        let body = serde_json::json!({"token": "t1", "deviceId": "phone"});
        let (status, _) = call(&app, json_request("POST", "/api/push-tokens", body)).await;
        assert_eq!(status, StatusCode::OK);

        let body = serde_json::json!({"token": "t2", "deviceId": "phone", "userId": DEFAULT_USER});
        call(&app, json_request("POST", "/api/push-tokens", body)).await;

        let tokens = app.state.store.push_tokens(DEFAULT_USER).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token, "t2");

        let body = serde_json::json!({"token": " ", "deviceId": "phone"});
        let (status, _) = call(&app, json_request("POST", "/api/push-tokens", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_notifications_unread_only() {
        let app = create_test_app();
        let entity = Entity::Notifications(DEFAULT_USER.to_string());
        let mut read = Notification::new(NotificationKind::Sms, "SMS", "old");
        read.read = true;
        let unread = Notification::new(NotificationKind::Call, "Call", "new");
        app.state.store.append(&entity, &read).await.unwrap();
        app.state.store.append(&entity, &unread).await.unwrap();

        let (_, json) = call(&app, get("/api/notifications")).await;
        assert_eq!(json.as_array().unwrap().len(), 2);

        let (_, json) = call(&app, get("/api/notifications?unread_only=true&limit=10")).await;
        let items = json.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["message"], "new");
    }

    #[tokio::test]
    async fn test_unread_filter_applies_before_limit() {
        let app = create_test_app();
        let entity = Entity::Notifications(DEFAULT_USER.to_string());
        let older = Notification::new(NotificationKind::Sms, "SMS", "older");
        app.state.store.append(&entity, &older).await.unwrap();
        for i in 0..3 {
            let mut read = Notification::new(NotificationKind::Status, "Status", format!("r{i}"));
            read.read = true;
            app.state.store.append(&entity, &read).await.unwrap();
        }

        let (_, json) = call(&app, get("/api/notifications?unread_only=true&limit=1")).await;
        let items = json.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["message"], "older");
    }

    #[tokio::test]
    async fn test_mark_notification_read() {
        let app = create_test_app();
        let entity = Entity::Notifications(DEFAULT_USER.to_string());
        let first = Notification::new(NotificationKind::Call, "Call", "one");
        let second = Notification::new(NotificationKind::Sms, "SMS", "two");
        app.state.store.append(&entity, &first).await.unwrap();
        app.state.store.append(&entity, &second).await.unwrap();

        let (_, json) = call(&app, get("/api/notifications/unread-count")).await;
        assert_eq!(json["count"], 2);

        let uri = format!("/api/notifications/{}/read", first.id);
        let (status, json) = call(&app, json_request("POST", &uri, Value::Null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);

        let (_, json) = call(&app, get("/api/notifications/unread-count")).await;
        assert_eq!(json["count"], 1);

        let (_, json) = call(&app, get("/api/notifications?unread_only=true")).await;
        let items = json.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["message"], "two");

        let (_, json) = call(&app, get("/api/notifications")).await;
        let marked = json
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["message"] == "one")
            .unwrap();
        assert_eq!(marked["read"], true);

        let (status, _) = call(
            &app,
            json_request("POST", "/api/notifications/no-such-id/read", Value::Null),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Other users' notifications are separate.
        let (_, json) = call(&app, get("/api/notifications/unread-count?user_id=someone")).await;
        assert_eq!(json["count"], 0);
    }

    #[tokio::test]
    async fn test_webhook_payload_shapes() {
        let mut app = create_test_app();
        let cancel = CancellationToken::new();
        let handles = app.workers.take().unwrap().spawn(&cancel);

        // JSON encoded as a string.
        let body = serde_json::json!({
            "topic": "Tracker/status",
            "payload": r#"{"send_reason": 1, "bat_percent": 70}"#,
        });
        let (status, json) = call(&app, json_request("POST", "/api/webhook/mqtt", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);

        // Inline object.
        let body = serde_json::json!({
            "topic": "Tracker/from/led_config",
            "payload": {"red": 1, "green": 2, "blue": 3, "enableled": false},
        });
        call(&app, json_request("POST", "/api/webhook/mqtt", body)).await;

        // Plain text.
        let body = serde_json::json!({"topic": "Tracker/logs", "payload": "booting"});
        call(&app, json_request("POST", "/api/webhook/mqtt", body)).await;

        let mut done = false;
        for _ in 0..100 {
            let status = app.state.store.get_latest(&Entity::Status).await.unwrap();
            let led = app.state.store.get_latest(&Entity::LedConfig).await.unwrap();
            let logs = app.state.store.get_history(&Entity::DeviceLogs, 10).await.unwrap();
            if status.is_some() && led.is_some() && !logs.is_empty() {
                assert_eq!(status.unwrap()["bat_percent"], 70);
                assert_eq!(led.unwrap()["blue"], 3);
                done = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(done, "webhook messages were not processed");

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_webhook_pipeline_closed() {
        let mut app = create_test_app();
        drop(app.workers.take());

        let body = serde_json::json!({"topic": "Tracker/status", "payload": "{}"});
        let (status, json) = call(&app, json_request("POST", "/api/webhook/mqtt", body)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_webhook_disabled() {
        let app = create_test_app();
        app.state.config.write().await.webhook.enabled = false;

        let body = serde_json::json!({"topic": "Tracker/status", "payload": "{}"});
        let (status, _) = call(&app, json_request("POST", "/api/webhook/mqtt", body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_app_error_into_response() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::Unavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                AppError::Store(StoreError::Unavailable("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_history_limit_clamped() {
        assert_eq!(clamp_limit(None), DEFAULT_HISTORY_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(5000)), MAX_HISTORY_LIMIT);

        let filter = HistoryQuery {
            offset: Some(3),
            ..HistoryQuery::default()
        }
        .filter();
        assert_eq!(filter.limit, Some(DEFAULT_HISTORY_LIMIT));
        assert_eq!(filter.offset, Some(3));
        assert!(!filter.unread_only);
    }
}
