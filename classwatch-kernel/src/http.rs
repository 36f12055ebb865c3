/**
 * API REST CLASSWATCH - Surface HTTP du kernel pour le dashboard
 *
 * RÔLE :
 * Expose l'état des appareils, les commandes, la connexion broker, les
 * présences et les notifications au front-end.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, réponses JSON
 * - Routes : /health, /system, /devices, /mqtt, /students, /attendance,
 *   /dashboard, /notifications
 * - Commandes : rejet de validation => 400, broker absent => 503,
 *   échec transport => 502
 */

use crate::attendance;
use crate::bridge::DeviceBridge;
use crate::chart::{ChartRecorder, SensorChart};
use crate::commands::CommandDispatcher;
use crate::dashboard::{self, DashboardSummary, DeviceView};
use crate::error::{BridgeError, RecordsError};
use crate::health::{HealthTracker, KernelHealth};
use crate::notify::{Toast, ToastBoard};
use crate::records::{self, AttendanceRecord, RecordsSource, Student};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct AppState {
    pub bridge: DeviceBridge,
    pub commands: CommandDispatcher,
    pub health_tracker: HealthTracker,
    pub toasts: ToastBoard,
    pub charts: ChartRecorder,
    pub records: Arc<dyn RecordsSource>,
    /// Ids scanned when a scan request names none.
    pub device_ids: Vec<String>,
}

/// Error body: `{ "ok": false, "error": "..." }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        let status = match &e {
            BridgeError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::Transport(_) => StatusCode::BAD_GATEWAY,
            BridgeError::InvalidBuzzerAction(_)
            | BridgeError::MissingToneParameter(_)
            | BridgeError::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.to_string())
    }
}

impl From<RecordsError> for ApiError {
    fn from(e: RecordsError) -> Self {
        let status = match &e {
            RecordsError::Csv(_) => StatusCode::BAD_REQUEST,
            RecordsError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            RecordsError::Io(_) | RecordsError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "ok": false, "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn ok() -> Json<Value> {
    Json(json!({ "ok": true }))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/devices", get(get_devices))
        .route("/devices/scan", post(scan_devices))
        .route("/devices/{id}", get(get_device))
        .route("/devices/{id}/chart", get(get_chart))
        .route("/devices/{id}/chart/pause", post(toggle_chart_pause))
        .route("/devices/{id}/chart/clear", post(clear_chart))
        .route("/devices/{id}/buzzer", post(control_buzzer))
        .route("/devices/{id}/tone", post(send_tone))
        .route("/devices/{id}/status", post(request_status))
        .route("/devices/{id}/ping", post(ping_device))
        .route("/mqtt", get(get_mqtt))
        .route("/mqtt/connect", post(mqtt_connect))
        .route("/mqtt/disconnect", post(mqtt_disconnect))
        .route("/students", get(get_students))
        .route("/students/import", post(import_students))
        .route("/attendance/{date}", get(get_attendance))
        .route("/attendance/{date}/classes", get(get_class_stats))
        .route("/dashboard", get(get_dashboard))
        .route("/notifications", get(get_notifications).delete(clear_notifications))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.bridge))
}

// GET /devices (liste triée par id)
async fn get_devices(State(app): State<AppState>) -> Json<Vec<DeviceView>> {
    Json(dashboard::device_views(app.bridge.store(), OffsetDateTime::now_utc()))
}

// GET /devices/{id}
async fn get_device(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<DeviceView> {
    let Some(record) = app.bridge.store().get(&id) else {
        return Err(ApiError::not_found("device"));
    };
    Ok(Json(dashboard::to_view(&record, OffsetDateTime::now_utc())))
}

async fn get_chart(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<SensorChart> {
    app.charts.chart(&id).map(Json).ok_or_else(|| ApiError::not_found("chart"))
}

async fn toggle_chart_pause(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    let paused = app.charts.toggle_pause(&id).ok_or_else(|| ApiError::not_found("chart"))?;
    Ok(Json(json!({ "ok": true, "paused": paused })))
}

async fn clear_chart(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    if !app.charts.clear(&id) {
        return Err(ApiError::not_found("chart"));
    }
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct BuzzerBody {
    pub action: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ToneBody {
    pub frequency: Option<u32>,
    pub duration: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanBody {
    #[serde(default)]
    pub device_ids: Vec<String>,
}

// POST /devices/{id}/buzzer { action }
async fn control_buzzer(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<BuzzerBody>,
) -> ApiResult<Value> {
    app.commands.control_buzzer(&id, &body.action)?;
    Ok(ok())
}

// POST /devices/{id}/tone { frequency?, duration? }
async fn send_tone(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ToneBody>,
) -> ApiResult<Value> {
    app.commands.send_tone(&id, body.frequency, body.duration)?;
    Ok(ok())
}

async fn request_status(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    app.commands.request_status(&id)?;
    Ok(ok())
}

async fn ping_device(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    app.commands.ping(&id)?;
    Ok(ok())
}

// POST /devices/scan { device_ids? }
async fn scan_devices(State(app): State<AppState>, Json(body): Json<ScanBody>) -> ApiResult<Value> {
    if !app.bridge.is_connected() {
        return Err(BridgeError::NotConnected.into());
    }
    let ids = if body.device_ids.is_empty() {
        app.device_ids.clone()
    } else {
        body.device_ids
    };
    let sent = app.commands.scan(&ids);
    Ok(Json(json!({ "ok": true, "requested": ids.len(), "sent": sent })))
}

async fn get_mqtt(State(app): State<AppState>) -> Json<crate::bridge::ConnectionInfo> {
    Json(app.bridge.connection_info())
}

async fn mqtt_connect(State(app): State<AppState>) -> Json<Value> {
    let started = app.bridge.connect();
    Json(json!({ "ok": true, "started": started, "state": app.bridge.state() }))
}

async fn mqtt_disconnect(State(app): State<AppState>) -> Json<Value> {
    app.bridge.disconnect();
    Json(json!({ "ok": true, "state": app.bridge.state() }))
}

async fn get_students(State(app): State<AppState>) -> Json<Vec<Student>> {
    Json(app.records.students())
}

// POST /students/import (corps CSV brut)
async fn import_students(State(app): State<AppState>, body: String) -> ApiResult<Value> {
    let imported = app.records.import_students_csv(&body)?;
    Ok(Json(json!({ "ok": true, "imported": imported })))
}

/// `today` or a `YYYY-MM-DD` key.
fn resolve_date(date: &str) -> Result<String, ApiError> {
    if date == "today" {
        return Ok(records::today_key());
    }
    records::parse_date_key(date)
        .map(records::date_key)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid date: {date}")))
}

async fn get_attendance(
    State(app): State<AppState>,
    Path(date): Path<String>,
) -> ApiResult<Vec<AttendanceRecord>> {
    let date = resolve_date(&date)?;
    Ok(Json(app.records.attendance_by_date(&date)))
}

async fn get_class_stats(
    State(app): State<AppState>,
    Path(date): Path<String>,
) -> ApiResult<Vec<attendance::ClassSummary>> {
    let date = resolve_date(&date)?;
    let students = app.records.students();
    let marks = app.records.attendance_by_date(&date);
    Ok(Json(attendance::class_summaries(&students, &marks)))
}

async fn get_dashboard(State(app): State<AppState>) -> Json<DashboardSummary> {
    Json(dashboard::compose(
        app.bridge.store(),
        app.records.as_ref(),
        &records::today_key(),
        OffsetDateTime::now_utc(),
    ))
}

async fn get_notifications(State(app): State<AppState>) -> Json<Vec<Toast>> {
    Json(app.toasts.recent())
}

async fn clear_notifications(State(app): State<AppState>) -> Json<Value> {
    app.toasts.clear();
    ok()
}
