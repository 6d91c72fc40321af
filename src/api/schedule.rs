use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::domain::Device;
use crate::engine::AppState;
use crate::overrides::ScheduleEvent;

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub device_id: String,
    pub is_active: bool,
    #[serde(default)]
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub device_id: Device,
    pub is_active: bool,
}

/// POST /schedule/update - heartbeat-bearing report from the external
/// schedule source.
pub async fn update(
    State(app): State<AppState>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let device: Device = req
        .device_id
        .parse()
        .map_err(|e: crate::domain::device::UnknownDevice| ApiError::BadRequest(e.to_string()))?;

    app.schedule
        .report(device, req.is_active, &req.reason, req.timestamp, Utc::now())
        .await?;

    Ok(Json(UpdateResponse {
        device_id: device,
        is_active: req.is_active,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeviceScheduleStatus {
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub main: DeviceScheduleStatus,
    pub lucy: DeviceScheduleStatus,
    pub any_active: bool,
}

async fn device_status(
    app: &AppState,
    device: Device,
    now: DateTime<Utc>,
) -> Result<DeviceScheduleStatus, ApiError> {
    Ok(match app.schedule.status(device, now).await? {
        Some(s) => DeviceScheduleStatus {
            is_active: true,
            reason: Some(s.reason),
            activated_at: s.activated_at,
            duration_minutes: s.duration_minutes,
        },
        None => DeviceScheduleStatus {
            is_active: false,
            reason: None,
            activated_at: None,
            duration_minutes: 0,
        },
    })
}

/// GET /schedule/status
pub async fn status(State(app): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let now = Utc::now();
    let main = device_status(&app, Device::Main, now).await?;
    let lucy = device_status(&app, Device::Lucy, now).await?;
    let any_active = main.is_active || lucy.is_active;
    Ok(Json(StatusResponse {
        main,
        lucy,
        any_active,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// GET /schedule/history?device_id=&start=&end=&limit=
pub async fn history(
    State(app): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<ScheduleEvent>>, ApiError> {
    let device = match &q.device_id {
        Some(raw) => Some(raw.parse().map_err(
            |e: crate::domain::device::UnknownDevice| ApiError::BadRequest(e.to_string()),
        )?),
        None => None,
    };

    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    let events = app.schedule.history(device, q.start, q.end, limit).await?;
    Ok(Json(events))
}
