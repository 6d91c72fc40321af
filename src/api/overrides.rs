use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::domain::Device;
use crate::engine::AppState;

fn parse_device(raw: &str) -> Result<Device, ApiError> {
    raw.parse()
        .map_err(|e: crate::domain::device::UnknownDevice| ApiError::BadRequest(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct SetRequest {
    pub device_id: String,
    pub desired_state: bool,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub duration_hours: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SetResponse {
    pub device_id: Device,
    pub desired_state: bool,
    pub expires_at: DateTime<Utc>,
    pub time_remaining_minutes: i64,
}

/// POST /manual-override/set
pub async fn set(
    State(app): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>, ApiError> {
    let device = parse_device(&req.device_id)?;
    let hours = req
        .duration_hours
        .unwrap_or(app.cfg.overrides.manual_default_hours);

    if !hours.is_finite() || hours <= 0.0 {
        return Err(ApiError::ValidationError(
            "duration_hours must be positive".to_string(),
        ));
    }
    if hours > app.cfg.overrides.manual_max_hours {
        return Err(ApiError::ValidationError(format!(
            "duration_hours may not exceed {}",
            app.cfg.overrides.manual_max_hours
        )));
    }

    let duration = chrono::Duration::seconds((hours * 3600.0).round() as i64);
    let source = req.source.as_deref().unwrap_or("api");
    let now = Utc::now();

    let row = app
        .manual
        .set(device, req.desired_state, duration, source, now)
        .await?;

    Ok(Json(SetResponse {
        device_id: device,
        desired_state: row.desired_state,
        expires_at: row.expires_at,
        time_remaining_minutes: (row.expires_at - now).num_minutes(),
    }))
}

#[derive(Debug, Serialize)]
pub struct DeviceStatus {
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_state: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub time_remaining_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub main: DeviceStatus,
    pub lucy: DeviceStatus,
    pub any_active: bool,
}

async fn device_status(
    app: &AppState,
    device: Device,
    now: DateTime<Utc>,
) -> Result<DeviceStatus, ApiError> {
    Ok(match app.manual.status(device, now).await? {
        Some(s) => DeviceStatus {
            is_active: true,
            desired_state: Some(s.desired_state),
            expires_at: Some(s.expires_at),
            time_remaining_minutes: s.time_remaining_minutes,
            source: Some(s.source),
        },
        None => DeviceStatus {
            is_active: false,
            desired_state: None,
            expires_at: None,
            time_remaining_minutes: 0,
            source: None,
        },
    })
}

/// GET /manual-override/status
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
pub struct ClearQuery {
    pub device_id: String,
    #[serde(default)]
    pub cleared_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: u64,
}

/// POST /manual-override/clear?device_id=&cleared_by=
pub async fn clear(
    State(app): State<AppState>,
    Query(q): Query<ClearQuery>,
) -> Result<Json<ClearResponse>, ApiError> {
    let device = parse_device(&q.device_id)?;
    let cleared_by = q.cleared_by.as_deref().unwrap_or("api");
    let cleared = app.manual.clear(device, cleared_by, Utc::now()).await?;
    Ok(Json(ClearResponse { cleared }))
}

#[derive(Debug, Deserialize)]
pub struct ClearAllQuery {
    #[serde(default)]
    pub cleared_by: Option<String>,
}

/// POST /manual-override/clear-all?cleared_by=
pub async fn clear_all(
    State(app): State<AppState>,
    Query(q): Query<ClearAllQuery>,
) -> Result<Json<ClearResponse>, ApiError> {
    let cleared_by = q.cleared_by.as_deref().unwrap_or("api");
    let cleared = app.manual.clear_all(cleared_by, Utc::now()).await?;
    Ok(Json(ClearResponse { cleared }))
}
