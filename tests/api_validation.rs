//! Boundary validation: malformed requests are rejected without touching
//! state.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::{Json, Query, State};
use chrono::{DateTime, Utc};

use homeflux::api::error::ApiError;
use homeflux::api::overrides::{self, ClearQuery, SetRequest};
use homeflux::bridge::StateBridge;
use homeflux::config::test_config;
use homeflux::domain::{Device, SystemState};
use homeflux::engine::AppState;

struct IdleBridge;

#[async_trait]
impl StateBridge for IdleBridge {
    async fn snapshot(&self, now: DateTime<Utc>) -> Result<SystemState> {
        Ok(SystemState::fallback(now))
    }
}

async fn app() -> AppState {
    AppState::with_bridge(test_config(), Arc::new(IdleBridge))
        .await
        .unwrap()
}

#[tokio::test]
async fn unknown_device_is_a_client_error_and_leaves_no_rows() {
    let app = app().await;

    let result = overrides::set(
        State(app.clone()),
        Json(SetRequest {
            device_id: "boiler".to_string(),
            desired_state: true,
            source: None,
            duration_hours: None,
        }),
    )
    .await;

    assert!(matches!(result, Err(ApiError::BadRequest(_))));
    for device in Device::ALL {
        assert!(app.manual.rows_for(device).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn non_positive_duration_is_rejected() {
    let app = app().await;

    let result = overrides::set(
        State(app.clone()),
        Json(SetRequest {
            device_id: "main".to_string(),
            desired_state: true,
            source: None,
            duration_hours: Some(0.0),
        }),
    )
    .await;

    assert!(matches!(result, Err(ApiError::ValidationError(_))));
    assert!(app.manual.rows_for(Device::Main).await.unwrap().is_empty());
}

#[tokio::test]
async fn duration_above_configured_maximum_is_rejected() {
    let app = app().await;

    let result = overrides::set(
        State(app.clone()),
        Json(SetRequest {
            device_id: "main".to_string(),
            desired_state: true,
            source: None,
            duration_hours: Some(25.0),
        }),
    )
    .await;

    assert!(matches!(result, Err(ApiError::ValidationError(_))));
}

#[tokio::test]
async fn set_defaults_to_two_hours_and_api_source() {
    let app = app().await;

    let response = overrides::set(
        State(app.clone()),
        Json(SetRequest {
            device_id: "lucy".to_string(),
            desired_state: false,
            source: None,
            duration_hours: None,
        }),
    )
    .await
    .unwrap();

    assert_eq!(response.0.device_id, Device::Lucy);
    // Default duration is two hours; allow for the handler reading the
    // clock slightly after the insert.
    assert!((119..=120).contains(&response.0.time_remaining_minutes));

    let rows = app.manual.rows_for(Device::Lucy).await.unwrap();
    assert_eq!(rows[0].source, "api");
}

#[tokio::test]
async fn clear_is_idempotent_through_the_handler() {
    let app = app().await;

    overrides::set(
        State(app.clone()),
        Json(SetRequest {
            device_id: "main".to_string(),
            desired_state: true,
            source: Some("dashboard".to_string()),
            duration_hours: Some(1.0),
        }),
    )
    .await
    .unwrap();

    let first = overrides::clear(
        State(app.clone()),
        Query(ClearQuery {
            device_id: "main".to_string(),
            cleared_by: Some("user".to_string()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(first.0.cleared, 1);

    let second = overrides::clear(
        State(app.clone()),
        Query(ClearQuery {
            device_id: "main".to_string(),
            cleared_by: Some("user".to_string()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(second.0.cleared, 0);
}
