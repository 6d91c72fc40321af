use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::domain::PricePoint;
use crate::engine::{AppState, RefreshOutcome};
use crate::tariff::classifier;

/// POST /prices/refresh - pull the tariff window into the store.
///
/// Idempotent; a failed upstream fetch still answers 200 with `stale: true`
/// and whatever the store holds.
pub async fn refresh(State(app): State<AppState>) -> Result<Json<RefreshOutcome>, ApiError> {
    let outcome = app.refresh_prices(Utc::now()).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct CurrentQuery {
    pub hours: Option<i64>,
}

/// GET /prices/current?hours=H
pub async fn current(
    State(app): State<AppState>,
    Query(q): Query<CurrentQuery>,
) -> Result<Json<Vec<PricePoint>>, ApiError> {
    let hours = q.hours.unwrap_or(24);
    if !(1..=96).contains(&hours) {
        return Err(ApiError::BadRequest(
            "hours must be between 1 and 96".to_string(),
        ));
    }

    let start = classifier::align_to_half_hour(Utc::now());
    let window = app
        .tariff
        .get_window(start, start + chrono::Duration::hours(hours))
        .await?;
    Ok(Json(window.points))
}
