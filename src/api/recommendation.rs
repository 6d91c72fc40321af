use axum::{extract::State, Json};
use chrono::Utc;

use crate::api::error::ApiError;
use crate::domain::Recommendation;
use crate::engine::AppState;

/// GET /recommendation/now - run the pipeline and return the full record.
///
/// Solver and bridge trouble surface as a `fallback` recommendation, never
/// as an HTTP error; only persistence failures reach the error path.
pub async fn now(State(app): State<AppState>) -> Result<Json<Recommendation>, ApiError> {
    let recommendation = app.recommend(Utc::now()).await?;
    Ok(Json(recommendation))
}
