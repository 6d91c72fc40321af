use axum::{extract::State, Json};
use chrono::Utc;

use crate::domain::SystemState;
use crate::engine::AppState;

/// GET /state/current - latest snapshot through the cache/fallback ladder.
pub async fn current(State(app): State<AppState>) -> Json<SystemState> {
    Json(app.current_state(Utc::now()).await)
}
