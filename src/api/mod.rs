pub mod error;
pub mod health;
pub mod overrides;
pub mod prices;
pub mod recommendation;
pub mod schedule;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::engine::AppState;

pub fn router(app: AppState) -> Router {
    let request_timeout = Duration::from_secs(app.cfg.server.request_timeout_secs);

    Router::new()
        .route("/prices/refresh", post(prices::refresh))
        .route("/prices/current", get(prices::current))
        .route("/recommendation/now", get(recommendation::now))
        .route("/state/current", get(state::current))
        .route("/schedule/update", post(schedule::update))
        .route("/schedule/status", get(schedule::status))
        .route("/schedule/history", get(schedule::history))
        .route("/manual-override/set", post(overrides::set))
        .route("/manual-override/status", get(overrides::status))
        .route("/manual-override/clear", post(overrides::clear))
        .route("/manual-override/clear-all", post(overrides::clear_all))
        .route("/health", get(health::health_check))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}
