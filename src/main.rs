use anyhow::Result;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use homeflux::config::Config;
use homeflux::engine::AppState;
use homeflux::telemetry;
use homeflux::worker::ExpiryWorker;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;
    telemetry::init_tracing(&cfg.telemetry);

    let app_state = AppState::new(cfg.clone()).await?;

    let shutdown = CancellationToken::new();
    let worker = ExpiryWorker::new(
        app_state.manual.clone(),
        app_state.tariff.clone(),
        cfg.expiry_worker.period_s,
        cfg.tariff.retention_days,
    );
    let worker_shutdown = shutdown.clone();
    let worker_handle = tokio::spawn(worker.run(worker_shutdown));

    let app: Router = homeflux::api::router(app_state);

    let addr = cfg.server.socket_addr()?;
    info!(%addr, "starting homeflux controller");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    shutdown.cancel();
    let _ = worker_handle.await;

    warn!("shutdown complete");
    Ok(())
}
