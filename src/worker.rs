//! Periodic maintenance: manual-override expiry and tariff retention.
//!
//! One instance per process. Each tick is a single idempotent transaction,
//! so a missed tick only postpones expiry by one period and a redundant
//! run sweeps nothing.

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::overrides::ManualOverrideStore;
use crate::tariff::TariffStore;

pub struct ExpiryWorker {
    manual: ManualOverrideStore,
    tariff: TariffStore,
    period: std::time::Duration,
    retention: chrono::Duration,
}

impl ExpiryWorker {
    pub fn new(
        manual: ManualOverrideStore,
        tariff: TariffStore,
        period_s: u64,
        retention_days: u32,
    ) -> Self {
        Self {
            manual,
            tariff,
            period: std::time::Duration::from_secs(period_s),
            retention: chrono::Duration::days(retention_days as i64),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period = ?self.period, "expiry worker started");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => {
                    info!("expiry worker stopping");
                    break;
                }
            }
            self.tick().await;
        }
    }

    /// One sweep. Public so tests can drive ticks deterministically.
    pub async fn tick(&self) {
        let now = Utc::now();

        match self.manual.expire_due(now).await {
            Ok(0) => debug!("expiry tick: nothing due"),
            Ok(count) => info!(count, "expiry tick: deactivated expired manual overrides"),
            Err(e) => error!(error = %e, "expiry tick failed"),
        }

        match self.tariff.prune_older_than(now - self.retention).await {
            Ok(0) => {}
            Ok(count) => debug!(count, "pruned price points outside retention"),
            Err(e) => error!(error = %e, "price retention prune failed"),
        }
    }
}
