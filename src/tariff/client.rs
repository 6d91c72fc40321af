//! HTTP client for the external tariff API.
//!
//! The API serves half-hourly standard unit rates per tariff code, newest
//! first, paginated. Fetches retry with exponential backoff under one hard
//! deadline; past the deadline callers fall back to whatever the store
//! already holds.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use super::RawPricePoint;
use crate::config::TariffConfig;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const PER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct TariffClient {
    base_url: String,
    product_code: String,
    tariff_code: String,
    fetch_deadline: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RatesPage {
    results: Vec<RawRate>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRate {
    value_inc_vat: f64,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
}

impl TariffClient {
    pub fn new(cfg: &TariffConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("homeflux/0.3"));
        let client = reqwest::Client::builder()
            .timeout(PER_REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .context("Failed to build tariff HTTP client")?;

        Ok(Self {
            base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            product_code: cfg.product_code.clone(),
            tariff_code: cfg.tariff_code.clone(),
            fetch_deadline: Duration::from_secs(cfg.fetch_deadline_secs),
            client,
        })
    }

    fn rates_url(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> String {
        format!(
            "{}/v1/products/{}/electricity-tariffs/{}/standard-unit-rates/?period_from={}&period_to={}",
            self.base_url,
            self.product_code,
            self.tariff_code,
            from.format("%Y-%m-%dT%H:%M:%SZ"),
            to.format("%Y-%m-%dT%H:%M:%SZ"),
        )
    }

    /// Fetch unit rates covering `[from, to)`, ordered ascending.
    ///
    /// Retries with exponential backoff until the configured deadline has
    /// elapsed, then returns the last error.
    pub async fn fetch_unit_rates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawPricePoint>> {
        let deadline = Instant::now() + self.fetch_deadline;
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.fetch_all_pages(self.rates_url(from, to)).await {
                Ok(points) => return Ok(points),
                Err(e) if Instant::now() + backoff >= deadline => {
                    return Err(e).context(format!(
                        "tariff fetch failed after {attempt} attempts within deadline"
                    ));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "tariff fetch failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    async fn fetch_all_pages(&self, first_url: String) -> Result<Vec<RawPricePoint>> {
        let mut url = Some(first_url);
        let mut points = Vec::new();

        while let Some(page_url) = url.take() {
            let resp = self
                .client
                .get(&page_url)
                .send()
                .await
                .context("tariff GET failed")?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("tariff API error: HTTP {status}: {body}");
            }

            let page: RatesPage = resp.json().await.context("tariff JSON parse failed")?;
            points.extend(page.results.into_iter().map(|r| RawPricePoint {
                valid_from: r.valid_from,
                valid_to: r.valid_to,
                unit_price: r.value_inc_vat,
            }));
            url = page.next;
        }

        // The API returns newest first.
        points.sort_by_key(|p| p.valid_from);
        Ok(points)
    }
}
