//! Tariff store: half-hourly unit rates with window-relative classification.

pub mod classifier;
pub mod client;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::domain::{Classification, PricePoint, PriceWindowStats};

/// Hours of look-ahead considered when recomputing classifications.
const LOOKAHEAD_HOURS: i64 = 48;

/// An unclassified rate as delivered by the tariff API.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct RawPricePoint {
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub unit_price: f64,
}

impl RawPricePoint {
    fn validate(&self) -> Result<(), &'static str> {
        if !self.unit_price.is_finite() {
            return Err("non-finite unit price");
        }
        if self.valid_to <= self.valid_from {
            return Err("window bounds reversed or empty");
        }
        if (self.valid_to - self.valid_from) != chrono::Duration::minutes(30) {
            return Err("window is not 30 minutes");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

/// A queried price window plus the store's actual coverage bounds, so
/// callers can tell partial coverage from an empty store.
#[derive(Debug, Clone)]
pub struct TariffWindow {
    pub points: Vec<PricePoint>,
    pub oldest_available: Option<DateTime<Utc>>,
    pub newest_available: Option<DateTime<Utc>>,
}

impl TariffWindow {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(sqlx::FromRow)]
struct PriceRow {
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    unit_price: f64,
    classification: String,
}

impl PriceRow {
    fn into_point(self) -> PricePoint {
        let classification = self
            .classification
            .parse()
            .unwrap_or(Classification::Normal);
        PricePoint {
            valid_from: self.valid_from,
            valid_to: self.valid_to,
            unit_price: self.unit_price,
            classification,
        }
    }
}

/// Repository over the `price_points` table.
#[derive(Clone)]
pub struct TariffStore {
    pool: SqlitePool,
}

impl TariffStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a batch of rates keyed on `valid_from`, then recompute the
    /// classifications of the look-ahead window.
    ///
    /// Malformed records are skipped with a warning; the batch never
    /// aborts because of one bad row.
    pub async fn ingest(
        &self,
        points: Vec<RawPricePoint>,
        now: DateTime<Utc>,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for point in points {
            if let Err(reason) = point.validate() {
                warn!(valid_from = %point.valid_from, reason, "skipping malformed price point");
                report.skipped += 1;
                continue;
            }

            let existing: Option<f64> = sqlx::query_scalar(
                "SELECT unit_price FROM price_points WHERE valid_from = ?",
            )
            .bind(point.valid_from)
            .fetch_optional(&self.pool)
            .await?;

            match existing {
                Some(price) if (price - point.unit_price).abs() < f64::EPSILON => {
                    report.unchanged += 1;
                    continue;
                }
                Some(_) => report.updated += 1,
                None => report.inserted += 1,
            }

            sqlx::query(
                "INSERT INTO price_points (valid_from, valid_to, unit_price, classification) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT(valid_from) DO UPDATE \
                 SET valid_to = excluded.valid_to, \
                     unit_price = excluded.unit_price, \
                     classification = excluded.classification",
            )
            .bind(point.valid_from)
            .bind(point.valid_to)
            .bind(point.unit_price)
            .bind(Classification::Normal.to_string())
            .execute(&self.pool)
            .await
            .context("price upsert failed")?;
        }

        let reclassified = self.reclassify_lookahead(now).await?;
        debug!(
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            reclassified,
            "tariff ingest complete"
        );

        Ok(report)
    }

    /// Recompute classifications over the look-ahead window. Returns the
    /// number of rows touched.
    pub async fn reclassify_lookahead(&self, now: DateTime<Utc>) -> Result<usize> {
        let (start, end) = classifier::lookahead_bounds(now, LOOKAHEAD_HOURS);

        let rows: Vec<PriceRow> = sqlx::query_as(
            "SELECT valid_from, valid_to, unit_price, classification \
             FROM price_points WHERE valid_from >= ? AND valid_from < ? \
             ORDER BY valid_from ASC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let prices: Vec<f64> = rows.iter().map(|r| r.unit_price).collect();
        let classes = classifier::classify_window(&prices);

        let mut tx = self.pool.begin().await?;
        let mut touched = 0;
        for (row, class) in rows.iter().zip(classes) {
            if row.classification != class.to_string() {
                sqlx::query("UPDATE price_points SET classification = ? WHERE valid_from = ?")
                    .bind(class.to_string())
                    .bind(row.valid_from)
                    .execute(&mut *tx)
                    .await?;
                touched += 1;
            }
        }
        tx.commit().await?;

        Ok(touched)
    }

    /// Ordered points with `start <= valid_from < end`, plus the store's
    /// overall coverage bounds.
    pub async fn get_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TariffWindow> {
        let rows: Vec<PriceRow> = sqlx::query_as(
            "SELECT valid_from, valid_to, unit_price, classification \
             FROM price_points WHERE valid_from >= ? AND valid_from < ? \
             ORDER BY valid_from ASC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let bounds: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
            sqlx::query_as("SELECT MIN(valid_from), MAX(valid_from) FROM price_points")
                .fetch_optional(&self.pool)
                .await?;
        let (oldest_available, newest_available) = bounds.unwrap_or((None, None));

        Ok(TariffWindow {
            points: rows.into_iter().map(PriceRow::into_point).collect(),
            oldest_available,
            newest_available,
        })
    }

    pub async fn stats(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<PriceWindowStats>> {
        let window = self.get_window(start, end).await?;
        Ok(classifier::window_stats(&window.points))
    }

    /// Delete points outside the retention window. Returns rows removed.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM price_points WHERE valid_from < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use chrono::TimeZone;

    fn half_hours(start: DateTime<Utc>, prices: &[f64]) -> Vec<RawPricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| {
                let valid_from = start + chrono::Duration::minutes(30 * i as i64);
                RawPricePoint {
                    valid_from,
                    valid_to: valid_from + chrono::Duration::minutes(30),
                    unit_price: *price,
                }
            })
            .collect()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn ingest_counts_insert_update_unchanged() {
        let store = TariffStore::new(connect_in_memory().await.unwrap());
        let now = t0();

        let report = store
            .ingest(half_hours(now, &[5.0, 10.0, 20.0]), now)
            .await
            .unwrap();
        assert_eq!(report.inserted, 3);

        let mut second = half_hours(now, &[5.0, 10.0, 20.0]);
        second[1].unit_price = 11.0;
        let report = store.ingest(second, now).await.unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.updated, 1);
        assert_eq!(report.unchanged, 2);
    }

    #[tokio::test]
    async fn malformed_points_are_skipped_not_fatal() {
        let store = TariffStore::new(connect_in_memory().await.unwrap());
        let now = t0();

        let mut points = half_hours(now, &[5.0, 10.0]);
        points.push(RawPricePoint {
            valid_from: now + chrono::Duration::hours(2),
            valid_to: now + chrono::Duration::hours(2), // empty window
            unit_price: 3.0,
        });
        points.push(RawPricePoint {
            valid_from: now + chrono::Duration::hours(3),
            valid_to: now + chrono::Duration::hours(3) + chrono::Duration::minutes(30),
            unit_price: f64::NAN,
        });

        let report = store.ingest(points, now).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn classification_persists_and_is_idempotent() {
        let store = TariffStore::new(connect_in_memory().await.unwrap());
        let now = t0();
        let prices: Vec<f64> = vec![-2.0, 1.0, 5.0, 9.0, 14.0, 22.0, 30.0];

        store.ingest(half_hours(now, &prices), now).await.unwrap();
        let first = store
            .get_window(now, now + chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(first.points[0].classification, Classification::Negative);
        assert_eq!(first.points[1].classification, Classification::Cheap);
        assert_eq!(
            first.points.last().unwrap().classification,
            Classification::Expensive
        );

        let touched = store.reclassify_lookahead(now).await.unwrap();
        assert_eq!(touched, 0, "reclassifying an unchanged window is a no-op");
    }

    #[tokio::test]
    async fn window_reports_store_bounds() {
        let store = TariffStore::new(connect_in_memory().await.unwrap());
        let now = t0();
        store
            .ingest(half_hours(now, &[5.0, 6.0, 7.0]), now)
            .await
            .unwrap();

        // Query a window the store does not cover.
        let window = store
            .get_window(now + chrono::Duration::hours(6), now + chrono::Duration::hours(8))
            .await
            .unwrap();
        assert!(window.is_empty());
        assert_eq!(window.oldest_available, Some(now));
        assert_eq!(
            window.newest_available,
            Some(now + chrono::Duration::minutes(60))
        );
    }

    #[tokio::test]
    async fn prune_removes_old_rows() {
        let store = TariffStore::new(connect_in_memory().await.unwrap());
        let start = t0() - chrono::Duration::days(10);
        store
            .ingest(half_hours(start, &[5.0, 6.0]), t0())
            .await
            .unwrap();
        store
            .ingest(half_hours(t0(), &[7.0, 8.0]), t0())
            .await
            .unwrap();

        let removed = store
            .prune_older_than(t0() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let remaining = store
            .get_window(start, t0() + chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(remaining.points.len(), 2);
    }

    #[tokio::test]
    async fn stats_reflect_window() {
        let store = TariffStore::new(connect_in_memory().await.unwrap());
        let now = t0();
        store
            .ingest(half_hours(now, &[-1.0, 2.0, 10.0, 30.0]), now)
            .await
            .unwrap();

        let stats = store
            .stats(now, now + chrono::Duration::hours(24))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.min, -1.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.negative_count, 1);
    }
}
