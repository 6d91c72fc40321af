//! Percentile classification of half-hourly unit rates.
//!
//! Buckets are relative to the look-ahead window: the cheap threshold is
//! the 33rd percentile and the expensive threshold the 67th, both computed
//! over the non-negative subset. Negative prices are their own absolute
//! bucket. Classifying the same window twice yields the same buckets.

use chrono::{DateTime, Utc};

use crate::domain::{Classification, PricePoint, PriceWindowStats};

pub const CHEAP_PERCENTILE: f64 = 33.0;
pub const EXPENSIVE_PERCENTILE: f64 = 67.0;

/// Cheap/expensive cut points for one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub cheap: f64,
    pub expensive: f64,
}

/// Linear-interpolated percentile over a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Thresholds over the non-negative subset of `prices`. `None` when every
/// price in the window is negative (the buckets are then irrelevant).
pub fn thresholds(prices: &[f64]) -> Option<Thresholds> {
    let mut non_negative: Vec<f64> = prices.iter().copied().filter(|p| *p >= 0.0).collect();
    if non_negative.is_empty() {
        return None;
    }
    non_negative.sort_by(|a, b| a.total_cmp(b));

    Some(Thresholds {
        cheap: percentile(&non_negative, CHEAP_PERCENTILE),
        expensive: percentile(&non_negative, EXPENSIVE_PERCENTILE),
    })
}

pub fn classify(unit_price: f64, thresholds: Option<&Thresholds>) -> Classification {
    if unit_price < 0.0 {
        return Classification::Negative;
    }
    match thresholds {
        Some(t) if unit_price <= t.cheap => Classification::Cheap,
        Some(t) if unit_price >= t.expensive => Classification::Expensive,
        Some(_) => Classification::Normal,
        // Unreachable for a window that contains this non-negative price,
        // but a total function keeps the store code infallible.
        None => Classification::Normal,
    }
}

/// Classify every price in one window against that window's thresholds.
pub fn classify_window(prices: &[f64]) -> Vec<Classification> {
    let t = thresholds(prices);
    prices.iter().map(|p| classify(*p, t.as_ref())).collect()
}

/// Window statistics over already-classified points.
pub fn window_stats(points: &[PricePoint]) -> Option<PriceWindowStats> {
    let first = points.first()?;
    let last = points.last()?;

    let mut prices: Vec<f64> = points.iter().map(|p| p.unit_price).collect();
    prices.sort_by(|a, b| a.total_cmp(b));

    let mean = prices.iter().sum::<f64>() / prices.len() as f64;
    let median = percentile(&prices, 50.0);
    let t = thresholds(&prices);

    let count_of = |c: Classification| points.iter().filter(|p| p.classification == c).count();

    Some(PriceWindowStats {
        window_start: first.valid_from,
        window_end: last.valid_to,
        min: prices[0],
        max: prices[prices.len() - 1],
        mean,
        median,
        cheap_threshold: t.map(|t| t.cheap).unwrap_or(0.0),
        expensive_threshold: t.map(|t| t.expensive).unwrap_or(0.0),
        negative_count: count_of(Classification::Negative),
        cheap_count: count_of(Classification::Cheap),
        normal_count: count_of(Classification::Normal),
        expensive_count: count_of(Classification::Expensive),
    })
}

/// The look-ahead window used for reclassification: `now` (aligned down to
/// the half hour) to `now + horizon`.
pub fn lookahead_bounds(
    now: DateTime<Utc>,
    horizon_hours: i64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = align_to_half_hour(now);
    (start, start + chrono::Duration::hours(horizon_hours))
}

pub fn align_to_half_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    let secs = instant.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(1800), 0).expect("aligned timestamp in range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn negative_prices_are_always_negative() {
        let classes = classify_window(&[-2.0, -0.01, 5.0, 10.0, 20.0]);
        assert_eq!(classes[0], Classification::Negative);
        assert_eq!(classes[1], Classification::Negative);
    }

    #[test]
    fn thresholds_split_cheap_normal_expensive() {
        // 0..=10 inclusive: 33rd pct = 3.3, 67th pct = 6.7
        let prices: Vec<f64> = (0..=10).map(f64::from).collect();
        let t = thresholds(&prices).unwrap();
        assert!((t.cheap - 3.3).abs() < 1e-9);
        assert!((t.expensive - 6.7).abs() < 1e-9);

        let classes = classify_window(&prices);
        assert_eq!(classes[0], Classification::Cheap);
        assert_eq!(classes[3], Classification::Cheap);
        assert_eq!(classes[5], Classification::Normal);
        assert_eq!(classes[7], Classification::Expensive);
        assert_eq!(classes[10], Classification::Expensive);
    }

    #[test]
    fn all_negative_window_has_no_thresholds() {
        assert!(thresholds(&[-5.0, -1.0]).is_none());
        let classes = classify_window(&[-5.0, -1.0]);
        assert!(classes.iter().all(|c| *c == Classification::Negative));
    }

    #[test]
    fn single_price_window_is_cheap() {
        // One non-negative price is its own 33rd and 67th percentile, and
        // the cheap comparison (<=) wins.
        assert_eq!(classify_window(&[12.0]), vec![Classification::Cheap]);
    }

    #[test]
    fn align_floors_to_half_hour() {
        let t = Utc.with_ymd_and_hms(2026, 3, 5, 14, 42, 17).unwrap();
        let aligned = align_to_half_hour(t);
        assert_eq!(aligned, Utc.with_ymd_and_hms(2026, 3, 5, 14, 30, 0).unwrap());
        assert_eq!(align_to_half_hour(aligned), aligned);
    }

    proptest! {
        /// Reclassifying a window is idempotent: the buckets only depend
        /// on the window contents.
        #[test]
        fn classification_is_idempotent(prices in proptest::collection::vec(-50.0f64..150.0, 1..96)) {
            let first = classify_window(&prices);
            let second = classify_window(&prices);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn every_negative_price_is_negative_class(prices in proptest::collection::vec(-50.0f64..150.0, 1..96)) {
            let classes = classify_window(&prices);
            for (price, class) in prices.iter().zip(&classes) {
                if *price < 0.0 {
                    prop_assert_eq!(*class, Classification::Negative);
                } else {
                    prop_assert_ne!(*class, Classification::Negative);
                }
            }
        }
    }
}
