use catalog_core::{MarketTrend, PriceHistoryPoint};
use chrono::{DateTime, Months, Utc};
use serde::Serialize;

/// Change above which a trail reads as rising (and below the negation, declining).
pub const TREND_THRESHOLD_PERCENT: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppreciationSummary {
    pub start_price: i64,
    pub current_price: i64,
    pub percentage_change: f64,
    /// Percent per year, linear in the timeframe.
    pub annualized_rate: f64,
    pub data_points: usize,
    pub trend: MarketTrend,
    pub timeframe_months: u32,
}

/// Appreciation over the points recorded within `timeframe_months` of `now`.
/// Needs at least two points and a positive start price.
pub fn calculate_appreciation(
    history: &[PriceHistoryPoint],
    timeframe_months: u32,
    now: DateTime<Utc>,
) -> Option<AppreciationSummary> {
    let cutoff = now.checked_sub_months(Months::new(timeframe_months))?;
    let mut window: Vec<&PriceHistoryPoint> =
        history.iter().filter(|p| p.recorded_date >= cutoff).collect();
    window.sort_by_key(|p| p.recorded_date);
    if window.len() < 2 {
        return None;
    }

    let start_price = window.first()?.price;
    let current_price = window.last()?.price;
    if start_price <= 0 {
        return None;
    }

    let change = (current_price - start_price) as f64 / start_price as f64 * 100.0;
    let annualized = change / f64::from(timeframe_months.max(1)) * 12.0;
    let trend = if change > TREND_THRESHOLD_PERCENT {
        MarketTrend::Rising
    } else if change < -TREND_THRESHOLD_PERCENT {
        MarketTrend::Declining
    } else {
        MarketTrend::Stable
    };

    Some(AppreciationSummary {
        start_price,
        current_price,
        percentage_change: (change * 100.0).round() / 100.0,
        annualized_rate: (annualized * 10.0).round() / 10.0,
        data_points: window.len(),
        trend,
        timeframe_months,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::{HistorySource, PointOrigin};
    use chrono::TimeZone;

    fn at(month: u32, price: i64) -> PriceHistoryPoint {
        PriceHistoryPoint {
            vehicle_id: 1,
            price,
            recorded_date: Utc.with_ymd_and_hms(2026, month, 1, 0, 0, 0).single().unwrap(),
            source_type: HistorySource::MarketUpdate,
            origin: PointOrigin::Modeled,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).single().unwrap()
    }

    #[test]
    fn rising_trail_annualizes_linearly() {
        let history = vec![at(4, 100_000), at(7, 104_000), at(10, 110_000)];
        let summary = calculate_appreciation(&history, 6, now()).unwrap();
        assert_eq!(summary.start_price, 100_000);
        assert_eq!(summary.current_price, 110_000);
        assert!((summary.percentage_change - 10.0).abs() < 1e-9);
        assert!((summary.annualized_rate - 20.0).abs() < 1e-9);
        assert_eq!(summary.trend, MarketTrend::Rising);
    }

    #[test]
    fn window_excludes_old_points_and_classifies_flat_and_falling() {
        let history = vec![at(1, 50_000), at(8, 100_000), at(10, 97_000)];
        let flat = calculate_appreciation(&history, 3, now()).unwrap();
        assert_eq!(flat.data_points, 2);
        assert_eq!(flat.trend, MarketTrend::Stable);

        let history = vec![at(8, 100_000), at(10, 90_000)];
        assert_eq!(
            calculate_appreciation(&history, 3, now()).unwrap().trend,
            MarketTrend::Declining
        );
    }

    #[test]
    fn fewer_than_two_points_is_none() {
        assert!(calculate_appreciation(&[at(9, 10_000)], 12, now()).is_none());
        assert!(calculate_appreciation(&[], 12, now()).is_none());
    }
}
