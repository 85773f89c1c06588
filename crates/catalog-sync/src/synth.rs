//! Price-history synthesizer: backcasts a modeled monthly trail ending at the live price.

use std::sync::Arc;

use catalog_core::{
    Classification, HistorySource, PointOrigin, PriceHistoryPoint, VehicleId, VehicleRecord,
};
use catalog_storage::{CatalogStore, StoreError};
use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisConfig {
    pub min_months: u32,
    pub max_months: u32,
    /// Symmetric jitter as a fraction of the modeled price.
    pub jitter: f64,
    /// Backcast prices are rounded to this many currency units.
    pub granularity: i64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            min_months: 8,
            max_months: 12,
            jitter: 0.015,
            granularity: 100,
        }
    }
}

#[derive(Debug)]
pub struct HistorySynthesizer {
    config: SynthesisConfig,
    rng: fastrand::Rng,
}

impl HistorySynthesizer {
    pub fn new(config: SynthesisConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self { config, rng }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(SynthesisConfig::default(), Some(seed))
    }

    /// Monthly compounding rate equivalent to an annual percentage.
    pub fn monthly_rate(annual_percent: f64) -> f64 {
        (1.0 + annual_percent / 100.0).max(0.0).powf(1.0 / 12.0) - 1.0
    }

    /// `months` backcast points (oldest first) plus a terminal point at `now` carrying
    /// exactly `current_price`. `months = None` picks a value in the configured range.
    pub fn synthesize(
        &mut self,
        vehicle_id: VehicleId,
        current_price: i64,
        classification: &Classification,
        months: Option<u32>,
        now: DateTime<Utc>,
    ) -> Vec<PriceHistoryPoint> {
        let months = months.unwrap_or_else(|| {
            let (lo, hi) = (self.config.min_months, self.config.max_months.max(self.config.min_months));
            self.rng.u32(lo..=hi)
        });
        let monthly = Self::monthly_rate(classification.appreciation_rate);
        let granularity = self.config.granularity.max(1);

        let mut points = Vec::with_capacity(months as usize + 1);
        for months_ago in (1..=months).rev() {
            let modeled = current_price as f64 * (1.0 + monthly).powi(-(months_ago as i32));
            let jitter = (self.rng.f64() * 2.0 - 1.0) * self.config.jitter;
            let jittered = modeled * (1.0 + jitter);
            let price = ((jittered / granularity as f64).round() as i64 * granularity).max(granularity);
            points.push(PriceHistoryPoint {
                vehicle_id,
                price,
                recorded_date: months_before(now, months_ago),
                source_type: if points.is_empty() {
                    HistorySource::Initial
                } else {
                    HistorySource::MarketUpdate
                },
                origin: PointOrigin::Modeled,
            });
        }

        points.push(PriceHistoryPoint {
            vehicle_id,
            price: current_price,
            recorded_date: now,
            source_type: if points.is_empty() {
                HistorySource::Initial
            } else {
                HistorySource::MarketUpdate
            },
            origin: PointOrigin::Observed,
        });
        debug!(vehicle_id, months, "synthesized price history");
        points
    }

    pub fn synthesize_for(
        &mut self,
        record: &VehicleRecord,
        months: Option<u32>,
        now: DateTime<Utc>,
    ) -> Option<Vec<PriceHistoryPoint>> {
        let price = record.price?;
        Some(self.synthesize(record.id, price, &record.classification(), months, now))
    }
}

fn months_before(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or_else(|| now - Duration::days(30 * i64::from(months)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub examined: usize,
    pub backfilled: usize,
    pub points_written: usize,
    pub skipped_without_price: usize,
    pub already_had_history: usize,
}

/// Synthesize a trail for every priced vehicle that has none yet.
pub async fn backfill_history(
    store: Arc<dyn CatalogStore>,
    synthesizer: &mut HistorySynthesizer,
    months: Option<u32>,
    now: DateTime<Utc>,
) -> Result<BackfillSummary, StoreError> {
    let mut summary = BackfillSummary::default();
    for record in store.list_vehicles().await? {
        summary.examined += 1;
        if !store.history(record.id).await?.is_empty() {
            summary.already_had_history += 1;
            continue;
        }
        let Some(points) = synthesizer.synthesize_for(&record, months, now) else {
            warn!(
                make = %record.make,
                model = %record.model,
                year = record.year,
                source = %record.source_name,
                "skipping history backfill for vehicle without price"
            );
            summary.skipped_without_price += 1;
            continue;
        };
        store.append_history(record.id, &points).await?;
        summary.backfilled += 1;
        summary.points_written += points.len();
    }
    info!(
        examined = summary.examined,
        backfilled = summary.backfilled,
        "price history backfill finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::{InvestmentGrade, MarketTrend};
    use chrono::TimeZone;

    fn classification(grade: InvestmentGrade, rate: f64) -> Classification {
        Classification {
            investment_grade: grade,
            appreciation_rate: rate,
            market_trend: MarketTrend::Rising,
            valuation_confidence: 0.9,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn ten_months_yields_eleven_points_ending_at_price() {
        let mut synth = HistorySynthesizer::seeded(7);
        let points = synth.synthesize(1, 135_000, &classification(InvestmentGrade::APlus, 58.5), Some(10), now());

        assert_eq!(points.len(), 11);
        let last = points.last().unwrap();
        assert_eq!(last.price, 135_000);
        assert_eq!(last.recorded_date, now());
        assert_eq!(last.origin, PointOrigin::Observed);
        assert!(points[..10].iter().all(|p| p.origin == PointOrigin::Modeled));
        assert_eq!(points[0].source_type, HistorySource::Initial);
        assert!(points[1..].iter().all(|p| p.source_type == HistorySource::MarketUpdate));
    }

    #[test]
    fn dates_are_monthly_and_non_decreasing() {
        let mut synth = HistorySynthesizer::seeded(11);
        let points = synth.synthesize(1, 80_000, &classification(InvestmentGrade::BPlus, 22.3), Some(12), now());
        assert!(points.windows(2).all(|w| w[0].recorded_date <= w[1].recorded_date));
        assert_eq!(
            points[0].recorded_date,
            Utc.with_ymd_and_hms(2025, 10, 17, 12, 0, 0).single().unwrap()
        );
    }

    #[test]
    fn backcast_tracks_appreciation_within_jitter() {
        let mut synth = HistorySynthesizer::seeded(3);
        let points = synth.synthesize(1, 100_000, &classification(InvestmentGrade::APlus, 45.0), Some(12), now());
        let oldest = points[0].price as f64;
        let expected = 100_000.0 / 1.45;
        assert!((oldest - expected).abs() / expected < 0.02, "oldest {oldest} vs {expected}");
        assert!(points.iter().all(|p| p.price % 100 == 0));
    }

    #[test]
    fn same_seed_reproduces_trail() {
        let c = classification(InvestmentGrade::A, 45.76);
        let a = HistorySynthesizer::seeded(42).synthesize(9, 90_000, &c, None, now());
        let b = HistorySynthesizer::seeded(42).synthesize(9, 90_000, &c, None, now());
        assert_eq!(a, b);
        assert!((9..=13).contains(&a.len()));
    }

    #[test]
    fn zero_months_is_a_single_terminal_point() {
        let points = HistorySynthesizer::seeded(1).synthesize(
            4,
            50_000,
            &classification(InvestmentGrade::BPlus, 22.3),
            Some(0),
            now(),
        );
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].source_type, HistorySource::Initial);
        assert_eq!(points[0].price, 50_000);
    }
}
