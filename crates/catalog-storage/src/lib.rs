//! Catalog store adapters, raw-text archive, and retry utilities.

use std::time::Duration;

use async_trait::async_trait;
use catalog_core::{
    NewVehicleRecord, PriceHistoryPoint, VehicleId, VehicleKey, VehiclePatch, VehicleRecord,
};
use thiserror::Error;

mod archive;
mod memory;
mod postgres;

pub use archive::{ArchivedText, RawTextArchive};
pub use memory::MemoryCatalogStore;
pub use postgres::PgCatalogStore;

pub const CRATE_NAME: &str = "catalog-storage";

/// Constraint name reported when a stock number is already taken.
pub const STOCK_NUMBER_CONSTRAINT: &str = "vehicles_stock_number_key";
/// Constraint name reported when (make, model, year, source_name) already exists.
pub const IDENTITY_CONSTRAINT: &str = "vehicles_identity_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("uniqueness conflict on {constraint}: {detail}")]
    Conflict { constraint: String, detail: String },
    #[error("catalog store unavailable: {0}")]
    Unavailable(String),
    #[error("vehicle {0} not found")]
    NotFound(VehicleId),
    #[error("rejected by store: {0}")]
    Rejected(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_stock_number_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { constraint, .. } if constraint == STOCK_NUMBER_CONSTRAINT)
    }

    pub fn is_identity_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { constraint, .. } if constraint == IDENTITY_CONSTRAINT)
    }

    pub fn disposition(&self) -> RetryDisposition {
        match self {
            StoreError::Conflict { .. } => RetryDisposition::Retryable,
            _ => RetryDisposition::NonRetryable,
        }
    }
}

/// The only boundary the pipeline touches for persistence.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Look up a vehicle by exact make, model, and year.
    async fn find(&self, key: &VehicleKey) -> Result<Option<VehicleRecord>, StoreError>;

    async fn insert(&self, record: &NewVehicleRecord) -> Result<VehicleId, StoreError>;

    async fn update(&self, id: VehicleId, patch: &VehiclePatch) -> Result<(), StoreError>;

    /// Append points in order. Dates must not go backwards relative to the stored trail.
    async fn append_history(
        &self,
        id: VehicleId,
        points: &[PriceHistoryPoint],
    ) -> Result<(), StoreError>;

    /// Apply `patch` and append `point` as one unit. On error neither change is visible,
    /// so the stored price and the end of the history trail stay in step.
    async fn replace_price(
        &self,
        id: VehicleId,
        patch: &VehiclePatch,
        point: &PriceHistoryPoint,
    ) -> Result<(), StoreError>;

    async fn count_all(&self) -> Result<u64, StoreError>;

    /// History for one vehicle, oldest first.
    async fn history(&self, id: VehicleId) -> Result<Vec<PriceHistoryPoint>, StoreError>;

    async fn list_vehicles(&self) -> Result<Vec<VehicleRecord>, StoreError>;

    /// Remove a vehicle together with its history. Returns whether it existed.
    async fn delete(&self, id: VehicleId) -> Result<bool, StoreError>;
}

/// Shared ordering check used by every store implementation.
pub(crate) fn check_history_order(
    id: VehicleId,
    last_stored: Option<chrono::DateTime<chrono::Utc>>,
    points: &[PriceHistoryPoint],
) -> Result<(), StoreError> {
    let mut previous = last_stored;
    for point in points {
        if point.vehicle_id != id {
            return Err(StoreError::Rejected(format!(
                "history point for vehicle {} appended to vehicle {id}",
                point.vehicle_id
            )));
        }
        if point.price < 0 {
            return Err(StoreError::Rejected(format!(
                "negative history price {} for vehicle {id}",
                point.price
            )));
        }
        if let Some(prev) = previous {
            if point.recorded_date < prev {
                return Err(StoreError::Rejected(format!(
                    "history date {} precedes {} for vehicle {id}",
                    point.recorded_date, prev
                )));
            }
        }
        previous = Some(point.recorded_date);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::{HistorySource, PointOrigin};
    use chrono::{TimeZone, Utc};

    fn point(vehicle_id: VehicleId, day: u32, price: i64) -> PriceHistoryPoint {
        PriceHistoryPoint {
            vehicle_id,
            price,
            recorded_date: Utc.with_ymd_and_hms(2026, 3, day, 0, 0, 0).single().unwrap(),
            source_type: HistorySource::MarketUpdate,
            origin: PointOrigin::Observed,
        }
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(350));
    }

    #[test]
    fn history_order_rejects_backwards_dates_and_foreign_points() {
        assert!(check_history_order(1, None, &[point(1, 1, 10), point(1, 1, 11), point(1, 2, 12)]).is_ok());
        assert!(matches!(
            check_history_order(1, None, &[point(1, 2, 10), point(1, 1, 11)]),
            Err(StoreError::Rejected(_))
        ));
        assert!(matches!(
            check_history_order(1, Some(point(1, 5, 0).recorded_date), &[point(1, 4, 10)]),
            Err(StoreError::Rejected(_))
        ));
        assert!(matches!(
            check_history_order(1, None, &[point(2, 1, 10)]),
            Err(StoreError::Rejected(_))
        ));
    }

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict = StoreError::Conflict {
            constraint: STOCK_NUMBER_CONSTRAINT.into(),
            detail: "dup".into(),
        };
        assert!(conflict.is_stock_number_conflict());
        assert_eq!(conflict.disposition(), RetryDisposition::Retryable);
        assert_eq!(
            StoreError::Unavailable("down".into()).disposition(),
            RetryDisposition::NonRetryable
        );
    }
}
