//! In-memory catalog for tests and dry runs. Enforces the same uniqueness and
//! ordering rules as the postgres schema.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use catalog_core::{
    NewVehicleRecord, PriceHistoryPoint, VehicleId, VehicleKey, VehiclePatch, VehicleRecord,
};
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{check_history_order, CatalogStore, StoreError, IDENTITY_CONSTRAINT, STOCK_NUMBER_CONSTRAINT};

#[derive(Debug, Default)]
struct CatalogState {
    last_id: VehicleId,
    vehicles: BTreeMap<VehicleId, VehicleRecord>,
    history: HashMap<VehicleId, Vec<PriceHistoryPoint>>,
}

#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    state: RwLock<CatalogState>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn history_point_count(&self) -> usize {
        self.state.read().await.history.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn find(&self, key: &VehicleKey) -> Result<Option<VehicleRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .vehicles
            .values()
            .find(|v| v.make == key.make && v.model == key.model && v.year == key.year)
            .cloned())
    }

    async fn insert(&self, record: &NewVehicleRecord) -> Result<VehicleId, StoreError> {
        if record.source_name.trim().is_empty() {
            return Err(StoreError::Rejected("vehicle without source name".into()));
        }
        let mut state = self.state.write().await;
        if state
            .vehicles
            .values()
            .any(|v| v.stock_number == record.stock_number)
        {
            return Err(StoreError::Conflict {
                constraint: STOCK_NUMBER_CONSTRAINT.into(),
                detail: format!("stock number {} already assigned", record.stock_number),
            });
        }
        if state.vehicles.values().any(|v| {
            v.make == record.make
                && v.model == record.model
                && v.year == record.year
                && v.source_name == record.source_name
        }) {
            return Err(StoreError::Conflict {
                constraint: IDENTITY_CONSTRAINT.into(),
                detail: format!(
                    "{} {} {} from {} already present",
                    record.year, record.make, record.model, record.source_name
                ),
            });
        }

        state.last_id += 1;
        let id = state.last_id;
        state
            .vehicles
            .insert(id, record.clone().into_record(id, Utc::now()));
        Ok(id)
    }

    async fn update(&self, id: VehicleId, patch: &VehiclePatch) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let record = state.vehicles.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.apply_to(record, Utc::now());
        Ok(())
    }

    async fn append_history(
        &self,
        id: VehicleId,
        points: &[PriceHistoryPoint],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.vehicles.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        let trail = state.history.entry(id).or_default();
        check_history_order(id, trail.last().map(|p| p.recorded_date), points)?;
        trail.extend_from_slice(points);
        Ok(())
    }

    async fn replace_price(
        &self,
        id: VehicleId,
        patch: &VehiclePatch,
        point: &PriceHistoryPoint,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.vehicles.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        let last = state
            .history
            .get(&id)
            .and_then(|trail| trail.last())
            .map(|p| p.recorded_date);
        check_history_order(id, last, std::slice::from_ref(point))?;

        if let Some(record) = state.vehicles.get_mut(&id) {
            patch.apply_to(record, Utc::now());
        }
        state.history.entry(id).or_default().push(point.clone());
        Ok(())
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().await.vehicles.len() as u64)
    }

    async fn history(&self, id: VehicleId) -> Result<Vec<PriceHistoryPoint>, StoreError> {
        let state = self.state.read().await;
        if !state.vehicles.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        Ok(state.history.get(&id).cloned().unwrap_or_default())
    }

    async fn list_vehicles(&self) -> Result<Vec<VehicleRecord>, StoreError> {
        Ok(self.state.read().await.vehicles.values().cloned().collect())
    }

    async fn delete(&self, id: VehicleId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        state.history.remove(&id);
        Ok(state.vehicles.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::{
        Category, Condition, HistorySource, InvestmentGrade, MarketTrend, PointOrigin, Region,
        SourceType,
    };
    use chrono::{Duration, TimeZone};

    fn new_record(stock: &str, source: &str) -> NewVehicleRecord {
        NewVehicleRecord {
            stock_number: stock.into(),
            make: "Chevrolet".into(),
            model: "Camaro Z/28".into(),
            year: 1969,
            price: Some(85_000),
            category: Category::MuscleCar,
            condition: Condition::Excellent,
            location_city: Some("Jacksonville".into()),
            location_state: Some("FL".into()),
            location_region: Region::South,
            investment_grade: InvestmentGrade::A,
            appreciation_rate: 45.76,
            market_trend: MarketTrend::Rising,
            valuation_confidence: 0.85,
            source_type: SourceType::ResearchDerived,
            source_name: source.into(),
            description: None,
            research_notes: None,
        }
    }

    #[tokio::test]
    async fn insert_find_and_count() {
        let store = MemoryCatalogStore::new();
        let id = store.insert(&new_record("GAT1969CHE001", "Gateway")).await.unwrap();
        let found = store
            .find(&VehicleKey {
                make: "Chevrolet".into(),
                model: "Camaro Z/28".into(),
                year: 1969,
            })
            .await
            .unwrap()
            .expect("record present");
        assert_eq!(found.id, id);
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_stock_number_is_a_conflict() {
        let store = MemoryCatalogStore::new();
        store.insert(&new_record("GAT1969CHE001", "Gateway")).await.unwrap();
        let err = store
            .insert(&new_record("GAT1969CHE001", "Hemmings"))
            .await
            .unwrap_err();
        assert!(err.is_stock_number_conflict());
    }

    #[tokio::test]
    async fn duplicate_identity_is_a_conflict() {
        let store = MemoryCatalogStore::new();
        store.insert(&new_record("GAT1969CHE001", "Gateway")).await.unwrap();
        let err = store
            .insert(&new_record("GAT1969CHE002", "Gateway"))
            .await
            .unwrap_err();
        assert!(err.is_identity_conflict());
    }

    #[tokio::test]
    async fn history_is_append_only_in_date_order_and_deleted_with_vehicle() {
        let store = MemoryCatalogStore::new();
        let id = store.insert(&new_record("GAT1969CHE001", "Gateway")).await.unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap();
        let mk = |offset: i64, price: i64| PriceHistoryPoint {
            vehicle_id: id,
            price,
            recorded_date: t0 + Duration::days(offset),
            source_type: HistorySource::MarketUpdate,
            origin: PointOrigin::Observed,
        };

        store.append_history(id, &[mk(0, 80_000), mk(30, 85_000)]).await.unwrap();
        assert!(store.append_history(id, &[mk(10, 81_000)]).await.is_err());
        assert_eq!(store.history(id).await.unwrap().len(), 2);

        assert!(store.delete(id).await.unwrap());
        assert_eq!(store.history_point_count().await, 0);
        assert!(matches!(store.history(id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn rejected_replacement_leaves_price_and_history_untouched() {
        let store = MemoryCatalogStore::new();
        let id = store.insert(&new_record("GAT1969CHE001", "Gateway")).await.unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().unwrap();
        let mk = |offset: i64, price: i64| PriceHistoryPoint {
            vehicle_id: id,
            price,
            recorded_date: t0 + Duration::days(offset),
            source_type: HistorySource::MarketUpdate,
            origin: PointOrigin::Observed,
        };
        store.append_history(id, &[mk(0, 85_000)]).await.unwrap();
        let patch = VehiclePatch {
            price: Some(95_000),
            source_type: Some(SourceType::DirectListing),
            ..VehiclePatch::default()
        };

        let err = store.replace_price(id, &patch, &mk(-1, 95_000)).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        let record = store.list_vehicles().await.unwrap().remove(0);
        assert_eq!(record.price, Some(85_000));
        assert_eq!(record.source_type, SourceType::ResearchDerived);
        assert_eq!(store.history(id).await.unwrap().len(), 1);

        store.replace_price(id, &patch, &mk(1, 95_000)).await.unwrap();
        let record = store.list_vehicles().await.unwrap().remove(0);
        assert_eq!(record.price, Some(95_000));
        assert_eq!(store.history(id).await.unwrap().last().map(|p| p.price), Some(95_000));
    }

    #[tokio::test]
    async fn update_unknown_vehicle_is_not_found() {
        let store = MemoryCatalogStore::new();
        let err = store.update(42, &VehiclePatch::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }
}
