//! Postgres-backed catalog via sqlx.

use std::time::Duration;

use async_trait::async_trait;
use catalog_core::{
    NewVehicleRecord, PriceHistoryPoint, VehicleId, VehicleKey, VehiclePatch, VehicleRecord,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgExecutor, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Transaction};
use sqlx::Row;
use tracing::info;

use crate::{check_history_order, CatalogStore, StoreError};

const VEHICLE_COLUMNS: &str = "id, stock_number, make, model, year, price, category, condition, \
     location_city, location_state, location_region, investment_grade, appreciation_rate, \
     market_trend, valuation_confidence, source_type, source_name, description, research_notes, \
     created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("running migrations: {e}")))?;
        info!("catalog migrations applied");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => StoreError::Conflict {
            constraint: db.constraint().unwrap_or("unique").to_string(),
            detail: db.message().to_string(),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = catalog_core::CoreError>,
{
    let raw: String = row.try_get(column).map_err(map_sqlx_error)?;
    raw.parse()
        .map_err(|e: catalog_core::CoreError| StoreError::Backend(format!("column {column}: {e}")))
}

fn row_to_record(row: &PgRow) -> Result<VehicleRecord, StoreError> {
    Ok(VehicleRecord {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        stock_number: row.try_get("stock_number").map_err(map_sqlx_error)?,
        make: row.try_get("make").map_err(map_sqlx_error)?,
        model: row.try_get("model").map_err(map_sqlx_error)?,
        year: row.try_get("year").map_err(map_sqlx_error)?,
        price: row.try_get("price").map_err(map_sqlx_error)?,
        category: parse_column(row, "category")?,
        condition: parse_column(row, "condition")?,
        location_city: row.try_get("location_city").map_err(map_sqlx_error)?,
        location_state: row.try_get("location_state").map_err(map_sqlx_error)?,
        location_region: parse_column(row, "location_region")?,
        investment_grade: parse_column(row, "investment_grade")?,
        appreciation_rate: row.try_get("appreciation_rate").map_err(map_sqlx_error)?,
        market_trend: parse_column(row, "market_trend")?,
        valuation_confidence: row.try_get("valuation_confidence").map_err(map_sqlx_error)?,
        source_type: parse_column(row, "source_type")?,
        source_name: row.try_get("source_name").map_err(map_sqlx_error)?,
        description: row.try_get("description").map_err(map_sqlx_error)?,
        research_notes: row.try_get("research_notes").map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx_error)?,
    })
}

fn row_to_point(row: &PgRow) -> Result<PriceHistoryPoint, StoreError> {
    Ok(PriceHistoryPoint {
        vehicle_id: row.try_get("vehicle_id").map_err(map_sqlx_error)?,
        price: row.try_get("price").map_err(map_sqlx_error)?,
        recorded_date: row.try_get("recorded_date").map_err(map_sqlx_error)?,
        source_type: parse_column(row, "source_type")?,
        origin: parse_column(row, "origin")?,
    })
}

/// Locks the vehicle row and checks `points` against the stored trail.
async fn lock_for_history(
    tx: &mut Transaction<'_, Postgres>,
    id: VehicleId,
    points: &[PriceHistoryPoint],
) -> Result<(), StoreError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM vehicles WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    if exists.is_none() {
        return Err(StoreError::NotFound(id));
    }

    let last: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT MAX(recorded_date) FROM price_history WHERE vehicle_id = $1")
            .bind(id)
            .fetch_one(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
    check_history_order(id, last, points)
}

/// Returns the number of rows touched.
async fn apply_patch<'e>(
    executor: impl PgExecutor<'e>,
    id: VehicleId,
    patch: &VehiclePatch,
) -> Result<u64, StoreError> {
    let classification = patch.classification.as_ref();
    let result = sqlx::query(
        r#"
        UPDATE vehicles
           SET price = COALESCE($2, price),
               investment_grade = COALESCE($3, investment_grade),
               appreciation_rate = COALESCE($4, appreciation_rate),
               market_trend = COALESCE($5, market_trend),
               valuation_confidence = COALESCE($6, valuation_confidence),
               source_type = COALESCE($7, source_type),
               source_name = COALESCE($8, source_name),
               research_notes = COALESCE($9, research_notes),
               updated_at = NOW()
         WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(patch.price)
    .bind(classification.map(|c| c.investment_grade.as_str()))
    .bind(classification.map(|c| c.appreciation_rate))
    .bind(classification.map(|c| c.market_trend.as_str()))
    .bind(classification.map(|c| c.valuation_confidence))
    .bind(patch.source_type.map(|s| s.as_str()))
    .bind(patch.source_name.as_deref())
    .bind(patch.research_notes.as_deref())
    .execute(executor)
    .await
    .map_err(map_sqlx_error)?;
    Ok(result.rows_affected())
}

async fn insert_point<'e>(
    executor: impl PgExecutor<'e>,
    id: VehicleId,
    point: &PriceHistoryPoint,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO price_history (vehicle_id, price, recorded_date, source_type, origin)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(point.price)
    .bind(point.recorded_date)
    .bind(point.source_type.as_str())
    .bind(point.origin.as_str())
    .execute(executor)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn find(&self, key: &VehicleKey) -> Result<Option<VehicleRecord>, StoreError> {
        let sql = format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE make = $1 AND model = $2 AND year = $3 ORDER BY id LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(&key.make)
            .bind(&key.model)
            .bind(key.year)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert(&self, record: &NewVehicleRecord) -> Result<VehicleId, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO vehicles (
                stock_number, make, model, year, price, category, condition,
                location_city, location_state, location_region,
                investment_grade, appreciation_rate, market_trend, valuation_confidence,
                source_type, source_name, description, research_notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING id
            "#,
        )
        .bind(&record.stock_number)
        .bind(&record.make)
        .bind(&record.model)
        .bind(record.year)
        .bind(record.price)
        .bind(record.category.as_str())
        .bind(record.condition.as_str())
        .bind(&record.location_city)
        .bind(&record.location_state)
        .bind(record.location_region.as_str())
        .bind(record.investment_grade.as_str())
        .bind(record.appreciation_rate)
        .bind(record.market_trend.as_str())
        .bind(record.valuation_confidence)
        .bind(record.source_type.as_str())
        .bind(&record.source_name)
        .bind(&record.description)
        .bind(&record.research_notes)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(id)
    }

    async fn update(&self, id: VehicleId, patch: &VehiclePatch) -> Result<(), StoreError> {
        if apply_patch(&self.pool, id, patch).await? == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn append_history(
        &self,
        id: VehicleId,
        points: &[PriceHistoryPoint],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        lock_for_history(&mut tx, id, points).await?;
        for point in points {
            insert_point(&mut *tx, id, point).await?;
        }
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn replace_price(
        &self,
        id: VehicleId,
        patch: &VehiclePatch,
        point: &PriceHistoryPoint,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        lock_for_history(&mut tx, id, std::slice::from_ref(point)).await?;
        apply_patch(&mut *tx, id, patch).await?;
        insert_point(&mut *tx, id, point).await?;
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicles")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn history(&self, id: VehicleId) -> Result<Vec<PriceHistoryPoint>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT vehicle_id, price, recorded_date, source_type, origin
              FROM price_history
             WHERE vehicle_id = $1
             ORDER BY recorded_date, id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_point).collect()
    }

    async fn list_vehicles(&self) -> Result<Vec<VehicleRecord>, StoreError> {
        let sql = format!("SELECT {VEHICLE_COLUMNS} FROM vehicles ORDER BY id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn delete(&self, id: VehicleId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM vehicles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_to_unavailable() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StoreError::Backend(_)
        ));
    }
}
