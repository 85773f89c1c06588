//! Deduplicator: decides insert versus merge for each normalized vehicle.
//!
//! Only the single writer in the pipeline calls [`Deduplicator::upsert`], so the
//! find-then-insert sequence never races within one catalog. The store's identity
//! constraint still backs this up for concurrent writers in other processes.

use std::sync::Arc;

use catalog_core::{
    Classification, HistorySource, NewVehicleRecord, NormalizedVehicle, PointOrigin,
    PriceHistoryPoint, SourceType, VehicleId, VehiclePatch, VehicleRecord,
};
use catalog_storage::CatalogStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::PipelineError;

/// Source-authority ordering, most authoritative first. Types not listed rank last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePriority {
    order: Vec<SourceType>,
}

impl Default for SourcePriority {
    fn default() -> Self {
        Self::new(vec![
            SourceType::DirectListing,
            SourceType::ResearchDerived,
            SourceType::Migrated,
        ])
    }
}

impl SourcePriority {
    pub fn new(order: Vec<SourceType>) -> Self {
        Self { order }
    }

    fn rank(&self, source_type: SourceType) -> usize {
        self.order
            .iter()
            .position(|t| *t == source_type)
            .unwrap_or(self.order.len())
    }

    /// True when `incoming` is strictly more authoritative than `existing`.
    pub fn outranks(&self, incoming: SourceType, existing: SourceType) -> bool {
        self.rank(incoming) < self.rank(existing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Inserted,
    /// A more authoritative source replaced price and classification.
    Replaced,
    /// A duplicate sighting was noted on the existing record.
    Annotated,
    /// The same source reported the same vehicle again.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub id: VehicleId,
    pub was_new: bool,
    pub action: UpsertAction,
    /// The record as it stands after the upsert.
    pub record: VehicleRecord,
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub priority: SourcePriority,
    /// Fresh stock numbers tried after the first collision.
    pub max_stock_retries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            priority: SourcePriority::default(),
            max_stock_retries: 5,
        }
    }
}

/// Distinct stock-number suffixes per source/year/make prefix.
pub const STOCK_SUFFIX_SPACE: u32 = 36 * 36 * 36 * 36;

/// `{SRC3}{year}{MAKE3}{XXXX}` with a base-36 suffix, e.g. `GAT1969CHE0016`.
pub fn stock_number(source_name: &str, year: i32, make: &str, suffix: u32) -> String {
    fn prefix(input: &str) -> String {
        let mut out: String = input
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(3)
            .collect::<String>()
            .to_ascii_uppercase();
        while out.len() < 3 {
            out.push('X');
        }
        out
    }
    fn base36(mut value: u32) -> String {
        let mut digits = ['0'; 4];
        for slot in digits.iter_mut().rev() {
            *slot = char::from_digit(value % 36, 36)
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or('0');
            value /= 36;
        }
        digits.iter().collect()
    }
    format!(
        "{}{}{}{}",
        prefix(source_name),
        year,
        prefix(make),
        base36(suffix % STOCK_SUFFIX_SPACE)
    )
}

pub struct Deduplicator {
    store: Arc<dyn CatalogStore>,
    config: DedupConfig,
    rng: fastrand::Rng,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn CatalogStore>, config: DedupConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Self { store, config, rng }
    }

    pub fn priority(&self) -> &SourcePriority {
        &self.config.priority
    }

    pub async fn upsert(
        &mut self,
        vehicle: &NormalizedVehicle,
        classification: &Classification,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, PipelineError> {
        let Some(price) = vehicle.price else {
            return Err(PipelineError::MissingPrice {
                vehicle: vehicle.label(),
            });
        };

        // One extra pass covers an identity conflict raised by a writer we did not see.
        for _ in 0..2 {
            if let Some(existing) = self.store.find(&vehicle.key()).await.map_err(PipelineError::from_store)? {
                return self.merge(existing, vehicle, price, classification, now).await;
            }
            match self.insert(vehicle, classification, now).await? {
                Some(outcome) => return Ok(outcome),
                None => {
                    debug!(vehicle = %vehicle.label(), "identity conflict on insert; re-reading catalog");
                }
            }
        }
        Err(PipelineError::Conflict(format!(
            "{} kept conflicting on the identity key",
            vehicle.label()
        )))
    }

    /// `Ok(None)` means another writer already holds the (make, model, year, source) identity.
    async fn insert(
        &mut self,
        vehicle: &NormalizedVehicle,
        classification: &Classification,
        now: DateTime<Utc>,
    ) -> Result<Option<UpsertOutcome>, PipelineError> {
        let note = format!(
            "Imported from {} ({}) on {}",
            vehicle.provenance.source_name,
            vehicle.provenance.source_type.as_str(),
            now.format("%Y-%m-%d")
        );
        let mut candidate = vehicle.stock_number.clone();

        for attempt in 0..=self.config.max_stock_retries {
            let stock = match candidate.take() {
                Some(stock) => stock,
                None => stock_number(
                    &vehicle.provenance.source_name,
                    vehicle.year,
                    &vehicle.make,
                    self.rng.u32(0..STOCK_SUFFIX_SPACE),
                ),
            };
            let record = NewVehicleRecord::from_parts(vehicle, classification, stock.clone(), Some(note.clone()));
            match self.store.insert(&record).await {
                Ok(id) => {
                    info!(id, stock_number = %stock, vehicle = %vehicle.label(), "inserted vehicle");
                    return Ok(Some(UpsertOutcome {
                        id,
                        was_new: true,
                        action: UpsertAction::Inserted,
                        record: record.into_record(id, now),
                    }));
                }
                Err(err) if err.is_stock_number_conflict() => {
                    debug!(attempt, stock_number = %stock, "stock number collision; regenerating");
                }
                Err(err) if err.is_identity_conflict() => return Ok(None),
                Err(err) => return Err(PipelineError::from_store(err)),
            }
        }

        Err(PipelineError::Conflict(format!(
            "no free stock number for {} after {} attempts",
            vehicle.label(),
            self.config.max_stock_retries + 1
        )))
    }

    async fn merge(
        &self,
        existing: VehicleRecord,
        vehicle: &NormalizedVehicle,
        price: i64,
        classification: &Classification,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, PipelineError> {
        let incoming = &vehicle.provenance;
        let notes = existing.research_notes.clone().unwrap_or_default();

        if self.config.priority.outranks(incoming.source_type, existing.source_type) {
            let note = format!(
                "Replaced by {} ({}) on {}: price {} -> {}",
                incoming.source_name,
                incoming.source_type.as_str(),
                now.format("%Y-%m-%d"),
                existing.price.map(|p| p.to_string()).unwrap_or_else(|| "none".into()),
                price
            );
            let patch = VehiclePatch {
                price: Some(price),
                classification: Some(*classification),
                source_type: Some(incoming.source_type),
                source_name: Some(incoming.source_name.clone()),
                research_notes: Some(append_note(&notes, &note)),
            };
            let point = PriceHistoryPoint {
                vehicle_id: existing.id,
                price,
                recorded_date: now,
                source_type: HistorySource::MarketUpdate,
                origin: PointOrigin::Observed,
            };
            self.store
                .replace_price(existing.id, &patch, &point)
                .await
                .map_err(PipelineError::from_store)?;

            let mut record = existing;
            patch.apply_to(&mut record, now);
            info!(id = record.id, vehicle = %vehicle.label(), source = %incoming.source_name, "replaced by more authoritative source");
            return Ok(UpsertOutcome {
                id: record.id,
                was_new: false,
                action: UpsertAction::Replaced,
                record,
            });
        }

        let marker = format!("Also seen at {} ({})", incoming.source_name, incoming.source_type.as_str());
        let same_source = existing.source_name == incoming.source_name && existing.source_type == incoming.source_type;
        if same_source || notes.contains(&marker) {
            return Ok(UpsertOutcome {
                id: existing.id,
                was_new: false,
                action: UpsertAction::Unchanged,
                record: existing,
            });
        }

        if Some(price) != existing.price {
            warn!(
                id = existing.id,
                make = %vehicle.make,
                model = %vehicle.model,
                year = vehicle.year,
                source = %incoming.source_name,
                incoming_price = price,
                "keeping catalog price over less authoritative source"
            );
        }
        let note = format!("{marker} for {price} on {}", now.format("%Y-%m-%d"));
        let patch = VehiclePatch {
            research_notes: Some(append_note(&notes, &note)),
            ..VehiclePatch::default()
        };
        self.store
            .update(existing.id, &patch)
            .await
            .map_err(PipelineError::from_store)?;
        let mut record = existing;
        patch.apply_to(&mut record, now);
        Ok(UpsertOutcome {
            id: record.id,
            was_new: false,
            action: UpsertAction::Annotated,
            record,
        })
    }
}

fn append_note(existing: &str, note: &str) -> String {
    if existing.trim().is_empty() {
        note.to_string()
    } else {
        format!("{existing}\n{note}")
    }
}
