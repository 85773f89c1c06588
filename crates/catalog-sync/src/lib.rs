//! Catalog import pipeline: classify, deduplicate, synthesize history, report.

use catalog_adapters::NormalizeError;
use catalog_storage::StoreError;
use thiserror::Error;

pub mod classify;
pub mod config;
pub mod dedup;
pub mod pipeline;
pub mod report;
pub mod synth;
pub mod trend;

pub use classify::{Classifier, ClassifierRules};
pub use config::{PipelineConfig, ResearchQuery, SourceConfig, SourceKind, SourceRegistry};
pub use dedup::{DedupConfig, Deduplicator, SourcePriority, UpsertAction, UpsertOutcome};
pub use pipeline::{
    collect_inputs, discover, run_import, ImportPipeline, ImportReport, PipelineInput,
    PipelineOptions, RunSummary,
};
pub use report::{catalog_stats, export_parquet_snapshot, write_reports, CatalogStats};
pub use synth::{backfill_history, BackfillSummary, HistorySynthesizer, SynthesisConfig};
pub use trend::{calculate_appreciation, AppreciationSummary};

pub const CRATE_NAME: &str = "catalog-sync";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not interpret {label}: {reason}")]
    Parse { label: String, reason: String },
    #[error("{vehicle} failed validation: {source}")]
    Validation {
        vehicle: String,
        #[source]
        source: NormalizeError,
    },
    #[error("{vehicle} has no price")]
    MissingPrice { vehicle: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("catalog store unavailable: {0}")]
    StoreUnavailable(String),
    #[error(transparent)]
    Store(StoreError),
}

impl PipelineError {
    /// Fatal errors abort the rest of the batch; everything else is counted and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::StoreUnavailable(_))
    }

    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(detail) => PipelineError::StoreUnavailable(detail),
            StoreError::Conflict { .. } => PipelineError::Conflict(err.to_string()),
            other => PipelineError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_unavailability_is_fatal() {
        assert!(PipelineError::from_store(StoreError::Unavailable("refused".into())).is_fatal());
        assert!(!PipelineError::from_store(StoreError::NotFound(3)).is_fatal());
        assert!(matches!(
            PipelineError::from_store(StoreError::Conflict {
                constraint: "vehicles_stock_number_key".into(),
                detail: "dup".into(),
            }),
            PipelineError::Conflict(_)
        ));
        assert!(!PipelineError::MissingPrice {
            vehicle: "1969 Chevrolet Camaro".into()
        }
        .is_fatal());
    }
}
