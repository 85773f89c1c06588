//! Import pipeline orchestration.
//!
//! Extraction, normalization and classification run on blocking worker tasks, one per
//! input. A single writer then drains the prepared vehicles in input order through the
//! deduplicator and synthesizer, so upserts into one catalog are never concurrent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use catalog_adapters::research::ResearchError;
use catalog_adapters::{
    load_listing_feed, load_prose_notes, ChatCompletionsProvider, ExtractorConfig, FieldNormalizer,
    RejectedRecord, ResearchProvider, TextExtractor, ThrottledProvider,
};
use catalog_core::{
    Classification, NormalizedVehicle, Provenance, SourceType, VehicleDraft, VehicleRecord,
};
use catalog_storage::{CatalogStore, RawTextArchive};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classify::{Classifier, ClassifierRules};
use crate::config::{PipelineConfig, ResearchQuery, SourceKind, SourceRegistry};
use crate::dedup::{DedupConfig, Deduplicator, SourcePriority, UpsertAction};
use crate::report::{export_parquet_snapshot, write_reports};
use crate::synth::{HistorySynthesizer, SynthesisConfig};
use crate::PipelineError;

/// One unit of work for an import run.
#[derive(Debug, Clone)]
pub enum PipelineInput {
    /// Structured listings already split into drafts; `rejected` records count as errors.
    Listings {
        label: String,
        drafts: Vec<VehicleDraft>,
        rejected: Vec<RejectedRecord>,
    },
    /// Free text; `label` becomes the source name of every extracted vehicle.
    Prose {
        label: String,
        source_type: SourceType,
        text: String,
    },
}

impl PipelineInput {
    pub fn label(&self) -> &str {
        match self {
            PipelineInput::Listings { label, .. } | PipelineInput::Prose { label, .. } => label,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Set when a fatal store error stopped the batch early.
    pub aborted: Option<String>,
    pub by_category: BTreeMap<String, u64>,
    pub by_grade: BTreeMap<String, u64>,
    pub by_region: BTreeMap<String, u64>,
}

impl RunSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            processed: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            errors: 0,
            aborted: None,
            by_category: BTreeMap::new(),
            by_grade: BTreeMap::new(),
            by_region: BTreeMap::new(),
        }
    }

    /// Counts the record as stored, so merged vehicles land under their catalog category.
    fn tally(&mut self, record: &VehicleRecord) {
        *self.by_category.entry(record.category.as_str().to_string()).or_default() += 1;
        *self
            .by_grade
            .entry(record.investment_grade.as_str().to_string())
            .or_default() += 1;
        *self
            .by_region
            .entry(record.location_region.as_str().to_string())
            .or_default() += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub extractor: ExtractorConfig,
    pub rules: ClassifierRules,
    /// Seeds stock-number suffixes and history jitter.
    pub seed: Option<u64>,
    pub stock_retries: Option<usize>,
    pub history_months: Option<u32>,
    /// Where raw prose is archived before extraction; `None` disables archiving.
    pub archive_dir: Option<PathBuf>,
    /// Pins "now" for the whole run.
    pub reference_time: Option<DateTime<Utc>>,
}

struct Stages {
    extractor: TextExtractor,
    normalizer: FieldNormalizer,
    classifier: Classifier,
}

enum Prepared {
    Vehicle {
        vehicle: NormalizedVehicle,
        classification: Classification,
    },
    Failed(PipelineError),
}

impl Stages {
    fn prepare_draft(&self, draft: VehicleDraft) -> Prepared {
        let label = format!("{} {} {}", draft.year, draft.make, draft.model);
        match self.normalizer.normalize(draft) {
            Ok(vehicle) => {
                let classification = self.classifier.classify(&vehicle);
                Prepared::Vehicle {
                    vehicle,
                    classification,
                }
            }
            Err(source) => Prepared::Failed(PipelineError::Validation {
                vehicle: label.trim().to_string(),
                source,
            }),
        }
    }

    fn prepare(&self, input: PipelineInput) -> Vec<Prepared> {
        match input {
            PipelineInput::Listings {
                label,
                drafts,
                rejected,
            } => {
                let mut prepared: Vec<Prepared> = rejected
                    .into_iter()
                    .map(|r| {
                        Prepared::Failed(PipelineError::Parse {
                            label: format!("{label} record {}", r.index),
                            reason: r.reason,
                        })
                    })
                    .collect();
                prepared.extend(drafts.into_iter().map(|d| self.prepare_draft(d)));
                prepared
            }
            PipelineInput::Prose {
                label,
                source_type,
                text,
            } => {
                let provenance = match Provenance::new(source_type, label.clone()) {
                    Ok(provenance) => provenance,
                    Err(err) => {
                        return vec![Prepared::Failed(PipelineError::Parse {
                            label,
                            reason: err.to_string(),
                        })]
                    }
                };
                let mentions = self.extractor.extract(&text, &label);
                if mentions.is_empty() {
                    debug!(source = %label, "no vehicle mentions found");
                }
                mentions
                    .into_iter()
                    .map(|m| self.prepare_draft(m.into_draft(provenance.clone())))
                    .collect()
            }
        }
    }
}

pub struct ImportPipeline {
    store: Arc<dyn CatalogStore>,
    stages: Arc<Stages>,
    dedup: Deduplicator,
    synth: HistorySynthesizer,
    history_months: Option<u32>,
    archive: Option<RawTextArchive>,
    reference_time: Option<DateTime<Utc>>,
}

impl ImportPipeline {
    pub fn new(store: Arc<dyn CatalogStore>, options: PipelineOptions) -> Self {
        let normalizer = match options.reference_time {
            Some(now) => FieldNormalizer::with_reference_time(now),
            None => FieldNormalizer::new(),
        };
        let mut dedup_config = DedupConfig {
            priority: SourcePriority::new(options.rules.source_priority.clone()),
            ..DedupConfig::default()
        };
        if let Some(retries) = options.stock_retries {
            dedup_config.max_stock_retries = retries;
        }
        let stages = Stages {
            extractor: TextExtractor::new(options.extractor),
            normalizer,
            classifier: Classifier::new(options.rules),
        };

        Self {
            dedup: Deduplicator::new(store.clone(), dedup_config, options.seed.map(|s| s ^ 0x5eed)),
            synth: HistorySynthesizer::new(SynthesisConfig::default(), options.seed),
            store,
            stages: Arc::new(stages),
            history_months: options.history_months,
            archive: options.archive_dir.map(RawTextArchive::new),
            reference_time: options.reference_time,
        }
    }

    /// Run one batch. Always returns a summary; a fatal store error stops the queue and
    /// is recorded in `aborted`.
    pub async fn run(&mut self, inputs: Vec<PipelineInput>) -> RunSummary {
        let run_id = Uuid::new_v4();
        let now = self.reference_time.unwrap_or_else(Utc::now);
        let mut summary = RunSummary::new(run_id, now);
        let span = info_span!("import_run", %run_id);

        async {
            info!(inputs = inputs.len(), "import run started");
            self.archive_prose(&inputs, now).await;

            let handles: Vec<_> = inputs
                .into_iter()
                .map(|input| {
                    let stages = self.stages.clone();
                    let label = input.label().to_string();
                    (label, tokio::task::spawn_blocking(move || stages.prepare(input)))
                })
                .collect();

            'inputs: for (label, handle) in handles {
                let prepared = match handle.await {
                    Ok(prepared) => prepared,
                    Err(err) => vec![Prepared::Failed(PipelineError::Parse {
                        label: label.clone(),
                        reason: format!("preparation task failed: {err}"),
                    })],
                };
                for item in prepared {
                    summary.processed += 1;
                    if let Err(err) = self.write(item, now, &mut summary).await {
                        warn!(source = %label, error = %err, "import stopped: catalog store unavailable");
                        summary.aborted = Some(err.to_string());
                        break 'inputs;
                    }
                }
            }

            summary.finished_at = Utc::now().max(now);
            info!(
                processed = summary.processed,
                inserted = summary.inserted,
                updated = summary.updated,
                skipped = summary.skipped,
                errors = summary.errors,
                aborted = summary.aborted.is_some(),
                "import run finished"
            );
        }
        .instrument(span)
        .await;

        summary
    }

    async fn archive_prose(&self, inputs: &[PipelineInput], now: DateTime<Utc>) {
        let Some(archive) = &self.archive else {
            return;
        };
        for input in inputs {
            if let PipelineInput::Prose { label, text, .. } = input {
                match archive.store(now, label, text).await {
                    Ok(archived) => debug!(
                        source = %label,
                        path = %archived.relative_path.display(),
                        deduplicated = archived.deduplicated,
                        "archived raw text"
                    ),
                    Err(err) => warn!(source = %label, error = %err, "could not archive raw text"),
                }
            }
        }
    }

    /// Counts one prepared item. Returns `Err` only for errors that must stop the batch.
    async fn write(
        &mut self,
        item: Prepared,
        now: DateTime<Utc>,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let (vehicle, classification) = match item {
            Prepared::Vehicle {
                vehicle,
                classification,
            } => (vehicle, classification),
            Prepared::Failed(err) => {
                warn!(error = %err, "dropping record");
                summary.errors += 1;
                return Ok(());
            }
        };

        let outcome = match self.dedup.upsert(&vehicle, &classification, now).await {
            Ok(outcome) => outcome,
            Err(PipelineError::MissingPrice { .. }) => {
                warn!(
                    make = %vehicle.make,
                    model = %vehicle.model,
                    year = vehicle.year,
                    source = %vehicle.provenance.source_name,
                    "skipping vehicle without price"
                );
                summary.skipped += 1;
                return Ok(());
            }
            Err(err) if err.is_fatal() => {
                summary.errors += 1;
                return Err(err);
            }
            Err(err) => {
                warn!(vehicle = %vehicle.label(), error = %err, "upsert failed");
                summary.errors += 1;
                return Ok(());
            }
        };

        match outcome.action {
            UpsertAction::Inserted => {
                summary.inserted += 1;
                summary.tally(&outcome.record);
                if let Some(points) = self.synth.synthesize_for(&outcome.record, self.history_months, now) {
                    if let Err(err) = self.store.append_history(outcome.id, &points).await {
                        let err = PipelineError::from_store(err);
                        warn!(id = outcome.id, error = %err, "could not write price history");
                        if err.is_fatal() {
                            return Err(err);
                        }
                    }
                }
            }
            UpsertAction::Replaced | UpsertAction::Annotated => {
                summary.updated += 1;
                summary.tally(&outcome.record);
            }
            UpsertAction::Unchanged => {
                debug!(id = outcome.id, vehicle = %vehicle.label(), "already catalogued from this source");
                summary.skipped += 1;
            }
        }
        Ok(())
    }
}

/// Run each research query through `provider`. A failed query yields no input.
pub async fn discover(provider: &dyn ResearchProvider, queries: &[ResearchQuery]) -> Vec<PipelineInput> {
    let mut inputs = Vec::with_capacity(queries.len());
    for query in queries {
        let span = info_span!("research_query", name = %query.name);
        let result = provider.research(&query.prompt).instrument(span).await;
        match result {
            Ok(text) => {
                info!(name = %query.name, bytes = text.len(), "research response received");
                inputs.push(PipelineInput::Prose {
                    label: query.name.clone(),
                    source_type: SourceType::ResearchDerived,
                    text,
                });
            }
            Err(err) => warn!(name = %query.name, error = %err, "research query failed; no mentions"),
        }
    }
    inputs
}

/// Load every enabled source in registry order.
pub async fn collect_inputs(
    registry: &SourceRegistry,
    workspace_root: &Path,
    research: Option<&dyn ResearchProvider>,
) -> Result<Vec<PipelineInput>> {
    let mut inputs = Vec::new();
    for source in registry.enabled() {
        let label = source.display_name.clone().unwrap_or_else(|| source.id.clone());
        match &source.kind {
            SourceKind::ListingFeed { path } => {
                let feed = load_listing_feed(workspace_root.join(path))
                    .with_context(|| format!("loading listing feed for {}", source.id))?;
                let (drafts, rejected) = feed.into_drafts();
                info!(source = %source.id, drafts = drafts.len(), rejected = rejected.len(), "loaded listing feed");
                inputs.push(PipelineInput::Listings {
                    label,
                    drafts,
                    rejected,
                });
            }
            SourceKind::ProseNotes { path, source_type } => {
                let documents = load_prose_notes(workspace_root.join(path))
                    .with_context(|| format!("loading prose notes for {}", source.id))?;
                inputs.extend(documents.into_iter().map(|doc| PipelineInput::Prose {
                    label: doc.label,
                    source_type: source_type.unwrap_or(SourceType::ResearchDerived),
                    text: doc.text,
                }));
            }
            SourceKind::ResearchQueries { queries } => match research {
                Some(provider) => inputs.extend(discover(provider, queries).await),
                None => warn!(source = %source.id, "no research provider configured; skipping queries"),
            },
        }
    }
    Ok(inputs)
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub summary: RunSummary,
    pub reports_dir: PathBuf,
    pub manifest: PathBuf,
}

fn research_provider(config: &PipelineConfig) -> Result<Option<ThrottledProvider<ChatCompletionsProvider>>> {
    match ChatCompletionsProvider::new(config.research_client_config()) {
        Ok(provider) => Ok(Some(ThrottledProvider::new(provider, config.research_delay))),
        Err(ResearchError::MissingApiKey) => Ok(None),
        Err(err) => Err(err).context("building research client"),
    }
}

/// Load sources, import them, then write the run reports and snapshot.
pub async fn run_import(config: &PipelineConfig, store: Arc<dyn CatalogStore>) -> Result<ImportReport> {
    let registry = SourceRegistry::load(&config.workspace_root)?;
    let rules = ClassifierRules::from_workspace_root(&config.workspace_root)?;
    let provider = research_provider(config)?;
    let inputs = collect_inputs(
        &registry,
        &config.workspace_root,
        provider.as_ref().map(|p| p as &dyn ResearchProvider),
    )
    .await?;

    let mut pipeline = ImportPipeline::new(
        store.clone(),
        PipelineOptions {
            extractor: config.extractor.clone(),
            rules,
            seed: config.history_seed,
            stock_retries: Some(config.stock_retries),
            history_months: config.history_months,
            archive_dir: Some(config.archive_dir.clone()),
            reference_time: None,
        },
    );
    let summary = pipeline.run(inputs).await;

    let reports_dir = write_reports(&config.workspace_root, &summary).await?;
    let manifest = export_parquet_snapshot(store.as_ref(), &reports_dir).await?;
    Ok(ImportReport {
        summary,
        reports_dir,
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catalog_core::{PriceInput, Region};
    use catalog_storage::MemoryCatalogStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).single().unwrap()
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            seed: Some(5),
            history_months: Some(10),
            reference_time: Some(now()),
            ..PipelineOptions::default()
        }
    }

    fn draft(make: &str, model: &str, year: i32, price: Option<f64>) -> VehicleDraft {
        VehicleDraft {
            make: make.into(),
            model: model.into(),
            year,
            price: price.map(PriceInput::Amount),
            location: Some("Dallas, TX".into()),
            condition: Some("Restored".into()),
            category: None,
            description: None,
            stock_number: None,
            provenance: Provenance::new(SourceType::DirectListing, "Gateway Classic Cars").unwrap(),
        }
    }

    #[tokio::test]
    async fn summary_accounts_for_every_record() {
        let store = Arc::new(MemoryCatalogStore::new());
        let mut pipeline = ImportPipeline::new(store.clone(), options());
        let summary = pipeline
            .run(vec![
                PipelineInput::Listings {
                    label: "dealer".into(),
                    drafts: vec![
                        draft("Ford", "Mustang Boss 302", 1970, Some(125_000.0)),
                        draft("Ford", "Model T", 1800, Some(9_000.0)),
                        draft("Buick", "GSX", 1970, None),
                    ],
                    rejected: vec![RejectedRecord {
                        index: 3,
                        reason: "missing field `make`".into(),
                    }],
                },
                PipelineInput::Prose {
                    label: "Auction recap".into(),
                    source_type: SourceType::ResearchDerived,
                    text: "1969 Chevrolet Camaro SS - $135,000".into(),
                },
            ])
            .await;

        assert_eq!(summary.processed, 5);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 2);
        assert_eq!(
            summary.processed,
            summary.inserted + summary.updated + summary.skipped + summary.errors
        );
        assert_eq!(summary.by_region.get(Region::South.as_str()), Some(&1));
        assert!(summary.aborted.is_none());
        assert_eq!(store.count_all().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn inserted_vehicles_get_a_reconciled_trail() {
        let store = Arc::new(MemoryCatalogStore::new());
        let mut pipeline = ImportPipeline::new(store.clone(), options());
        pipeline
            .run(vec![PipelineInput::Listings {
                label: "dealer".into(),
                drafts: vec![draft("Porsche", "911", 1973, Some(150_000.0))],
                rejected: Vec::new(),
            }])
            .await;

        let record = store.list_vehicles().await.unwrap().remove(0);
        let history = store.history(record.id).await.unwrap();
        assert_eq!(history.len(), 11);
        assert_eq!(history.last().map(|p| p.price), record.price);
    }

    #[tokio::test]
    async fn merged_sightings_are_tallied_under_the_stored_record() {
        let store = Arc::new(MemoryCatalogStore::new());
        ImportPipeline::new(store.clone(), options())
            .run(vec![PipelineInput::Listings {
                label: "dealer".into(),
                drafts: vec![draft("Ford", "Mustang Boss 302", 1970, Some(125_000.0))],
                rejected: Vec::new(),
            }])
            .await;

        let mut sighting = draft("Ford", "Mustang Boss 302", 1970, Some(119_000.0));
        sighting.location = Some("Scottsdale, AZ".into());
        sighting.provenance = Provenance::new(SourceType::Migrated, "Legacy sheet").unwrap();
        let summary = ImportPipeline::new(store.clone(), options())
            .run(vec![PipelineInput::Listings {
                label: "legacy".into(),
                drafts: vec![sighting],
                rejected: Vec::new(),
            }])
            .await;

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.by_region.len(), 1);
        assert_eq!(summary.by_region.get(Region::South.as_str()), Some(&1));
    }

    struct ScriptedProvider;

    #[async_trait]
    impl ResearchProvider for ScriptedProvider {
        async fn research(&self, prompt: &str) -> Result<String, ResearchError> {
            if prompt.contains("fail") {
                Err(ResearchError::EmptyResponse)
            } else {
                Ok("Spotted a 1967 Shelby GT500 - $210,000 in Scottsdale, AZ".into())
            }
        }
    }

    #[tokio::test]
    async fn failed_research_query_yields_no_input() {
        let queries = vec![
            ResearchQuery {
                name: "southwest".into(),
                prompt: "classic cars in Arizona".into(),
            },
            ResearchQuery {
                name: "broken".into(),
                prompt: "fail please".into(),
            },
        ];
        let inputs = discover(&ScriptedProvider, &queries).await;
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].label(), "southwest");
    }
}
