//! Run reports, catalog statistics, and parquet snapshots of the catalog.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Float64Array, Int32Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use catalog_core::{PriceHistoryPoint, VehicleRecord};
use catalog_storage::{CatalogStore, StoreError};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::pipeline::RunSummary;

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub total: u64,
    pub priced: u64,
    pub with_history: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_grade: BTreeMap<String, u64>,
    pub by_region: BTreeMap<String, u64>,
}

pub async fn catalog_stats(store: &dyn CatalogStore) -> Result<CatalogStats, StoreError> {
    let mut stats = CatalogStats {
        total: store.count_all().await?,
        ..CatalogStats::default()
    };
    for record in store.list_vehicles().await? {
        if record.price.is_some() {
            stats.priced += 1;
        }
        if !store.history(record.id).await?.is_empty() {
            stats.with_history += 1;
        }
        *stats.by_category.entry(record.category.as_str().to_string()).or_default() += 1;
        *stats.by_grade.entry(record.investment_grade.as_str().to_string()).or_default() += 1;
        *stats.by_region.entry(record.location_region.as_str().to_string()).or_default() += 1;
    }
    Ok(stats)
}

fn breakdown_lines(counts: &BTreeMap<String, u64>) -> String {
    if counts.is_empty() {
        return "- none".to_string();
    }
    counts
        .iter()
        .map(|(k, v)| format!("- {k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Writes `reports/<run_id>/import_brief.md` and `run_summary.json`; returns the run directory.
pub async fn write_reports(workspace_root: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let reports_dir = workspace_root.join("reports").join(summary.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let status = match &summary.aborted {
        Some(reason) => format!("aborted ({reason})"),
        None => "completed".to_string(),
    };
    let brief = format!(
        "# Catalog Import Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Status: {}\n- Processed: {}\n- Inserted: {}\n- Updated: {}\n- Skipped: {}\n- Errors: {}\n\n## By Category\n{}\n\n## By Investment Grade\n{}\n\n## By Region\n{}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        status,
        summary.processed,
        summary.inserted,
        summary.updated,
        summary.skipped,
        summary.errors,
        breakdown_lines(&summary.by_category),
        breakdown_lines(&summary.by_grade),
        breakdown_lines(&summary.by_region),
    );
    fs::write(reports_dir.join("import_brief.md"), brief)
        .await
        .context("writing import_brief.md")?;

    let json = serde_json::to_vec_pretty(&serde_json::json!({
        "status": status,
        "summary": summary,
    }))
    .context("serializing run summary")?;
    fs::write(reports_dir.join("run_summary.json"), json)
        .await
        .context("writing run_summary.json")?;

    Ok(reports_dir)
}

/// Snapshot the whole catalog under `<reports_dir>/snapshots/`; returns the manifest path.
pub async fn export_parquet_snapshot(store: &dyn CatalogStore, reports_dir: &Path) -> Result<PathBuf> {
    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let vehicles = store.list_vehicles().await.context("listing vehicles for snapshot")?;
    let mut history = Vec::new();
    for record in &vehicles {
        history.extend(
            store
                .history(record.id)
                .await
                .with_context(|| format!("reading history for vehicle {}", record.id))?,
        );
    }

    let vehicles_path = snapshot_dir.join("vehicles.parquet");
    let history_path = snapshot_dir.join("price_history.parquet");
    write_vehicles_parquet(&vehicles_path, &vehicles)?;
    write_history_parquet(&history_path, &history)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("vehicles", reports_dir, &vehicles_path, vehicles.len())?,
            manifest_entry("price_history", reports_dir, &history_path, history.len())?,
        ],
    };

    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn strings<'a>(values: impl Iterator<Item = &'a str>) -> StringArray {
    StringArray::from(values.map(Some).collect::<Vec<_>>())
}

fn write_vehicles_parquet(path: &Path, vehicles: &[VehicleRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("id", DataType::Int64, false),
        ArrowField::new("stock_number", DataType::Utf8, false),
        ArrowField::new("make", DataType::Utf8, false),
        ArrowField::new("model", DataType::Utf8, false),
        ArrowField::new("year", DataType::Int32, false),
        ArrowField::new("price", DataType::Int64, true),
        ArrowField::new("category", DataType::Utf8, false),
        ArrowField::new("condition", DataType::Utf8, false),
        ArrowField::new("location_city", DataType::Utf8, true),
        ArrowField::new("location_state", DataType::Utf8, true),
        ArrowField::new("location_region", DataType::Utf8, false),
        ArrowField::new("investment_grade", DataType::Utf8, false),
        ArrowField::new("appreciation_rate", DataType::Float64, false),
        ArrowField::new("market_trend", DataType::Utf8, false),
        ArrowField::new("valuation_confidence", DataType::Float64, false),
        ArrowField::new("source_type", DataType::Utf8, false),
        ArrowField::new("source_name", DataType::Utf8, false),
    ]));

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vehicles.iter().map(|v| v.id).collect::<Vec<_>>())),
            Arc::new(strings(vehicles.iter().map(|v| v.stock_number.as_str()))),
            Arc::new(strings(vehicles.iter().map(|v| v.make.as_str()))),
            Arc::new(strings(vehicles.iter().map(|v| v.model.as_str()))),
            Arc::new(Int32Array::from(vehicles.iter().map(|v| v.year).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(vehicles.iter().map(|v| v.price).collect::<Vec<_>>())),
            Arc::new(strings(vehicles.iter().map(|v| v.category.as_str()))),
            Arc::new(strings(vehicles.iter().map(|v| v.condition.as_str()))),
            Arc::new(StringArray::from(
                vehicles.iter().map(|v| v.location_city.as_deref()).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                vehicles.iter().map(|v| v.location_state.as_deref()).collect::<Vec<_>>(),
            )),
            Arc::new(strings(vehicles.iter().map(|v| v.location_region.as_str()))),
            Arc::new(strings(vehicles.iter().map(|v| v.investment_grade.as_str()))),
            Arc::new(Float64Array::from(
                vehicles.iter().map(|v| v.appreciation_rate).collect::<Vec<_>>(),
            )),
            Arc::new(strings(vehicles.iter().map(|v| v.market_trend.as_str()))),
            Arc::new(Float64Array::from(
                vehicles.iter().map(|v| v.valuation_confidence).collect::<Vec<_>>(),
            )),
            Arc::new(strings(vehicles.iter().map(|v| v.source_type.as_str()))),
            Arc::new(strings(vehicles.iter().map(|v| v.source_name.as_str()))),
        ],
    )
    .context("building vehicles record batch")?;
    write_parquet(path, batch)
}

fn write_history_parquet(path: &Path, history: &[PriceHistoryPoint]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("vehicle_id", DataType::Int64, false),
        ArrowField::new("price", DataType::Int64, false),
        ArrowField::new("recorded_date", DataType::Utf8, false),
        ArrowField::new("source_type", DataType::Utf8, false),
        ArrowField::new("origin", DataType::Utf8, false),
    ]));

    let dates = history
        .iter()
        .map(|p| p.recorded_date.to_rfc3339())
        .collect::<Vec<_>>();
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(history.iter().map(|p| p.vehicle_id).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(history.iter().map(|p| p.price).collect::<Vec<_>>())),
            Arc::new(strings(dates.iter().map(String::as_str))),
            Arc::new(strings(history.iter().map(|p| p.source_type.as_str()))),
            Arc::new(strings(history.iter().map(|p| p.origin.as_str()))),
        ],
    )
    .context("building price history record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path, rows: usize) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ImportPipeline, PipelineInput, PipelineOptions};
    use catalog_core::SourceType;
    use catalog_storage::MemoryCatalogStore;
    use tempfile::tempdir;

    async fn seeded_store() -> (Arc<MemoryCatalogStore>, RunSummary) {
        let store = Arc::new(MemoryCatalogStore::new());
        let mut pipeline = ImportPipeline::new(
            store.clone(),
            PipelineOptions {
                seed: Some(1),
                history_months: Some(8),
                ..PipelineOptions::default()
            },
        );
        let summary = pipeline
            .run(vec![PipelineInput::Prose {
                label: "Barn finds".into(),
                source_type: SourceType::ResearchDerived,
                text: "1969 Chevrolet Camaro SS - $135,000 in Charlotte, NC. Also a 1973 Porsche 911 - $150,000."
                    .into(),
            }])
            .await;
        (store, summary)
    }

    #[tokio::test]
    async fn stats_break_down_the_catalog() {
        let (store, _) = seeded_store().await;
        let stats = catalog_stats(store.as_ref()).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.priced, 2);
        assert_eq!(stats.with_history, 2);
        assert_eq!(stats.by_grade.get("A+"), Some(&1));
        assert_eq!(stats.by_category.values().sum::<u64>(), 2);
    }

    #[tokio::test]
    async fn reports_and_snapshot_land_under_the_run_directory() {
        let (store, summary) = seeded_store().await;
        let root = tempdir().unwrap();

        let reports_dir = write_reports(root.path(), &summary).await.unwrap();
        assert!(reports_dir.ends_with(summary.run_id.to_string()));
        let brief = std::fs::read_to_string(reports_dir.join("import_brief.md")).unwrap();
        assert!(brief.contains("- Inserted: 2"));
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(reports_dir.join("run_summary.json")).unwrap()).unwrap();
        assert_eq!(json["summary"]["inserted"], 2);

        let manifest_path = export_parquet_snapshot(store.as_ref(), &reports_dir).await.unwrap();
        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
        let files = manifest["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["path"], "snapshots/vehicles.parquet");
        assert_eq!(files[1]["rows"], 18);
        assert!(reports_dir.join("snapshots/price_history.parquet").exists());
    }
}
