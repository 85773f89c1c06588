//! Source adapters: listing feeds, prose notes, and the research provider, plus the
//! extractor and normalizer every source feeds through.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use catalog_core::{CoreError, PriceInput, Provenance, SourceType, VehicleDraft};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub mod extract;
pub mod normalize;
pub mod research;

pub use extract::{ExtractorConfig, TextExtractor};
pub use normalize::{FieldNormalizer, NormalizeError};
pub use research::{ChatCompletionsProvider, ResearchError, ResearchProvider, ThrottledProvider};

pub const CRATE_NAME: &str = "catalog-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("listing record {index} is malformed: {reason}")]
    MalformedRecord { index: usize, reason: String },
    #[error(transparent)]
    Provenance(#[from] CoreError),
}

/// One structured record from a listing feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub make: String,
    pub model: String,
    pub year: i32,
    #[serde(default)]
    pub price: Option<PriceInput>,
    /// Usually a city, or a combined "City, State".
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stock_number: Option<String>,
    pub source: String,
}

impl ListingRecord {
    pub fn into_draft(self, source_type: SourceType) -> Result<VehicleDraft, AdapterError> {
        let provenance = Provenance::new(source_type, self.source)?;
        let location = match (self.location, self.state) {
            (Some(city), Some(state)) if !city.contains(',') => Some(format!("{city}, {state}")),
            (Some(location), _) => Some(location),
            (None, state) => state,
        };
        Ok(VehicleDraft {
            make: self.make,
            model: self.model,
            year: self.year,
            price: self.price,
            location,
            condition: self.condition,
            category: self.category,
            description: self.description,
            stock_number: self.stock_number,
            provenance,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawListingFeed {
    #[serde(default = "default_feed_source_type")]
    source_type: SourceType,
    listings: Vec<serde_json::Value>,
}

fn default_feed_source_type() -> SourceType {
    SourceType::DirectListing
}

/// A parsed feed. Records that failed to deserialize are kept aside, not fatal.
#[derive(Debug, Clone)]
pub struct ListingFeed {
    pub path: PathBuf,
    pub source_type: SourceType,
    pub records: Vec<ListingRecord>,
    pub rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

impl ListingFeed {
    /// Drafts for every record that carries provenance; the rest join `rejected`.
    pub fn into_drafts(self) -> (Vec<VehicleDraft>, Vec<RejectedRecord>) {
        let mut rejected = self.rejected;
        let mut drafts = Vec::with_capacity(self.records.len());
        for (index, record) in self.records.into_iter().enumerate() {
            match record.into_draft(self.source_type) {
                Ok(draft) => drafts.push(draft),
                Err(err) => rejected.push(RejectedRecord {
                    index,
                    reason: err.to_string(),
                }),
            }
        }
        (drafts, rejected)
    }
}

pub fn load_listing_feed(path: impl AsRef<Path>) -> Result<ListingFeed> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let raw: RawListingFeed =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;

    let mut records = Vec::new();
    let mut rejected = Vec::new();
    for (index, value) in raw.listings.into_iter().enumerate() {
        match serde_json::from_value::<ListingRecord>(value) {
            Ok(record) => records.push(record),
            Err(err) => {
                let err = AdapterError::MalformedRecord {
                    index,
                    reason: err.to_string(),
                };
                warn!(feed = %path.display(), error = %err, "skipping listing record");
                rejected.push(RejectedRecord {
                    index,
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(ListingFeed {
        path: path.to_path_buf(),
        source_type: raw.source_type,
        records,
        rejected,
    })
}

/// A block of free text plus the label used as its source name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProseDocument {
    pub label: String,
    pub text: String,
}

/// Load a single `.txt` file, or every `.txt` file in a directory sorted by name.
pub fn load_prose_notes(path: impl AsRef<Path>) -> Result<Vec<ProseDocument>> {
    let path = path.as_ref();
    let files = if path.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(path)
            .with_context(|| format!("listing {}", path.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    files
        .into_iter()
        .map(|file| {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let label = file
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.replace(['_', '-'], " "))
                .unwrap_or_else(|| "notes".to_string());
            Ok(ProseDocument { label, text })
        })
        .collect()
}
