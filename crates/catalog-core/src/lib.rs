//! Core domain model and provenance types for the vehicle catalog.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "catalog-core";

/// Earliest model year the catalog will hold.
pub const MIN_CATALOG_YEAR: i32 = 1900;

pub type VehicleId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("unrecognized {kind} value {value:?}")]
    UnknownVariant { kind: &'static str, value: String },
    #[error("provenance requires a non-empty source name")]
    MissingSourceName,
}

/// Years a canonical record may carry, relative to `now`.
pub fn plausible_years(now: DateTime<Utc>) -> RangeInclusive<i32> {
    MIN_CATALOG_YEAR..=now.year() + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MuscleCar,
    SportsCar,
    LuxuryCar,
    ClassicCar,
    TruckUtility,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::MuscleCar,
        Category::SportsCar,
        Category::LuxuryCar,
        Category::ClassicCar,
        Category::TruckUtility,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::MuscleCar => "muscle_car",
            Category::SportsCar => "sports_car",
            Category::LuxuryCar => "luxury_car",
            Category::ClassicCar => "classic_car",
            Category::TruckUtility => "truck_utility",
        }
    }
}

impl FromStr for Category {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "category",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Project,
    #[default]
    Good,
    Excellent,
    Concours,
}

impl Condition {
    pub const ALL: [Condition; 4] = [
        Condition::Project,
        Condition::Good,
        Condition::Excellent,
        Condition::Concours,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Condition::Project => "project",
            Condition::Good => "good",
            Condition::Excellent => "excellent",
            Condition::Concours => "concours",
        }
    }
}

impl FromStr for Condition {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "condition",
                value: s.to_string(),
            })
    }
}

/// Coarse national market bucket. States the lookup table does not know land in
/// [`Region::Midwest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    West,
    South,
    #[default]
    Midwest,
    Northeast,
}

impl Region {
    pub const ALL: [Region; 4] = [Region::West, Region::South, Region::Midwest, Region::Northeast];

    pub fn as_str(self) -> &'static str {
        match self {
            Region::West => "west",
            Region::South => "south",
            Region::Midwest => "midwest",
            Region::Northeast => "northeast",
        }
    }
}

impl FromStr for Region {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "region",
                value: s.to_string(),
            })
    }
}

/// Ordinal investment label. Variant order is ascending, so `APlus` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InvestmentGrade {
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl InvestmentGrade {
    pub const ALL: [InvestmentGrade; 4] = [
        InvestmentGrade::APlus,
        InvestmentGrade::A,
        InvestmentGrade::AMinus,
        InvestmentGrade::BPlus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InvestmentGrade::APlus => "A+",
            InvestmentGrade::A => "A",
            InvestmentGrade::AMinus => "A-",
            InvestmentGrade::BPlus => "B+",
        }
    }

    pub fn is_a_tier(self) -> bool {
        self >= InvestmentGrade::AMinus
    }
}

impl FromStr for InvestmentGrade {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvestmentGrade::ALL
            .into_iter()
            .find(|g| g.as_str() == s.trim())
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "investment grade",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for InvestmentGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketTrend {
    Rising,
    Stable,
    Declining,
}

impl MarketTrend {
    pub const ALL: [MarketTrend; 3] = [MarketTrend::Rising, MarketTrend::Stable, MarketTrend::Declining];

    pub fn as_str(self) -> &'static str {
        match self {
            MarketTrend::Rising => "rising",
            MarketTrend::Stable => "stable",
            MarketTrend::Declining => "declining",
        }
    }
}

impl FromStr for MarketTrend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MarketTrend::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "market trend",
                value: s.to_string(),
            })
    }
}

/// Where a record's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    DirectListing,
    ResearchDerived,
    Migrated,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [
        SourceType::DirectListing,
        SourceType::ResearchDerived,
        SourceType::Migrated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::DirectListing => "direct_listing",
            SourceType::ResearchDerived => "research_derived",
            SourceType::Migrated => "migrated",
        }
    }
}

impl FromStr for SourceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "source type",
                value: s.to_string(),
            })
    }
}

/// Mandatory origin metadata. A record without it is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_type: SourceType,
    pub source_name: String,
}

impl Provenance {
    pub fn new(source_type: SourceType, source_name: impl Into<String>) -> Result<Self, CoreError> {
        let source_name = source_name.into().trim().to_string();
        if source_name.is_empty() {
            return Err(CoreError::MissingSourceName);
        }
        Ok(Self {
            source_type,
            source_name,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySource {
    Initial,
    MarketUpdate,
    ManualCorrection,
}

impl HistorySource {
    pub const ALL: [HistorySource; 3] = [
        HistorySource::Initial,
        HistorySource::MarketUpdate,
        HistorySource::ManualCorrection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HistorySource::Initial => "initial",
            HistorySource::MarketUpdate => "market_update",
            HistorySource::ManualCorrection => "manual_correction",
        }
    }
}

impl FromStr for HistorySource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HistorySource::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "history source",
                value: s.to_string(),
            })
    }
}

/// Distinguishes backcast (modeled) history from prices actually seen on a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointOrigin {
    Modeled,
    Observed,
}

impl PointOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            PointOrigin::Modeled => "modeled",
            PointOrigin::Observed => "observed",
        }
    }
}

impl FromStr for PointOrigin {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "modeled" => Ok(PointOrigin::Modeled),
            "observed" => Ok(PointOrigin::Observed),
            other => Err(CoreError::UnknownVariant {
                kind: "point origin",
                value: other.to_string(),
            }),
        }
    }
}

/// Price as it arrived from a source: an amount, or text still carrying currency symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceInput {
    Amount(f64),
    Text(String),
}

/// A vehicle mention recovered from free text by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleMention {
    pub year: i32,
    pub make: String,
    pub model: String,
    pub price: i64,
    pub raw_span: String,
    /// Context window around the match, whitespace collapsed.
    pub description: String,
    /// Name of the pattern that produced the match.
    pub pattern: String,
    pub confidence: f64,
}

/// Pre-normalized handoff contract from any source into the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleDraft {
    pub make: String,
    pub model: String,
    pub year: i32,
    pub price: Option<PriceInput>,
    /// Combined "City, State" string, or any text naming a state.
    pub location: Option<String>,
    pub condition: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub stock_number: Option<String>,
    pub provenance: Provenance,
}

impl VehicleMention {
    pub fn into_draft(self, provenance: Provenance) -> VehicleDraft {
        VehicleDraft {
            make: self.make,
            model: self.model,
            year: self.year,
            price: Some(PriceInput::Amount(self.price as f64)),
            location: Some(self.description.clone()),
            condition: None,
            category: None,
            description: Some(self.description),
            stock_number: None,
            provenance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub state: Option<String>,
    pub region: Region,
}

/// The single validated value produced by the normalizer. Later stages trust its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedVehicle {
    pub make: String,
    pub model: String,
    pub year: i32,
    pub price: Option<i64>,
    pub category: Category,
    pub condition: Condition,
    pub location: Location,
    pub provenance: Provenance,
    pub description: String,
    pub stock_number: Option<String>,
}

impl NormalizedVehicle {
    pub fn key(&self) -> VehicleKey {
        VehicleKey {
            make: self.make.clone(),
            model: self.model.clone(),
            year: self.year,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {} {}", self.year, self.make, self.model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub investment_grade: InvestmentGrade,
    /// Percent per year.
    pub appreciation_rate: f64,
    pub market_trend: MarketTrend,
    pub valuation_confidence: f64,
}

/// Exact-match identity used by the deduplicator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleKey {
    pub make: String,
    pub model: String,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVehicleRecord {
    pub stock_number: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub price: Option<i64>,
    pub category: Category,
    pub condition: Condition,
    pub location_city: Option<String>,
    pub location_state: Option<String>,
    pub location_region: Region,
    pub investment_grade: InvestmentGrade,
    pub appreciation_rate: f64,
    pub market_trend: MarketTrend,
    pub valuation_confidence: f64,
    pub source_type: SourceType,
    pub source_name: String,
    pub description: Option<String>,
    pub research_notes: Option<String>,
}

impl NewVehicleRecord {
    pub fn from_parts(
        vehicle: &NormalizedVehicle,
        classification: &Classification,
        stock_number: String,
        research_notes: Option<String>,
    ) -> Self {
        Self {
            stock_number,
            make: vehicle.make.clone(),
            model: vehicle.model.clone(),
            year: vehicle.year,
            price: vehicle.price,
            category: vehicle.category,
            condition: vehicle.condition,
            location_city: vehicle.location.city.clone(),
            location_state: vehicle.location.state.clone(),
            location_region: vehicle.location.region,
            investment_grade: classification.investment_grade,
            appreciation_rate: classification.appreciation_rate,
            market_trend: classification.market_trend,
            valuation_confidence: classification.valuation_confidence,
            source_type: vehicle.provenance.source_type,
            source_name: vehicle.provenance.source_name.clone(),
            description: (!vehicle.description.is_empty()).then(|| vehicle.description.clone()),
            research_notes,
        }
    }

    pub fn into_record(self, id: VehicleId, now: DateTime<Utc>) -> VehicleRecord {
        VehicleRecord {
            id,
            stock_number: self.stock_number,
            make: self.make,
            model: self.model,
            year: self.year,
            price: self.price,
            category: self.category,
            condition: self.condition,
            location_city: self.location_city,
            location_state: self.location_state,
            location_region: self.location_region,
            investment_grade: self.investment_grade,
            appreciation_rate: self.appreciation_rate,
            market_trend: self.market_trend,
            valuation_confidence: self.valuation_confidence,
            source_type: self.source_type,
            source_name: self.source_name,
            description: self.description,
            research_notes: self.research_notes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Canonical persisted vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub id: VehicleId,
    pub stock_number: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub price: Option<i64>,
    pub category: Category,
    pub condition: Condition,
    pub location_city: Option<String>,
    pub location_state: Option<String>,
    pub location_region: Region,
    pub investment_grade: InvestmentGrade,
    pub appreciation_rate: f64,
    pub market_trend: MarketTrend,
    pub valuation_confidence: f64,
    pub source_type: SourceType,
    pub source_name: String,
    pub description: Option<String>,
    pub research_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VehicleRecord {
    pub fn key(&self) -> VehicleKey {
        VehicleKey {
            make: self.make.clone(),
            model: self.model.clone(),
            year: self.year,
        }
    }

    pub fn classification(&self) -> Classification {
        Classification {
            investment_grade: self.investment_grade,
            appreciation_rate: self.appreciation_rate,
            market_trend: self.market_trend,
            valuation_confidence: self.valuation_confidence,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {} {}", self.year, self.make, self.model)
    }
}

/// Partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VehiclePatch {
    pub price: Option<i64>,
    pub classification: Option<Classification>,
    pub source_type: Option<SourceType>,
    pub source_name: Option<String>,
    pub research_notes: Option<String>,
}

impl VehiclePatch {
    pub fn is_empty(&self) -> bool {
        self.price.is_none()
            && self.classification.is_none()
            && self.source_type.is_none()
            && self.source_name.is_none()
            && self.research_notes.is_none()
    }

    pub fn apply_to(&self, record: &mut VehicleRecord, now: DateTime<Utc>) {
        if let Some(price) = self.price {
            record.price = Some(price);
        }
        if let Some(c) = &self.classification {
            record.investment_grade = c.investment_grade;
            record.appreciation_rate = c.appreciation_rate;
            record.market_trend = c.market_trend;
            record.valuation_confidence = c.valuation_confidence;
        }
        if let Some(source_type) = self.source_type {
            record.source_type = source_type;
        }
        if let Some(name) = &self.source_name {
            record.source_name = name.clone();
        }
        if let Some(notes) = &self.research_notes {
            record.research_notes = Some(notes.clone());
        }
        record.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHistoryPoint {
    pub vehicle_id: VehicleId,
    pub price: i64,
    pub recorded_date: DateTime<Utc>,
    pub source_type: HistorySource,
    pub origin: PointOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn grades_order_ascending_to_a_plus() {
        assert!(InvestmentGrade::APlus > InvestmentGrade::A);
        assert!(InvestmentGrade::A > InvestmentGrade::AMinus);
        assert!(InvestmentGrade::AMinus > InvestmentGrade::BPlus);
        assert!(InvestmentGrade::AMinus.is_a_tier());
        assert!(!InvestmentGrade::BPlus.is_a_tier());
    }

    #[test]
    fn grade_string_forms_parse_back() {
        for grade in InvestmentGrade::ALL {
            assert_eq!(grade.as_str().parse::<InvestmentGrade>().unwrap(), grade);
        }
        assert_eq!(
            serde_json::to_string(&InvestmentGrade::APlus).unwrap(),
            "\"A+\""
        );
        assert!("C".parse::<InvestmentGrade>().is_err());
    }

    #[test]
    fn provenance_rejects_blank_source_name() {
        assert_eq!(
            Provenance::new(SourceType::Migrated, "   "),
            Err(CoreError::MissingSourceName)
        );
        let p = Provenance::new(SourceType::DirectListing, " Hemmings ").unwrap();
        assert_eq!(p.source_name, "Hemmings");
    }

    #[test]
    fn price_input_accepts_numbers_and_text() {
        let n: PriceInput = serde_json::from_str("89000").unwrap();
        let t: PriceInput = serde_json::from_str("\"$89,000\"").unwrap();
        assert_eq!(n, PriceInput::Amount(89000.0));
        assert_eq!(t, PriceInput::Text("$89,000".into()));
    }

    #[test]
    fn plausible_years_extend_one_past_current() {
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).single().unwrap();
        let years = plausible_years(now);
        assert_eq!(*years.start(), 1900);
        assert_eq!(*years.end(), 2027);
    }

    #[test]
    fn patch_only_touches_set_fields() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap();
        let mut record = NewVehicleRecord {
            stock_number: "HEM1970FOR001".into(),
            make: "Ford".into(),
            model: "Mustang Boss 302".into(),
            year: 1970,
            price: Some(125_000),
            category: Category::MuscleCar,
            condition: Condition::Excellent,
            location_city: Some("Dallas".into()),
            location_state: Some("TX".into()),
            location_region: Region::South,
            investment_grade: InvestmentGrade::A,
            appreciation_rate: 45.76,
            market_trend: MarketTrend::Rising,
            valuation_confidence: 0.85,
            source_type: SourceType::ResearchDerived,
            source_name: "Hemmings".into(),
            description: None,
            research_notes: None,
        }
        .into_record(7, now);

        let later = now + chrono::Duration::days(3);
        VehiclePatch {
            price: Some(130_000),
            ..Default::default()
        }
        .apply_to(&mut record, later);

        assert_eq!(record.price, Some(130_000));
        assert_eq!(record.source_name, "Hemmings");
        assert_eq!(record.updated_at, later);
        assert_eq!(record.created_at, now);
    }
}
