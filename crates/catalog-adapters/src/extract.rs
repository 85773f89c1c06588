//! Text extractor: recovers structured vehicle mentions from free-form prose.
//!
//! Each pattern carries an explicit confidence score. Candidates from every pattern are
//! ranked by score, overlapping spans keep the most confident match, and repeated mentions
//! of the same vehicle at nearly the same price collapse into one.

use std::cmp::Ordering;

use catalog_core::{VehicleMention, MIN_CATALOG_YEAR};
use chrono::{Datelike, Utc};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalize::{collapse_whitespace, is_known_make};

pub const YEAR_MAKE_MODEL_PRICE: &str = "year_make_model_price";
pub const PRICE_YEAR_MAKE_MODEL: &str = "price_year_make_model";
pub const MAKE_MODEL_YEAR_PRICE: &str = "make_model_year_price";

/// Score removed from a candidate whose make is not a recognised marque.
const UNKNOWN_MAKE_PENALTY: f64 = 0.3;

const CONTEXT_BEFORE: usize = 100;
const CONTEXT_AFTER: usize = 200;

lazy_static! {
    static ref PATTERNS: Vec<ScoredPattern> = vec![
        ScoredPattern {
            name: YEAR_MAKE_MODEL_PRICE,
            score: 0.9,
            regex: Regex::new(
                r"\b(?P<year>(?:19|20)\d{2})[ \t]+(?P<make>[A-Za-z][A-Za-z\-]+)[ \t]+(?P<model>[A-Za-z0-9][A-Za-z0-9 \t\-/.']*?)(?:[ \t]+[-–—]|[ \t]*:)[ \t]*\$?[ \t]*(?P<price>\d[\d,]*(?:\.\d{1,2})?)"
            )
            .expect("valid year/make/model/price regex"),
        },
        ScoredPattern {
            name: PRICE_YEAR_MAKE_MODEL,
            score: 0.8,
            regex: Regex::new(
                r"\$[ \t]*(?P<price>\d[\d,]*(?:\.\d{1,2})?)[ \t]*[-–—:][ \t]*\b(?P<year>(?:19|20)\d{2})[ \t]+(?P<make>[A-Za-z][A-Za-z\-]+)[ \t]+(?P<model>[A-Za-z0-9][A-Za-z0-9\-/]*(?:[ \t]+[A-Za-z0-9][A-Za-z0-9\-/]*){0,3})"
            )
            .expect("valid price/year/make/model regex"),
        },
        ScoredPattern {
            name: MAKE_MODEL_YEAR_PRICE,
            score: 0.6,
            regex: Regex::new(
                r"\b(?P<make>[A-Za-z][A-Za-z\-]+)[ \t]+(?P<model>[A-Za-z0-9][A-Za-z0-9\-/]*(?:[ \t]+[A-Za-z0-9][A-Za-z0-9\-/]*){0,3}?)[ \t]+(?P<year>(?:19|20)\d{2})\b[ \t]*[-–—:]?[ \t]*\$[ \t]*(?P<price>\d[\d,]*(?:\.\d{1,2})?)"
            )
            .expect("valid make/model/year/price regex"),
        },
    ];
    static ref YEAR_TOKEN: Regex = Regex::new(r"\b(?:19|20)\d{2}\b").expect("valid year token regex");
}

struct ScoredPattern {
    name: &'static str,
    score: f64,
    regex: Regex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub min_year: i32,
    /// Latest acceptable year. `None` means the current calendar year.
    pub max_year: Option<i32>,
    pub min_price: i64,
    pub max_price: i64,
    pub min_name_len: usize,
    pub min_confidence: f64,
    /// Relative price difference under which two mentions of one vehicle are the same listing.
    pub duplicate_price_tolerance: f64,
    pub max_mentions: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_year: 1920,
            max_year: None,
            min_price: 5_000,
            max_price: 5_000_000,
            min_name_len: 2,
            min_confidence: 0.5,
            duplicate_price_tolerance: 0.05,
            max_mentions: 15,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    start: usize,
    end: usize,
    mention: VehicleMention,
}

#[derive(Debug, Clone)]
pub struct TextExtractor {
    config: ExtractorConfig,
    max_year: i32,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

impl TextExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let max_year = config.max_year.unwrap_or_else(|| Utc::now().year());
        Self { config, max_year }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract at most `max_mentions` mentions, in text order. Malformed matches are skipped.
    pub fn extract(&self, text: &str, source_label: &str) -> Vec<VehicleMention> {
        let mut candidates = Vec::new();
        for pattern in PATTERNS.iter() {
            let mut at = 0;
            while let Some(caps) = pattern.regex.captures_at(text, at) {
                let Some(whole) = caps.get(0) else { break };
                // "In 2024 Mecum sold a 1969 ...": the real vehicle starts at the inner year.
                if let Some(inner) = inner_year_start(&caps) {
                    at = inner;
                    continue;
                }
                match self.candidate(pattern, &caps, text) {
                    Some(candidate) => candidates.push(candidate),
                    None => debug!(
                        source = source_label,
                        pattern = pattern.name,
                        span = whole.as_str(),
                        "discarded implausible match"
                    ),
                }
                at = whole.end();
            }
        }

        candidates.sort_by(|a, b| {
            b.mention
                .confidence
                .partial_cmp(&a.mention.confidence)
                .unwrap_or(Ordering::Equal)
                .then(a.start.cmp(&b.start))
        });

        let mut accepted: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            if candidate.mention.confidence < self.config.min_confidence {
                continue;
            }
            if accepted
                .iter()
                .any(|a| candidate.start < a.end && a.start < candidate.end)
            {
                continue;
            }
            if accepted
                .iter()
                .any(|a| self.same_listing(&a.mention, &candidate.mention))
            {
                continue;
            }
            accepted.push(candidate);
        }

        accepted.sort_by_key(|c| c.start);
        accepted.truncate(self.config.max_mentions);
        debug!(source = source_label, mentions = accepted.len(), "extraction finished");
        accepted.into_iter().map(|c| c.mention).collect()
    }

    fn candidate(&self, pattern: &ScoredPattern, caps: &Captures<'_>, text: &str) -> Option<Candidate> {
        let whole = caps.get(0)?;
        let year: i32 = caps.name("year")?.as_str().parse().ok()?;
        let price: i64 = caps.name("price")?.as_str().replace(',', "").parse::<f64>().ok().map(|p| p.round() as i64)?;
        let mut make = caps.name("make")?.as_str().trim().to_string();
        let mut model = trim_model(caps.name("model")?.as_str());

        // "Stunning Chevrolet Camaro 1969 $89,900": shift a leading adjective off the make.
        if !is_known_make(&make) {
            if let Some((first, rest)) = model.split_once(' ') {
                if is_known_make(first) {
                    make = first.to_string();
                    model = rest.to_string();
                }
            }
        }

        let lower_year = self.config.min_year.max(MIN_CATALOG_YEAR);
        if year < lower_year || year > self.max_year {
            return None;
        }
        if price < self.config.min_price || price > self.config.max_price {
            return None;
        }
        if make.chars().count() < self.config.min_name_len || model.chars().count() < self.config.min_name_len {
            return None;
        }

        let mut confidence = pattern.score;
        if !is_known_make(&make) {
            confidence -= UNKNOWN_MAKE_PENALTY;
        }

        Some(Candidate {
            start: whole.start(),
            end: whole.end(),
            mention: VehicleMention {
                year,
                make,
                model,
                price,
                raw_span: whole.as_str().to_string(),
                description: context_window(text, whole.start(), whole.end()),
                pattern: pattern.name.to_string(),
                confidence: (confidence * 100.0).round() / 100.0,
            },
        })
    }

    fn same_listing(&self, a: &VehicleMention, b: &VehicleMention) -> bool {
        if a.year != b.year || !a.make.eq_ignore_ascii_case(&b.make) || !a.model.eq_ignore_ascii_case(&b.model) {
            return false;
        }
        let larger = a.price.max(b.price) as f64;
        if larger <= 0.0 {
            return true;
        }
        ((a.price - b.price).abs() as f64) / larger < self.config.duplicate_price_tolerance
    }
}

/// Offset of a year token inside the model, which means the match began too early.
fn inner_year_start(caps: &Captures<'_>) -> Option<usize> {
    let model = caps.name("model")?;
    YEAR_TOKEN
        .find(model.as_str())
        .map(|year| model.start() + year.start())
}

fn trim_model(raw: &str) -> String {
    collapse_whitespace(raw)
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '/' | '.' | '\''))
        .to_string()
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Up to 100 bytes before and 200 after the match, whitespace collapsed.
fn context_window(text: &str, start: usize, end: usize) -> String {
    let from = floor_boundary(text, start.saturating_sub(CONTEXT_BEFORE));
    let to = ceil_boundary(text, (end + CONTEXT_AFTER).min(text.len()));
    collapse_whitespace(&text[from..to])
}
