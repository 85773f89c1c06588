//! Field normalizer: turns any [`VehicleDraft`] into the validated [`NormalizedVehicle`].

use catalog_core::{
    plausible_years, Category, Condition, Location, NormalizedVehicle, PriceInput, Region,
    VehicleDraft,
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use strsim::jaro_winkler;
use thiserror::Error;

/// Minimum Jaro-Winkler score for a misspelled make to snap to a known one.
pub const FUZZY_MAKE_THRESHOLD: f64 = 0.93;

pub const KNOWN_MAKES: &[&str] = &[
    "AC", "Alfa Romeo", "AMC", "Aston Martin", "Austin-Healey", "Bentley", "BMW", "Buick",
    "Cadillac", "Chevrolet", "Chrysler", "Datsun", "DeLorean", "DeTomaso", "Dodge", "Ferrari",
    "Fiat", "Ford", "GMC", "Hudson", "International", "Jaguar", "Jeep", "Kaiser", "Lamborghini",
    "Lancia", "Land Rover", "Lincoln", "Lotus", "Maserati", "Mercedes-Benz", "Mercury", "MG",
    "Nash", "Nissan", "Oldsmobile", "Packard", "Plymouth", "Pontiac", "Porsche", "Rolls-Royce",
    "Shelby", "Studebaker", "Toyota", "Triumph", "Volkswagen", "Volvo",
];

const MAKE_ALIASES: &[(&str, &str)] = &[
    ("chevy", "Chevrolet"),
    ("chev", "Chevrolet"),
    ("vw", "Volkswagen"),
    ("mercedes", "Mercedes-Benz"),
    ("benz", "Mercedes-Benz"),
    ("olds", "Oldsmobile"),
    ("caddy", "Cadillac"),
    ("alfa", "Alfa Romeo"),
    ("aston", "Aston Martin"),
    ("rolls", "Rolls-Royce"),
    ("lambo", "Lamborghini"),
    ("de tomaso", "DeTomaso"),
];

/// (postal code, name, region)
const STATES: &[(&str, &str, Region)] = &[
    ("AL", "Alabama", Region::South),
    ("AK", "Alaska", Region::West),
    ("AZ", "Arizona", Region::West),
    ("AR", "Arkansas", Region::South),
    ("CA", "California", Region::West),
    ("CO", "Colorado", Region::West),
    ("CT", "Connecticut", Region::Northeast),
    ("DE", "Delaware", Region::Northeast),
    ("DC", "District of Columbia", Region::Northeast),
    ("FL", "Florida", Region::South),
    ("GA", "Georgia", Region::South),
    ("HI", "Hawaii", Region::West),
    ("ID", "Idaho", Region::West),
    ("IL", "Illinois", Region::Midwest),
    ("IN", "Indiana", Region::Midwest),
    ("IA", "Iowa", Region::Midwest),
    ("KS", "Kansas", Region::Midwest),
    ("KY", "Kentucky", Region::South),
    ("LA", "Louisiana", Region::South),
    ("ME", "Maine", Region::Northeast),
    ("MD", "Maryland", Region::Northeast),
    ("MA", "Massachusetts", Region::Northeast),
    ("MI", "Michigan", Region::Midwest),
    ("MN", "Minnesota", Region::Midwest),
    ("MS", "Mississippi", Region::South),
    ("MO", "Missouri", Region::Midwest),
    ("MT", "Montana", Region::West),
    ("NE", "Nebraska", Region::Midwest),
    ("NV", "Nevada", Region::West),
    ("NH", "New Hampshire", Region::Northeast),
    ("NJ", "New Jersey", Region::Northeast),
    ("NM", "New Mexico", Region::West),
    ("NY", "New York", Region::Northeast),
    ("NC", "North Carolina", Region::South),
    ("ND", "North Dakota", Region::Midwest),
    ("OH", "Ohio", Region::Midwest),
    ("OK", "Oklahoma", Region::South),
    ("OR", "Oregon", Region::West),
    ("PA", "Pennsylvania", Region::Northeast),
    ("RI", "Rhode Island", Region::Northeast),
    ("SC", "South Carolina", Region::South),
    ("SD", "South Dakota", Region::Midwest),
    ("TN", "Tennessee", Region::South),
    ("TX", "Texas", Region::South),
    ("UT", "Utah", Region::West),
    ("VT", "Vermont", Region::Northeast),
    ("VA", "Virginia", Region::South),
    ("WA", "Washington", Region::West),
    ("WV", "West Virginia", Region::South),
    ("WI", "Wisconsin", Region::Midwest),
    ("WY", "Wyoming", Region::West),
];

const TRUCK_UTILITY: &[&str] = &[
    "bronco", "blazer", "el camino", "ranchero", "pickup", "f-100", "f100", "c10", "c-10",
    "land cruiser", "scout", "wagoneer", "power wagon", "defender", "suburban", "jeep",
];
const MUSCLE: &[&str] = &[
    "chevelle", "gto", "road runner", "challenger", "camaro", "mustang", "firebird", "charger",
    "cuda", "barracuda", "super bee", "nova", "442", "torino", "cougar", "javelin",
    "grand sport", "duster", "coronet",
];
const SPORTS: &[&str] = &[
    "corvette", "porsche", "ferrari", "lamborghini", "jaguar", "shelby", "cobra", "gt40",
    "datsun", "240z", "2000gt", "lotus", "triumph", "alfa romeo", "austin-healey", "mg",
    "280sl", "300sl",
];
const LUXURY: &[&str] = &[
    "cadillac", "lincoln", "mercedes-benz", "bmw", "rolls-royce", "bentley", "packard",
    "imperial",
];

/// Descriptions longer than this are treated as prose, not a location field.
const SHORT_LOCATION_LEN: usize = 40;

lazy_static! {
    static ref CITY_STATE: Regex =
        Regex::new(r"\b([A-Z][A-Za-z.'\-]*(?: [A-Z][A-Za-z.'\-]*){0,2}),[ \t]*([A-Z]{2})\b")
            .expect("valid city/state regex");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid whitespace regex");
    static ref REPEATED_PUNCT: Regex = Regex::new(r"([-/.,])[-/.,]+").expect("valid punct regex");
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("year {year} outside plausible range {min}..={max}")]
    YearOutOfRange { year: i32, min: i32, max: i32 },
    #[error("price {price} is not positive")]
    NonPositivePrice { price: i64 },
    #[error("make is empty")]
    MissingMake,
    #[error("model is empty")]
    MissingModel,
    #[error("record has no source name")]
    MissingProvenance,
}

#[derive(Debug, Clone)]
pub struct FieldNormalizer {
    reference_time: DateTime<Utc>,
}

impl Default for FieldNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldNormalizer {
    pub fn new() -> Self {
        Self {
            reference_time: Utc::now(),
        }
    }

    /// Pin "now" so the plausible-year bound is reproducible.
    pub fn with_reference_time(reference_time: DateTime<Utc>) -> Self {
        Self { reference_time }
    }

    pub fn normalize(&self, draft: VehicleDraft) -> Result<NormalizedVehicle, NormalizeError> {
        if draft.provenance.source_name.trim().is_empty() {
            return Err(NormalizeError::MissingProvenance);
        }

        let years = plausible_years(self.reference_time);
        if !years.contains(&draft.year) {
            return Err(NormalizeError::YearOutOfRange {
                year: draft.year,
                min: *years.start(),
                max: *years.end(),
            });
        }

        let (make, model) = normalize_make_model(&draft.make, &draft.model);
        if make.is_empty() {
            return Err(NormalizeError::MissingMake);
        }
        if model.is_empty() {
            return Err(NormalizeError::MissingModel);
        }

        let price = match &draft.price {
            None => None,
            Some(PriceInput::Amount(amount)) if amount.is_finite() => Some(amount.round() as i64),
            Some(PriceInput::Amount(_)) => None,
            Some(PriceInput::Text(text)) => parse_price(text),
        };
        if let Some(price) = price {
            if price <= 0 {
                return Err(NormalizeError::NonPositivePrice { price });
            }
        }

        let description = draft
            .description
            .as_deref()
            .map(collapse_whitespace)
            .unwrap_or_default();
        let location = draft
            .location
            .as_deref()
            .map(parse_location)
            .unwrap_or_default();
        let condition = draft
            .condition
            .as_deref()
            .and_then(map_condition)
            .unwrap_or_else(|| detect_condition(&description));
        let category = draft
            .category
            .as_deref()
            .and_then(map_category)
            .unwrap_or_else(|| derive_category(&make, &model));
        let stock_number = draft
            .stock_number
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(NormalizedVehicle {
            make,
            model,
            year: draft.year,
            price,
            category,
            condition,
            location,
            provenance: draft.provenance,
            description,
            stock_number,
        })
    }
}

pub fn collapse_whitespace(input: &str) -> String {
    WHITESPACE.replace_all(input.trim(), " ").into_owned()
}

fn make_key(input: &str) -> String {
    collapse_whitespace(&input.replace('-', " ")).to_ascii_lowercase()
}

/// Resolve a raw make to its canonical spelling: alias table, exact match, then fuzzy match.
pub fn canonical_make(raw: &str) -> Option<&'static str> {
    let key = make_key(raw);
    if key.is_empty() {
        return None;
    }
    if let Some((_, canonical)) = MAKE_ALIASES.iter().find(|(alias, _)| *alias == key) {
        return Some(canonical);
    }
    if let Some(known) = KNOWN_MAKES.iter().find(|m| make_key(m) == key) {
        return Some(known);
    }
    if key.len() < 4 {
        return None;
    }
    KNOWN_MAKES
        .iter()
        .map(|m| (m, jaro_winkler(&key, &make_key(m))))
        .filter(|(_, score)| *score >= FUZZY_MAKE_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(m, _)| *m)
}

pub fn is_known_make(raw: &str) -> bool {
    canonical_make(raw).is_some()
}

fn title_case(input: &str) -> String {
    input
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(|word| {
            if word.len() <= 4 && word.chars().all(|c| c.is_ascii_uppercase()) {
                return word.to_string();
            }
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn clean_model(raw: &str) -> String {
    let dashed = raw.replace(['–', '—'], "-");
    let collapsed = REPEATED_PUNCT.replace_all(&dashed, "$1");
    collapse_whitespace(&collapsed)
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ',' | '.' | ':' | '/' | ';'))
        .to_string()
}

/// Canonical make plus the model with any words that belong to a multi-word make removed.
pub fn normalize_make_model(raw_make: &str, raw_model: &str) -> (String, String) {
    let raw_make = collapse_whitespace(raw_make);
    let mut model = clean_model(raw_model);

    let make = match canonical_make(&raw_make) {
        Some(canonical) => canonical.to_string(),
        None => {
            let first_model_word = model.split(' ').next().unwrap_or_default().to_string();
            let joined = format!("{raw_make} {first_model_word}");
            match KNOWN_MAKES.iter().find(|m| make_key(m) == make_key(&joined)) {
                Some(known) if !first_model_word.is_empty() => {
                    model = model[first_model_word.len()..].trim().to_string();
                    return (known.to_string(), model);
                }
                _ => title_case(&raw_make),
            }
        }
    };

    // "Alfa" + "Romeo Spider" resolves to "Alfa Romeo" + "Spider".
    let make_words = make_key(&make);
    for word in make_words.split(' ').skip(1) {
        let first = model.split(' ').next().unwrap_or_default();
        if !first.eq_ignore_ascii_case(word) {
            break;
        }
        model = model[first.len()..].trim().to_string();
    }

    (make, model)
}

/// Parse a price string carrying currency symbols, separators, or a `k` suffix.
/// Returns `None` when nothing numeric survives.
pub fn parse_price(raw: &str) -> Option<i64> {
    let lowered = raw.trim().to_ascii_lowercase();
    let negative = lowered
        .find(|c: char| c.is_ascii_digit())
        .map(|idx| lowered[..idx].contains('-'))
        .unwrap_or(false);

    let mut cleaned = lowered
        .replace("usd", "")
        .replace(['$', '€', '£', ',', '_', ' ', '-'], "");
    let multiplier = if cleaned.ends_with('k') {
        cleaned.pop();
        1_000.0
    } else {
        1.0
    };
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    let value = (value * multiplier).round();
    if !value.is_finite() || value > i64::MAX as f64 {
        return None;
    }
    let value = value as i64;
    Some(if negative { -value } else { value })
}

pub fn resolve_state(token: &str) -> Option<(&'static str, Region)> {
    let token = token
        .trim()
        .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != ' ');
    if token.is_empty() {
        return None;
    }
    STATES
        .iter()
        .find(|(code, name, _)| {
            (token.len() == 2 && code.eq_ignore_ascii_case(token)) || name.eq_ignore_ascii_case(token)
        })
        .map(|(code, _, region)| (*code, *region))
}

/// Region for a state code or name; unknown or missing states fall back to the default region.
pub fn region_for_state(state: Option<&str>) -> Region {
    state
        .and_then(resolve_state)
        .map(|(_, region)| region)
        .unwrap_or_default()
}

fn find_state_name(text: &str) -> Option<(&'static str, Region)> {
    let lowered = text.to_ascii_lowercase();
    let bytes = lowered.as_bytes();
    let mut best: Option<(usize, usize, &'static str, Region)> = None;
    for (code, name, region) in STATES {
        let needle = name.to_ascii_lowercase();
        let mut from = 0;
        while let Some(pos) = lowered[from..].find(&needle) {
            let start = from + pos;
            let end = start + needle.len();
            let bounded_left = start == 0 || !bytes[start - 1].is_ascii_alphabetic();
            let bounded_right = end == bytes.len() || !bytes[end].is_ascii_alphabetic();
            if bounded_left && bounded_right {
                let better = match best {
                    None => true,
                    Some((b_start, b_len, _, _)) => start < b_start || (start == b_start && needle.len() > b_len),
                };
                if better {
                    best = Some((start, needle.len(), code, *region));
                }
                break;
            }
            from = start + 1;
        }
    }
    best.map(|(_, _, code, region)| (code, region))
}

/// Split a "City, State" string (or scan prose) into discrete location fields.
pub fn parse_location(raw: &str) -> Location {
    let text = collapse_whitespace(raw);
    if text.is_empty() {
        return Location::default();
    }

    if text.len() <= SHORT_LOCATION_LEN {
        if let Some((city, rest)) = text.split_once(',') {
            let state_part = rest.trim().split(',').next().unwrap_or_default();
            let state_token = state_part
                .trim_end_matches(|c: char| c.is_ascii_digit() || c == ' ' || c == '-')
                .trim();
            let city = Some(city.trim().to_string()).filter(|c| !c.is_empty());
            return match resolve_state(state_token) {
                Some((code, region)) => Location {
                    city,
                    state: Some(code.to_string()),
                    region,
                },
                None => Location {
                    city,
                    state: Some(state_token.to_string()).filter(|s| !s.is_empty()),
                    region: Region::default(),
                },
            };
        }
        if let Some((code, region)) = resolve_state(&text) {
            return Location {
                city: None,
                state: Some(code.to_string()),
                region,
            };
        }
    }

    for caps in CITY_STATE.captures_iter(&text) {
        if let Some((code, region)) = resolve_state(&caps[2]) {
            return Location {
                city: Some(caps[1].trim().to_string()),
                state: Some(code.to_string()),
                region,
            };
        }
    }

    if let Some((code, region)) = find_state_name(&text) {
        return Location {
            city: None,
            state: Some(code.to_string()),
            region,
        };
    }

    if text.len() <= SHORT_LOCATION_LEN && !text.contains(['.', '$']) {
        return Location {
            city: Some(text),
            state: None,
            region: Region::default(),
        };
    }
    Location::default()
}

fn map_condition(raw: &str) -> Option<Condition> {
    match collapse_whitespace(raw).to_ascii_lowercase().as_str() {
        "concours" | "show quality" | "show" => Some(Condition::Concours),
        "excellent" | "restored" | "mint" => Some(Condition::Excellent),
        "good" | "driver" | "original" | "fair" => Some(Condition::Good),
        "project" | "needs restoration" | "parts car" => Some(Condition::Project),
        _ => None,
    }
}

/// Condition keywords in descending order of precedence.
pub fn detect_condition(text: &str) -> Condition {
    let lower = text.to_ascii_lowercase();
    if lower.contains("concours") || lower.contains("show quality") {
        Condition::Concours
    } else if lower.contains("restored") || lower.contains("excellent") {
        Condition::Excellent
    } else if lower.contains("good") || lower.contains("driver") {
        Condition::Good
    } else if lower.contains("project") || lower.contains("restoration") {
        Condition::Project
    } else {
        Condition::Good
    }
}

fn map_category(raw: &str) -> Option<Category> {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("muscle") {
        Some(Category::MuscleCar)
    } else if lower.contains("sport") {
        Some(Category::SportsCar)
    } else if lower.contains("luxury") {
        Some(Category::LuxuryCar)
    } else if ["truck", "utility", "suv", "pickup"].iter().any(|k| lower.contains(k)) {
        Some(Category::TruckUtility)
    } else if lower.contains("classic") {
        Some(Category::ClassicCar)
    } else {
        None
    }
}

fn mentions_any(haystack: &str, phrases: &[&str]) -> bool {
    phrases
        .iter()
        .any(|phrase| haystack.contains(&format!(" {phrase} ")))
}

pub fn derive_category(make: &str, model: &str) -> Category {
    let name = format!(" {} ", collapse_whitespace(&format!("{make} {model}")).to_ascii_lowercase());
    if mentions_any(&name, TRUCK_UTILITY) {
        Category::TruckUtility
    } else if mentions_any(&name, MUSCLE) {
        Category::MuscleCar
    } else if mentions_any(&name, SPORTS) {
        Category::SportsCar
    } else if mentions_any(&name, LUXURY) {
        Category::LuxuryCar
    } else {
        Category::ClassicCar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::{Provenance, SourceType};
    use chrono::TimeZone;

    fn normalizer() -> FieldNormalizer {
        FieldNormalizer::with_reference_time(Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).single().unwrap())
    }

    fn draft(make: &str, model: &str, year: i32, price: Option<PriceInput>) -> VehicleDraft {
        VehicleDraft {
            make: make.into(),
            model: model.into(),
            year,
            price,
            location: None,
            condition: None,
            category: None,
            description: None,
            stock_number: None,
            provenance: Provenance::new(SourceType::DirectListing, "Hemmings").unwrap(),
        }
    }

    #[test]
    fn make_aliases_and_typos_resolve() {
        assert_eq!(canonical_make("Chevy"), Some("Chevrolet"));
        assert_eq!(canonical_make("chevrolet"), Some("Chevrolet"));
        assert_eq!(canonical_make("Chevorlet"), Some("Chevrolet"));
        assert_eq!(canonical_make("mercedes benz"), Some("Mercedes-Benz"));
        assert_eq!(canonical_make("Beautiful"), None);
        assert_eq!(canonical_make("Fort"), None);
    }

    #[test]
    fn multi_word_makes_absorb_model_prefix() {
        assert_eq!(
            normalize_make_model("Alfa", "Romeo Spider Veloce"),
            ("Alfa Romeo".to_string(), "Spider Veloce".to_string())
        );
        assert_eq!(
            normalize_make_model("Land", "Rover Defender 110"),
            ("Land Rover".to_string(), "Defender 110".to_string())
        );
        assert_eq!(
            normalize_make_model("studebaker", "  Avanti   R2 "),
            ("Studebaker".to_string(), "Avanti R2".to_string())
        );
    }

    #[test]
    fn model_whitespace_and_punctuation_collapse() {
        assert_eq!(clean_model("Camaro   SS --"), "Camaro SS");
        assert_eq!(clean_model("Challenger R/T – "), "Challenger R/T");
        assert_eq!(clean_model("GT500--E"), "GT500-E");
    }

    #[test]
    fn price_strings_parse_or_yield_none() {
        assert_eq!(parse_price("$135,000"), Some(135_000));
        assert_eq!(parse_price("USD 89,900.49"), Some(89_900));
        assert_eq!(parse_price("125k"), Some(125_000));
        assert_eq!(parse_price("-$5"), Some(-5));
        assert_eq!(parse_price("Call for price"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn location_splits_city_and_state() {
        let loc = parse_location("Dallas, Texas");
        assert_eq!(loc.city.as_deref(), Some("Dallas"));
        assert_eq!(loc.state.as_deref(), Some("TX"));
        assert_eq!(loc.region, Region::South);

        let loc = parse_location("Portland, OR 97201");
        assert_eq!(loc.state.as_deref(), Some("OR"));
        assert_eq!(loc.region, Region::West);
    }

    #[test]
    fn location_found_in_prose() {
        let loc = parse_location("Numbers-matching car located in Scottsdale, AZ with fresh paint.");
        assert_eq!(loc.city.as_deref(), Some("Scottsdale"));
        assert_eq!(loc.region, Region::West);

        let loc = parse_location("A barn find from rural West Virginia, needs everything.");
        assert_eq!(loc.state.as_deref(), Some("WV"));
        assert_eq!(loc.region, Region::South);
    }

    #[test]
    fn unknown_state_maps_to_default_region() {
        let loc = parse_location("Toronto, Ontario");
        assert_eq!(loc.city.as_deref(), Some("Toronto"));
        assert_eq!(loc.state.as_deref(), Some("Ontario"));
        assert_eq!(loc.region, Region::Midwest);
        assert_eq!(region_for_state(None), Region::Midwest);
        assert_eq!(region_for_state(Some("ny")), Region::Northeast);
    }

    #[test]
    fn categories_follow_name_lists() {
        assert_eq!(derive_category("Chevrolet", "Camaro SS"), Category::MuscleCar);
        assert_eq!(derive_category("Porsche", "911 Carrera"), Category::SportsCar);
        assert_eq!(derive_category("Cadillac", "Eldorado"), Category::LuxuryCar);
        assert_eq!(derive_category("Ford", "Bronco"), Category::TruckUtility);
        assert_eq!(derive_category("Hudson", "Hornet"), Category::ClassicCar);
    }

    #[test]
    fn condition_keywords_have_precedence() {
        assert_eq!(detect_condition("Show quality paint, restored"), Condition::Concours);
        assert_eq!(detect_condition("Frame-off restored"), Condition::Excellent);
        assert_eq!(detect_condition("Runs, needs restoration"), Condition::Project);
        assert_eq!(detect_condition("no details"), Condition::Good);
    }

    #[test]
    fn normalize_produces_typed_vehicle() {
        let mut d = draft("chevy", "Chevelle SS 454", 1970, Some(PriceInput::Text("$89,000".into())));
        d.location = Some("Houston, TX".into());
        d.condition = Some("Restored".into());
        let v = normalizer().normalize(d).unwrap();
        assert_eq!(v.make, "Chevrolet");
        assert_eq!(v.price, Some(89_000));
        assert_eq!(v.condition, Condition::Excellent);
        assert_eq!(v.category, Category::MuscleCar);
        assert_eq!(v.location.region, Region::South);
    }

    #[test]
    fn unparsable_price_is_null_not_an_error() {
        let v = normalizer()
            .normalize(draft("Ford", "Thunderbird", 1955, Some(PriceInput::Text("POA".into()))))
            .unwrap();
        assert_eq!(v.price, None);
    }

    #[test]
    fn bounds_reject_bad_year_and_price() {
        assert!(matches!(
            normalizer().normalize(draft("Ford", "Model T", 1800, None)),
            Err(NormalizeError::YearOutOfRange { year: 1800, .. })
        ));
        assert!(matches!(
            normalizer().normalize(draft("Ford", "Falcon", 1963, Some(PriceInput::Amount(-5.0)))),
            Err(NormalizeError::NonPositivePrice { price: -5 })
        ));
        assert!(matches!(
            normalizer().normalize(draft("Ford", "Falcon", 2028, None)),
            Err(NormalizeError::YearOutOfRange { .. })
        ));
    }

    #[test]
    fn blank_provenance_is_rejected() {
        let mut d = draft("Ford", "Falcon", 1963, None);
        d.provenance.source_name = " ".into();
        assert_eq!(normalizer().normalize(d), Err(NormalizeError::MissingProvenance));
    }
}
