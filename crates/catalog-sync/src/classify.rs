//! Investment classifier: a rule-ordered scoring table, overridable from `rules/classifier.yaml`.

use std::path::Path;

use anyhow::{Context, Result};
use catalog_core::{Classification, InvestmentGrade, MarketTrend, NormalizedVehicle, SourceType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeTable {
    #[serde(rename = "A+")]
    pub a_plus: f64,
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "A-")]
    pub a_minus: f64,
    #[serde(rename = "B+")]
    pub b_plus: f64,
}

impl GradeTable {
    pub fn get(&self, grade: InvestmentGrade) -> f64 {
        match grade {
            InvestmentGrade::APlus => self.a_plus,
            InvestmentGrade::A => self.a,
            InvestmentGrade::AMinus => self.a_minus,
            InvestmentGrade::BPlus => self.b_plus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendMultipliers {
    pub rising: f64,
    pub stable: f64,
    pub declining: f64,
}

impl TrendMultipliers {
    pub fn get(&self, trend: MarketTrend) -> f64 {
        match trend {
            MarketTrend::Rising => self.rising,
            MarketTrend::Stable => self.stable,
            MarketTrend::Declining => self.declining,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
    /// Marques and variants matched anywhere in "make model" → A+.
    pub halo: Vec<String>,
    /// Recognised icons; graded A when built in or before `icon_year_cutoff`.
    pub icons: Vec<String>,
    pub icon_year_cutoff: i32,
    pub vintage_start: i32,
    pub vintage_end: i32,
    /// Percent per year before the trend multiplier.
    pub annual_rates: GradeTable,
    pub valuation_confidence: GradeTable,
    pub trend_multipliers: TrendMultipliers,
    pub rising_signals: Vec<String>,
    pub declining_signals: Vec<String>,
    /// Most authoritative first.
    pub source_priority: Vec<SourceType>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            halo: strings(&[
                "porsche",
                "ferrari",
                "lamborghini",
                "aston martin",
                "maserati",
                "shelby",
                "cobra",
                "gt40",
                "hemi cuda",
                "boss 429",
                "yenko",
                "300sl",
                "e-type",
            ]),
            icons: strings(&[
                "camaro",
                "mustang",
                "chevelle",
                "gto",
                "charger",
                "challenger",
                "corvette",
                "cuda",
                "barracuda",
                "road runner",
                "firebird",
                "442",
                "super bee",
                "bronco",
                "thunderbird",
            ]),
            icon_year_cutoff: 1970,
            vintage_start: 1950,
            vintage_end: 1972,
            annual_rates: GradeTable {
                a_plus: 45.0,
                a: 35.2,
                a_minus: 28.7,
                b_plus: 22.3,
            },
            valuation_confidence: GradeTable {
                a_plus: 0.92,
                a: 0.85,
                a_minus: 0.82,
                b_plus: 0.78,
            },
            trend_multipliers: TrendMultipliers {
                rising: 1.3,
                stable: 1.0,
                declining: 0.7,
            },
            rising_signals: strings(&["concours", "show quality"]),
            declining_signals: Vec::new(),
            source_priority: vec![
                SourceType::DirectListing,
                SourceType::ResearchDerived,
                SourceType::Migrated,
            ],
        }
    }
}

impl ClassifierRules {
    /// `rules/classifier.yaml` under `root`, or the built-in table when the file is absent.
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("classifier.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

fn mentions_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|n| haystack.contains(&format!(" {} ", n.to_ascii_lowercase())))
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: ClassifierRules,
}

impl Classifier {
    pub fn new(rules: ClassifierRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    /// First matching rule wins: halo, icon by year, vintage window, fallback.
    pub fn grade(&self, make: &str, model: &str, year: i32) -> InvestmentGrade {
        let name = format!(" {} {} ", make.to_ascii_lowercase(), model.to_ascii_lowercase());
        if mentions_any(&name, &self.rules.halo) {
            InvestmentGrade::APlus
        } else if mentions_any(&name, &self.rules.icons) && year <= self.rules.icon_year_cutoff {
            InvestmentGrade::A
        } else if (self.rules.vintage_start..=self.rules.vintage_end).contains(&year) {
            InvestmentGrade::AMinus
        } else {
            InvestmentGrade::BPlus
        }
    }

    pub fn trend(&self, grade: InvestmentGrade, text: &str) -> MarketTrend {
        let lower = text.to_ascii_lowercase();
        let signalled = |signals: &[String]| {
            signals
                .iter()
                .any(|s| !s.is_empty() && lower.contains(&s.to_ascii_lowercase()))
        };
        if signalled(&self.rules.rising_signals) {
            MarketTrend::Rising
        } else if signalled(&self.rules.declining_signals) {
            MarketTrend::Declining
        } else if grade.is_a_tier() {
            MarketTrend::Rising
        } else {
            MarketTrend::Stable
        }
    }

    /// Percent per year for a grade under a trend, rounded to two decimals.
    pub fn appreciation_rate(&self, grade: InvestmentGrade, trend: MarketTrend) -> f64 {
        let rate = self.rules.annual_rates.get(grade) * self.rules.trend_multipliers.get(trend);
        (rate * 100.0).round() / 100.0
    }

    pub fn classify(&self, vehicle: &NormalizedVehicle) -> Classification {
        let investment_grade = self.grade(&vehicle.make, &vehicle.model, vehicle.year);
        let signal_text = format!(
            "{} {} {}",
            vehicle.model,
            vehicle.condition.as_str(),
            vehicle.description
        );
        let market_trend = self.trend(investment_grade, &signal_text);
        Classification {
            investment_grade,
            appreciation_rate: self.appreciation_rate(investment_grade, market_trend),
            market_trend,
            valuation_confidence: self.rules.valuation_confidence.get(investment_grade),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::{Category, Condition, Location, Provenance};
    use tempfile::tempdir;

    fn vehicle(make: &str, model: &str, year: i32, description: &str) -> NormalizedVehicle {
        NormalizedVehicle {
            make: make.into(),
            model: model.into(),
            year,
            price: Some(100_000),
            category: Category::ClassicCar,
            condition: Condition::Good,
            location: Location::default(),
            provenance: Provenance::new(SourceType::DirectListing, "Bring a Trailer").unwrap(),
            description: description.into(),
            stock_number: None,
        }
    }

    #[test]
    fn porsche_911_is_a_plus_and_rising() {
        let c = Classifier::default().classify(&vehicle("Porsche", "911", 1973, ""));
        assert_eq!(c.investment_grade, InvestmentGrade::APlus);
        assert_eq!(c.market_trend, MarketTrend::Rising);
        assert!((c.appreciation_rate - 58.5).abs() < 1e-9);
        assert!((c.valuation_confidence - 0.92).abs() < 1e-9);
    }

    #[test]
    fn rules_apply_in_order() {
        let classifier = Classifier::default();
        assert_eq!(classifier.grade("Chevrolet", "Camaro SS", 1969), InvestmentGrade::A);
        assert_eq!(classifier.grade("Chevrolet", "Camaro SS", 1971), InvestmentGrade::AMinus);
        assert_eq!(classifier.grade("Chevrolet", "Bel Air", 1957), InvestmentGrade::AMinus);
        assert_eq!(classifier.grade("Chevrolet", "Camaro", 1985), InvestmentGrade::BPlus);
        assert_eq!(classifier.grade("Ford", "Mustang Boss 429", 1985), InvestmentGrade::APlus);
    }

    #[test]
    fn text_signal_overrides_grade_default_trend() {
        let classifier = Classifier::default();
        let plain = classifier.classify(&vehicle("Buick", "Riviera", 1985, "clean driver"));
        assert_eq!(plain.investment_grade, InvestmentGrade::BPlus);
        assert_eq!(plain.market_trend, MarketTrend::Stable);
        assert!((plain.appreciation_rate - 22.3).abs() < 1e-9);

        let shown = classifier.classify(&vehicle("Buick", "Riviera", 1985, "Show quality paint"));
        assert_eq!(shown.market_trend, MarketTrend::Rising);
        assert!((shown.appreciation_rate - 28.99).abs() < 1e-9);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = Classifier::default();
        let v = vehicle("Plymouth", "Road Runner", 1969, "concours restoration");
        assert_eq!(classifier.classify(&v), classifier.classify(&v));
    }

    #[test]
    fn yaml_overrides_merge_with_defaults() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("rules")).unwrap();
        std::fs::write(
            dir.path().join("rules/classifier.yaml"),
            "halo: [\"tucker\"]\ndeclining_signals: [\"salvage title\"]\nsource_priority: [migrated, direct_listing, research_derived]\n",
        )
        .unwrap();

        let rules = ClassifierRules::from_workspace_root(dir.path()).unwrap();
        assert_eq!(rules.halo, vec!["tucker".to_string()]);
        assert_eq!(rules.icon_year_cutoff, 1970);
        assert_eq!(rules.source_priority[0], SourceType::Migrated);

        let classifier = Classifier::new(rules);
        assert_eq!(classifier.grade("Tucker", "48", 1948), InvestmentGrade::APlus);
        assert_eq!(classifier.grade("Porsche", "911", 1985), InvestmentGrade::BPlus);
        assert_eq!(
            classifier.trend(InvestmentGrade::BPlus, "sold on a salvage title"),
            MarketTrend::Declining
        );
    }

    #[test]
    fn missing_rules_file_uses_defaults() {
        let dir = tempdir().unwrap();
        assert_eq!(
            ClassifierRules::from_workspace_root(dir.path()).unwrap(),
            ClassifierRules::default()
        );
    }
}
