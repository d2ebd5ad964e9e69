use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleKey {
    pub make: String,
    pub model: String,
    pub model_year: u32,
    pub fuel_type: String,
}

impl VehicleKey {
    pub fn new(make: &str, model: &str, model_year: u32, fuel_type: &str) -> Self {
        Self {
            make: normalize_key_part(make),
            model: normalize_key_part(model),
            model_year,
            fuel_type: normalize_key_part(fuel_type),
        }
    }
}

impl fmt::Display for VehicleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.make, self.model, self.model_year, self.fuel_type
        )
    }
}

/// Upper-cases and collapses whitespace so keys match the store's spelling.
pub fn normalize_key_part(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    National,
    SameModelYear,
    SameMake,
    Vehicle,
}

impl Scope {
    /// Peer scopes that feed the composite baseline, in weight order.
    pub const PEERS: [Scope; 3] = [Scope::National, Scope::SameModelYear, Scope::SameMake];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::National => "national",
            Self::SameModelYear => "same_model_year",
            Self::SameMake => "same_make",
            Self::Vehicle => "vehicle",
        }
    }
}

/// Occurrence/total-test counts for one defect wording within one scope and cohort.
///
/// `cohort` names the test population `total_tests` was counted over. Observations that
/// share a cohort share a denominator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectObservation {
    pub defect_description: String,
    pub category: String,
    pub occurrence_count: u64,
    pub total_tests: u64,
    pub scope: Scope,
    pub cohort: String,
    pub mileage_sum: Option<f64>,
    /// Occurrences covered by `mileage_sum`. `None` means all of them.
    #[serde(default)]
    pub mileage_occurrences: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryObservation {
    pub category: String,
    pub scope: Scope,
    pub occurrence_count: u64,
    pub total_tests: u64,
    pub cohort: String,
}

/// Defect counts for the same make/model/fuel in another model year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiblingYearObservation {
    pub model_year: u32,
    pub defect_description: String,
    pub occurrence_count: u64,
    pub total_tests: u64,
    pub cohort: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearStat {
    pub model_year: u32,
    pub pass_rate: f64,
    pub total_tests: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    Normal,
    Elevated,
    Known,
    Major,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Baselines {
    pub national: Option<f64>,
    pub same_model_year: Option<f64>,
    pub same_make: Option<f64>,
}

impl Baselines {
    pub fn get(&self, scope: Scope) -> Option<f64> {
        match scope {
            Scope::National => self.national,
            Scope::SameModelYear => self.same_model_year,
            Scope::SameMake => self.same_make,
            Scope::Vehicle => None,
        }
    }

    pub fn set(&mut self, scope: Scope, rate: Option<f64>) {
        match scope {
            Scope::National => self.national = rate,
            Scope::SameModelYear => self.same_model_year = rate,
            Scope::SameMake => self.same_make = rate,
            Scope::Vehicle => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        Scope::PEERS.iter().all(|scope| self.get(*scope).is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownIssue {
    pub subject_key: String,
    pub category: String,
    pub ratio: f64,
    pub severity_tier: SeverityTier,
    pub vehicle_rate: f64,
    pub composite_baseline: f64,
    pub baselines: Baselines,
    pub total_occurrences: u64,
    pub variant_count: usize,
    pub variant_descriptions: Vec<String>,
    pub typical_mileage_onset: Option<f64>,
    pub onset_is_premature: Option<bool>,
    pub affected_model_years: Option<BTreeSet<u32>>,
    pub low_confidence: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: String,
    pub vehicle_rate: f64,
    pub national_rate: f64,
    pub is_elevated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearRecommendation {
    pub model_year: u32,
    pub pass_rate: f64,
    pub total_tests: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct YearRecommendations {
    pub best: Vec<YearRecommendation>,
    pub worst: Vec<YearRecommendation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub vehicle: VehicleKey,
    pub vehicle_total_tests: u64,
    pub config_version: u32,
    pub config_checksum: String,
    pub rate_mode: String,
    pub major_issues: Vec<KnownIssue>,
    pub known_issues: Vec<KnownIssue>,
    pub elevated_issues: Vec<KnownIssue>,
    pub category_summaries: Vec<CategorySummary>,
    pub year_recommendations: YearRecommendations,
    pub unscoreable_count: usize,
}

impl Report {
    pub fn issue_count(&self) -> usize {
        self.major_issues.len() + self.known_issues.len() + self.elevated_issues.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCountRow {
    pub make: String,
    pub model: String,
    pub model_year: u32,
    pub fuel_type: String,
    pub total_tests: u64,
    pub passed_tests: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectCountRow {
    pub make: String,
    pub model: String,
    pub model_year: u32,
    pub fuel_type: String,
    pub defect_description: String,
    pub category: String,
    pub occurrence_count: u64,
    #[serde(default)]
    pub mileage_sum: Option<f64>,
}

/// One cohort of pre-aggregated counts as emitted by the upstream ETL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateDataset {
    pub cohort: String,
    #[serde(default)]
    pub tests: Vec<TestCountRow>,
    #[serde(default)]
    pub defects: Vec<DefectCountRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestCounts {
    pub test_rows_inserted: usize,
    pub defect_rows_inserted: usize,
    pub test_rows_replaced: usize,
    pub defect_rows_replaced: usize,
    pub test_rows_total: i64,
    pub defect_rows_total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub cohort: String,
    pub source_path: String,
    pub source_sha256: String,
    pub db_path: String,
    pub counts: IngestCounts,
    pub warnings: Vec<String>,
}
