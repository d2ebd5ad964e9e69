//! Versioned engine configuration: the ordered component-group table plus every tunable
//! threshold. Loaded once and validated up front; a table that fails validation never
//! reaches request handling.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::engine::grouping::GroupTable;
use crate::model::{Scope, SeverityTier};
use crate::util::sha256_bytes;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read engine config {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse engine config {origin}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode built-in engine config")]
    Encode(#[source] serde_json::Error),
    #[error("unsupported config_version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("component group #{index} has an empty canonical name")]
    EmptyCanonicalName { index: usize },
    #[error("component group {0:?} is defined more than once")]
    DuplicateGroup(String),
    #[error("component group {0:?} has no patterns")]
    NoPatterns(String),
    #[error("component group {0:?} has an empty pattern")]
    EmptyPattern(String),
    #[error("component group {group:?} has an invalid regex {pattern:?}")]
    InvalidRegex {
        group: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error(
        "pattern {pattern:?} in group {first:?} overlaps pattern {other_pattern:?} in group {second:?}"
    )]
    AmbiguousPatterns {
        first: String,
        pattern: String,
        second: String,
        other_pattern: String,
    },
    #[error("example {example:?} of group {group:?} resolves to {matched:?}")]
    ExampleMismatch {
        group: String,
        example: String,
        matched: Option<String>,
    },
    #[error("example {example:?} matches both {first:?} and {second:?}")]
    AmbiguousExample {
        example: String,
        first: String,
        second: String,
    },
    #[error("invalid severity thresholds: {0}")]
    Thresholds(String),
    #[error("invalid scope weights: {0}")]
    Weights(String),
    #[error("category_margin must be finite and >= 1.0, got {0}")]
    CategoryMargin(f64),
    #[error("premature_onset_factor must be finite and in (0, 1], got {0}")]
    OnsetFactor(f64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSpec {
    /// Case-insensitive substring.
    Contains(String),
    /// Case-insensitive regular expression.
    Regex(String),
}

impl PatternSpec {
    pub fn source(&self) -> &str {
        match self {
            Self::Contains(value) | Self::Regex(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub canonical_name: String,
    pub category: String,
    pub patterns: Vec<PatternSpec>,
    /// Sample wordings that must resolve to this group and only this group.
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub elevated: f64,
    pub known: f64,
    pub major: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            elevated: 1.5,
            known: 2.0,
            major: 3.0,
        }
    }
}

impl SeverityThresholds {
    /// Lower bounds are inclusive: a ratio of exactly `known` is Known.
    pub fn classify(&self, ratio: f64) -> SeverityTier {
        if ratio >= self.major {
            SeverityTier::Major
        } else if ratio >= self.known {
            SeverityTier::Known
        } else if ratio >= self.elevated {
            SeverityTier::Elevated
        } else {
            SeverityTier::Normal
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let values = [self.elevated, self.known, self.major];
        if values.iter().any(|value| !value.is_finite() || *value <= 0.0) {
            return Err(ConfigError::Thresholds(format!(
                "all thresholds must be finite and positive (elevated={}, known={}, major={})",
                self.elevated, self.known, self.major
            )));
        }
        if !(self.elevated < self.known && self.known < self.major) {
            return Err(ConfigError::Thresholds(format!(
                "thresholds must be strictly increasing (elevated={}, known={}, major={})",
                self.elevated, self.known, self.major
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeWeights {
    pub national: f64,
    pub same_model_year: f64,
    pub same_make: f64,
}

impl Default for ScopeWeights {
    fn default() -> Self {
        Self {
            national: 0.50,
            same_model_year: 0.30,
            same_make: 0.20,
        }
    }
}

impl ScopeWeights {
    pub fn weight(&self, scope: Scope) -> f64 {
        match scope {
            Scope::National => self.national,
            Scope::SameModelYear => self.same_model_year,
            Scope::SameMake => self.same_make,
            Scope::Vehicle => 0.0,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for scope in Scope::PEERS {
            let weight = self.weight(scope);
            if !weight.is_finite() || weight <= 0.0 {
                return Err(ConfigError::Weights(format!(
                    "{} weight must be finite and positive, got {weight}",
                    scope.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// How vehicle wording-variants are scored against a grouped baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateMode {
    /// Variants are pooled into one subject before any rate is computed.
    #[default]
    GroupBeforeRate,
    /// Each vehicle variant is scored on its own against the pooled group baseline.
    PerVariant,
}

impl RateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GroupBeforeRate => "group_before_rate",
            Self::PerVariant => "per_variant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub config_version: u32,
    pub groups: Vec<GroupSpec>,
    pub thresholds: SeverityThresholds,
    pub weights: ScopeWeights,
    pub category_margin: f64,
    pub rate_mode: RateMode,
    pub min_year_tests: u64,
    pub premature_onset_factor: f64,
    /// Issues backed by fewer vehicle occurrences are flagged `low_confidence`.
    pub sample_floor: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            groups: default_groups(),
            thresholds: SeverityThresholds::default(),
            weights: ScopeWeights::default(),
            category_margin: 1.15,
            rate_mode: RateMode::default(),
            min_year_tests: 100,
            premature_onset_factor: 0.8,
            sample_floor: None,
        }
    }
}

impl EngineConfig {
    pub fn validate_settings(&self) -> Result<(), ConfigError> {
        if self.config_version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: self.config_version,
                supported: CONFIG_VERSION,
            });
        }
        self.thresholds.validate()?;
        self.weights.validate()?;
        if !self.category_margin.is_finite() || self.category_margin < 1.0 {
            return Err(ConfigError::CategoryMargin(self.category_margin));
        }
        if !self.premature_onset_factor.is_finite()
            || self.premature_onset_factor <= 0.0
            || self.premature_onset_factor > 1.0
        {
            return Err(ConfigError::OnsetFactor(self.premature_onset_factor));
        }
        Ok(())
    }
}

/// A validated configuration together with its compiled group table.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: EngineConfig,
    pub table: Arc<GroupTable>,
    pub checksum: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let Some(path) = path else {
        let config = EngineConfig::default();
        let raw = serde_json::to_vec(&config).map_err(ConfigError::Encode)?;
        let loaded = finish_load(config, &raw)?;
        info!(
            groups = loaded.table.len(),
            checksum = %loaded.checksum,
            "using built-in engine config"
        );
        return Ok(loaded);
    };

    let raw = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let loaded = parse_config(&raw, &path.display().to_string())?;
    info!(
        path = %path.display(),
        groups = loaded.table.len(),
        checksum = %loaded.checksum,
        "loaded engine config"
    );
    Ok(loaded)
}

pub fn parse_config(raw: &[u8], origin: &str) -> Result<LoadedConfig, ConfigError> {
    let config: EngineConfig =
        serde_json::from_slice(raw).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
    finish_load(config, raw)
}

fn finish_load(config: EngineConfig, raw: &[u8]) -> Result<LoadedConfig, ConfigError> {
    config.validate_settings()?;
    let table = GroupTable::compile(&config.groups)?;
    Ok(LoadedConfig {
        config,
        table: Arc::new(table),
        checksum: sha256_bytes(raw),
    })
}

fn group(
    canonical_name: &str,
    category: &str,
    patterns: Vec<PatternSpec>,
    examples: &[&str],
) -> GroupSpec {
    GroupSpec {
        canonical_name: canonical_name.to_string(),
        category: category.to_string(),
        patterns,
        examples: examples.iter().map(|value| value.to_string()).collect(),
    }
}

fn contains(value: &str) -> PatternSpec {
    PatternSpec::Contains(value.to_string())
}

fn regex(value: &str) -> PatternSpec {
    PatternSpec::Regex(value.to_string())
}

pub fn default_groups() -> Vec<GroupSpec> {
    const BRAKES: &str = "Brakes";
    const TYRES: &str = "Tyres";
    const LAMPS: &str = "Lamps, Reflectors and Electrical Equipment";
    const SUSPENSION: &str = "Suspension";

    vec![
        group(
            "Brake imbalance",
            BRAKES,
            vec![
                contains("brakes imbalanced"),
                contains("less than 50% of the maximum effort"),
                regex(r"brak(e|ing) effort not recording"),
            ],
            &[
                "Brakes imbalanced across an axle",
                "Brake performance: less than 50% of the maximum effort recorded from one wheel on an axle",
                "Braking effort not recording at a wheel",
            ],
        ),
        group(
            "Brake pipe corrosion",
            BRAKES,
            vec![regex(r"brake pipe.*corroded")],
            &["Brake pipe excessively corroded"],
        ),
        group(
            "Brake disc wear",
            BRAKES,
            vec![regex(r"brake discs?.*(worn|scored|pitted)")],
            &["Brake disc worn, pitted or scored"],
        ),
        group(
            "Tyre tread depth",
            TYRES,
            vec![contains("tread depth below requirements")],
            &["Tyre tread depth below requirements of 1.6mm"],
        ),
        group(
            "Tyre damage",
            TYRES,
            vec![regex(r"tyre.*(damaged|cut|bulge)")],
            &["Tyre has a bulge caused by separation or partial failure of its structure"],
        ),
        group(
            "Headlamp aim",
            LAMPS,
            vec![contains("headlamp aim")],
            &["Headlamp aim too high"],
        ),
        group(
            "Lamp inoperative",
            LAMPS,
            vec![regex(r"(lamp|bulb).*(missing|inoperative)")],
            &["Position lamp missing or inoperative"],
        ),
        group(
            "Coil spring failure",
            SUSPENSION,
            vec![regex(r"coil spring.*(fractured|broken)")],
            &["Coil spring fractured or seriously weakened"],
        ),
        group(
            "Anti-roll bar linkage",
            SUSPENSION,
            vec![regex(r"anti-roll bar (linkage|ball joint)")],
            &["Anti-roll bar linkage ball joint has excessive wear"],
        ),
        group(
            "Exhaust emissions",
            "Noise, Emissions and Leaks",
            vec![regex(r"emissions?.*exceed")],
            &["Exhaust emissions exceed the manufacturer's specified limits"],
        ),
        group(
            "Wiper blade",
            "Visibility",
            vec![contains("wiper blade")],
            &["Wiper blade defective"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_config_validates() {
        let loaded = load_config(None).expect("built-in config should validate");
        assert_eq!(loaded.config.config_version, CONFIG_VERSION);
        assert_eq!(loaded.table.len(), default_groups().len());
        assert_eq!(loaded.checksum.len(), 64);
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let raw = br#"{
            "config_version": 1,
            "groups": [
                {
                    "canonical_name": "Brake imbalance",
                    "category": "Brakes",
                    "patterns": [{"contains": "imbalanced"}]
                }
            ],
            "thresholds": {"major": 4.0}
        }"#;

        let loaded = parse_config(raw, "inline").expect("partial config should load");
        assert_eq!(loaded.table.len(), 1);
        assert_eq!(loaded.config.thresholds.elevated, 1.5);
        assert_eq!(loaded.config.thresholds.major, 4.0);
        assert_eq!(loaded.config.weights, ScopeWeights::default());
        assert_eq!(loaded.config.rate_mode, RateMode::GroupBeforeRate);
        assert_eq!(loaded.config.min_year_tests, 100);
    }

    #[test]
    fn rate_mode_is_selectable() {
        let raw = br#"{"groups": [], "rate_mode": "per_variant"}"#;
        let loaded = parse_config(raw, "inline").expect("config should load");
        assert_eq!(loaded.config.rate_mode, RateMode::PerVariant);
        assert!(loaded.table.is_empty());
    }

    #[test]
    fn thresholds_must_increase() {
        let raw = br#"{"groups": [], "thresholds": {"elevated": 2.0, "known": 2.0, "major": 3.0}}"#;
        let error = parse_config(raw, "inline").expect_err("flat thresholds should be rejected");
        assert!(matches!(error, ConfigError::Thresholds(_)), "{error}");
    }

    #[test]
    fn zero_weight_is_rejected() {
        let raw = br#"{"groups": [], "weights": {"same_make": 0.0}}"#;
        let error = parse_config(raw, "inline").expect_err("zero weight should be rejected");
        assert!(matches!(error, ConfigError::Weights(_)), "{error}");
    }

    #[test]
    fn category_margin_below_one_is_rejected() {
        let raw = br#"{"groups": [], "category_margin": 0.9}"#;
        let error = parse_config(raw, "inline").expect_err("margin below one should be rejected");
        assert!(matches!(error, ConfigError::CategoryMargin(_)), "{error}");
    }

    #[test]
    fn unknown_version_is_rejected() {
        let raw = br#"{"config_version": 7, "groups": []}"#;
        let error = parse_config(raw, "inline").expect_err("version 7 should be rejected");
        assert!(
            matches!(error, ConfigError::UnsupportedVersion { found: 7, .. }),
            "{error}"
        );
    }

    #[test]
    fn malformed_json_reports_origin() {
        let error = parse_config(b"{not json", "groups.json").expect_err("should fail to parse");
        assert!(error.to_string().contains("groups.json"), "{error}");
    }

    #[test]
    fn config_file_checksum_tracks_contents() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("engine.json");
        let raw = br#"{"groups": [], "category_margin": 1.2}"#;
        fs::write(&path, raw).expect("config should be written");

        let loaded = load_config(Some(&path)).expect("config file should load");
        assert_eq!(loaded.checksum, sha256_bytes(raw));
        assert_eq!(loaded.config.category_margin, 1.2);
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let error = load_config(Some(&dir.path().join("absent.json")))
            .expect_err("missing file should fail");
        assert!(matches!(error, ConfigError::Read { .. }), "{error}");
    }
}
