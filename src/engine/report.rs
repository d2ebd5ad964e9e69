//! Turns gathered observations into a `Report`.
//!
//! Everything here is a pure function of `EngineInput` and the loaded configuration:
//! subjects are keyed in ordered maps and every list has a total sort order, so two calls
//! with the same input serialize to identical bytes.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::baseline::{compute_baselines, pool};
use crate::engine::config::{EngineConfig, RateMode};
use crate::engine::grouping::{GroupTable, SubjectId};
use crate::engine::scoring::{ScoreOutcome, UnscoreableReason, classify, score};
use crate::engine::years::recommend_years;
use crate::model::{
    Baselines, CategoryObservation, CategorySummary, DefectObservation, KnownIssue, Report,
    Scope, SeverityTier, SiblingYearObservation, VehicleKey, YearStat,
};

/// Everything one report needs, already fetched from the aggregate provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInput {
    pub vehicle: VehicleKey,
    pub vehicle_total_tests: u64,
    /// Vehicle-scope and peer-scope observations for every subject the vehicle exhibits.
    pub observations: Vec<DefectObservation>,
    pub category_observations: Vec<CategoryObservation>,
    /// `None` when sibling model years were not requested.
    pub sibling_years: Option<Vec<SiblingYearObservation>>,
    pub year_stats: Vec<YearStat>,
}

impl EngineInput {
    pub fn empty(vehicle: VehicleKey) -> Self {
        Self {
            vehicle,
            vehicle_total_tests: 0,
            observations: Vec::new(),
            category_observations: Vec::new(),
            sibling_years: None,
            year_stats: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct SubjectEvidence<'a> {
    category: String,
    vehicle: Vec<&'a DefectObservation>,
    peers: Vec<&'a DefectObservation>,
}

type SiblingIndex<'a> = BTreeMap<SubjectId, BTreeMap<u32, Vec<&'a SiblingYearObservation>>>;

#[derive(Debug, Default, PartialEq)]
pub struct IssueLists {
    pub major: Vec<KnownIssue>,
    pub known: Vec<KnownIssue>,
    pub elevated: Vec<KnownIssue>,
}

pub fn assemble(
    input: &EngineInput,
    config: &EngineConfig,
    table: &GroupTable,
    config_checksum: &str,
) -> Report {
    let subjects = collect_subjects(&input.observations, table);
    let siblings = input
        .sibling_years
        .as_ref()
        .map(|rows| index_siblings(rows, table));

    let mut issues = Vec::new();
    let mut unscoreable_count = 0_usize;

    for (subject, evidence) in &subjects {
        if evidence.vehicle.is_empty() {
            continue;
        }

        let baselines = compute_baselines(evidence.peers.iter().copied());
        let national_onset = pool(
            evidence
                .peers
                .iter()
                .copied()
                .filter(|observation| observation.scope == Scope::National),
        )
        .mean_mileage();
        let sibling_years = siblings.as_ref().map(|index| index.get(subject));

        let scored_units = match config.rate_mode {
            RateMode::GroupBeforeRate => vec![(subject.name.clone(), evidence.vehicle.clone())],
            RateMode::PerVariant => split_by_description(&evidence.vehicle),
        };

        for (key, vehicle_observations) in scored_units {
            let subject = SubjectScore {
                key: &key,
                category: &evidence.category,
                vehicle: &vehicle_observations,
                baselines,
                national_onset,
                sibling_years,
            };
            match subject.build_issue(config) {
                Ok(issue) => issues.push(issue),
                Err(reason) => {
                    debug!(
                        subject = %key,
                        reason = reason.as_str(),
                        "subject excluded from scoring"
                    );
                    unscoreable_count += 1;
                }
            }
        }
    }

    let lists = partition_issues(issues);

    Report {
        vehicle: input.vehicle.clone(),
        vehicle_total_tests: input.vehicle_total_tests,
        config_version: config.config_version,
        config_checksum: config_checksum.to_string(),
        rate_mode: config.rate_mode.as_str().to_string(),
        major_issues: lists.major,
        known_issues: lists.known,
        elevated_issues: lists.elevated,
        category_summaries: summarize_categories(input, config.category_margin),
        year_recommendations: recommend_years(&input.year_stats, config.min_year_tests),
        unscoreable_count,
    }
}

fn collect_subjects<'a>(
    observations: &'a [DefectObservation],
    table: &GroupTable,
) -> BTreeMap<SubjectId, SubjectEvidence<'a>> {
    let mut subjects = BTreeMap::<SubjectId, SubjectEvidence<'a>>::new();

    for observation in observations {
        let assignment = table.group(&observation.defect_description, &observation.category);
        let evidence = subjects
            .entry(assignment.subject())
            .or_insert_with(|| SubjectEvidence {
                category: assignment.category,
                ..SubjectEvidence::default()
            });

        if observation.scope == Scope::Vehicle {
            evidence.vehicle.push(observation);
        } else {
            evidence.peers.push(observation);
        }
    }

    subjects
}

fn index_siblings<'a>(rows: &'a [SiblingYearObservation], table: &GroupTable) -> SiblingIndex<'a> {
    let mut index = SiblingIndex::new();
    for row in rows {
        let assignment = table.group(&row.defect_description, "");
        index
            .entry(assignment.subject())
            .or_default()
            .entry(row.model_year)
            .or_default()
            .push(row);
    }
    index
}

fn split_by_description<'a>(
    observations: &[&'a DefectObservation],
) -> Vec<(String, Vec<&'a DefectObservation>)> {
    let mut by_description = BTreeMap::<&str, Vec<&'a DefectObservation>>::new();
    for observation in observations {
        by_description
            .entry(observation.defect_description.as_str())
            .or_default()
            .push(observation);
    }

    by_description
        .into_iter()
        .map(|(description, observations)| (description.to_string(), observations))
        .collect()
}

struct SubjectScore<'s, 'a> {
    key: &'s str,
    category: &'s str,
    vehicle: &'s [&'a DefectObservation],
    baselines: Baselines,
    national_onset: Option<f64>,
    sibling_years: Option<Option<&'s BTreeMap<u32, Vec<&'a SiblingYearObservation>>>>,
}

impl SubjectScore<'_, '_> {
    fn build_issue(&self, config: &EngineConfig) -> Result<KnownIssue, UnscoreableReason> {
        let pooled = pool(self.vehicle.iter().copied());
        let vehicle_rate = pooled.rate().ok_or(UnscoreableReason::NoVehicleTests)?;

        let (ratio, composite) = match score(vehicle_rate, &self.baselines, &config.weights) {
            ScoreOutcome::Scored { ratio, composite } => (ratio, composite),
            ScoreOutcome::Unscoreable(reason) => return Err(reason),
        };

        let typical_mileage_onset = pooled.mean_mileage();
        let onset_is_premature = match (typical_mileage_onset, self.national_onset) {
            (Some(vehicle), Some(national)) => {
                Some(vehicle < national * config.premature_onset_factor)
            }
            _ => None,
        };

        let affected_model_years = self.sibling_years.map(|years| {
            years
                .into_iter()
                .flatten()
                .filter(|(_, observations)| {
                    pool(observations.iter().copied())
                        .rate()
                        .is_some_and(|rate| rate / composite >= config.thresholds.elevated)
                })
                .map(|(model_year, _)| *model_year)
                .collect::<BTreeSet<u32>>()
        });

        let variant_descriptions = ranked_variants(self.vehicle);

        Ok(KnownIssue {
            subject_key: self.key.to_string(),
            category: self.category.to_string(),
            ratio,
            severity_tier: classify(ratio, &config.thresholds),
            vehicle_rate,
            composite_baseline: composite,
            baselines: self.baselines,
            total_occurrences: pooled.occurrences,
            variant_count: variant_descriptions.len(),
            variant_descriptions,
            typical_mileage_onset,
            onset_is_premature,
            affected_model_years,
            low_confidence: config
                .sample_floor
                .map(|floor| pooled.occurrences < floor),
        })
    }
}

/// Distinct wordings, most frequent first.
fn ranked_variants(observations: &[&DefectObservation]) -> Vec<String> {
    let mut counts = BTreeMap::<&str, u64>::new();
    for observation in observations {
        *counts
            .entry(observation.defect_description.as_str())
            .or_insert(0) += observation.occurrence_count;
    }

    let mut ranked = counts.into_iter().collect::<Vec<(&str, u64)>>();
    ranked.sort_by(|left, right| right.1.cmp(&left.1).then(left.0.cmp(right.0)));
    ranked
        .into_iter()
        .map(|(description, _)| description.to_string())
        .collect()
}

/// Splits scored issues into tier lists; Normal-tier issues are dropped.
pub fn partition_issues(issues: Vec<KnownIssue>) -> IssueLists {
    let mut lists = IssueLists::default();
    for issue in issues {
        match issue.severity_tier {
            SeverityTier::Major => lists.major.push(issue),
            SeverityTier::Known => lists.known.push(issue),
            SeverityTier::Elevated => lists.elevated.push(issue),
            SeverityTier::Normal => {}
        }
    }

    for list in [&mut lists.major, &mut lists.known, &mut lists.elevated] {
        list.sort_by(issue_order);
    }
    lists
}

fn issue_order(left: &KnownIssue, right: &KnownIssue) -> Ordering {
    right
        .ratio
        .total_cmp(&left.ratio)
        .then(right.total_occurrences.cmp(&left.total_occurrences))
        .then_with(|| left.subject_key.cmp(&right.subject_key))
}

/// Compares each category the vehicle has defects in against the national category rate.
pub fn summarize_categories(input: &EngineInput, margin: f64) -> Vec<CategorySummary> {
    let categories = input
        .observations
        .iter()
        .filter(|observation| observation.scope == Scope::Vehicle)
        .map(|observation| observation.category.as_str())
        .collect::<BTreeSet<&str>>();

    categories
        .into_iter()
        .filter_map(|category| {
            let scoped_rate = |scope: Scope| {
                pool(
                    input
                        .category_observations
                        .iter()
                        .filter(|row| row.category == category && row.scope == scope),
                )
                .rate()
            };

            let (Some(vehicle_rate), Some(national_rate)) =
                (scoped_rate(Scope::Vehicle), scoped_rate(Scope::National))
            else {
                debug!(category, "category lacks vehicle or national totals");
                return None;
            };

            Some(CategorySummary {
                category: category.to_string(),
                vehicle_rate,
                national_rate,
                is_elevated: vehicle_rate > national_rate * margin,
            })
        })
        .collect()
}
