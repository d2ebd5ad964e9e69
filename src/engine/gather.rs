//! Pulls everything one report needs out of an `AggregateProvider`.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::engine::grouping::{GroupTable, SubjectId};
use crate::engine::report::EngineInput;
use crate::model::{Scope, VehicleKey};
use crate::provider::AggregateProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatherOptions {
    pub include_sibling_years: bool,
}

impl Default for GatherOptions {
    fn default() -> Self {
        Self {
            include_sibling_years: true,
        }
    }
}

/// Peer baselines are pulled for every wording in a subject's group, including wordings
/// the vehicle itself never failed on, so a group's baseline is the same whichever
/// variants a given vehicle happens to show.
pub fn gather<P>(
    provider: &P,
    table: &GroupTable,
    vehicle: &VehicleKey,
    options: GatherOptions,
) -> Result<EngineInput>
where
    P: AggregateProvider + ?Sized,
{
    let vehicle_total_tests = provider
        .total_tests(Scope::Vehicle, vehicle)
        .with_context(|| format!("failed to count tests for {vehicle}"))?;
    let mut observations = provider
        .vehicle_defects(vehicle)
        .with_context(|| format!("failed to load defects for {vehicle}"))?;

    let subjects = observations
        .iter()
        .map(|observation| {
            table
                .group(&observation.defect_description, &observation.category)
                .subject()
        })
        .collect::<BTreeSet<SubjectId>>();
    let categories = observations
        .iter()
        .map(|observation| observation.category.clone())
        .collect::<BTreeSet<String>>();

    let variants = variant_sets(provider, table, &subjects)?;
    for (subject, descriptions) in &variants {
        debug!(
            subject = subject.name.as_str(),
            variants = descriptions.len(),
            "loading peer aggregates"
        );
        for description in descriptions {
            for scope in Scope::PEERS {
                let rows = provider
                    .aggregate(description, scope, vehicle)
                    .with_context(|| {
                        format!("failed to load {} counts for {description:?}", scope.as_str())
                    })?;
                observations.extend(rows);
            }
        }
    }

    let mut category_observations = Vec::new();
    for category in &categories {
        for scope in [Scope::Vehicle, Scope::National] {
            let rows = provider
                .category_aggregate(category, scope, vehicle)
                .with_context(|| format!("failed to load {category:?} category counts"))?;
            category_observations.extend(rows);
        }
    }

    let sibling_years = if options.include_sibling_years {
        Some(
            provider
                .sibling_year_defects(vehicle)
                .context("failed to load sibling model years")?,
        )
    } else {
        None
    };

    let year_stats = provider
        .model_year_stats(&vehicle.make, &vehicle.model, &vehicle.fuel_type)
        .context("failed to load model year stats")?;

    info!(
        vehicle = %vehicle,
        tests = vehicle_total_tests,
        subjects = subjects.len(),
        observations = observations.len(),
        "gathered aggregates"
    );

    Ok(EngineInput {
        vehicle: vehicle.clone(),
        vehicle_total_tests,
        observations,
        category_observations,
        sibling_years,
        year_stats,
    })
}

/// Every stored wording that groups into one of `subjects`.
fn variant_sets<P>(
    provider: &P,
    table: &GroupTable,
    subjects: &BTreeSet<SubjectId>,
) -> Result<BTreeMap<SubjectId, BTreeSet<String>>>
where
    P: AggregateProvider + ?Sized,
{
    let mut variants = subjects
        .iter()
        .map(|subject| (subject.clone(), BTreeSet::new()))
        .collect::<BTreeMap<SubjectId, BTreeSet<String>>>();

    let known = provider
        .known_descriptions()
        .context("failed to list stored defect descriptions")?;
    for entry in known {
        let subject = table.group(&entry.defect_description, &entry.category).subject();
        if let Some(descriptions) = variants.get_mut(&subject) {
            descriptions.insert(entry.defect_description);
        }
    }

    Ok(variants)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::engine::config::default_groups;
    use crate::model::{
        CategoryObservation, DefectObservation, SiblingYearObservation, YearStat,
    };
    use crate::provider::KnownDescription;

    const IMBALANCED: &str = "Brakes imbalanced across an axle";
    const NOT_RECORDING: &str = "Braking effort not recording at a wheel";
    const HORN: &str = "Horn inoperative";

    #[derive(Default)]
    struct FakeProvider {
        aggregate_calls: RefCell<Vec<(String, Scope)>>,
        sibling_calls: RefCell<usize>,
    }

    fn observation(description: &str, category: &str, scope: Scope, count: u64) -> DefectObservation {
        DefectObservation {
            defect_description: description.to_string(),
            category: category.to_string(),
            occurrence_count: count,
            total_tests: 1_000,
            scope,
            cohort: "2023".to_string(),
            mileage_sum: None,
            mileage_occurrences: None,
        }
    }

    impl AggregateProvider for FakeProvider {
        fn total_tests(&self, _scope: Scope, _vehicle: &VehicleKey) -> Result<u64> {
            Ok(1_000)
        }

        fn vehicle_defects(&self, _vehicle: &VehicleKey) -> Result<Vec<DefectObservation>> {
            Ok(vec![
                observation(IMBALANCED, "Brakes", Scope::Vehicle, 30),
                observation(HORN, "Horn", Scope::Vehicle, 4),
            ])
        }

        fn aggregate(
            &self,
            description: &str,
            scope: Scope,
            _vehicle: &VehicleKey,
        ) -> Result<Vec<DefectObservation>> {
            self.aggregate_calls
                .borrow_mut()
                .push((description.to_string(), scope));
            Ok(vec![observation(description, "Brakes", scope, 10)])
        }

        fn category_aggregate(
            &self,
            category: &str,
            scope: Scope,
            _vehicle: &VehicleKey,
        ) -> Result<Vec<CategoryObservation>> {
            Ok(vec![CategoryObservation {
                category: category.to_string(),
                scope,
                occurrence_count: 5,
                total_tests: 1_000,
                cohort: "2023".to_string(),
            }])
        }

        fn known_descriptions(&self) -> Result<Vec<KnownDescription>> {
            Ok([IMBALANCED, NOT_RECORDING, HORN, "Wiper blade defective"]
                .into_iter()
                .map(|description| KnownDescription {
                    defect_description: description.to_string(),
                    category: "Brakes".to_string(),
                })
                .collect())
        }

        fn sibling_year_defects(
            &self,
            _vehicle: &VehicleKey,
        ) -> Result<Vec<SiblingYearObservation>> {
            *self.sibling_calls.borrow_mut() += 1;
            Ok(Vec::new())
        }

        fn model_year_stats(
            &self,
            _make: &str,
            _model: &str,
            _fuel_type: &str,
        ) -> Result<Vec<YearStat>> {
            Ok(vec![YearStat {
                model_year: 2012,
                pass_rate: 70.0,
                total_tests: 1_000,
            }])
        }
    }

    fn table() -> GroupTable {
        GroupTable::compile(&default_groups()).expect("defaults should compile")
    }

    fn corsa() -> VehicleKey {
        VehicleKey::new("VAUXHALL", "CORSA", 2012, "PE")
    }

    #[test]
    fn peer_aggregates_cover_the_whole_variant_set() {
        let provider = FakeProvider::default();
        let input = gather(&provider, &table(), &corsa(), GatherOptions::default())
            .expect("gather should succeed");

        let calls = provider.aggregate_calls.borrow();
        let described = calls
            .iter()
            .map(|(description, _)| description.as_str())
            .collect::<BTreeSet<&str>>();
        assert_eq!(described, BTreeSet::from([IMBALANCED, NOT_RECORDING, HORN]));
        assert_eq!(calls.len(), 9);

        assert_eq!(input.vehicle_total_tests, 1_000);
        assert_eq!(input.observations.len(), 2 + 9);
        assert_eq!(input.category_observations.len(), 4);
        assert_eq!(input.year_stats.len(), 1);
        assert_eq!(input.sibling_years, Some(Vec::new()));
    }

    #[test]
    fn sibling_years_are_skipped_on_request() {
        let provider = FakeProvider::default();
        let options = GatherOptions {
            include_sibling_years: false,
        };
        let input = gather(&provider, &table(), &corsa(), options).expect("gather should succeed");

        assert_eq!(input.sibling_years, None);
        assert_eq!(*provider.sibling_calls.borrow(), 0);
    }
}
