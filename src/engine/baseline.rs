//! Rate pooling and composite baselines.
//!
//! Variants of a group are pooled before any rate is taken: occurrences are summed, and
//! each distinct cohort contributes its test total once. A group's rate is therefore
//! `Σ occurrences / Σ tests`, never a mean of per-variant rates.

use std::collections::BTreeMap;

use tracing::debug;

use crate::engine::config::ScopeWeights;
use crate::model::{
    Baselines, CategoryObservation, DefectObservation, Scope, SiblingYearObservation,
};

/// Anything carrying an occurrence count over a cohort's test total.
pub trait Counted {
    fn occurrence_count(&self) -> u64;
    fn total_tests(&self) -> u64;
    fn cohort(&self) -> &str;

    fn mileage_sum(&self) -> Option<f64> {
        None
    }

    fn mileage_occurrences(&self) -> u64 {
        if self.mileage_sum().is_some() {
            self.occurrence_count()
        } else {
            0
        }
    }
}

impl Counted for DefectObservation {
    fn occurrence_count(&self) -> u64 {
        self.occurrence_count
    }

    fn total_tests(&self) -> u64 {
        self.total_tests
    }

    fn cohort(&self) -> &str {
        &self.cohort
    }

    fn mileage_sum(&self) -> Option<f64> {
        self.mileage_sum
    }

    fn mileage_occurrences(&self) -> u64 {
        match (self.mileage_sum, self.mileage_occurrences) {
            (None, _) => 0,
            (Some(_), Some(covered)) => covered,
            (Some(_), None) => self.occurrence_count,
        }
    }
}

impl Counted for CategoryObservation {
    fn occurrence_count(&self) -> u64 {
        self.occurrence_count
    }

    fn total_tests(&self) -> u64 {
        self.total_tests
    }

    fn cohort(&self) -> &str {
        &self.cohort
    }
}

impl Counted for SiblingYearObservation {
    fn occurrence_count(&self) -> u64 {
        self.occurrence_count
    }

    fn total_tests(&self) -> u64 {
        self.total_tests
    }

    fn cohort(&self) -> &str {
        &self.cohort
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PooledCount {
    pub occurrences: u64,
    pub total_tests: u64,
    pub mileage_sum: Option<f64>,
    /// Occurrences whose observations carried a mileage sum.
    pub occurrences_with_mileage: u64,
}

impl PooledCount {
    /// Percentage of tests; `None` when there were no tests to divide by.
    pub fn rate(&self) -> Option<f64> {
        (self.total_tests > 0)
            .then(|| 100.0 * self.occurrences as f64 / self.total_tests as f64)
    }

    /// Mean mileage over the occurrences that reported one.
    pub fn mean_mileage(&self) -> Option<f64> {
        match (self.mileage_sum, self.occurrences_with_mileage) {
            (Some(sum), occurrences) if occurrences > 0 => Some(sum / occurrences as f64),
            _ => None,
        }
    }
}

pub fn pool<'a, T, I>(observations: I) -> PooledCount
where
    T: Counted + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut occurrences = 0_u64;
    let mut mileage_sum = None::<f64>;
    let mut occurrences_with_mileage = 0_u64;
    let mut cohort_totals = BTreeMap::<&str, u64>::new();

    for observation in observations {
        occurrences += observation.occurrence_count();
        if let Some(mileage) = observation.mileage_sum() {
            *mileage_sum.get_or_insert(0.0) += mileage;
            occurrences_with_mileage += observation.mileage_occurrences();
        }

        let total = cohort_totals.entry(observation.cohort()).or_insert(0);
        if *total != 0 && *total != observation.total_tests() {
            debug!(
                cohort = observation.cohort(),
                seen = *total,
                observed = observation.total_tests(),
                "cohort reported with differing test totals; keeping the larger"
            );
        }
        *total = (*total).max(observation.total_tests());
    }

    PooledCount {
        occurrences,
        total_tests: cohort_totals.values().sum(),
        mileage_sum,
        occurrences_with_mileage,
    }
}

/// Pooled rate per peer scope. Scopes without tests are left absent, not zero.
pub fn compute_baselines<'a, I>(observations: I) -> Baselines
where
    I: IntoIterator<Item = &'a DefectObservation>,
{
    let mut by_scope = BTreeMap::<Scope, Vec<&DefectObservation>>::new();
    for observation in observations {
        if observation.scope != Scope::Vehicle {
            by_scope.entry(observation.scope).or_default().push(observation);
        }
    }

    let mut baselines = Baselines::default();
    for (scope, scoped) in by_scope {
        baselines.set(scope, pool(scoped).rate());
    }
    baselines
}

/// Weighted blend of the present scopes. Absent scopes' weight is redistributed
/// proportionally by normalizing over the weights that remain.
pub fn composite_baseline(baselines: &Baselines, weights: &ScopeWeights) -> Option<f64> {
    let mut weighted = 0.0_f64;
    let mut weight_total = 0.0_f64;

    for scope in Scope::PEERS {
        if let Some(rate) = baselines.get(scope) {
            let weight = weights.weight(scope);
            weighted += weight * rate;
            weight_total += weight;
        }
    }

    (weight_total > 0.0).then(|| weighted / weight_total)
}
