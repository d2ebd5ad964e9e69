//! Aggregate Data Provider: the only I/O boundary the engine depends on.

mod sqlite;

use anyhow::Result;

use crate::model::{
    CategoryObservation, DefectObservation, Scope, SiblingYearObservation, VehicleKey, YearStat,
};

pub use sqlite::SqliteProvider;

/// A defect wording known to the store, with the category it was recorded under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct KnownDescription {
    pub defect_description: String,
    pub category: String,
}

/// Source of pre-aggregated counts. Scopes with no matching tests yield empty results
/// (or a zero total), never an error; errors mean the source itself failed.
pub trait AggregateProvider {
    /// Total tests recorded for `scope` relative to `vehicle`.
    fn total_tests(&self, scope: Scope, vehicle: &VehicleKey) -> Result<u64>;

    /// Vehicle-scope observations, one per description and cohort.
    fn vehicle_defects(&self, vehicle: &VehicleKey) -> Result<Vec<DefectObservation>>;

    /// Counts for one description within `scope`, one observation per cohort that has tests.
    fn aggregate(
        &self,
        description: &str,
        scope: Scope,
        vehicle: &VehicleKey,
    ) -> Result<Vec<DefectObservation>>;

    fn category_aggregate(
        &self,
        category: &str,
        scope: Scope,
        vehicle: &VehicleKey,
    ) -> Result<Vec<CategoryObservation>>;

    fn known_descriptions(&self) -> Result<Vec<KnownDescription>>;

    /// Same make/model/fuel, every model year except the vehicle's own.
    fn sibling_year_defects(&self, vehicle: &VehicleKey) -> Result<Vec<SiblingYearObservation>>;

    fn model_year_stats(&self, make: &str, model: &str, fuel_type: &str) -> Result<Vec<YearStat>>;
}
