use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use tracing::debug;

use super::{AggregateProvider, KnownDescription};
use crate::model::{
    CategoryObservation, DefectObservation, Scope, SiblingYearObservation, VehicleKey, YearStat,
};

/// Aggregate provider backed by the `test_counts` / `defect_counts` tables written by
/// `ingest`.
pub struct SqliteProvider {
    connection: Connection,
}

impl SqliteProvider {
    pub fn open_read_only(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            bail!(
                "aggregate store {} does not exist; run `ingest` first",
                db_path.display()
            );
        }

        let connection = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    fn description_category(&self, description: &str) -> Result<String> {
        let category = self
            .connection
            .query_row(
                "SELECT category FROM defect_counts WHERE defect_description = ?1 ORDER BY category LIMIT 1",
                [description],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to look up category of {description:?}"))?;
        Ok(category.unwrap_or_default())
    }
}

/// SQL predicate selecting the rows of one scope, plus its bind values in order.
fn scope_filter(scope: Scope, vehicle: &VehicleKey, alias: Option<&str>) -> (String, Vec<Value>) {
    let column = |name: &str| match alias {
        Some(alias) => format!("{alias}.{name}"),
        None => name.to_string(),
    };

    match scope {
        Scope::National => ("1 = 1".to_string(), Vec::new()),
        Scope::SameModelYear => (
            format!("{} = ?", column("model_year")),
            vec![Value::Integer(i64::from(vehicle.model_year))],
        ),
        Scope::SameMake => (
            format!("{} = ?", column("make")),
            vec![Value::Text(vehicle.make.clone())],
        ),
        Scope::Vehicle => (
            format!(
                "{} = ? AND {} = ? AND {} = ? AND {} = ?",
                column("make"),
                column("model"),
                column("model_year"),
                column("fuel_type")
            ),
            vec![
                Value::Text(vehicle.make.clone()),
                Value::Text(vehicle.model.clone()),
                Value::Integer(i64::from(vehicle.model_year)),
                Value::Text(vehicle.fuel_type.clone()),
            ],
        ),
    }
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl AggregateProvider for SqliteProvider {
    fn total_tests(&self, scope: Scope, vehicle: &VehicleKey) -> Result<u64> {
        let (filter, values) = scope_filter(scope, vehicle, None);
        let sql = format!("SELECT COALESCE(SUM(total_tests), 0) FROM test_counts WHERE {filter}");
        let total = self
            .connection
            .query_row(&sql, params_from_iter(values.iter()), |row| {
                row.get::<_, i64>(0)
            })
            .with_context(|| format!("failed to count {} tests", scope.as_str()))?;
        Ok(to_count(total))
    }

    /// One observation per wording the vehicle failed on and per cohort the vehicle was
    /// tested in. Cohorts without that wording report zero occurrences, so the pooled
    /// denominator is every vehicle test.
    fn vehicle_defects(&self, vehicle: &VehicleKey) -> Result<Vec<DefectObservation>> {
        let (filter, values) = scope_filter(Scope::Vehicle, vehicle, None);
        let bound = [values.as_slice(), values.as_slice(), values.as_slice()].concat();

        let sql = format!(
            "
            SELECT v.defect_description, v.category, t.cohort,
                   COALESCE(d.occurrences, 0), d.mileage_sum, t.total_tests,
                   d.mileage_occurrences
            FROM (
              SELECT defect_description, MIN(category) AS category
              FROM defect_counts WHERE {filter} GROUP BY defect_description
            ) AS v
            CROSS JOIN (
              SELECT cohort, SUM(total_tests) AS total_tests
              FROM test_counts WHERE {filter} GROUP BY cohort
            ) AS t
            LEFT JOIN (
              SELECT defect_description, cohort,
                     SUM(occurrence_count) AS occurrences, SUM(mileage_sum) AS mileage_sum,
                     SUM(CASE WHEN mileage_sum IS NOT NULL THEN occurrence_count END)
                       AS mileage_occurrences
              FROM defect_counts WHERE {filter}
              GROUP BY defect_description, cohort
            ) AS d ON d.defect_description = v.defect_description AND d.cohort = t.cohort
            ORDER BY v.defect_description, t.cohort
            "
        );

        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare vehicle defect query")?;
        let rows = statement
            .query_map(params_from_iter(bound.iter()), |row| {
                Ok(DefectObservation {
                    defect_description: row.get(0)?,
                    category: row.get(1)?,
                    cohort: row.get(2)?,
                    occurrence_count: to_count(row.get(3)?),
                    mileage_sum: row.get(4)?,
                    total_tests: to_count(row.get(5)?),
                    scope: Scope::Vehicle,
                    mileage_occurrences: row.get::<_, Option<i64>>(6)?.map(to_count),
                })
            })
            .context("failed to query vehicle defects")?;

        let observations = rows
            .collect::<rusqlite::Result<Vec<DefectObservation>>>()
            .context("failed to read vehicle defect rows")?;
        debug!(vehicle = %vehicle, rows = observations.len(), "loaded vehicle defects");
        Ok(observations)
    }

    fn aggregate(
        &self,
        description: &str,
        scope: Scope,
        vehicle: &VehicleKey,
    ) -> Result<Vec<DefectObservation>> {
        let (filter, values) = scope_filter(scope, vehicle, None);
        let mut bound = values.clone();
        bound.extend(values);
        bound.push(Value::Text(description.to_string()));

        let sql = format!(
            "
            SELECT t.cohort, t.total_tests, COALESCE(d.occurrences, 0), d.mileage_sum,
                   d.mileage_occurrences
            FROM (
              SELECT cohort, SUM(total_tests) AS total_tests
              FROM test_counts WHERE {filter} GROUP BY cohort
            ) AS t
            LEFT JOIN (
              SELECT cohort, SUM(occurrence_count) AS occurrences, SUM(mileage_sum) AS mileage_sum,
                     SUM(CASE WHEN mileage_sum IS NOT NULL THEN occurrence_count END)
                       AS mileage_occurrences
              FROM defect_counts WHERE {filter} AND defect_description = ?
              GROUP BY cohort
            ) AS d ON d.cohort = t.cohort
            ORDER BY t.cohort
            "
        );

        let category = self.description_category(description)?;
        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare aggregate query")?;
        let rows = statement
            .query_map(params_from_iter(bound.iter()), |row| {
                Ok(DefectObservation {
                    defect_description: description.to_string(),
                    category: category.clone(),
                    cohort: row.get(0)?,
                    total_tests: to_count(row.get(1)?),
                    occurrence_count: to_count(row.get(2)?),
                    mileage_sum: row.get(3)?,
                    mileage_occurrences: row.get::<_, Option<i64>>(4)?.map(to_count),
                    scope,
                })
            })
            .with_context(|| {
                format!(
                    "failed to query {} aggregate for {description:?}",
                    scope.as_str()
                )
            })?;

        rows.collect::<rusqlite::Result<Vec<DefectObservation>>>()
            .context("failed to read aggregate rows")
    }

    fn category_aggregate(
        &self,
        category: &str,
        scope: Scope,
        vehicle: &VehicleKey,
    ) -> Result<Vec<CategoryObservation>> {
        let (filter, values) = scope_filter(scope, vehicle, None);
        let mut bound = values.clone();
        bound.extend(values);
        bound.push(Value::Text(category.to_string()));

        let sql = format!(
            "
            SELECT t.cohort, t.total_tests, COALESCE(d.occurrences, 0)
            FROM (
              SELECT cohort, SUM(total_tests) AS total_tests
              FROM test_counts WHERE {filter} GROUP BY cohort
            ) AS t
            LEFT JOIN (
              SELECT cohort, SUM(occurrence_count) AS occurrences
              FROM defect_counts WHERE {filter} AND category = ?
              GROUP BY cohort
            ) AS d ON d.cohort = t.cohort
            ORDER BY t.cohort
            "
        );

        let mut statement = self
            .connection
            .prepare(&sql)
            .context("failed to prepare category aggregate query")?;
        let rows = statement
            .query_map(params_from_iter(bound.iter()), |row| {
                Ok(CategoryObservation {
                    category: category.to_string(),
                    scope,
                    cohort: row.get(0)?,
                    total_tests: to_count(row.get(1)?),
                    occurrence_count: to_count(row.get(2)?),
                })
            })
            .with_context(|| format!("failed to query category aggregate for {category:?}"))?;

        rows.collect::<rusqlite::Result<Vec<CategoryObservation>>>()
            .context("failed to read category aggregate rows")
    }

    fn known_descriptions(&self) -> Result<Vec<KnownDescription>> {
        let mut statement = self
            .connection
            .prepare(
                "
                SELECT defect_description, MIN(category)
                FROM defect_counts
                GROUP BY defect_description
                ORDER BY defect_description
                ",
            )
            .context("failed to prepare description listing")?;
        let rows = statement
            .query_map([], |row| {
                Ok(KnownDescription {
                    defect_description: row.get(0)?,
                    category: row.get(1)?,
                })
            })
            .context("failed to list defect descriptions")?;

        rows.collect::<rusqlite::Result<Vec<KnownDescription>>>()
            .context("failed to read defect descriptions")
    }

    fn sibling_year_defects(&self, vehicle: &VehicleKey) -> Result<Vec<SiblingYearObservation>> {
        let mut statement = self
            .connection
            .prepare(
                "
                SELECT v.model_year, v.defect_description, t.cohort,
                       COALESCE(d.occurrences, 0), t.total_tests
                FROM (
                  SELECT DISTINCT model_year, defect_description
                  FROM defect_counts
                  WHERE make = ?1 AND model = ?2 AND fuel_type = ?3 AND model_year <> ?4
                ) AS v
                JOIN (
                  SELECT model_year, cohort, SUM(total_tests) AS total_tests
                  FROM test_counts
                  WHERE make = ?1 AND model = ?2 AND fuel_type = ?3 AND model_year <> ?4
                  GROUP BY model_year, cohort
                ) AS t ON t.model_year = v.model_year
                LEFT JOIN (
                  SELECT model_year, defect_description, cohort,
                         SUM(occurrence_count) AS occurrences
                  FROM defect_counts
                  WHERE make = ?1 AND model = ?2 AND fuel_type = ?3 AND model_year <> ?4
                  GROUP BY model_year, defect_description, cohort
                ) AS d ON d.model_year = v.model_year
                      AND d.defect_description = v.defect_description
                      AND d.cohort = t.cohort
                ORDER BY v.model_year, v.defect_description, t.cohort
                ",
            )
            .context("failed to prepare sibling year query")?;
        let rows = statement
            .query_map(
                params![
                    vehicle.make,
                    vehicle.model,
                    vehicle.fuel_type,
                    vehicle.model_year
                ],
                |row| {
                    Ok(SiblingYearObservation {
                        model_year: row.get(0)?,
                        defect_description: row.get(1)?,
                        cohort: row.get(2)?,
                        occurrence_count: to_count(row.get(3)?),
                        total_tests: to_count(row.get(4)?),
                    })
                },
            )
            .context("failed to query sibling model years")?;

        rows.collect::<rusqlite::Result<Vec<SiblingYearObservation>>>()
            .context("failed to read sibling model year rows")
    }

    fn model_year_stats(&self, make: &str, model: &str, fuel_type: &str) -> Result<Vec<YearStat>> {
        let mut statement = self
            .connection
            .prepare(
                "
                SELECT model_year, SUM(total_tests), SUM(passed_tests)
                FROM test_counts
                WHERE make = ?1 AND model = ?2 AND fuel_type = ?3
                GROUP BY model_year
                HAVING SUM(total_tests) > 0
                ORDER BY model_year
                ",
            )
            .context("failed to prepare model year stats query")?;
        let rows = statement
            .query_map(params![make, model, fuel_type], |row| {
                let total_tests = to_count(row.get(1)?);
                let passed_tests = to_count(row.get(2)?);
                Ok(YearStat {
                    model_year: row.get(0)?,
                    pass_rate: 100.0 * passed_tests as f64 / total_tests as f64,
                    total_tests,
                })
            })
            .context("failed to query model year stats")?;

        rows.collect::<rusqlite::Result<Vec<YearStat>>>()
            .context("failed to read model year stats")
    }
}
