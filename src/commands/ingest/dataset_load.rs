use super::*;

#[derive(Debug, Default)]
pub(crate) struct DatasetLoad {
    pub test_rows_inserted: usize,
    pub defect_rows_inserted: usize,
    pub test_rows_replaced: usize,
    pub defect_rows_replaced: usize,
    pub warnings: Vec<String>,
}

pub(super) fn read_dataset(path: &Path) -> Result<AggregateDataset> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn to_sql_count(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("{what} {value} does not fit the store"))
}

fn category_name(raw: &str) -> &str {
    match raw.trim() {
        "" => "Uncategorised",
        trimmed => trimmed,
    }
}

/// Replaces every stored row of the dataset's cohort in one transaction. Re-ingesting a
/// cohort therefore never double-counts it.
pub(crate) fn load_dataset(
    connection: &mut Connection,
    dataset: &AggregateDataset,
) -> Result<DatasetLoad> {
    let cohort = dataset.cohort.trim();
    if cohort.is_empty() {
        bail!("dataset cohort must not be empty");
    }

    for row in &dataset.tests {
        if row.passed_tests > row.total_tests {
            bail!(
                "{} {} {} {}: passed_tests {} exceeds total_tests {}",
                row.make,
                row.model,
                row.model_year,
                row.fuel_type,
                row.passed_tests,
                row.total_tests
            );
        }
    }

    let mut load = DatasetLoad::default();
    let tx = connection
        .transaction()
        .context("failed to start ingest transaction")?;

    load.test_rows_replaced = tx
        .execute("DELETE FROM test_counts WHERE cohort = ?1", [cohort])
        .context("failed to clear previous test counts")?;
    load.defect_rows_replaced = tx
        .execute("DELETE FROM defect_counts WHERE cohort = ?1", [cohort])
        .context("failed to clear previous defect counts")?;

    let mut tested = HashSet::<VehicleKey>::new();
    {
        let mut insert_tests = tx.prepare(
            "
            INSERT INTO test_counts
              (make, model, model_year, fuel_type, cohort, total_tests, passed_tests)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(make, model, model_year, fuel_type, cohort) DO UPDATE SET
              total_tests = total_tests + excluded.total_tests,
              passed_tests = passed_tests + excluded.passed_tests
            ",
        )?;

        for row in &dataset.tests {
            let key = VehicleKey::new(&row.make, &row.model, row.model_year, &row.fuel_type);
            if row.total_tests == 0 {
                load.warnings
                    .push(format!("{key}: skipped test row with zero total_tests"));
                continue;
            }

            insert_tests.execute(params![
                key.make,
                key.model,
                key.model_year,
                key.fuel_type,
                cohort,
                to_sql_count(row.total_tests, "total_tests")?,
                to_sql_count(row.passed_tests, "passed_tests")?,
            ])?;
            load.test_rows_inserted += 1;
            tested.insert(key);
        }
    }

    {
        let mut insert_defects = tx.prepare(
            "
            INSERT INTO defect_counts
              (make, model, model_year, fuel_type, cohort, defect_description, category,
               occurrence_count, mileage_sum)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(make, model, model_year, fuel_type, cohort, defect_description) DO UPDATE SET
              occurrence_count = occurrence_count + excluded.occurrence_count,
              mileage_sum = CASE
                WHEN mileage_sum IS NULL AND excluded.mileage_sum IS NULL THEN NULL
                ELSE COALESCE(mileage_sum, 0) + COALESCE(excluded.mileage_sum, 0)
              END
            ",
        )?;

        for row in &dataset.defects {
            let key = VehicleKey::new(&row.make, &row.model, row.model_year, &row.fuel_type);
            let description = row.defect_description.trim();
            if description.is_empty() {
                load.warnings
                    .push(format!("{key}: skipped defect row without a description"));
                continue;
            }
            if !tested.contains(&key) {
                load.warnings.push(format!(
                    "{key}: skipped {description:?} because the cohort has no test counts for this vehicle"
                ));
                continue;
            }

            insert_defects.execute(params![
                key.make,
                key.model,
                key.model_year,
                key.fuel_type,
                cohort,
                description,
                category_name(&row.category),
                to_sql_count(row.occurrence_count, "occurrence_count")?,
                row.mileage_sum,
            ])?;
            load.defect_rows_inserted += 1;
        }
    }

    tx.commit().context("failed to commit ingest transaction")?;
    Ok(load)
}
