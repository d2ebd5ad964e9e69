use super::*;

pub(crate) fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub(crate) fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS test_counts (
              make TEXT NOT NULL,
              model TEXT NOT NULL,
              model_year INTEGER NOT NULL,
              fuel_type TEXT NOT NULL,
              cohort TEXT NOT NULL,
              total_tests INTEGER NOT NULL,
              passed_tests INTEGER NOT NULL,
              PRIMARY KEY (make, model, model_year, fuel_type, cohort)
            );

            CREATE TABLE IF NOT EXISTS defect_counts (
              make TEXT NOT NULL,
              model TEXT NOT NULL,
              model_year INTEGER NOT NULL,
              fuel_type TEXT NOT NULL,
              cohort TEXT NOT NULL,
              defect_description TEXT NOT NULL,
              category TEXT NOT NULL,
              occurrence_count INTEGER NOT NULL,
              mileage_sum REAL,
              PRIMARY KEY (make, model, model_year, fuel_type, cohort, defect_description)
            );

            CREATE INDEX IF NOT EXISTS idx_test_counts_year ON test_counts(model_year, cohort);
            CREATE INDEX IF NOT EXISTS idx_test_counts_make ON test_counts(make, cohort);
            CREATE INDEX IF NOT EXISTS idx_defect_counts_description ON defect_counts(defect_description, cohort);
            CREATE INDEX IF NOT EXISTS idx_defect_counts_category ON defect_counts(category, cohort);
            ",
        )
        .context("failed to initialize aggregate schema")?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

pub(super) fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed to count rows: {sql}"))?;
    Ok(count)
}
