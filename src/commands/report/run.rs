use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::ReportArgs;
use crate::engine::{GatherOptions, assemble, gather, load_config};
use crate::model::VehicleKey;
use crate::provider::SqliteProvider;
use crate::util::{resolve_db_path, write_json_pretty};

use super::output::{write_json_report, write_text_report};

pub fn run(args: ReportArgs) -> Result<()> {
    let loaded = load_config(args.config.as_deref()).context("failed to load engine config")?;
    let table = &loaded.table;

    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_deref());
    let provider = SqliteProvider::open_read_only(&db_path)?;

    let vehicle = VehicleKey::new(
        &args.vehicle.make,
        &args.vehicle.model,
        args.vehicle.year,
        &args.vehicle.fuel,
    );
    info!(vehicle = %vehicle, db = %db_path.display(), "building report");

    let options = GatherOptions {
        include_sibling_years: !args.skip_sibling_years,
    };
    let input = gather(&provider, table, &vehicle, options)?;
    if input.vehicle_total_tests == 0 {
        warn!(vehicle = %vehicle, "no tests recorded for vehicle");
    }

    let report = assemble(&input, &loaded.config, table, &loaded.checksum);

    if let Some(path) = &args.output {
        write_json_pretty(path, &report)?;
        info!(path = %path.display(), "wrote report json");
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    if args.json {
        write_json_report(&mut output, &report)?;
    } else {
        write_text_report(&mut output, &report)?;
    }
    output.flush()?;

    info!(
        issues = report.issue_count(),
        major = report.major_issues.len(),
        known = report.known_issues.len(),
        elevated = report.elevated_issues.len(),
        unscoreable = report.unscoreable_count,
        "report completed"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rusqlite::Connection;

    use super::*;
    use crate::cli::VehicleArgs;
    use crate::commands::ingest::{ensure_schema, load_dataset};
    use crate::model::{AggregateDataset, DefectCountRow, Report, TestCountRow};
    use crate::util::DB_FILENAME;

    fn tests_row(make: &str, model: &str, total: u64) -> TestCountRow {
        TestCountRow {
            make: make.to_string(),
            model: model.to_string(),
            model_year: 2012,
            fuel_type: "PE".to_string(),
            total_tests: total,
            passed_tests: total / 2,
        }
    }

    fn defect(make: &str, model: &str, description: &str, occurrences: u64) -> DefectCountRow {
        DefectCountRow {
            make: make.to_string(),
            model: model.to_string(),
            model_year: 2012,
            fuel_type: "PE".to_string(),
            defect_description: description.to_string(),
            category: "Brakes".to_string(),
            occurrence_count: occurrences,
            mileage_sum: None,
        }
    }

    #[test]
    fn report_run_writes_json_from_store() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let mut connection =
            Connection::open(dir.path().join(DB_FILENAME)).expect("db should open");
        ensure_schema(&connection).expect("schema should apply");
        load_dataset(
            &mut connection,
            &AggregateDataset {
                cohort: "2023".to_string(),
                tests: vec![
                    tests_row("VAUXHALL", "CORSA", 1_000),
                    tests_row("FORD", "FIESTA", 19_000),
                ],
                defects: vec![
                    defect("VAUXHALL", "CORSA", "Brakes imbalanced across an axle", 40),
                    defect("FORD", "FIESTA", "Brakes imbalanced across an axle", 60),
                ],
            },
        )
        .expect("dataset should load");
        drop(connection);

        let output = dir.path().join("report.json");
        run(ReportArgs {
            cache_root: dir.path().to_path_buf(),
            db_path: None,
            config: None,
            vehicle: VehicleArgs {
                make: "vauxhall".to_string(),
                model: "corsa".to_string(),
                year: 2012,
                fuel: "pe".to_string(),
            },
            skip_sibling_years: false,
            json: true,
            output: Some(output.clone()),
        })
        .expect("report should run");

        let raw = fs::read(&output).expect("report json should exist");
        let report: Report = serde_json::from_slice(&raw).expect("report should parse");
        assert_eq!(report.vehicle_total_tests, 1_000);
        assert_eq!(report.major_issues.len(), 1);
        assert_eq!(report.major_issues[0].subject_key, "Brake imbalance");
        assert_eq!(report.category_summaries.len(), 1);
        assert!(report.category_summaries[0].is_elevated);
    }

    #[test]
    fn report_without_store_fails() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let error = run(ReportArgs {
            cache_root: dir.path().to_path_buf(),
            db_path: None,
            config: None,
            vehicle: VehicleArgs {
                make: "VAUXHALL".to_string(),
                model: "CORSA".to_string(),
                year: 2012,
                fuel: "PE".to_string(),
            },
            skip_sibling_years: true,
            json: false,
            output: None,
        })
        .expect_err("missing store should fail");
        assert!(error.to_string().contains("does not exist"), "{error}");
    }
}
