use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::ValidateConfigArgs;
use crate::engine::grouping::{GroupConflict, GroupTable};
use crate::engine::load_config;
use crate::provider::{AggregateProvider, SqliteProvider};
use crate::util::resolve_db_path;

#[derive(Debug)]
struct StoreCheck {
    descriptions: usize,
    conflicts: Vec<GroupConflict>,
    /// Stored descriptions per group, including groups that match none.
    coverage: BTreeMap<String, usize>,
    ungrouped: usize,
}

pub fn run(args: ValidateConfigArgs) -> Result<()> {
    let loaded = load_config(args.config.as_deref()).context("engine config failed validation")?;
    info!(
        version = loaded.config.config_version,
        groups = loaded.table.len(),
        rate_mode = loaded.config.rate_mode.as_str(),
        checksum = %loaded.checksum,
        "engine config is valid"
    );
    for group in loaded.table.groups() {
        debug!(
            group = %group.canonical_name,
            category = %group.category,
            "group loaded"
        );
    }

    if args.skip_store {
        return Ok(());
    }

    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_deref());
    if !db_path.exists() {
        warn!(path = %db_path.display(), "aggregate store missing; skipped stored description checks");
        return Ok(());
    }

    let provider = SqliteProvider::open_read_only(&db_path)?;
    let check = check_store(&provider, &loaded.table)?;

    for (group, matched) in &check.coverage {
        if *matched == 0 {
            warn!(group = %group, "group matches no stored description");
        } else {
            info!(group = %group, descriptions = matched, "group coverage");
        }
    }
    info!(
        descriptions = check.descriptions,
        ungrouped = check.ungrouped,
        "stored description coverage"
    );

    if !check.conflicts.is_empty() {
        for conflict in &check.conflicts {
            warn!(
                description = %conflict.description,
                groups = %conflict.groups.join(" | "),
                "description matches more than one group"
            );
        }
        bail!(
            "{} stored description(s) match more than one group",
            check.conflicts.len()
        );
    }

    Ok(())
}

fn check_store<P>(provider: &P, table: &GroupTable) -> Result<StoreCheck>
where
    P: AggregateProvider + ?Sized,
{
    let known = provider
        .known_descriptions()
        .context("failed to list stored defect descriptions")?;
    let descriptions = known
        .iter()
        .map(|entry| entry.defect_description.as_str())
        .collect::<Vec<&str>>();

    let mut coverage = table
        .groups()
        .iter()
        .map(|group| (group.canonical_name.clone(), 0))
        .collect::<BTreeMap<String, usize>>();
    let mut ungrouped = 0;
    for (group, count) in table.coverage(descriptions.iter().copied()) {
        match group {
            Some(name) => {
                coverage.insert(name, count);
            }
            None => ungrouped = count,
        }
    }

    Ok(StoreCheck {
        descriptions: descriptions.len(),
        conflicts: table.find_conflicts(descriptions.iter().copied()),
        coverage,
        ungrouped,
    })
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;
    use crate::commands::ingest::{ensure_schema, load_dataset};
    use crate::engine::config::{GroupSpec, PatternSpec, default_groups};
    use crate::model::{AggregateDataset, DefectCountRow, TestCountRow};

    fn provider(descriptions: &[&str]) -> SqliteProvider {
        let mut connection = Connection::open_in_memory().expect("in-memory db should open");
        ensure_schema(&connection).expect("schema should apply");
        let dataset = AggregateDataset {
            cohort: "2023".to_string(),
            tests: vec![TestCountRow {
                make: "VAUXHALL".to_string(),
                model: "CORSA".to_string(),
                model_year: 2012,
                fuel_type: "PE".to_string(),
                total_tests: 1_000,
                passed_tests: 700,
            }],
            defects: descriptions
                .iter()
                .map(|description| DefectCountRow {
                    make: "VAUXHALL".to_string(),
                    model: "CORSA".to_string(),
                    model_year: 2012,
                    fuel_type: "PE".to_string(),
                    defect_description: description.to_string(),
                    category: "Brakes".to_string(),
                    occurrence_count: 1,
                    mileage_sum: None,
                })
                .collect(),
        };
        load_dataset(&mut connection, &dataset).expect("dataset should load");
        SqliteProvider::from_connection(connection)
    }

    fn regex_group(name: &str, pattern: &str) -> GroupSpec {
        GroupSpec {
            canonical_name: name.to_string(),
            category: "Brakes".to_string(),
            patterns: vec![PatternSpec::Regex(pattern.to_string())],
            examples: Vec::new(),
        }
    }

    #[test]
    fn default_groups_have_no_conflicts_in_store() {
        let table = GroupTable::compile(&default_groups()).expect("defaults should compile");
        let provider = provider(&[
            "Brakes imbalanced across an axle",
            "Braking effort not recording at a wheel",
            "Horn inoperative",
        ]);

        let check = check_store(&provider, &table).expect("check should run");
        assert_eq!(check.descriptions, 3);
        assert!(check.conflicts.is_empty());
        assert_eq!(check.coverage["Brake imbalance"], 2);
        assert_eq!(check.coverage["Wiper blade"], 0);
        assert_eq!(check.ungrouped, 1);
    }

    #[test]
    fn overlapping_regexes_surface_as_conflicts() {
        let table = GroupTable::compile(&[
            regex_group("Brake faults", r"brakes?\b"),
            regex_group("Imbalance", r"imbalanced"),
        ])
        .expect("regex overlap is only visible against real descriptions");
        let provider = provider(&["Brakes imbalanced across an axle", "Brake pipe corroded"]);

        let check = check_store(&provider, &table).expect("check should run");
        assert_eq!(check.conflicts.len(), 1);
        assert_eq!(check.conflicts[0].description, "Brakes imbalanced across an axle");
        assert_eq!(
            check.conflicts[0].groups,
            vec!["Brake faults".to_string(), "Imbalance".to_string()]
        );
    }
}
