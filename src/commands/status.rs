use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::IngestRunManifest;
use crate::util::resolve_db_path;

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args.cache_root.join("manifests");
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_deref());

    info!(cache_root = %args.cache_root.display(), "status requested");

    match latest_ingest_manifest(&manifest_dir)? {
        Some(path) => {
            let raw = fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let manifest: IngestRunManifest = serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;

            info!(
                run_id = %manifest.run_id,
                status = %manifest.status,
                cohort = %manifest.cohort,
                updated_at = %manifest.updated_at,
                source = %manifest.source_path,
                warnings = manifest.warnings.len(),
                "loaded latest ingest manifest"
            );
        }
        None => warn!(path = %manifest_dir.display(), "no ingest manifest found"),
    }

    if db_path.exists() {
        let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        let test_rows = query_count(&conn, "SELECT COUNT(*) FROM test_counts").unwrap_or(0);
        let defect_rows = query_count(&conn, "SELECT COUNT(*) FROM defect_counts").unwrap_or(0);
        let descriptions =
            query_count(&conn, "SELECT COUNT(DISTINCT defect_description) FROM defect_counts")
                .unwrap_or(0);
        let cohorts = list_cohorts(&conn).unwrap_or_default();
        let schema_version = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'db_schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .ok()
            .flatten()
            .unwrap_or_default();

        info!(
            path = %db_path.display(),
            schema_version = %schema_version,
            test_rows,
            defect_rows,
            descriptions,
            cohorts = %cohorts.join(","),
            "database status"
        );
    } else {
        warn!(path = %db_path.display(), "database file missing");
    }

    Ok(())
}

fn query_count(conn: &Connection, sql: &str) -> Result<i64> {
    let count = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}

fn list_cohorts(conn: &Connection) -> Result<Vec<String>> {
    let mut statement = conn.prepare("SELECT DISTINCT cohort FROM test_counts ORDER BY cohort")?;
    let cohorts = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(cohorts)
}

/// Ingest manifests carry a compact UTC timestamp in their name, so the lexically greatest
/// one is the newest.
fn latest_ingest_manifest(manifest_dir: &Path) -> Result<Option<PathBuf>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let mut latest = None::<PathBuf>;
    for entry in fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to list {}", manifest_dir.display()))?
    {
        let path = entry?.path();
        let is_ingest_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("ingest_run_") && name.ends_with(".json"));
        if is_ingest_manifest && latest.as_ref().is_none_or(|current| path > *current) {
            latest = Some(path);
        }
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_ingest_manifest_wins() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        for name in [
            "ingest_run_20240101T000000Z.json",
            "ingest_run_20250301T120000Z.json",
            "report.json",
            "zz_other.json",
        ] {
            fs::write(dir.path().join(name), b"{}").expect("fixture should be written");
        }

        let latest = latest_ingest_manifest(dir.path())
            .expect("listing should succeed")
            .expect("a manifest should be found");
        assert!(latest.ends_with("ingest_run_20250301T120000Z.json"));
    }

    #[test]
    fn missing_manifest_dir_is_not_an_error() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        assert_eq!(
            latest_ingest_manifest(&dir.path().join("manifests")).expect("listing"),
            None
        );
    }
}
