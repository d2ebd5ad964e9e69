use super::*;

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;

    let ingest_manifest_path = args.ingest_manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!(
            "ingest_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    let db_path = resolve_db_path(&cache_root, args.db_path.as_deref());

    info!(
        cache_root = %cache_root.display(),
        source = %args.source.display(),
        run_id = %run_id,
        "starting ingest"
    );

    let source_sha256 = sha256_file(&args.source)?;
    let dataset = read_dataset(&args.source)?;

    let mut connection = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;

    let load = load_dataset(&mut connection, &dataset)
        .with_context(|| format!("failed to ingest cohort {:?}", dataset.cohort))?;

    for warning in &load.warnings {
        warn!(warning = %warning, "ingest warning");
    }

    let test_rows_total = count_rows(&connection, "SELECT COUNT(*) FROM test_counts")?;
    let defect_rows_total = count_rows(&connection, "SELECT COUNT(*) FROM defect_counts")?;

    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id,
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        cohort: dataset.cohort.trim().to_string(),
        source_path: args.source.display().to_string(),
        source_sha256,
        db_path: db_path.display().to_string(),
        counts: IngestCounts {
            test_rows_inserted: load.test_rows_inserted,
            defect_rows_inserted: load.defect_rows_inserted,
            test_rows_replaced: load.test_rows_replaced,
            defect_rows_replaced: load.defect_rows_replaced,
            test_rows_total,
            defect_rows_total,
        },
        warnings: load.warnings,
    };

    write_json_pretty(&ingest_manifest_path, &manifest)?;

    info!(
        path = %ingest_manifest_path.display(),
        cohort = %manifest.cohort,
        test_rows = manifest.counts.test_rows_inserted,
        defect_rows = manifest.counts.defect_rows_inserted,
        replaced_test_rows = manifest.counts.test_rows_replaced,
        warnings = manifest.warnings.len(),
        "ingest completed"
    );

    Ok(())
}
