use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::YearsArgs;
use crate::commands::report::write_year_lines;
use crate::engine::load_config;
use crate::engine::years::recommend_years;
use crate::model::{YearRecommendations, normalize_key_part};
use crate::provider::{AggregateProvider, SqliteProvider};
use crate::util::resolve_db_path;

#[derive(Debug, Serialize)]
struct YearsResponse {
    make: String,
    model: String,
    fuel_type: String,
    min_tests: u64,
    years_considered: usize,
    recommendations: YearRecommendations,
}

pub fn run(args: YearsArgs) -> Result<()> {
    let loaded = load_config(args.config.as_deref()).context("failed to load engine config")?;
    let min_tests = args.min_tests.unwrap_or(loaded.config.min_year_tests);

    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_deref());
    let provider = SqliteProvider::open_read_only(&db_path)?;

    let make = normalize_key_part(&args.make);
    let model = normalize_key_part(&args.model);
    let fuel_type = normalize_key_part(&args.fuel);

    let stats = provider.model_year_stats(&make, &model, &fuel_type)?;
    if stats.is_empty() {
        warn!(make = %make, model = %model, fuel = %fuel_type, "no model years recorded");
    }

    let mut recommendations = recommend_years(&stats, min_tests);
    recommendations.best.truncate(args.limit);
    recommendations.worst.truncate(args.limit);

    let response = YearsResponse {
        make,
        model,
        fuel_type,
        min_tests,
        years_considered: stats.len(),
        recommendations,
    };

    let mut output = io::BufWriter::new(io::stdout().lock());
    if args.json {
        serde_json::to_writer_pretty(&mut output, &response)
            .context("failed to serialize years json output")?;
        writeln!(output)?;
    } else {
        writeln!(
            output,
            "{} {} {} (min_tests={}, years={})",
            response.make,
            response.model,
            response.fuel_type,
            response.min_tests,
            response.years_considered
        )?;
        write_year_lines(&mut output, "Best years", &response.recommendations.best)?;
        write_year_lines(&mut output, "Worst years", &response.recommendations.worst)?;
    }
    output.flush()?;

    info!(
        considered = response.years_considered,
        eligible = response.recommendations.best.len(),
        "year recommendations completed"
    );

    Ok(())
}
