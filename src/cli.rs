use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "mot-known-issues",
    version,
    about = "Known-issue detection over aggregated MOT test outcomes"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Ingest(IngestArgs),
    Report(ReportArgs),
    Years(YearsArgs),
    ValidateConfig(ValidateConfigArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[arg(long, default_value = ".cache/mot")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Aggregate dataset (JSON) produced by the upstream ETL.
    #[arg(long)]
    pub source: PathBuf,

    #[arg(long)]
    pub ingest_manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct VehicleArgs {
    #[arg(long)]
    pub make: String,

    #[arg(long)]
    pub model: String,

    #[arg(long)]
    pub year: u32,

    #[arg(long)]
    pub fuel: String,
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    #[arg(long, default_value = ".cache/mot")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Engine configuration (grouping table and thresholds). Built-in defaults when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub vehicle: VehicleArgs,

    #[arg(long, default_value_t = false)]
    pub skip_sibling_years: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Also write the JSON report to this path.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct YearsArgs {
    #[arg(long, default_value = ".cache/mot")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub make: String,

    #[arg(long)]
    pub model: String,

    #[arg(long)]
    pub fuel: String,

    /// Overrides `min_year_tests` from the engine configuration.
    #[arg(long)]
    pub min_tests: Option<u64>,

    #[arg(long, default_value_t = 5)]
    pub limit: usize,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateConfigArgs {
    #[arg(long, default_value = ".cache/mot")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Only run load-time validation; do not check stored defect descriptions.
    #[arg(long, default_value_t = false)]
    pub skip_store: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/mot")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
