use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::{info, warn};

use crate::cli::IngestArgs;
use crate::model::{AggregateDataset, IngestCounts, IngestRunManifest, VehicleKey};
use crate::util::{
    ensure_directory, now_utc_string, resolve_db_path, sha256_file, utc_compact_string,
    write_json_pretty,
};

const DB_SCHEMA_VERSION: &str = "0.1.0";

mod dataset_load;
mod db_setup;
mod run;

pub use run::run;
pub(crate) use dataset_load::load_dataset;
pub(crate) use db_setup::ensure_schema;

use dataset_load::*;
use db_setup::*;
