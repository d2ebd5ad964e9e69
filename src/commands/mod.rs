pub mod ingest;
pub mod report;
pub mod status;
pub mod validate;
pub mod years;
