pub mod baseline;
pub mod config;
pub mod gather;
pub mod grouping;
pub mod report;
pub mod scoring;
pub mod years;

pub use config::load_config;
pub use gather::{GatherOptions, gather};
pub use report::assemble;
