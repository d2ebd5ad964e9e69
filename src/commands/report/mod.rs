mod output;
mod run;

pub(crate) use output::write_year_lines;
pub(crate) use run::run;
