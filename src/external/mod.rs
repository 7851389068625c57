pub mod csv_universe;
pub mod universe_source;
