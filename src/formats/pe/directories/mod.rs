//! Data directory parsers

pub mod export;

pub use export::{parse_exports, ExportDirectory, ParsedExports, MODULE_NAME_SENTINEL};
