//! Report generation.

pub mod generator;

pub use generator::{summary_lines, write_json_report, PortfolioReport, ReportMetadata};
