//! Repository analysis and portfolio aggregation.

pub mod aggregator;
pub mod orchestrator;

pub use aggregator::{aggregate, top_languages, PortfolioSummary};
pub use orchestrator::{analyze_portfolio, AnalyzerSettings, Collaborators, RepoAnalyzer};
