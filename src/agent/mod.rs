//! LLM-written narrative for the portfolio report.

pub mod narrative;

pub use narrative::{generate_narrative, Generation, NarrativeConfig, OllamaGenerator};
