//! Code volume through `scc`.

use crate::error::AuditError;
use crate::models::{CodeStats, LanguageMetric};
use crate::tools::ToolCommand;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Directories never counted.
pub const DEFAULT_EXCLUDED_DIRS: [&str; 3] = ["vendor", "node_modules", ".git"];

/// Measures the code volume of a project.
#[async_trait]
pub trait CodeVolume: Send + Sync {
    async fn measure(
        &self,
        project_root: &Path,
        excluded_dirs: &[String],
    ) -> Result<CodeStats, AuditError>;
}

/// [`CodeVolume`] backed by the `scc` CLI.
#[derive(Debug, Clone)]
pub struct SccCounter {
    binary: String,
    /// Average yearly wage, only feeds the cost estimate.
    wage: u64,
    timeout: Duration,
}

impl SccCounter {
    pub fn new(binary: impl Into<String>, wage: u64, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            wage,
            timeout,
        }
    }
}

#[async_trait]
impl CodeVolume for SccCounter {
    async fn measure(
        &self,
        project_root: &Path,
        excluded_dirs: &[String],
    ) -> Result<CodeStats, AuditError> {
        let args = vec![
            "--format".to_string(),
            "json2".to_string(),
            "--exclude-dir".to_string(),
            excluded_dirs.join(","),
            "--avg-wage".to_string(),
            self.wage.to_string(),
            ".".to_string(),
        ];

        let output = ToolCommand::new(self.binary.clone(), args)
            .timeout(self.timeout)
            .run_json(project_root)
            .await?;

        let stats = parse_scc_output(&output)?;
        debug!(
            "Counted {} languages, {} lines of code",
            stats.languages.len(),
            stats.total_code_lines()
        );

        Ok(stats)
    }
}

/// A language row after key normalization.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLanguage {
    name: String,
    bytes: u64,
    lines: u64,
    code: u64,
    comment: u64,
    blank: u64,
    complexity: u64,
    count: u64,
}

impl From<RawLanguage> for LanguageMetric {
    fn from(raw: RawLanguage) -> Self {
        Self {
            name: raw.name,
            bytes: raw.bytes,
            lines: raw.lines,
            code: raw.code,
            comment: raw.comment,
            blank: raw.blank,
            complexity: raw.complexity,
            files: raw.count,
        }
    }
}

/// Lower-case every object key, recursively. scc has changed the casing of
/// its JSON keys between releases.
pub fn lowercase_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.to_lowercase(), lowercase_keys(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(lowercase_keys).collect()),
        other => other.clone(),
    }
}

/// Build [`CodeStats`] from scc output.
///
/// Accepts the `json2` shape (an object with `languageSummary` and the
/// estimates) and the plain `json` shape (just the language array, no
/// estimates).
pub fn parse_scc_output(output: &Value) -> Result<CodeStats, AuditError> {
    let normalized = lowercase_keys(output);

    let (languages, estimates) = match normalized {
        Value::Array(items) => (Value::Array(items), Map::new()),
        Value::Object(mut map) => {
            let languages = map.remove("languagesummary").unwrap_or(Value::Array(Vec::new()));
            (languages, map)
        }
        _ => return Err(AuditError::malformed("scc", "expected a JSON object or array")),
    };

    let rows: Vec<RawLanguage> = serde_json::from_value(languages)
        .map_err(|e| AuditError::malformed("scc", e.to_string()))?;

    let estimate = |key: &str| estimates.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);

    Ok(CodeStats {
        languages: rows.into_iter().map(LanguageMetric::from).collect(),
        estimated_cost: estimate("estimatedcost"),
        estimated_schedule_months: estimate("estimatedschedulemonths"),
        estimated_people: estimate("estimatedpeople"),
    })
}
