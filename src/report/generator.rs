//! JSON report output and the console digest.

use crate::analysis::{top_languages, PortfolioSummary};
use crate::models::RepoStats;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Run-level facts about a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// What was audited, e.g. `org:uni` or `team:uni/web`.
    pub target: String,
    pub generated_at: DateTime<Utc>,
    /// Model that wrote the narrative, if one was requested.
    pub model_used: Option<String>,
    pub repositories_requested: usize,
    pub repositories_analyzed: usize,
    pub duration_seconds: f64,
    pub llm_tokens: u64,
    pub llm_cost: f64,
}

/// The complete audit report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioReport {
    pub metadata: ReportMetadata,
    pub summary: PortfolioSummary,
    pub narrative: Option<String>,
    pub repositories: Vec<RepoStats>,
}

/// Serialize the report as pretty-printed JSON.
pub fn generate_json_report(report: &PortfolioReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write the JSON report to `path`, creating parent directories.
pub fn write_json_report(report: &PortfolioReport, path: &Path) -> Result<()> {
    let content = generate_json_report(report)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

/// Short human-readable digest of a report for the terminal.
pub fn summary_lines(report: &PortfolioReport) -> Vec<String> {
    let s = &report.summary;
    let mut lines = vec![
        format!(
            "Repositories: {} analyzed ({} with failed sources)",
            s.repositories, s.repositories_with_failures
        ),
        format!(
            "Issues: {} open, {} closed in window | PRs: {} open, {} merged in window",
            s.open_issues, s.closed_issues_30d, s.open_prs, s.merged_prs_30d
        ),
        format!(
            "Packages: {} ({} outdated, {} advisories) | Dependabot alerts: {}",
            s.packages, s.outdated_packages, s.security_advisories, s.dependabot_alerts
        ),
        format!(
            "Code: {} lines in {} files | Estimated cost: ${:.0}, {:.1} people",
            s.code_lines, s.files, s.estimated_cost, s.estimated_people
        ),
    ];

    let languages = top_languages(s, 3);
    if !languages.is_empty() {
        let listed: Vec<String> = languages
            .iter()
            .map(|(name, lines)| format!("{} ({})", name, lines))
            .collect();
        lines.push(format!("Top languages: {}", listed.join(", ")));
    }

    if !s.newest_framework_majors.is_empty() {
        let majors: Vec<String> = s
            .newest_framework_majors
            .iter()
            .map(|(major, count)| format!("v{}: {}", major, count))
            .collect();
        lines.push(format!("Newest framework majors: {}", majors.join(", ")));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeStats, GithubStats, ProjectType, VersionPosture};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn create_test_report() -> PortfolioReport {
        let repo = RepoStats {
            repo_name: "timetable".to_string(),
            full_name: "uni/timetable".to_string(),
            repo_url: "https://github.com/uni/timetable".to_string(),
            repo_description: "Timetabling".to_string(),
            default_branch: "main".to_string(),
            project_type: ProjectType::default(),
            github_stats: GithubStats::default(),
            code_stats: CodeStats::default(),
            packages: Vec::new(),
            versions: VersionPosture::default(),
            failures: Vec::new(),
        };

        let mut summary = PortfolioSummary {
            repositories: 1,
            code_lines: 1200,
            files: 40,
            ..Default::default()
        };
        summary.languages.insert("PHP".to_string(), 1000);
        summary.languages.insert("CSS".to_string(), 200);
        summary.newest_framework_majors.insert(11, 1);

        PortfolioReport {
            metadata: ReportMetadata {
                target: "org:uni".to_string(),
                generated_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
                model_used: None,
                repositories_requested: 2,
                repositories_analyzed: 1,
                duration_seconds: 12.5,
                llm_tokens: 0,
                llm_cost: 0.0,
            },
            summary,
            narrative: None,
            repositories: vec![repo],
        }
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"target\": \"org:uni\""));
        assert!(json.contains("\"full_name\": \"uni/timetable\""));
        assert!(json.contains("\"narrative\": null"));

        let parsed: PortfolioReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_write_json_report_creates_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("audit.json");

        write_json_report(&create_test_report(), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with('{'));
    }

    #[test]
    fn test_summary_lines() {
        let lines = summary_lines(&create_test_report());

        assert!(lines[0].starts_with("Repositories: 1 analyzed"));
        assert!(lines.iter().any(|l| l == "Top languages: PHP (1000), CSS (200)"));
        assert!(lines.iter().any(|l| l == "Newest framework majors: v11: 1"));
    }

    #[test]
    fn test_summary_lines_empty_portfolio() {
        let mut report = create_test_report();
        report.summary = PortfolioSummary::default();

        let lines = summary_lines(&report);
        assert_eq!(lines.len(), 4);
    }
}
