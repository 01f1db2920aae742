//! Data models for the portfolio audit.
//!
//! This module contains the records produced by each analysis source and the
//! merged per-repository record consumed by aggregation and reporting.

use crate::error::{AuditError, FailureKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A security advisory reported by the dependency audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAdvisory {
    pub advisory_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cve: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub severity: String,
}

/// One installed package of a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageStat {
    pub name: String,
    pub description: String,
    pub installed_version: String,
    pub latest_version: String,
    /// Licenses joined with `", "`.
    pub license: String,
    pub security_advisories: Vec<SecurityAdvisory>,
}

impl PackageStat {
    /// Whether a newer version than the installed one is available.
    pub fn is_outdated(&self) -> bool {
        !self.latest_version.is_empty() && self.latest_version != self.installed_version
    }
}

/// Per-language code volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageMetric {
    pub name: String,
    pub bytes: u64,
    pub lines: u64,
    pub code: u64,
    pub comment: u64,
    pub blank: u64,
    pub complexity: u64,
    pub files: u64,
}

/// Code volume of a repository with COCOMO-style estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeStats {
    /// In the order the counting tool reported them.
    pub languages: Vec<LanguageMetric>,
    pub estimated_cost: f64,
    pub estimated_schedule_months: f64,
    pub estimated_people: f64,
}

impl CodeStats {
    pub fn total_code_lines(&self) -> u64 {
        self.languages.iter().map(|l| l.code).sum()
    }
}

/// A dependabot alert. Every field but the number may be missing: the
/// payload differs between open, dismissed and fixed alerts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependabotAlert {
    pub number: Option<u64>,
    pub state: Option<String>,
    pub dependency: Option<String>,
    pub severity: Option<String>,
    pub security_advisory_summary: Option<String>,
    pub security_advisory_description: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub dismissed_at: Option<String>,
    pub dismissed_by: Option<String>,
    pub dismissed_reason: Option<String>,
    pub html_url: Option<String>,
}

/// Statistics reported by the remote repository host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GithubStats {
    pub name: String,
    pub url: String,
    pub description: String,
    pub primary_language: String,
    pub num_open_issues: u64,
    pub num_closed_issues_30d: u64,
    pub num_open_prs: u64,
    pub num_merged_prs_30d: u64,
    pub num_commits_30d: u64,
    pub dependabot_alerts: Vec<DependabotAlert>,
    /// False when the alert feed could not be read (disabled, no access).
    pub alerts_available: bool,
}

/// The branch declaring the highest framework major version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSelection {
    pub branch: Option<String>,
    pub declaration: Option<String>,
}

impl BranchSelection {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn found(branch: impl Into<String>, declaration: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            declaration: Some(declaration.into()),
        }
    }

    pub fn is_none(&self) -> bool {
        self.branch.is_none()
    }
}

/// Framework version posture of a repository across its branches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionPosture {
    /// Framework declaration on the default branch.
    pub default_declaration: Option<String>,
    /// PHP constraint on the default branch.
    pub php_declaration: Option<String>,
    /// Branches considered, in scan order (skipped ones excluded).
    pub branches: Vec<String>,
    pub newest: BranchSelection,
}

/// Detected language and framework of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectType {
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
}

impl Default for ProjectType {
    fn default() -> Self {
        Self {
            language: "Unknown".to_string(),
            framework: None,
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.framework {
            Some(ref framework) => write!(f, "{} ({})", self.language, framework),
            None => write!(f, "{}", self.language),
        }
    }
}

/// One of the independent analysis sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Github,
    Dependencies,
    CodeVolume,
    Branches,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Github => write!(f, "github"),
            Source::Dependencies => write!(f, "dependencies"),
            Source::CodeVolume => write!(f, "code volume"),
            Source::Branches => write!(f, "branches"),
        }
    }
}

/// Marker recorded when a source failed and its default was used instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: Source,
    pub kind: FailureKind,
    pub reason: String,
}

impl SourceFailure {
    pub fn new(source: Source, error: &AuditError) -> Self {
        Self {
            source,
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}

/// The merged record for one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoStats {
    pub repo_name: String,
    pub full_name: String,
    pub repo_url: String,
    pub repo_description: String,
    pub default_branch: String,
    pub project_type: ProjectType,
    pub github_stats: GithubStats,
    pub code_stats: CodeStats,
    pub packages: Vec<PackageStat>,
    pub versions: VersionPosture,
    pub failures: Vec<SourceFailure>,
}

impl RepoStats {
    pub fn failed(&self, source: Source) -> bool {
        self.failures.iter().any(|f| f.source == source)
    }

    pub fn advisory_count(&self) -> usize {
        self.packages
            .iter()
            .map(|p| p.security_advisories.len())
            .sum()
    }
}
