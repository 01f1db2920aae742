//! Remote repository host access.
//!
//! [`RepoHost`] is the read-only view of GitHub the pipeline needs. The real
//! implementation is [`GitHubClient`]; tests use an in-memory host.

pub mod client;
pub mod stats;

#[cfg(test)]
pub mod fake;

use crate::error::AuditError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

pub use client::GitHubClient;
pub use stats::MetadataCollector;

/// Repository metadata as returned by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteRepo {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub clone_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub default_branch: String,
    #[serde(default)]
    pub archived: bool,
}

/// The fields of a pull request the window filter needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Issue,
    PullRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Open,
    Closed,
}

/// Filter for counting issues or pull requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueQuery {
    pub kind: ItemKind,
    pub state: ItemState,
    /// Only items closed at or after this instant.
    pub closed_since: Option<DateTime<Utc>>,
}

impl IssueQuery {
    pub fn open(kind: ItemKind) -> Self {
        Self {
            kind,
            state: ItemState::Open,
            closed_since: None,
        }
    }

    pub fn closed_since(kind: ItemKind, since: DateTime<Utc>) -> Self {
        Self {
            kind,
            state: ItemState::Closed,
            closed_since: Some(since),
        }
    }
}

/// Read-only operations against the repository host.
///
/// A missing repository, organization or file surfaces as
/// [`AuditError::NotFound`], except for [`RepoHost::file_contents`] which
/// answers `Ok(None)`.
#[async_trait]
pub trait RepoHost: Send + Sync {
    async fn repository(&self, full_name: &str) -> Result<RemoteRepo, AuditError>;

    async fn organization_repositories(&self, org: &str) -> Result<Vec<RemoteRepo>, AuditError>;

    async fn team_repositories(&self, org: &str, team: &str)
        -> Result<Vec<RemoteRepo>, AuditError>;

    async fn count_issues(&self, full_name: &str, query: IssueQuery) -> Result<u64, AuditError>;

    /// Branch names as known to the host.
    async fn branches(&self, full_name: &str) -> Result<Vec<String>, AuditError>;

    /// Closed pull requests, most recently updated first. Implementations may
    /// stop listing once `updated_since` is passed.
    async fn closed_pull_requests(
        &self,
        full_name: &str,
        updated_since: DateTime<Utc>,
    ) -> Result<Vec<PullRequest>, AuditError>;

    async fn count_commits(&self, full_name: &str, since: DateTime<Utc>)
        -> Result<u64, AuditError>;

    /// Raw dependabot alert payloads.
    async fn dependabot_alerts(&self, full_name: &str) -> Result<Vec<Value>, AuditError>;

    async fn file_contents(
        &self,
        full_name: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Option<String>, AuditError>;
}

/// The `projects.json` layout of a coordinating repository.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectList {
    pub projects: Vec<String>,
}

/// Read the list of `owner/name` projects from `projects.json` in
/// `full_name`. A missing file is an error: this is top-level resolution.
pub async fn load_project_list(
    host: &dyn RepoHost,
    full_name: &str,
) -> Result<Vec<String>, AuditError> {
    let content = host
        .file_contents(full_name, "projects.json", None)
        .await?
        .ok_or_else(|| AuditError::NotFound(format!("{}/projects.json", full_name)))?;

    let list: ProjectList = serde_json::from_str(&content)?;
    Ok(list.projects)
}

/// What a run audits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortfolioTarget {
    Organization(String),
    Team { org: String, team: String },
    Repositories(Vec<String>),
    /// A repository whose `projects.json` lists the portfolio.
    ProjectList(String),
}

impl fmt::Display for PortfolioTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortfolioTarget::Organization(org) => write!(f, "org:{}", org),
            PortfolioTarget::Team { org, team } => write!(f, "team:{}/{}", org, team),
            PortfolioTarget::Repositories(repos) => write!(f, "repos:{}", repos.join(",")),
            PortfolioTarget::ProjectList(repo) => write!(f, "projects:{}", repo),
        }
    }
}

/// Resolve a target to the `owner/name` of every repository in it.
///
/// Any failure here is fatal to the run. Explicit lists are returned as
/// given; they are checked when each repository is analyzed.
pub async fn resolve_target(
    host: &dyn RepoHost,
    target: &PortfolioTarget,
    skip_archived: bool,
) -> Result<Vec<String>, AuditError> {
    let listed = match target {
        PortfolioTarget::Organization(org) => host.organization_repositories(org).await?,
        PortfolioTarget::Team { org, team } => host.team_repositories(org, team).await?,
        PortfolioTarget::Repositories(repos) => return Ok(repos.clone()),
        PortfolioTarget::ProjectList(repo) => return load_project_list(host, repo).await,
    };

    let total = listed.len();
    let mut names: Vec<String> = listed
        .into_iter()
        .filter(|r| !(skip_archived && r.archived))
        .map(|r| r.full_name)
        .collect();
    names.sort();

    debug!("{} lists {} repositories, {} kept", target, total, names.len());
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::fake::FakeHost;
    use super::*;

    #[test]
    fn test_remote_repo_deserialize() {
        let json = r#"{
            "id": 1,
            "name": "timetable",
            "full_name": "uni/timetable",
            "html_url": "https://github.com/uni/timetable",
            "clone_url": "https://github.com/uni/timetable.git",
            "description": null,
            "language": "PHP",
            "default_branch": "main",
            "archived": false
        }"#;

        let repo: RemoteRepo = serde_json::from_str(json).unwrap();
        assert_eq!(repo.full_name, "uni/timetable");
        assert_eq!(repo.description, None);
        assert_eq!(repo.language.as_deref(), Some("PHP"));
    }

    #[test]
    fn test_pull_request_deserialize() {
        let json = r#"{"number": 7, "updated_at": "2024-05-02T10:00:00Z", "merged_at": null}"#;
        let pr: PullRequest = serde_json::from_str(json).unwrap();
        assert_eq!(pr.number, 7);
        assert!(pr.updated_at.is_some());
        assert!(pr.merged_at.is_none());
    }

    #[tokio::test]
    async fn test_load_project_list() {
        let host = FakeHost::default().with_file(
            "uni/projects",
            "projects.json",
            r#"{"projects": ["uni/timetable", "uni/exams"]}"#,
        );

        let projects = load_project_list(&host, "uni/projects").await.unwrap();
        assert_eq!(projects, vec!["uni/timetable", "uni/exams"]);

        let err = load_project_list(&host, "uni/missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_resolve_organization_skips_archived() {
        let mut host = FakeHost::default()
            .with_repo("uni/timetable")
            .with_repo("uni/exams")
            .with_repo("uni/old-portal");
        if let Some(old) = host.repos.get_mut("uni/old-portal") {
            old.archived = true;
        }

        let target = PortfolioTarget::Organization("uni".to_string());

        let names = resolve_target(&host, &target, true).await.unwrap();
        assert_eq!(names, vec!["uni/exams", "uni/timetable"]);

        let names = resolve_target(&host, &target, false).await.unwrap();
        assert_eq!(names.len(), 3);
    }

    #[tokio::test]
    async fn test_resolve_unknown_organization_is_fatal() {
        let host = FakeHost::default().with_repo("uni/timetable");
        let target = PortfolioTarget::Organization("nobody".to_string());

        let err = resolve_target(&host, &target, true).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_resolve_explicit_list_and_project_list() {
        let host = FakeHost::default().with_file(
            "uni/projects",
            "projects.json",
            r#"{"projects": ["uni/b", "uni/a"]}"#,
        );

        let explicit = PortfolioTarget::Repositories(vec!["uni/x".to_string()]);
        assert_eq!(resolve_target(&host, &explicit, true).await.unwrap(), vec!["uni/x"]);

        let listed = PortfolioTarget::ProjectList("uni/projects".to_string());
        assert_eq!(
            resolve_target(&host, &listed, true).await.unwrap(),
            vec!["uni/b", "uni/a"]
        );
    }

    #[test]
    fn test_target_display() {
        assert_eq!(PortfolioTarget::Organization("uni".to_string()).to_string(), "org:uni");
        assert_eq!(
            PortfolioTarget::Team {
                org: "uni".to_string(),
                team: "web".to_string()
            }
            .to_string(),
            "team:uni/web"
        );
    }
}
