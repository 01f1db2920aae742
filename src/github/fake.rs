//! In-memory [`RepoHost`] for tests.

use super::{IssueQuery, ItemKind, ItemState, PullRequest, RemoteRepo, RepoHost};
use crate::error::AuditError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    pub repos: HashMap<String, RemoteRepo>,
    pub orgs: HashMap<String, Vec<String>>,
    pub open_issues: u64,
    pub closed_issues: u64,
    pub open_prs: u64,
    pub pulls: Vec<PullRequest>,
    pub commits: u64,
    pub alerts: Option<Vec<Value>>,
    pub files: HashMap<(String, String), String>,
    pub fail_counts: bool,
}

impl FakeHost {
    pub fn with_repo(mut self, full_name: &str) -> Self {
        let (owner, name) = full_name.split_once('/').unwrap_or(("", full_name));
        self.repos.insert(
            full_name.to_string(),
            RemoteRepo {
                name: name.to_string(),
                full_name: full_name.to_string(),
                html_url: format!("https://github.com/{}", full_name),
                clone_url: format!("https://github.com/{}.git", full_name),
                description: Some(format!("{} app", name)),
                language: Some("PHP".to_string()),
                default_branch: "main".to_string(),
                archived: false,
            },
        );
        self.orgs
            .entry(owner.to_string())
            .or_default()
            .push(full_name.to_string());
        self
    }

    pub fn with_file(mut self, full_name: &str, path: &str, content: &str) -> Self {
        self.files
            .insert((full_name.to_string(), path.to_string()), content.to_string());
        self
    }

    fn counts_guard(&self) -> Result<(), AuditError> {
        if self.fail_counts {
            return Err(AuditError::RemoteApi {
                status: 502,
                message: "Bad Gateway".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RepoHost for FakeHost {
    async fn repository(&self, full_name: &str) -> Result<RemoteRepo, AuditError> {
        self.repos
            .get(full_name)
            .cloned()
            .ok_or_else(|| AuditError::NotFound(full_name.to_string()))
    }

    async fn organization_repositories(&self, org: &str) -> Result<Vec<RemoteRepo>, AuditError> {
        let names = self
            .orgs
            .get(org)
            .ok_or_else(|| AuditError::NotFound(org.to_string()))?;
        Ok(names.iter().filter_map(|n| self.repos.get(n).cloned()).collect())
    }

    async fn team_repositories(
        &self,
        org: &str,
        _team: &str,
    ) -> Result<Vec<RemoteRepo>, AuditError> {
        self.organization_repositories(org).await
    }

    async fn count_issues(&self, _full_name: &str, query: IssueQuery) -> Result<u64, AuditError> {
        self.counts_guard()?;
        Ok(match (query.kind, query.state) {
            (ItemKind::Issue, ItemState::Open) => self.open_issues,
            (ItemKind::Issue, ItemState::Closed) => self.closed_issues,
            (ItemKind::PullRequest, ItemState::Open) => self.open_prs,
            (ItemKind::PullRequest, ItemState::Closed) => 0,
        })
    }

    async fn branches(&self, full_name: &str) -> Result<Vec<String>, AuditError> {
        let repo = self.repository(full_name).await?;
        Ok(vec![repo.default_branch])
    }

    async fn closed_pull_requests(
        &self,
        _full_name: &str,
        _updated_since: DateTime<Utc>,
    ) -> Result<Vec<PullRequest>, AuditError> {
        self.counts_guard()?;
        Ok(self.pulls.clone())
    }

    async fn count_commits(&self, _full_name: &str, _since: DateTime<Utc>) -> Result<u64, AuditError> {
        self.counts_guard()?;
        Ok(self.commits)
    }

    async fn dependabot_alerts(&self, _full_name: &str) -> Result<Vec<Value>, AuditError> {
        self.alerts.clone().ok_or(AuditError::RemoteApi {
            status: 403,
            message: "Dependabot alerts are disabled for this repository.".to_string(),
        })
    }

    async fn file_contents(
        &self,
        full_name: &str,
        path: &str,
        _git_ref: Option<&str>,
    ) -> Result<Option<String>, AuditError> {
        Ok(self
            .files
            .get(&(full_name.to_string(), path.to_string()))
            .cloned())
    }
}
