//! Issue, pull request, commit and alert metadata for one repository.

use super::{IssueQuery, ItemKind, PullRequest, RemoteRepo, RepoHost};
use crate::error::AuditError;
use crate::models::{DependabotAlert, GithubStats};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Collects [`GithubStats`] over a trailing window.
#[derive(Clone)]
pub struct MetadataCollector {
    host: Arc<dyn RepoHost>,
    window_days: i64,
}

impl MetadataCollector {
    pub fn new(host: Arc<dyn RepoHost>, window_days: i64) -> Self {
        Self { host, window_days }
    }

    /// Collect metadata for `repo` relative to `now`.
    ///
    /// Any failing count fails the collection. An unavailable alert feed
    /// (disabled, or no permission) only empties the alert list.
    pub async fn collect(
        &self,
        repo: &RemoteRepo,
        now: DateTime<Utc>,
    ) -> Result<GithubStats, AuditError> {
        let name = repo.full_name.as_str();
        let since = now - Duration::days(self.window_days);

        let (open_issues, closed_issues, open_prs, closed_prs, commits) = tokio::try_join!(
            self.host.count_issues(name, IssueQuery::open(ItemKind::Issue)),
            self.host
                .count_issues(name, IssueQuery::closed_since(ItemKind::Issue, since)),
            self.host.count_issues(name, IssueQuery::open(ItemKind::PullRequest)),
            self.host.closed_pull_requests(name, since),
            self.host.count_commits(name, since),
        )?;

        let (dependabot_alerts, alerts_available) = match self.host.dependabot_alerts(name).await {
            Ok(raw) => (raw.iter().map(alert_from_value).collect(), true),
            Err(e) => {
                warn!("Dependabot alerts unavailable for {}: {}", name, e);
                (Vec::new(), false)
            }
        };

        let stats = GithubStats {
            name: repo.name.clone(),
            url: repo.html_url.clone(),
            description: repo.description.clone().unwrap_or_default(),
            primary_language: repo.language.clone().unwrap_or_default(),
            num_open_issues: open_issues,
            num_closed_issues_30d: closed_issues,
            num_open_prs: open_prs,
            num_merged_prs_30d: count_merged_since(&closed_prs, since),
            num_commits_30d: commits,
            dependabot_alerts,
            alerts_available,
        };

        debug!(
            "{}: {} open issues, {} open PRs, {} merged PRs, {} alerts",
            name,
            stats.num_open_issues,
            stats.num_open_prs,
            stats.num_merged_prs_30d,
            stats.dependabot_alerts.len()
        );

        Ok(stats)
    }
}

/// Pull requests merged at or after `cutoff`. The host cannot filter on
/// merge time, so this runs over the closed listing.
pub fn count_merged_since(pulls: &[PullRequest], cutoff: DateTime<Utc>) -> u64 {
    pulls
        .iter()
        .filter(|pr| pr.merged_at.is_some_and(|merged| merged >= cutoff))
        .count() as u64
}

/// Extract an alert field by field. Alert payloads differ between open,
/// dismissed and fixed alerts, so nothing is required.
pub fn alert_from_value(value: &Value) -> DependabotAlert {
    let text = |pointer: &str| {
        value
            .pointer(pointer)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    DependabotAlert {
        number: value.pointer("/number").and_then(|v| v.as_u64()),
        state: text("/state"),
        dependency: text("/dependency/package/name"),
        severity: text("/security_advisory/severity")
            .or_else(|| text("/security_vulnerability/severity")),
        security_advisory_summary: text("/security_advisory/summary"),
        security_advisory_description: text("/security_advisory/description"),
        created_at: text("/created_at"),
        updated_at: text("/updated_at"),
        dismissed_at: text("/dismissed_at"),
        dismissed_by: text("/dismissed_by/login"),
        dismissed_reason: text("/dismissed_reason"),
        html_url: text("/html_url"),
    }
}
