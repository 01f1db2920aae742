//! [`RepoHost`] over the GitHub REST API.

use super::{IssueQuery, ItemKind, ItemState, PullRequest, RemoteRepo, RepoHost};
use crate::error::AuditError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const PER_PAGE: usize = 100;
const MAX_PAGES: u32 = 50;
const API_VERSION: &str = "2022-11-28";

/// Authenticated GitHub REST client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AuditError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("portfolio-audit/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    fn request(&self, path: &str, query: &[(&str, String)]) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.api_url, path);
        let request = self.http.get(url).query(query);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<reqwest::Response, AuditError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AuditError::Timeout {
                    operation: format!("GET {}", path),
                    seconds: self.timeout.as_secs(),
                }
            } else {
                AuditError::Http(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AuditError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let remaining = header_value(&response, "x-ratelimit-remaining");
            let reset = header_value(&response, "x-ratelimit-reset");
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body);

            if is_rate_limited(status, remaining.as_deref(), &message) {
                warn!("Rate limited on {}: {}", path, message);
                return Err(AuditError::RateLimited {
                    reset: reset_time(reset.as_deref()),
                    message,
                });
            }
            return Err(AuditError::RemoteApi {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, AuditError> {
        debug!("GET {}", path);
        let response = self.send(self.request(path, query), path).await?;
        Ok(response.json().await?)
    }

    /// Fetch consecutive pages until a short page. `keep_going` sees each page
    /// and can stop early.
    async fn get_pages<T, F>(
        &self,
        path: &str,
        query: &[(&str, String)],
        mut keep_going: F,
    ) -> Result<Vec<T>, AuditError>
    where
        T: DeserializeOwned,
        F: FnMut(&[T]) -> bool,
    {
        let mut items = Vec::new();

        for page in 1..=MAX_PAGES {
            let mut paged = query.to_vec();
            paged.push(("per_page", PER_PAGE.to_string()));
            paged.push(("page", page.to_string()));

            let batch: Vec<T> = self.get_json(path, &paged).await?;
            let last_page = batch.len() < PER_PAGE;
            let more = keep_going(&batch);
            items.extend(batch);

            if last_page || !more {
                break;
            }
        }

        Ok(items)
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Primary limits answer 403 or 429 with `x-ratelimit-remaining: 0`. The
/// search endpoint's secondary limit only says so in the message.
fn is_rate_limited(status: StatusCode, remaining: Option<&str>, message: &str) -> bool {
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return false;
    }
    remaining == Some("0")
        || status == StatusCode::TOO_MANY_REQUESTS
        || message.to_lowercase().contains("rate limit")
}

/// `x-ratelimit-reset` is in epoch seconds.
fn reset_time(reset: Option<&str>) -> String {
    reset
        .and_then(|r| r.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "an unknown time".to_string())
}

/// GitHub error bodies look like `{"message": "...", "documentation_url": "..."}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Build the search qualifier string for an [`IssueQuery`].
pub fn search_query(full_name: &str, query: &IssueQuery) -> String {
    let kind = match query.kind {
        ItemKind::Issue => "issue",
        ItemKind::PullRequest => "pr",
    };
    let state = match query.state {
        ItemState::Open => "open",
        ItemState::Closed => "closed",
    };

    let mut q = format!("repo:{} is:{} state:{}", full_name, kind, state);
    if let Some(since) = query.closed_since {
        q.push_str(&format!(" closed:>={}", since.format("%Y-%m-%d")));
    }
    q
}

#[async_trait]
impl RepoHost for GitHubClient {
    async fn repository(&self, full_name: &str) -> Result<RemoteRepo, AuditError> {
        self.get_json(&format!("/repos/{}", full_name), &[]).await
    }

    async fn organization_repositories(&self, org: &str) -> Result<Vec<RemoteRepo>, AuditError> {
        self.get_pages(&format!("/orgs/{}/repos", org), &[("type", "all".to_string())], |_| true)
            .await
    }

    async fn team_repositories(
        &self,
        org: &str,
        team: &str,
    ) -> Result<Vec<RemoteRepo>, AuditError> {
        self.get_pages(&format!("/orgs/{}/teams/{}/repos", org, team), &[], |_| true)
            .await
    }

    async fn count_issues(&self, full_name: &str, query: IssueQuery) -> Result<u64, AuditError> {
        let result: Value = self
            .get_json(
                "/search/issues",
                &[
                    ("q", search_query(full_name, &query)),
                    ("per_page", "1".to_string()),
                ],
            )
            .await?;

        result
            .get("total_count")
            .and_then(|c| c.as_u64())
            .ok_or_else(|| AuditError::malformed("GitHub search", "missing total_count"))
    }

    async fn branches(&self, full_name: &str) -> Result<Vec<String>, AuditError> {
        let branches: Vec<Value> = self
            .get_pages(&format!("/repos/{}/branches", full_name), &[], |_| true)
            .await?;

        Ok(branches
            .iter()
            .filter_map(|b| b.get("name").and_then(|n| n.as_str()))
            .map(str::to_string)
            .collect())
    }

    async fn closed_pull_requests(
        &self,
        full_name: &str,
        updated_since: DateTime<Utc>,
    ) -> Result<Vec<PullRequest>, AuditError> {
        let query = [
            ("state", "closed".to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
        ];

        // Sorted by update time, so a page ending before the window ends the listing.
        self.get_pages(&format!("/repos/{}/pulls", full_name), &query, |page: &[PullRequest]| {
            page.last()
                .and_then(|pr| pr.updated_at)
                .map_or(false, |updated| updated >= updated_since)
        })
        .await
    }

    async fn count_commits(&self, full_name: &str, since: DateTime<Utc>) -> Result<u64, AuditError> {
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let commits: Vec<Value> = self
            .get_pages(&format!("/repos/{}/commits", full_name), &[("since", since)], |_| true)
            .await?;
        Ok(commits.len() as u64)
    }

    async fn dependabot_alerts(&self, full_name: &str) -> Result<Vec<Value>, AuditError> {
        self.get_pages(&format!("/repos/{}/dependabot/alerts", full_name), &[], |_| true)
            .await
    }

    async fn file_contents(
        &self,
        full_name: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<Option<String>, AuditError> {
        let api_path = format!("/repos/{}/contents/{}", full_name, path);
        let query: Vec<(&str, String)> = git_ref.map(|r| ("ref", r.to_string())).into_iter().collect();

        let request = self
            .request(&api_path, &query)
            .header(ACCEPT, "application/vnd.github.raw+json");

        match self.send(request, &api_path).await {
            Ok(response) => Ok(Some(response.text().await?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
