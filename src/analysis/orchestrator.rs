//! Per-repository analysis.
//!
//! [`RepoAnalyzer::analyze`] checks a repository out, runs the four sources
//! against it and merges their results into one [`RepoStats`]. A failing
//! source never aborts the others: its result is replaced by the default and
//! a [`SourceFailure`] is recorded instead.
//!
//! The dependency audit and code count run concurrently with each other and
//! with metadata collection. The branch scan switches the working tree
//! between branches, so it waits for both tree readers to finish.
//!
//! Blocking work that times out is asked to stop and keeps a share of the
//! [`CheckoutGuard`] until it does; the working copy is removed by whichever
//! holder lets go last.

use crate::error::AuditError;
use crate::github::{MetadataCollector, RemoteRepo, RepoHost};
use crate::models::{
    CodeStats, GithubStats, PackageStat, ProjectType, RepoStats, Source, SourceFailure,
    VersionPosture,
};
use crate::repo::{Checkout, CheckoutGuard};
use crate::scanner::{project_type, BranchSource};
use crate::tools::{CodeVolume, DependencyAudit};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of one repository's analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Pending,
    CheckedOut,
    CheckoutFailed,
    Analyzing,
    Merged,
    /// Abandoned blocking work still holds the copy; it is removed when that
    /// work stops.
    CleanupDeferred,
    CleanedUp,
}

struct StateTracker<'a> {
    repo: &'a str,
    history: Vec<AnalysisState>,
}

impl<'a> StateTracker<'a> {
    fn new(repo: &'a str) -> Self {
        Self {
            repo,
            history: vec![AnalysisState::Pending],
        }
    }

    fn current(&self) -> AnalysisState {
        self.history
            .last()
            .copied()
            .unwrap_or(AnalysisState::Pending)
    }

    fn advance(&mut self, next: AnalysisState) {
        debug!("{}: {:?} -> {:?}", self.repo, self.current(), next);
        self.history.push(next);
    }
}

/// Tunables for [`RepoAnalyzer`].
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub window_days: i64,
    pub excluded_dirs: Vec<String>,
    /// Upper bound for each source, and for the clone.
    pub source_timeout: Duration,
}

/// Collaborators the analyzer drives.
#[derive(Clone)]
pub struct Collaborators {
    pub host: Arc<dyn RepoHost>,
    pub checkout: Arc<dyn Checkout>,
    pub auditor: Arc<dyn DependencyAudit>,
    pub counter: Arc<dyn CodeVolume>,
    pub branches: Arc<dyn BranchSource>,
}

/// Results of the sources that read the working copy.
struct TreeResults {
    project_type: ProjectType,
    packages: Result<Vec<PackageStat>, AuditError>,
    code: Result<CodeStats, AuditError>,
    versions: Result<VersionPosture, AuditError>,
}

/// Analyzes repositories one at a time; share it to analyze many.
pub struct RepoAnalyzer {
    parts: Collaborators,
    collector: MetadataCollector,
    settings: AnalyzerSettings,
}

impl RepoAnalyzer {
    pub fn new(parts: Collaborators, settings: AnalyzerSettings) -> Self {
        let collector = MetadataCollector::new(parts.host.clone(), settings.window_days);
        Self {
            parts,
            collector,
            settings,
        }
    }

    /// Analyze `full_name` (`owner/name`).
    ///
    /// Fails only when the repository itself cannot be resolved on the host.
    pub async fn analyze(&self, full_name: &str) -> Result<RepoStats, AuditError> {
        let remote = self.parts.host.repository(full_name).await?;
        let mut state = StateTracker::new(full_name);

        let stats = self.analyze_remote(&remote, &mut state).await;
        debug!("{}: finished in state {:?}", full_name, state.current());

        Ok(stats)
    }

    async fn analyze_remote(
        &self,
        remote: &RemoteRepo,
        state: &mut StateTracker<'_>,
    ) -> RepoStats {
        let full_name = remote.full_name.as_str();
        info!("Analyzing {}", full_name);

        let working_copy = self.check_out(remote).await;
        match &working_copy {
            Ok(guard) => {
                state.advance(AnalysisState::CheckedOut);
                debug!("{}: working copy at {}", full_name, guard.path().display());
            }
            Err(e) => {
                state.advance(AnalysisState::CheckoutFailed);
                warn!("Could not check out {}: {}", full_name, e);
            }
        }

        state.advance(AnalysisState::Analyzing);
        let now = Utc::now();
        let limit = self.settings.source_timeout;

        let metadata = timed("metadata collection", limit, self.collector.collect(remote, now));
        let tree = async {
            match &working_copy {
                Ok(guard) => Ok(self.analyze_tree(guard).await),
                Err(e) => Err(SourceFailure::new(Source::Dependencies, e)),
            }
        };
        let (github, tree) = tokio::join!(metadata, tree);

        let stats = merge(remote, github, tree);
        state.advance(AnalysisState::Merged);

        if let Ok(guard) = working_copy {
            guard.cancel();
            match Arc::try_unwrap(guard) {
                Ok(guard) => {
                    if let Err(e) = guard.release() {
                        warn!("Failed to clean up {}: {}", full_name, e);
                    }
                    state.advance(AnalysisState::CleanedUp);
                }
                Err(_) => {
                    info!(
                        "{}: waiting for abandoned work before removing the working copy",
                        full_name
                    );
                    state.advance(AnalysisState::CleanupDeferred);
                }
            }
        } else {
            state.advance(AnalysisState::CleanedUp);
        }

        if !stats.failures.is_empty() {
            info!(
                "{} finished with {} failed source(s)",
                full_name,
                stats.failures.len()
            );
        }

        stats
    }

    /// Prepare and clone a working copy. A clone that outlives its timeout
    /// keeps its own hold on the copy, so the directory is removed only once
    /// the clone has stopped.
    async fn check_out(&self, remote: &RemoteRepo) -> Result<Arc<CheckoutGuard>, AuditError> {
        let guard = Arc::new(CheckoutGuard::prepare(
            self.parts.checkout.clone(),
            &remote.full_name,
        )?);

        let checkout = self.parts.checkout.clone();
        let url = remote.clone_url.clone();
        let working_copy = guard.clone();
        let cloned = run_blocking("clone", self.settings.source_timeout, move || {
            checkout.clone_repo(&url, working_copy.path(), working_copy.cancel_flag())
        })
        .await;

        if let Err(e) = cloned {
            guard.cancel();
            return Err(e);
        }
        Ok(guard)
    }

    async fn analyze_tree(&self, guard: &Arc<CheckoutGuard>) -> TreeResults {
        let limit = self.settings.source_timeout;
        let root = guard.path();

        let (packages, code) = tokio::join!(
            timed("dependency audit", limit, self.parts.auditor.audit(root)),
            timed(
                "code volume",
                limit,
                self.parts.counter.measure(root, &self.settings.excluded_dirs)
            ),
        );

        let scanner = self.parts.branches.clone();
        let working_copy = guard.clone();
        let scanned = run_blocking("branch scan", limit, move || {
            let root = working_copy.path();
            Ok((
                project_type::detect(root),
                scanner.scan(root, working_copy.cancel_flag()),
            ))
        })
        .await;

        let (project_type, versions) = match scanned {
            Ok((project_type, versions)) => (project_type, versions),
            Err(e) => (ProjectType::default(), Err(e)),
        };

        TreeResults {
            project_type,
            packages,
            code,
            versions,
        }
    }
}

/// Analyze every repository in `names`, up to `concurrency` at a time.
///
/// Repositories that cannot be resolved are logged and left out. The result
/// is ordered by full name.
pub async fn analyze_portfolio(
    analyzer: &RepoAnalyzer,
    names: &[String],
    concurrency: usize,
    progress: &ProgressBar,
) -> Vec<RepoStats> {
    let mut results: Vec<RepoStats> = stream::iter(names)
        .map(|name| async move {
            let outcome = analyzer.analyze(name).await;
            progress.inc(1);
            match outcome {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!("Skipping {}: {}", name, e);
                    None
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|stats| async move { stats })
        .collect()
        .await;

    results.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    results
}

/// Take the value of a source, or its default and a failure marker.
fn settle<T: Default>(
    source: Source,
    result: Result<T, AuditError>,
    failures: &mut Vec<SourceFailure>,
) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!("{} source failed: {}", source, e);
            failures.push(SourceFailure::new(source, &e));
            T::default()
        }
    }
}

fn merge(
    remote: &RemoteRepo,
    github: Result<GithubStats, AuditError>,
    tree: Result<TreeResults, SourceFailure>,
) -> RepoStats {
    let mut failures = Vec::new();

    let mut github_stats = settle(Source::Github, github, &mut failures);
    if github_stats.name.is_empty() {
        github_stats.name = remote.name.clone();
        github_stats.url = remote.html_url.clone();
    }

    let (project_type, packages, code_stats, versions) = match tree {
        Ok(tree) => (
            tree.project_type,
            settle(Source::Dependencies, tree.packages, &mut failures),
            settle(Source::CodeVolume, tree.code, &mut failures),
            settle(Source::Branches, tree.versions, &mut failures),
        ),
        Err(no_checkout) => {
            for source in [Source::Dependencies, Source::CodeVolume, Source::Branches] {
                failures.push(SourceFailure {
                    source,
                    ..no_checkout.clone()
                });
            }
            Default::default()
        }
    };

    RepoStats {
        repo_name: remote.name.clone(),
        full_name: remote.full_name.clone(),
        repo_url: remote.html_url.clone(),
        repo_description: remote.description.clone().unwrap_or_default(),
        default_branch: remote.default_branch.clone(),
        project_type,
        github_stats,
        code_stats,
        packages,
        versions,
        failures,
    }
}

/// Await `future`, failing with a timeout after `limit`.
async fn timed<T>(
    operation: &str,
    limit: Duration,
    future: impl Future<Output = Result<T, AuditError>>,
) -> Result<T, AuditError> {
    tokio::time::timeout(limit, future)
        .await
        .unwrap_or_else(|_| {
            Err(AuditError::Timeout {
                operation: operation.to_string(),
                seconds: limit.as_secs(),
            })
        })
}

/// Run blocking work off the runtime. On timeout the task is detached and
/// runs to completion; it owns whatever it captured until then.
async fn run_blocking<T, F>(operation: &str, limit: Duration, work: F) -> Result<T, AuditError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AuditError> + Send + 'static,
{
    let task = async {
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| AuditError::Task(e.to_string()))?
    };
    timed(operation, limit, task).await
}
