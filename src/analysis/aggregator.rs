//! Portfolio-wide totals.
//!
//! [`aggregate`] folds a slice of [`RepoStats`] into a [`PortfolioSummary`].
//! It only reads its input.

use crate::models::RepoStats;
use crate::version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sums and counts over every analyzed repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub repositories: usize,
    pub repositories_with_failures: usize,

    pub open_issues: u64,
    pub closed_issues_30d: u64,
    pub open_prs: u64,
    pub merged_prs_30d: u64,
    pub commits_30d: u64,
    pub dependabot_alerts: usize,

    pub packages: usize,
    pub outdated_packages: usize,
    pub security_advisories: usize,

    pub code_lines: u64,
    pub comment_lines: u64,
    pub blank_lines: u64,
    pub complexity: u64,
    pub files: u64,
    /// Code lines per language, across all repositories.
    pub languages: BTreeMap<String, u64>,

    pub estimated_cost: f64,
    pub estimated_people: f64,
    /// The longest single-repository schedule, not a sum.
    pub longest_schedule_months: f64,

    /// Repositories per framework major version on the default branch.
    pub default_framework_majors: BTreeMap<u64, usize>,
    /// Repositories per framework major version on their newest branch.
    pub newest_framework_majors: BTreeMap<u64, usize>,
    /// Repositories that declare the framework on no branch.
    pub without_framework: usize,
}

/// Fold `stats` into one summary. Empty input gives an all-zero summary.
pub fn aggregate(stats: &[RepoStats]) -> PortfolioSummary {
    stats
        .iter()
        .fold(PortfolioSummary::default(), |mut summary, repo| {
            add_repo(&mut summary, repo);
            summary
        })
}

fn add_repo(summary: &mut PortfolioSummary, repo: &RepoStats) {
    summary.repositories += 1;
    if !repo.failures.is_empty() {
        summary.repositories_with_failures += 1;
    }

    let github = &repo.github_stats;
    summary.open_issues += github.num_open_issues;
    summary.closed_issues_30d += github.num_closed_issues_30d;
    summary.open_prs += github.num_open_prs;
    summary.merged_prs_30d += github.num_merged_prs_30d;
    summary.commits_30d += github.num_commits_30d;
    summary.dependabot_alerts += github.dependabot_alerts.len();

    summary.packages += repo.packages.len();
    summary.outdated_packages += repo.packages.iter().filter(|p| p.is_outdated()).count();
    summary.security_advisories += repo.advisory_count();

    let code = &repo.code_stats;
    for language in &code.languages {
        summary.code_lines += language.code;
        summary.comment_lines += language.comment;
        summary.blank_lines += language.blank;
        summary.complexity += language.complexity;
        summary.files += language.files;
        *summary.languages.entry(language.name.clone()).or_default() += language.code;
    }

    summary.estimated_cost += code.estimated_cost;
    summary.estimated_people += code.estimated_people;
    summary.longest_schedule_months = summary
        .longest_schedule_months
        .max(code.estimated_schedule_months);

    let versions = &repo.versions;
    if let Some(major) = versions.default_declaration.as_deref().and_then(version::parse) {
        *summary.default_framework_majors.entry(major.major()).or_default() += 1;
    }

    let newest = versions
        .newest
        .declaration
        .as_deref()
        .or(versions.default_declaration.as_deref())
        .and_then(version::parse);
    if let Some(major) = newest {
        *summary.newest_framework_majors.entry(major.major()).or_default() += 1;
    }

    if versions.newest.is_none() && versions.default_declaration.is_none() {
        summary.without_framework += 1;
    }
}

/// The languages with the most code lines, largest first.
pub fn top_languages(summary: &PortfolioSummary, n: usize) -> Vec<(String, u64)> {
    let mut languages: Vec<(String, u64)> = summary
        .languages
        .iter()
        .map(|(name, lines)| (name.clone(), *lines))
        .collect();

    languages.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    languages.truncate(n);
    languages
}
