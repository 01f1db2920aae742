//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and target selection.

use crate::github::PortfolioTarget;
use crate::repo::normalize_repo_ref;
use clap::Parser;
use std::path::PathBuf;

/// portfolio-audit - health report for a portfolio of GitHub repositories
///
/// Clones every repository in an organization, team or list, audits its
/// composer dependencies, counts its code, compares framework versions across
/// branches and collects issue/PR activity. The results are written as one
/// JSON report, optionally with a narrative from a local Ollama model.
///
/// Examples:
///   portfolio-audit --org my-org
///   portfolio-audit --org my-org --team web --window-days 14
///   portfolio-audit --repo my-org/app,my-org/api --no-narrative
///   portfolio-audit --projects-repo my-org/portfolio --dry-run
///   portfolio-audit --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Audit every repository of this organization
    #[arg(long, value_name = "ORG", conflicts_with_all = ["repo", "projects_repo"])]
    pub org: Option<String>,

    /// Only the repositories of this team (slug) within --org
    #[arg(long, value_name = "SLUG", requires = "org")]
    pub team: Option<String>,

    /// Repositories to audit, as owner/name or GitHub URL (comma-separated or repeated)
    #[arg(long, value_name = "OWNER/NAME", value_delimiter = ',', conflicts_with = "projects_repo")]
    pub repo: Vec<String>,

    /// Repository holding a projects.json that lists the portfolio
    #[arg(long, value_name = "OWNER/NAME")]
    pub projects_repo: Option<String>,

    /// Output file path for the JSON report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .portfolio-audit.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of repositories analyzed at the same time
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Trailing window in days for closed issues, merged PRs and commits
    #[arg(long, value_name = "DAYS")]
    pub window_days: Option<i64>,

    /// Ollama model that writes the narrative
    #[arg(short, long, env = "PORTFOLIO_AUDIT_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// GitHub token used for the API and for cloning
    #[arg(long, env = "GITHUB_API_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Skip the LLM narrative
    #[arg(long)]
    pub no_narrative: bool,

    /// Keep archived repositories in organization and team listings
    #[arg(long)]
    pub include_archived: bool,

    /// Dry run: list the repositories that would be audited and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .portfolio-audit.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        self.target()?;

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if let Some(days) = self.window_days {
            if days < 1 {
                return Err("Window must be at least 1 day".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// The portfolio selected on the command line.
    pub fn target(&self) -> Result<PortfolioTarget, String> {
        if let Some(ref org) = self.org {
            return Ok(match self.team {
                Some(ref team) => PortfolioTarget::Team {
                    org: org.clone(),
                    team: team.clone(),
                },
                None => PortfolioTarget::Organization(org.clone()),
            });
        }

        if let Some(ref repo) = self.projects_repo {
            let full_name = normalize_repo_ref(repo)
                .ok_or_else(|| format!("Not a repository reference: {}", repo))?;
            return Ok(PortfolioTarget::ProjectList(full_name));
        }

        if !self.repo.is_empty() {
            let repos = self
                .repo
                .iter()
                .map(|r| {
                    normalize_repo_ref(r)
                        .ok_or_else(|| format!("Not a repository reference: {}", r))
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(PortfolioTarget::Repositories(repos));
        }

        Err("One of --org, --repo or --projects-repo is required".to_string())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
