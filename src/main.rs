//! portfolio-audit - health report for a portfolio of GitHub repositories
//!
//! Clones each repository, audits its composer dependencies, counts its
//! code with scc, compares framework versions across branches and collects
//! issue and pull request activity, then writes one JSON report.
//!
//! Exit codes:
//!   0 - Report written
//!   1 - Runtime error (bad arguments, config, unknown org/team/repository list)

mod agent;
mod analysis;
mod cli;
mod config;
mod error;
mod github;
mod models;
mod repo;
mod report;
mod scanner;
mod tools;
mod version;

use agent::{generate_narrative, Generation, NarrativeConfig, OllamaGenerator};
use analysis::{aggregate, analyze_portfolio, AnalyzerSettings, Collaborators, RepoAnalyzer};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::Args;
use config::{Config, CONFIG_FILE};
use github::{GitHubClient, PortfolioTarget, RepoHost};
use indicatif::{ProgressBar, ProgressStyle};
use models::RepoStats;
use report::{PortfolioReport, ReportMetadata};
use scanner::{GitBranchScanner, SkipPolicy};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tools::{ComposerAuditor, SccCounter};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("portfolio-audit v{}", env!("CARGO_PKG_VERSION"));
    debug!("Target: {:?}", args.target());

    if let Err(e) = run_audit(args).await {
        error!("Audit failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .portfolio-audit.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize tools, branch rules, the model and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete audit workflow.
async fn run_audit(args: Args) -> Result<()> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let target = args.target().map_err(anyhow::Error::msg)?;

    if args.github_token.is_none() {
        warn!("GITHUB_API_TOKEN is not set; private repositories and alerts will be unavailable");
    }

    let host: Arc<dyn RepoHost> = Arc::new(
        GitHubClient::new(
            config.github.api_url.clone(),
            args.github_token.clone(),
            Duration::from_secs(config.github.timeout_seconds),
        )
        .context("Failed to create GitHub client")?,
    );

    // Step 1: Resolve the portfolio
    println!("🔎 Resolving {}...", target);
    let names = github::resolve_target(host.as_ref(), &target, config.general.skip_archived)
        .await
        .with_context(|| format!("Failed to resolve {}", target))?;
    println!("   {} repositories", names.len());

    if args.dry_run {
        return handle_dry_run(host.as_ref(), &names).await;
    }

    // Step 2: Analyze every repository
    let analyzer = build_analyzer(&config, host.clone(), args.github_token.clone());
    let concurrency = config.general.concurrency.max(1);

    println!(
        "\n🔬 Analyzing {} repositories ({} at a time)...",
        names.len(),
        concurrency
    );
    let progress = progress_bar(names.len() as u64, args.quiet);
    let repositories = analyze_portfolio(&analyzer, &names, concurrency, &progress).await;
    progress.finish_and_clear();

    // Step 3: Aggregate and narrate
    let summary = aggregate(&repositories);

    let generation = if config.model.enabled && !repositories.is_empty() {
        println!("\n🤖 Writing narrative with {}...", config.model.name);
        request_narrative(&config, &target, &summary).await
    } else {
        None
    };

    // Step 4: Build and save the report
    let metadata = ReportMetadata {
        target: target.to_string(),
        generated_at: Utc::now(),
        model_used: generation.as_ref().map(|g| g.model.clone()),
        repositories_requested: names.len(),
        repositories_analyzed: repositories.len(),
        duration_seconds: start_time.elapsed().as_secs_f64(),
        llm_tokens: generation.as_ref().map_or(0, |g| g.tokens),
        llm_cost: generation.as_ref().map_or(0.0, |g| g.cost),
    };

    let report = PortfolioReport {
        metadata,
        summary,
        narrative: generation.map(|g| g.text),
        repositories,
    };

    let output = Path::new(&config.general.output);
    report::write_json_report(&report, output)
        .with_context(|| format!("Failed to write report to {}", output.display()))?;

    print_summary(&report);
    println!("\n✅ Audit complete! Report saved to: {}", output.display());

    Ok(())
}

fn build_analyzer(config: &Config, host: Arc<dyn RepoHost>, token: Option<String>) -> RepoAnalyzer {
    let tool_timeout = Duration::from_secs(config.tools.timeout_seconds);

    let parts = Collaborators {
        host,
        checkout: Arc::new(repo::GitCheckout::new(token)),
        auditor: Arc::new(ComposerAuditor::new(config.tools.composer.clone(), tool_timeout)),
        counter: Arc::new(SccCounter::new(
            config.tools.scc.clone(),
            config.tools.wage,
            tool_timeout,
        )),
        branches: Arc::new(GitBranchScanner::new(
            config.branches.framework_package.clone(),
            SkipPolicy::new(config.branches.skip_prefixes.clone()),
            config.branches.sort_by_name,
        )),
    };

    let settings = AnalyzerSettings {
        window_days: config.github.window_days,
        excluded_dirs: config.tools.excluded_dirs.clone(),
        source_timeout: Duration::from_secs(config.tools.source_timeout_seconds),
    };

    RepoAnalyzer::new(parts, settings)
}

async fn request_narrative(
    config: &Config,
    target: &PortfolioTarget,
    summary: &analysis::PortfolioSummary,
) -> Option<Generation> {
    let generator = match OllamaGenerator::new(NarrativeConfig {
        ollama_url: config.model.ollama_url.clone(),
        model_name: config.model.name.clone(),
        temperature: config.model.temperature,
        timeout_seconds: config.model.timeout_seconds,
    }) {
        Ok(generator) => generator,
        Err(e) => {
            warn!("Narrative disabled: {:#}", e);
            return None;
        }
    };

    generate_narrative(&generator, &target.to_string(), summary).await
}

fn progress_bar(len: u64, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} repositories",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    pb
}

/// Handle --dry-run: list the repositories that would be audited.
async fn handle_dry_run(host: &dyn RepoHost, names: &[String]) -> Result<()> {
    println!("\n🔍 Dry run: nothing is cloned or analyzed.\n");

    if names.is_empty() {
        println!("   No repositories matched.");
    }

    for name in names {
        match host.repository(name).await {
            Ok(repo) => {
                let branches = host.branches(name).await.map(|b| b.len()).unwrap_or(0);
                println!(
                    "     📦 {} (default {}, {} branches){}",
                    repo.full_name,
                    repo.default_branch,
                    branches,
                    if repo.archived { " [archived]" } else { "" }
                );
            }
            Err(e) => println!("     ⚠️  {} ({})", name, e),
        }
    }

    println!("\n✅ Dry run complete. Total: {} repositories", names.len());
    Ok(())
}

fn print_summary(report: &PortfolioReport) {
    println!("\n📊 Portfolio Summary:");
    for line in report::summary_lines(report) {
        println!("   {}", line);
    }

    let degraded: Vec<&RepoStats> = report
        .repositories
        .iter()
        .filter(|r| !r.failures.is_empty())
        .collect();
    if !degraded.is_empty() {
        println!("\n⚠️  Partial results:");
        for repo in degraded {
            for failure in &repo.failures {
                println!(
                    "   {} - {}: {} ({})",
                    repo.full_name, failure.source, failure.kind, failure.reason
                );
            }
        }
    }

    let skipped = report.metadata.repositories_requested - report.metadata.repositories_analyzed;
    if skipped > 0 {
        println!("\n⚠️  {} repositories could not be resolved and were skipped", skipped);
    }

    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
