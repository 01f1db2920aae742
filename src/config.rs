//! Configuration file handling.
//!
//! Settings come from `.portfolio-audit.toml`, with command-line arguments
//! layered on top by [`Config::merge_with_args`].

use crate::scanner::branches::DEFAULT_SKIP_PREFIXES;
use crate::tools::scc::DEFAULT_EXCLUDED_DIRS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".portfolio-audit.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub github: GithubConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub branches: BranchesConfig,

    #[serde(default)]
    pub model: ModelConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Report file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Repositories analyzed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Leave archived repositories out of organization and team listings.
    #[serde(default = "default_true")]
    pub skip_archived: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            concurrency: default_concurrency(),
            skip_archived: true,
        }
    }
}

fn default_output() -> String {
    "portfolio_report.json".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// GitHub API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Trailing window for closed issues, merged PRs and commits.
    #[serde(default = "default_window_days")]
    pub window_days: i64,

    #[serde(default = "default_request_timeout")]
    pub timeout_seconds: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            window_days: default_window_days(),
            timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_window_days() -> i64 {
    30
}

fn default_request_timeout() -> u64 {
    60
}

/// External toolchain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_composer")]
    pub composer: String,

    #[serde(default = "default_scc")]
    pub scc: String,

    /// Average yearly wage for scc's cost estimate.
    #[serde(default = "default_wage")]
    pub wage: u64,

    /// Limit for a single tool invocation.
    #[serde(default = "default_tool_timeout")]
    pub timeout_seconds: u64,

    /// Limit for a whole source of one repository, including the clone.
    #[serde(default = "default_source_timeout")]
    pub source_timeout_seconds: u64,

    /// Directories left out of the code count.
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            composer: default_composer(),
            scc: default_scc(),
            wage: default_wage(),
            timeout_seconds: default_tool_timeout(),
            source_timeout_seconds: default_source_timeout(),
            excluded_dirs: default_excluded_dirs(),
        }
    }
}

fn default_composer() -> String {
    "composer".to_string()
}

fn default_scc() -> String {
    "scc".to_string()
}

fn default_wage() -> u64 {
    56286
}

fn default_tool_timeout() -> u64 {
    600
}

fn default_source_timeout() -> u64 {
    1800
}

fn default_excluded_dirs() -> Vec<String> {
    DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect()
}

/// Branch scanning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchesConfig {
    /// Branches starting with any of these are never read.
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,

    /// Package whose declared version is compared across branches.
    #[serde(default = "default_framework_package")]
    pub framework_package: String,

    /// Scan branches in name order instead of listing order.
    #[serde(default = "default_true")]
    pub sort_by_name: bool,
}

impl Default for BranchesConfig {
    fn default() -> Self {
        Self {
            skip_prefixes: default_skip_prefixes(),
            framework_package: default_framework_package(),
            sort_by_name: true,
        }
    }
}

fn default_skip_prefixes() -> Vec<String> {
    DEFAULT_SKIP_PREFIXES.iter().map(|p| p.to_string()).collect()
}

fn default_framework_package() -> String {
    "laravel/framework".to_string()
}

/// Narrative model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub name: String,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_model_timeout")]
    pub timeout_seconds: u64,

    /// Write a narrative at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_model_timeout(),
            enabled: true,
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.5
}

fn default_model_timeout() -> u64 {
    300
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the working directory.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only arguments given on the command line override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if args.include_archived {
            self.general.skip_archived = false;
        }

        if let Some(window_days) = args.window_days {
            self.github.window_days = window_days;
        }

        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if args.no_narrative {
            self.model.enabled = false;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.name, "llama3.2:latest");
        assert_eq!(config.github.window_days, 30);
        assert_eq!(config.tools.excluded_dirs, vec!["vendor", "node_modules", ".git"]);
        assert!(config.branches.skip_prefixes.contains(&"dependabot".to_string()));
        assert!(config.branches.sort_by_name);
        assert!(config.general.skip_archived);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "reports/uni.json"
concurrency = 8

[github]
window_days = 14

[tools]
composer = "/usr/local/bin/composer"
excluded_dirs = ["vendor"]

[branches]
skip_prefixes = ["renovate"]
framework_package = "symfony/framework-bundle"

[model]
name = "qwen2.5:14b"
enabled = false
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "reports/uni.json");
        assert_eq!(config.general.concurrency, 8);
        assert_eq!(config.github.window_days, 14);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.tools.composer, "/usr/local/bin/composer");
        assert_eq!(config.tools.scc, "scc");
        assert_eq!(config.tools.excluded_dirs, vec!["vendor"]);
        assert_eq!(config.branches.skip_prefixes, vec!["renovate"]);
        assert_eq!(config.branches.framework_package, "symfony/framework-bundle");
        assert!(config.branches.sort_by_name);
        assert_eq!(config.model.name, "qwen2.5:14b");
        assert!(!config.model.enabled);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[github]"));
        assert!(toml_str.contains("[tools]"));
        assert!(toml_str.contains("[branches]"));
        assert!(toml_str.contains("[model]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.tools.wage, 56286);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_merge_only_overrides_given_args() {
        let mut config = Config::default();
        config.general.concurrency = 8;
        config.model.name = "from-file".to_string();

        let args = Args::parse_from(["portfolio-audit", "--org", "uni", "--window-days", "7"]);
        config.merge_with_args(&args);

        assert_eq!(config.general.concurrency, 8);
        assert_eq!(config.model.name, "from-file");
        assert_eq!(config.github.window_days, 7);
        assert!(config.model.enabled);

        let args = Args::parse_from([
            "portfolio-audit",
            "--org",
            "uni",
            "--output",
            "out.json",
            "--model",
            "mistral",
            "--no-narrative",
            "--include-archived",
        ]);
        config.merge_with_args(&args);

        assert_eq!(PathBuf::from(&config.general.output), PathBuf::from("out.json"));
        assert_eq!(config.model.name, "mistral");
        assert!(!config.model.enabled);
        assert!(!config.general.skip_archived);
    }
}
