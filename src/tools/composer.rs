//! Dependency audit through composer.
//!
//! Three JSON reports are combined into one [`PackageStat`] per locked
//! package: `composer audit` (advisories), `composer show --latest`
//! (installed and latest versions) and `composer licenses`. License data only
//! shows up after a full `composer install`, so the install runs first and
//! every step runs in sequence. Any failing step fails the whole audit.

use crate::error::AuditError;
use crate::models::{PackageStat, SecurityAdvisory};
use crate::scanner::manifest::MANIFEST_FILE;
use crate::tools::ToolCommand;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Audits the installed dependencies of a project.
#[async_trait]
pub trait DependencyAudit: Send + Sync {
    async fn audit(&self, project_root: &Path) -> Result<Vec<PackageStat>, AuditError>;
}

/// [`DependencyAudit`] backed by the composer CLI.
#[derive(Debug, Clone)]
pub struct ComposerAuditor {
    binary: String,
    timeout: Duration,
}

impl ComposerAuditor {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn command(&self, args: &[&str]) -> ToolCommand {
        ToolCommand::new(self.binary.clone(), args.iter().copied()).timeout(self.timeout)
    }
}

#[async_trait]
impl DependencyAudit for ComposerAuditor {
    async fn audit(&self, project_root: &Path) -> Result<Vec<PackageStat>, AuditError> {
        if !project_root.join(MANIFEST_FILE).is_file() {
            return Err(AuditError::SourceUnavailable(format!(
                "no {} in repository root",
                MANIFEST_FILE
            )));
        }

        info!("Installing composer dependencies in {}", project_root.display());
        self.command(&["install", "--no-interaction", "--no-progress", "--no-scripts"])
            .run(project_root)
            .await?;

        // `composer audit` exits non-zero when it finds advisories.
        let audit = self
            .command(&["audit", "--format=json", "--locked", "--no-dev"])
            .accept_any_exit()
            .reject_stderr()
            .run_json(project_root)
            .await?;
        let show = self
            .command(&["show", "--latest", "--format=json", "--locked", "--no-dev"])
            .reject_stderr()
            .run_json(project_root)
            .await?;
        let licenses = self
            .command(&["licenses", "--no-dev", "--format=json"])
            .reject_stderr()
            .run_json(project_root)
            .await?;

        let packages = assemble_packages(&audit, &show, &licenses)?;
        debug!("Audited {} packages", packages.len());

        Ok(packages)
    }
}

/// An advisory as printed by `composer audit --format=json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAdvisory {
    advisory_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    cve: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    severity: Option<String>,
}

impl From<RawAdvisory> for SecurityAdvisory {
    fn from(raw: RawAdvisory) -> Self {
        Self {
            advisory_id: raw.advisory_id,
            title: raw.title,
            cve: raw.cve.filter(|c| !c.is_empty()),
            link: raw.link.filter(|l| !l.is_empty()),
            severity: raw.severity.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// A package entry from `composer show --latest --format=json`.
#[derive(Debug, Deserialize)]
struct ShownPackage {
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    latest: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Advisories for one package come out of PHP's `json_encode` either as a
/// list or as an object keyed by position/id. Flatten both to a list.
pub fn normalize_advisories(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map.values().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Combine the three composer reports into per-package records, in the order
/// `composer show` lists the packages.
pub fn assemble_packages(
    audit: &Value,
    show: &Value,
    licenses: &Value,
) -> Result<Vec<PackageStat>, AuditError> {
    let shown: Vec<ShownPackage> = match show.get("locked") {
        Some(locked) => serde_json::from_value(locked.clone())
            .map_err(|e| AuditError::malformed("composer show", e.to_string()))?,
        None => Vec::new(),
    };

    let mut packages = Vec::with_capacity(shown.len());

    for package in shown {
        let advisories = audit
            .get("advisories")
            .and_then(|a| a.get(&package.name))
            .map(normalize_advisories)
            .unwrap_or_default()
            .into_iter()
            .map(|raw| {
                serde_json::from_value::<RawAdvisory>(raw)
                    .map(SecurityAdvisory::from)
                    .map_err(|e| AuditError::malformed("composer audit", e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let license = licenses
            .get("dependencies")
            .and_then(|d| d.get(&package.name))
            .and_then(|p| p.get("license"))
            .and_then(|l| l.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|l| l.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        packages.push(PackageStat {
            latest_version: package.latest.unwrap_or_else(|| package.version.clone()),
            installed_version: package.version,
            description: package.description.unwrap_or_default(),
            name: package.name,
            license,
            security_advisories: advisories,
        });
    }

    Ok(packages)
}
