//! `composer.json` reading.

use crate::error::AuditError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const MANIFEST_FILE: &str = "composer.json";

/// The parts of `composer.json` the audit cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComposerManifest {
    #[serde(default)]
    pub require: BTreeMap<String, serde_json::Value>,
    #[serde(default, rename = "require-dev")]
    pub require_dev: BTreeMap<String, serde_json::Value>,
}

impl ComposerManifest {
    pub fn parse(content: &str) -> Result<Self, AuditError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load the manifest in `dir`. A missing file is `Ok(None)`.
    pub fn load(dir: &Path) -> Result<Option<Self>, AuditError> {
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content).map(Some)
    }

    /// Version constraint required for `package`, if it is a string.
    pub fn constraint(&self, package: &str) -> Option<String> {
        self.require
            .get(package)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    pub fn php_constraint(&self) -> Option<String> {
        self.constraint("php")
    }

    /// Whether any required package name contains `needle`.
    pub fn requires_like(&self, needle: &str) -> bool {
        self.require.keys().any(|name| name.contains(needle))
    }
}

/// Read the declaration for `package` from the manifest in `dir`.
pub fn read_declaration(dir: &Path, package: &str) -> Result<Option<String>, AuditError> {
    Ok(ComposerManifest::load(dir)?.and_then(|m| m.constraint(package)))
}
