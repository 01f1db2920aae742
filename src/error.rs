//! Error taxonomy for the analysis pipeline.
//!
//! Every analysis source returns `Result<T, AuditError>`. The orchestrator
//! classifies failures with [`AuditError::kind`] and records them next to
//! the degraded value instead of propagating them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors produced while analyzing a repository.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The repository has nothing for this source to look at
    /// (no composer.json, no working copy, ...).
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("GitHub API error {status}: {message}")]
    RemoteApi { status: u16, message: String },

    /// The host refused the request until its rate-limit window resets.
    #[error("GitHub rate limit exceeded ({message}), resets at {reset}")]
    RateLimited { reset: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed output from {tool}: {message}")]
    MalformedOutput { tool: String, message: String },

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task failed: {0}")]
    Task(String),

    /// Blocking work stopped early because its caller gave up on it.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Coarse classification of an [`AuditError`], recorded in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SourceUnavailable,
    ExternalToolFailure,
    RemoteApiError,
    RateLimited,
    Timeout,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::SourceUnavailable => write!(f, "source unavailable"),
            FailureKind::ExternalToolFailure => write!(f, "external tool failure"),
            FailureKind::RemoteApiError => write!(f, "remote API error"),
            FailureKind::RateLimited => write!(f, "rate limited"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Internal => write!(f, "internal error"),
        }
    }
}

impl AuditError {
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        AuditError::ExternalTool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn malformed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        AuditError::MalformedOutput {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Classify this error for failure markers.
    pub fn kind(&self) -> FailureKind {
        match self {
            AuditError::SourceUnavailable(_) => FailureKind::SourceUnavailable,
            AuditError::ExternalTool { .. } | AuditError::MalformedOutput { .. } => {
                FailureKind::ExternalToolFailure
            }
            AuditError::Timeout { .. } | AuditError::Cancelled(_) => FailureKind::Timeout,
            AuditError::RateLimited { .. } => FailureKind::RateLimited,
            AuditError::RemoteApi { .. } | AuditError::NotFound(_) | AuditError::Http(_) => {
                FailureKind::RemoteApiError
            }
            AuditError::Git(_) | AuditError::Io(_) | AuditError::Json(_) | AuditError::Task(_) => {
                FailureKind::Internal
            }
        }
    }

    /// Whether this is a "not found" answer from the remote host.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AuditError::NotFound(_) | AuditError::RemoteApi { status: 404, .. }
        )
    }
}
