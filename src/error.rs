//! Error types for sitevault
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown site, missing content)
//! - 3: Blocked (lock contention, invalid move)
//! - 4: Operation failed (git error, deployment failure)

use std::path::PathBuf;
use thiserror::Error;

use crate::registry::StoreKind;

/// Exit codes for the sitevault CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for sitevault operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Store unavailable for site '{site}' ({kind}): {reason}")]
    StoreUnavailable {
        site: String,
        kind: StoreKind,
        reason: String,
    },

    #[error("Content not found for site '{site}': {path}")]
    ContentNotFound { site: String, path: String },

    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("Site already exists: {0}")]
    SiteExists(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Blocked (exit code 3)
    #[error("Invalid move from {from} to {to}: {reason}")]
    InvalidMove {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    // Operation failures (exit code 4)
    #[error("Deployment to '{environment}' failed [commit ID = {commit_id}]: {reason}")]
    Deployment {
        environment: String,
        commit_id: String,
        reason: String,
    },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::StoreUnavailable { .. }
            | Error::ContentNotFound { .. }
            | Error::ReferenceNotFound(_)
            | Error::SiteExists(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_) => exit_codes::USER_ERROR,

            Error::InvalidMove { .. } | Error::LockFailed(_) => exit_codes::BLOCKED,

            Error::Deployment { .. }
            | Error::Git(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for machine-readable output.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::StoreUnavailable { site, kind, reason } => Some(serde_json::json!({
                "site": site,
                "kind": kind.as_str(),
                "reason": reason,
            })),
            Error::ContentNotFound { site, path } => Some(serde_json::json!({
                "site": site,
                "path": path,
            })),
            Error::InvalidMove { from, to, reason } => Some(serde_json::json!({
                "from": from,
                "to": to,
                "reason": reason,
            })),
            Error::Deployment {
                environment,
                commit_id,
                reason,
            } => Some(serde_json::json!({
                "environment": environment,
                "commit_id": commit_id,
                "reason": reason,
            })),
            Error::InvalidConfig(message) | Error::InvalidArgument(message) => {
                Some(serde_json::json!({ "message": message }))
            }
            _ => None,
        }
    }

    /// True when a git2 error (or this error) means a missing ref/object.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ReferenceNotFound(_) | Error::ContentNotFound { .. } => true,
            Error::Git(err) => err.code() == git2::ErrorCode::NotFound,
            _ => false,
        }
    }
}

/// Result type alias for sitevault operations
pub type Result<T> = std::result::Result<T, Error>;
