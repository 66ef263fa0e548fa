use crate::{
    models::{distribution::TlsVersion, resource::ResourceKind},
    services::backend::BackendError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Failures of a single provisioning step.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("invalid stack context: {0}")]
    InvalidContext(String),
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("resource name `{0}` collides with a sibling resource in this stack")]
    NameCollision(String),
    #[error("{kind} `{name}` already exists and is owned by `{owner}`")]
    NameConflict {
        kind: ResourceKind,
        name: String,
        owner: String,
    },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid distribution config: {0}")]
    InvalidDistributionConfig(String),
    #[error("backend rejected {kind} `{name}`: {source}")]
    BackendRejected {
        kind: ResourceKind,
        name: String,
        #[source]
        source: BackendError,
    },
    #[error("origin unreachable for distribution `{name}`: {source}")]
    OriginUnreachable {
        name: String,
        #[source]
        source: BackendError,
    },
    #[error("minimum TLS version {requested} is below the supported floor {supported}")]
    UnsupportedTlsVersion {
        requested: TlsVersion,
        supported: TlsVersion,
    },
    #[error("content sync into `{bucket}` failed: {source}")]
    SyncFailed {
        bucket: String,
        #[source]
        source: BackendError,
    },
    #[error("cache invalidation on `{distribution}` failed: {source}")]
    InvalidationFailed {
        distribution: String,
        #[source]
        source: BackendError,
    },
    #[error("{kind} `{name}` is not provisioned")]
    NotProvisioned { kind: ResourceKind, name: String },
    #[error("backend request failed: {0}")]
    Backend(#[from] BackendError),
}

impl StackError {
    /// Classify a backend failure for the resource being applied.
    pub fn from_backend(kind: ResourceKind, name: &str, err: BackendError) -> Self {
        match err {
            BackendError::AlreadyExists { owner, .. } => StackError::NameConflict {
                kind,
                name: name.to_string(),
                owner,
            },
            BackendError::MissingReference { .. } if kind == ResourceKind::Distribution => {
                StackError::OriginUnreachable {
                    name: name.to_string(),
                    source: err,
                }
            }
            other => StackError::BackendRejected {
                kind,
                name: name.to_string(),
                source: other,
            },
        }
    }
}

/// The step of a pass that was running when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Plan,
    Apply,
    Delete,
    Publish,
    Export,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Plan => "plan",
            Operation::Apply => "apply",
            Operation::Delete => "delete",
            Operation::Publish => "publish",
            Operation::Export => "export",
        };
        f.write_str(name)
    }
}

/// A failed provisioning pass.
///
/// Resources listed in `applied` were left in place and a retry of the pass
/// converges from there.
#[derive(Debug, Error)]
#[error(
    "{operation} `{resource}` failed (depends on: [{}]; already applied: [{}]): {source}",
    .chain.join(" -> "),
    .applied.join(", ")
)]
pub struct PassError {
    pub operation: Operation,
    pub resource: String,
    pub chain: Vec<String>,
    pub applied: Vec<String>,
    #[source]
    pub source: StackError,
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        tracing::error!(error = %err, "edge request failed");
        AppError::internal(err.to_string())
    }
}
