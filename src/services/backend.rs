//! The provisioning backend the stack composer depends on.
//!
//! Composition logic only talks to this trait; `LocalBackend` is the
//! implementation shipped with the crate.

use crate::models::{
    distribution::TlsVersion,
    publish::{ResourceLimits, SyncReport},
    resource::{ResourceHandle, ResourceKind, ResourceRecord, ResourceSpec},
};
use async_trait::async_trait;
use std::{io, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{kind} `{name}` already exists (owner `{owner}`)")]
    AlreadyExists {
        kind: ResourceKind,
        name: String,
        owner: String,
    },
    #[error("{kind} `{name}` not found")]
    NotFound { kind: ResourceKind, name: String },
    #[error("referenced {kind} `{id}` does not exist")]
    MissingReference { kind: ResourceKind, id: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt resource record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BackendError {
    /// Errors worth retrying with backoff. Everything else fails the step
    /// on first occurrence.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Unavailable(_) => true,
            BackendError::Sqlx(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            BackendError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Creates, updates and deletes declared resources, syncs content and
/// invalidates caches. Every call is a blocking network round-trip from the
/// caller's point of view.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Create `name` as described by `spec`, tagged with `owner`.
    async fn create_resource(
        &self,
        name: &str,
        owner: &str,
        spec: &ResourceSpec,
    ) -> BackendResult<ResourceHandle>;

    /// Replace the stored description of an existing resource.
    async fn update_resource(
        &self,
        handle: &ResourceHandle,
        spec: &ResourceSpec,
    ) -> BackendResult<ResourceHandle>;

    async fn delete_resource(&self, handle: &ResourceHandle) -> BackendResult<()>;

    /// Current state of `name`, used to diff a declaration against it.
    async fn describe_resource(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> BackendResult<Option<ResourceRecord>>;

    /// All resources tagged with `owner`.
    async fn list_resources(&self, owner: &str) -> BackendResult<Vec<ResourceRecord>>;

    /// Mirror the files under `source` into the bucket behind `destination`.
    async fn sync_objects(
        &self,
        source: &Path,
        destination: &ResourceHandle,
        prune: bool,
        limits: &ResourceLimits,
    ) -> BackendResult<SyncReport>;

    /// Evict cached responses matching `paths`; returns the invalidation id.
    async fn invalidate_cache(
        &self,
        distribution: &ResourceHandle,
        paths: &[String],
    ) -> BackendResult<String>;

    /// Oldest security policy the platform still accepts.
    fn min_tls_version(&self) -> TlsVersion {
        TlsVersion::TlsV1
    }
}
