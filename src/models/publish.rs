//! Content publishing: sync a local tree into a bucket, then invalidate.

use crate::models::{bucket::StorageResource, distribution::DistributionResource};
use serde::Serialize;
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Ceilings applied to a single sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Largest object that may be held in memory while transferring.
    pub memory_limit_bytes: u64,
    /// Total bytes a sync may stage.
    pub ephemeral_storage_bytes: u64,
}

impl ResourceLimits {
    pub fn from_units(memory_limit_mib: u64, ephemeral_storage_gib: u64) -> Self {
        Self {
            memory_limit_bytes: memory_limit_mib.saturating_mul(MIB),
            ephemeral_storage_bytes: ephemeral_storage_gib.saturating_mul(GIB),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from_units(2048, 2)
    }
}

/// One publish of `source` into `destination`, fronted by `distribution`.
///
/// With `prune` the destination becomes a one-way mirror of the source:
/// objects put into the bucket by any other means are deleted.
#[derive(Debug, Clone)]
pub struct PublishJob<'a> {
    pub source: PathBuf,
    pub destination: &'a StorageResource,
    pub distribution: &'a DistributionResource,
    pub invalidation_paths: Vec<String>,
    pub prune: bool,
    pub limits: ResourceLimits,
}

/// What a sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub uploaded: Vec<String>,
    pub unchanged: usize,
    pub deleted: Vec<String>,
    pub bytes_uploaded: u64,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.uploaded.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub report: SyncReport,
    /// Id of the invalidation, or `None` when it failed.
    pub invalidation_id: Option<String>,
    /// Non-fatal problems, such as a rejected invalidation.
    pub warnings: Vec<String>,
}
