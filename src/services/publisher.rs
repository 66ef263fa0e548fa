//! Content publishing: sync a source tree into the bucket, then invalidate
//! the distribution's cache.

use crate::{
    errors::StackError,
    models::publish::{PublishJob, PublishOutcome},
    services::provisioner::Provisioner,
};
use tracing::{info, warn};

impl Provisioner<'_> {
    /// Run `job`.
    ///
    /// A failed transfer aborts the publish with `SyncFailed` and no
    /// invalidation is issued. A rejected invalidation is only a warning:
    /// the new content is in the bucket but cached copies stay until their
    /// ttl expires.
    pub async fn publish(&mut self, job: &PublishJob<'_>) -> Result<PublishOutcome, StackError> {
        let backend = self.backend;
        let bucket = job.destination.name();

        let report = self
            .retry
            .run("sync_objects", || {
                backend.sync_objects(&job.source, job.destination.handle(), job.prune, &job.limits)
            })
            .await
            .map_err(|source| StackError::SyncFailed {
                bucket: bucket.to_string(),
                source,
            })?;

        info!(
            bucket,
            source = %job.source.display(),
            uploaded = report.uploaded.len(),
            unchanged = report.unchanged,
            deleted = report.deleted.len(),
            "content synced"
        );

        let mut outcome = PublishOutcome {
            report,
            invalidation_id: None,
            warnings: Vec::new(),
        };

        match self
            .retry
            .run("invalidate_cache", || {
                backend.invalidate_cache(job.distribution.handle(), &job.invalidation_paths)
            })
            .await
        {
            Ok(id) => outcome.invalidation_id = Some(id),
            Err(source) => {
                let err = StackError::InvalidationFailed {
                    distribution: job.distribution.id().to_string(),
                    source,
                };
                warn!(error = %err, "cached content stays stale until its ttl expires");
                outcome.warnings.push(err.to_string());
            }
        }

        Ok(outcome)
    }
}
