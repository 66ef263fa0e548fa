//! Storage resource creation.

use crate::{
    errors::StackError,
    models::{
        bucket::{BucketProps, StorageResource, validate_bucket_name},
        resource::ResourceSpec,
    },
    services::provisioner::Provisioner,
};
use tracing::warn;

impl Provisioner<'_> {
    /// Create (or converge) the bucket `name`.
    ///
    /// The name is validated before any backend call. A name held by another
    /// stack fails with `NameConflict`.
    pub async fn create_bucket(
        &mut self,
        name: &str,
        props: BucketProps,
    ) -> Result<StorageResource, StackError> {
        validate_bucket_name(name)?;
        if !props.public_access.is_blocked() {
            warn!(
                bucket = name,
                public_access = ?props.public_access,
                "bucket declared with public access; objects are readable without the access identity"
            );
        }
        let handle = self.apply(name, &ResourceSpec::Bucket(props)).await?;
        Ok(StorageResource::new(handle, props))
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::StackError;
    use crate::models::{bucket::BucketProps, context::StackContext};
    use crate::services::{
        provisioner::Provisioner, retry::RetryPolicy, testing::memory_backend,
    };

    #[tokio::test]
    async fn buckets_default_to_blocked_public_access() {
        let (backend, _dir) = memory_backend().await;
        let ctx = StackContext::new("my-app", "local", "eu-west-1").unwrap();
        let bucket = Provisioner::new(&backend, &ctx, "Frontend", RetryPolicy::none())
            .create_bucket(&ctx.bucket_name("Frontend"), BucketProps::default())
            .await
            .unwrap();

        assert_eq!(bucket.name(), "local-my-app-frontend-bucket");
        assert!(bucket.props().public_access.is_blocked());
    }

    #[tokio::test]
    async fn invalid_names_fail_before_the_backend_is_touched() {
        let (backend, _dir) = memory_backend().await;
        let ctx = StackContext::new("My_App", "local", "eu-west-1").unwrap();
        let mut p = Provisioner::new(&backend, &ctx, "Frontend", RetryPolicy::none());

        let err = p
            .create_bucket(&ctx.bucket_name("Frontend"), BucketProps::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::InvalidBucketName { .. }));
        assert!(p.applied().is_empty());
    }
}
