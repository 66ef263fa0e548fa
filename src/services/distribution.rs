//! Distribution creation.

use crate::{
    errors::StackError,
    models::{
        bucket::StorageResource,
        distribution::{DistributionConfig, DistributionResource},
        identity::AccessIdentity,
        resource::{DistributionSpec, ResourceSpec},
    },
    services::provisioner::Provisioner,
};

impl Provisioner<'_> {
    /// Create (or converge) the distribution `name` in front of `origin`,
    /// reading through `identity`.
    ///
    /// Fails with `UnsupportedTlsVersion` when the requested security policy
    /// is older than the backend supports, and with `OriginUnreachable` when
    /// the origin or identity does not resolve. Read access for `identity` is
    /// not checked here.
    pub async fn create_distribution(
        &mut self,
        name: &str,
        origin: &StorageResource,
        identity: &AccessIdentity,
        config: DistributionConfig,
    ) -> Result<DistributionResource, StackError> {
        let supported = self.backend.min_tls_version();
        if config.minimum_protocol_version < supported {
            return Err(StackError::UnsupportedTlsVersion {
                requested: config.minimum_protocol_version,
                supported,
            });
        }
        config
            .validate()
            .map_err(StackError::InvalidDistributionConfig)?;

        let spec = ResourceSpec::Distribution(DistributionSpec {
            origin_bucket: origin.name().to_string(),
            identity: identity.id().to_string(),
            config: config.clone(),
        });
        let handle = self.apply(name, &spec).await?;
        Ok(DistributionResource::new(handle, config))
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::StackError;
    use crate::models::{
        bucket::{BucketProps, StorageResource},
        context::StackContext,
        distribution::{DistributionConfig, TlsVersion},
        resource::{ResourceHandle, ResourceKind},
    };
    use crate::services::{
        provisioner::Provisioner, retry::RetryPolicy, testing::memory_backend,
    };

    #[tokio::test]
    async fn tls_floor_below_platform_minimum_is_rejected() {
        let (backend, _dir) = memory_backend().await;
        let backend = backend.with_min_tls_version(TlsVersion::TlsV1_2_2019);
        let ctx = StackContext::new("my-app", "local", "eu-west-1").unwrap();
        let mut p = Provisioner::new(&backend, &ctx, "Frontend", RetryPolicy::none());

        let identity = p.create_identity("oai", "c").await.unwrap();
        let bucket = p
            .create_bucket(&ctx.bucket_name("Frontend"), BucketProps::default())
            .await
            .unwrap();

        let mut config = DistributionConfig::default();
        config.minimum_protocol_version = TlsVersion::TlsV1_2_2018;
        let err = p
            .create_distribution("dist", &bucket, &identity, config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StackError::UnsupportedTlsVersion {
                requested: TlsVersion::TlsV1_2_2018,
                supported: TlsVersion::TlsV1_2_2019
            }
        ));
    }

    #[tokio::test]
    async fn dangling_origin_is_unreachable() {
        let (backend, _dir) = memory_backend().await;
        let ctx = StackContext::new("my-app", "local", "eu-west-1").unwrap();
        let mut p = Provisioner::new(&backend, &ctx, "Frontend", RetryPolicy::none());
        let identity = p.create_identity("oai", "c").await.unwrap();

        let ghost = StorageResource::new(
            ResourceHandle {
                kind: ResourceKind::Bucket,
                name: "ghost-bucket".into(),
                physical_id: "ghost-bucket".into(),
                attributes: Default::default(),
            },
            BucketProps::default(),
        );
        let err = p
            .create_distribution("dist", &ghost, &identity, DistributionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::OriginUnreachable { name, .. } if name == "dist"));
    }

    #[tokio::test]
    async fn distribution_gets_domain_name() {
        let (backend, _dir) = memory_backend().await;
        let ctx = StackContext::new("my-app", "local", "eu-west-1").unwrap();
        let mut p = Provisioner::new(&backend, &ctx, "Frontend", RetryPolicy::none());
        let identity = p.create_identity("oai", "c").await.unwrap();
        let bucket = p
            .create_bucket(&ctx.bucket_name("Frontend"), BucketProps::default())
            .await
            .unwrap();

        let dist = p
            .create_distribution("dist", &bucket, &identity, DistributionConfig::default())
            .await
            .unwrap();
        assert!(dist.id().starts_with('E'));
        assert_eq!(
            dist.domain_name(),
            format!("{}.edge.localhost", dist.id().to_lowercase())
        );
    }
}
