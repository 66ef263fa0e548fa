//! Identity & access binding: the access identity a distribution reads
//! through, and the bucket policy statement granting it read access.

use crate::{
    errors::StackError,
    models::{
        bucket::StorageResource,
        identity::{AccessIdentity, AccessPolicyStatement},
        resource::{IdentitySpec, PolicyStatementSpec, ResourceSpec},
    },
    services::provisioner::Provisioner,
};
use tracing::debug;

impl Provisioner<'_> {
    /// Create (or re-use) the access identity `name`.
    pub async fn create_identity(
        &mut self,
        name: &str,
        comment: &str,
    ) -> Result<AccessIdentity, StackError> {
        let spec = ResourceSpec::Identity(IdentitySpec {
            comment: comment.to_string(),
        });
        let handle = self.apply(name, &spec).await?;
        Ok(AccessIdentity::new(handle))
    }

    /// Append a read-only statement for `identity` on every object of
    /// `storage`.
    ///
    /// Must complete before a distribution reads through `identity`. A
    /// distribution built without it still provisions, but every origin read
    /// it makes is denied.
    pub async fn grant_read(
        &mut self,
        name: &str,
        identity: &AccessIdentity,
        storage: &StorageResource,
    ) -> Result<AccessPolicyStatement, StackError> {
        let statement = AccessPolicyStatement::read_only(
            format!("GrantRead{}", identity.id()),
            identity.canonical_user_id(),
            storage.arn_for_objects("*"),
        );
        let spec = ResourceSpec::PolicyStatement(PolicyStatementSpec {
            bucket: storage.name().to_string(),
            statement: statement.clone(),
        });
        self.apply(name, &spec).await?;
        debug!(
            bucket = storage.name(),
            identity = identity.id(),
            "read access granted"
        );
        Ok(statement)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{
        bucket::BucketProps, context::StackContext, identity::READ_OBJECT_ACTION,
    };
    use crate::services::{
        provisioner::Provisioner, retry::RetryPolicy, testing::memory_backend,
    };

    #[tokio::test]
    async fn grants_accumulate_on_the_bucket_policy() {
        let (backend, _dir) = memory_backend().await;
        let ctx = StackContext::new("my-app", "local", "eu-west-1").unwrap();
        let mut p = Provisioner::new(&backend, &ctx, "Frontend", RetryPolicy::none());

        let first = p.create_identity("oai-one", "first").await.unwrap();
        let second = p.create_identity("oai-two", "second").await.unwrap();
        let bucket = p
            .create_bucket(&ctx.bucket_name("Frontend"), BucketProps::default())
            .await
            .unwrap();

        p.grant_read("policy-one", &first, &bucket).await.unwrap();
        let stmt = p.grant_read("policy-two", &second, &bucket).await.unwrap();
        assert!(stmt.actions.contains(READ_OBJECT_ACTION));

        let statements = backend.bucket_statements(bucket.name()).await.unwrap();
        assert_eq!(statements.len(), 2);
        let object = bucket.arn_for_objects("index.html");
        assert!(statements.iter().any(|s| s.allows(READ_OBJECT_ACTION, &object, first.canonical_user_id())));
        assert!(statements.iter().any(|s| s.allows(READ_OBJECT_ACTION, &object, second.canonical_user_id())));
    }

    #[tokio::test]
    async fn identity_creation_is_idempotent() {
        let (backend, _dir) = memory_backend().await;
        let ctx = StackContext::new("my-app", "local", "eu-west-1").unwrap();

        let a = Provisioner::new(&backend, &ctx, "Frontend", RetryPolicy::none())
            .create_identity("oai", "OAI for Frontend")
            .await
            .unwrap();
        let b = Provisioner::new(&backend, &ctx, "Frontend", RetryPolicy::none())
            .create_identity("oai", "OAI for Frontend")
            .await
            .unwrap();
        assert_eq!(a, b);
    }
}
