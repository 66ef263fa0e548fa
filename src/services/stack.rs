//! Stack composition.
//!
//! A `StackApp` groups frontend stacks under one `StackContext`. A pass
//! first derives and claims every resource name of every stack, so naming
//! collisions abort before the backend is touched, then applies each stack
//! in dependency order:
//!
//! identity → bucket → read grant → distribution → publish → outputs
//!
//! When a step fails the resources applied before it are left in place and a
//! new pass converges from there.

use crate::{
    errors::{Operation, PassError, StackError},
    models::{
        bucket::{BucketProps, RemovalPolicy, StorageResource},
        context::{NameRegistry, StackContext},
        distribution::{DistributionConfig, DistributionResource},
        identity::AccessIdentity,
        outputs::OutputSet,
        publish::{PublishJob, PublishOutcome, ResourceLimits},
        resource::{ResourceKind, ResourceRecord, ResourceSpec},
    },
    services::{
        backend::{BackendError, ProvisioningBackend},
        outputs::{ProvisionedStack, export},
        provisioner::{AppliedResource, Provisioner},
        retry::RetryPolicy,
    },
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};

/// Local content published into the bucket on every pass.
#[derive(Debug, Clone)]
pub struct ContentSource {
    pub path: PathBuf,
    pub invalidation_paths: Vec<String>,
    pub prune: bool,
    pub limits: ResourceLimits,
}

impl ContentSource {
    /// Mirror `path` with pruning and invalidate everything.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            invalidation_paths: vec!["/*".to_string()],
            prune: true,
            limits: ResourceLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrontendProps {
    /// Defaults to `OAI for {stack name}`.
    pub identity_comment: Option<String>,
    pub bucket: BucketProps,
    pub distribution: DistributionConfig,
    /// Nothing is published when `None`.
    pub content: Option<ContentSource>,
}

/// Derived identifiers of one frontend stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendNames {
    pub identity: String,
    pub bucket: String,
    pub policy: String,
    pub distribution: String,
    /// Names the publish step in failure reports. Publishing stores no
    /// resource record of its own.
    pub deployment: String,
}

impl FrontendNames {
    /// Names backed by a stored resource, in apply order.
    pub fn stored(&self) -> [(ResourceKind, &str); 4] {
        [
            (ResourceKind::Identity, self.identity.as_str()),
            (ResourceKind::Bucket, self.bucket.as_str()),
            (ResourceKind::PolicyStatement, self.policy.as_str()),
            (ResourceKind::Distribution, self.distribution.as_str()),
        ]
    }
}

/// A bucket fronted by a distribution, with optional content.
#[derive(Debug, Clone)]
pub struct FrontendStack {
    name: String,
    props: FrontendProps,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub stack: String,
    pub resources: Vec<AppliedResource>,
    pub publish: Option<PublishOutcome>,
    pub outputs: OutputSet,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DestroyReport {
    pub deleted: Vec<String>,
    pub retained: Vec<String>,
}

struct StepFailure {
    operation: Operation,
    resource: String,
    chain: Vec<String>,
    source: StackError,
}

impl StepFailure {
    fn at<'n>(
        operation: Operation,
        resource: &'n str,
        chain: &'n [&'n str],
    ) -> impl FnOnce(StackError) -> StepFailure + 'n {
        move |source| StepFailure {
            operation,
            resource: resource.to_string(),
            chain: chain.iter().map(|s| s.to_string()).collect(),
            source,
        }
    }

    fn into_pass_error(self, applied: &[AppliedResource]) -> PassError {
        PassError {
            operation: self.operation,
            resource: self.resource,
            chain: self.chain,
            applied: applied.iter().map(|r| r.name.clone()).collect(),
            source: self.source,
        }
    }
}

impl FrontendStack {
    pub fn new(name: impl Into<String>, props: FrontendProps) -> Self {
        Self {
            name: name.into(),
            props,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn props(&self) -> &FrontendProps {
        &self.props
    }

    /// Derive and claim this stack's identifiers in `registry`.
    pub fn names(
        &self,
        ctx: &StackContext,
        registry: &mut NameRegistry,
    ) -> Result<FrontendNames, StackError> {
        Ok(FrontendNames {
            identity: registry.claim(ctx.resource_id(&self.name, "OAI"))?,
            bucket: registry.claim(ctx.bucket_name(&self.name))?,
            policy: registry.claim(ctx.resource_id(&self.name, "BucketPolicy"))?,
            distribution: registry.claim(ctx.resource_id(&self.name, "Distribution"))?,
            deployment: registry.claim(ctx.resource_id(&self.name, "Deploy"))?,
        })
    }

    fn identity_comment(&self) -> String {
        self.props
            .identity_comment
            .clone()
            .unwrap_or_else(|| format!("OAI for {}", self.name))
    }

    /// Fail with `NameConflict` when another stack already owns one of
    /// `names`. Nothing is written to the backend.
    pub async fn preflight(
        &self,
        ctx: &StackContext,
        names: &FrontendNames,
        backend: &dyn ProvisioningBackend,
        retry: &RetryPolicy,
    ) -> Result<(), PassError> {
        let owner = ctx.stack_id(&self.name);
        for (kind, name) in names.stored() {
            let plan_error = |source: StackError| PassError {
                operation: Operation::Plan,
                resource: name.to_string(),
                chain: Vec::new(),
                applied: Vec::new(),
                source,
            };
            let existing = retry
                .run("describe_resource", || backend.describe_resource(kind, name))
                .await
                .map_err(|err| plan_error(StackError::from_backend(kind, name, err)))?;
            if let Some(record) = existing {
                if record.owner != owner {
                    return Err(plan_error(StackError::NameConflict {
                        kind,
                        name: name.to_string(),
                        owner: record.owner,
                    }));
                }
            }
        }
        Ok(())
    }

    /// Apply this stack with names already claimed by the caller.
    pub async fn deploy_planned(
        &self,
        ctx: &StackContext,
        names: &FrontendNames,
        backend: &dyn ProvisioningBackend,
        retry: RetryPolicy,
    ) -> Result<DeployReport, PassError> {
        if let Err(err) = self.preflight(ctx, names, backend, &retry).await {
            error!(stack = %ctx.stack_id(&self.name), error = %err, "preflight failed");
            return Err(err);
        }

        let mut provisioner = Provisioner::new(backend, ctx, &self.name, retry);
        info!(stack = %provisioner.owner(), "starting provisioning pass");

        let result = self.run(&mut provisioner, names).await;
        let owner = provisioner.owner().to_string();
        let applied = provisioner.into_applied();

        match result {
            Ok((publish, outputs)) => {
                info!(stack = %owner, resources = applied.len(), "provisioning pass complete");
                Ok(DeployReport {
                    stack: owner,
                    resources: applied,
                    publish,
                    outputs,
                })
            }
            Err(step) => {
                let err = step.into_pass_error(&applied);
                error!(stack = %owner, error = %err, "provisioning pass failed");
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        p: &mut Provisioner<'_>,
        names: &FrontendNames,
    ) -> Result<(Option<PublishOutcome>, OutputSet), StepFailure> {
        let identity = p
            .create_identity(&names.identity, &self.identity_comment())
            .await
            .map_err(StepFailure::at(Operation::Apply, &names.identity, &[]))?;

        let bucket = p
            .create_bucket(&names.bucket, self.props.bucket)
            .await
            .map_err(StepFailure::at(Operation::Apply, &names.bucket, &[]))?;

        // The grant has to exist before the distribution reads through the
        // identity.
        let grant_chain = [names.identity.as_str(), names.bucket.as_str()];
        p.grant_read(&names.policy, &identity, &bucket)
            .await
            .map_err(StepFailure::at(Operation::Apply, &names.policy, &grant_chain))?;

        let dist_chain = [
            names.identity.as_str(),
            names.bucket.as_str(),
            names.policy.as_str(),
        ];
        let distribution = p
            .create_distribution(
                &names.distribution,
                &bucket,
                &identity,
                self.props.distribution.clone(),
            )
            .await
            .map_err(StepFailure::at(Operation::Apply, &names.distribution, &dist_chain))?;

        let publish = match &self.props.content {
            Some(content) => {
                let job = PublishJob {
                    source: content.path.clone(),
                    destination: &bucket,
                    distribution: &distribution,
                    invalidation_paths: content.invalidation_paths.clone(),
                    prune: content.prune,
                    limits: content.limits,
                };
                let publish_chain = [names.bucket.as_str(), names.distribution.as_str()];
                let outcome = p.publish(&job).await.map_err(StepFailure::at(
                    Operation::Publish,
                    &names.deployment,
                    &publish_chain,
                ))?;
                Some(outcome)
            }
            None => {
                info!(stack = %p.owner(), "no content source configured, skipping publish");
                None
            }
        };

        let outputs = export(&ProvisionedStack {
            identity,
            bucket,
            distribution,
        });
        Ok((publish, outputs))
    }

    /// Delete this stack's resources in reverse dependency order. Buckets
    /// with a retain policy are left behind.
    pub async fn destroy(
        &self,
        ctx: &StackContext,
        backend: &dyn ProvisioningBackend,
        retry: RetryPolicy,
    ) -> Result<DestroyReport, PassError> {
        let owner = ctx.stack_id(&self.name);
        let mut records = retry
            .run("list_resources", || backend.list_resources(&owner))
            .await
            .map_err(|err| PassError {
                operation: Operation::Delete,
                resource: owner.clone(),
                chain: Vec::new(),
                applied: Vec::new(),
                source: StackError::Backend(err),
            })?;
        records.sort_by_key(|record| teardown_rank(&record.kind));

        let mut report = DestroyReport::default();
        for record in records {
            let failed = |source: StackError, deleted: &[String]| PassError {
                operation: Operation::Delete,
                resource: record.name.clone(),
                chain: Vec::new(),
                applied: deleted.to_vec(),
                source,
            };

            let handle = record.handle().map_err(|reason| {
                failed(
                    StackError::Backend(BackendError::Corrupt(reason)),
                    &report.deleted,
                )
            })?;

            if let Ok(ResourceSpec::Bucket(props)) = record.spec() {
                if props.removal == RemovalPolicy::Retain {
                    info!(bucket = %record.physical_id, "retaining bucket");
                    report.retained.push(record.name.clone());
                    continue;
                }
            }

            retry
                .run("delete_resource", || backend.delete_resource(&handle))
                .await
                .map_err(|err| {
                    failed(
                        StackError::from_backend(handle.kind, &handle.name, err),
                        &report.deleted,
                    )
                })?;
            report.deleted.push(record.name.clone());
        }

        info!(
            stack = %owner,
            deleted = report.deleted.len(),
            retained = report.retained.len(),
            "stack destroyed"
        );
        Ok(report)
    }

    /// Rebuild the output set from stored state without applying anything.
    pub async fn outputs(
        &self,
        ctx: &StackContext,
        backend: &dyn ProvisioningBackend,
        retry: RetryPolicy,
    ) -> Result<OutputSet, PassError> {
        let mut registry = NameRegistry::new();
        let names = self.names(ctx, &mut registry).map_err(|source| PassError {
            operation: Operation::Plan,
            resource: ctx.stack_id(&self.name),
            chain: Vec::new(),
            applied: Vec::new(),
            source,
        })?;

        let resolved = resolve_stack(&names, backend, &retry).await;

        resolved.map(|stack| export(&stack)).map_err(|source| PassError {
            operation: Operation::Export,
            resource: ctx.stack_id(&self.name),
            chain: vec![names.bucket.clone(), names.distribution.clone()],
            applied: Vec::new(),
            source,
        })
    }
}

async fn lookup(
    backend: &dyn ProvisioningBackend,
    retry: &RetryPolicy,
    kind: ResourceKind,
    name: &str,
) -> Result<ResourceRecord, StackError> {
    retry
        .run("describe_resource", || backend.describe_resource(kind, name))
        .await?
        .ok_or_else(|| StackError::NotProvisioned {
            kind,
            name: name.to_string(),
        })
}

async fn resolve_stack(
    names: &FrontendNames,
    backend: &dyn ProvisioningBackend,
    retry: &RetryPolicy,
) -> Result<ProvisionedStack, StackError> {
    let identity = lookup(backend, retry, ResourceKind::Identity, &names.identity).await?;
    let bucket = lookup(backend, retry, ResourceKind::Bucket, &names.bucket).await?;
    let distribution =
        lookup(backend, retry, ResourceKind::Distribution, &names.distribution).await?;
    provisioned_from_records(&identity, &bucket, &distribution)
}

fn provisioned_from_records(
    identity: &ResourceRecord,
    bucket: &ResourceRecord,
    distribution: &ResourceRecord,
) -> Result<ProvisionedStack, StackError> {
    let corrupt = |reason: String| StackError::Backend(BackendError::Corrupt(reason));

    let bucket_props = match bucket.spec().map_err(|e| corrupt(e.to_string()))? {
        ResourceSpec::Bucket(props) => props,
        other => return Err(corrupt(format!("expected bucket spec, got {}", other.kind()))),
    };
    let dist_config = match distribution.spec().map_err(|e| corrupt(e.to_string()))? {
        ResourceSpec::Distribution(spec) => spec.config,
        other => {
            return Err(corrupt(format!(
                "expected distribution spec, got {}",
                other.kind()
            )));
        }
    };

    Ok(ProvisionedStack {
        identity: AccessIdentity::new(identity.handle().map_err(corrupt)?),
        bucket: StorageResource::new(bucket.handle().map_err(corrupt)?, bucket_props),
        distribution: DistributionResource::new(distribution.handle().map_err(corrupt)?, dist_config),
    })
}

fn teardown_rank(kind: &str) -> u8 {
    match kind.parse::<ResourceKind>() {
        Ok(ResourceKind::Distribution) => 0,
        Ok(ResourceKind::PolicyStatement) => 1,
        Ok(ResourceKind::Bucket) => 2,
        Ok(ResourceKind::Identity) => 3,
        _ => 4,
    }
}

/// Frontend stacks sharing one context, deployed as a unit.
pub struct StackApp<'a> {
    ctx: &'a StackContext,
    stacks: Vec<FrontendStack>,
}

impl<'a> StackApp<'a> {
    pub fn new(ctx: &'a StackContext) -> Self {
        Self {
            ctx,
            stacks: Vec::new(),
        }
    }

    pub fn add_frontend(&mut self, name: impl Into<String>, props: FrontendProps) -> &mut Self {
        self.stacks.push(FrontendStack::new(name, props));
        self
    }

    pub fn stacks(&self) -> &[FrontendStack] {
        &self.stacks
    }

    /// Claim every identifier of every stack in one registry.
    pub fn plan(&self) -> Result<Vec<FrontendNames>, PassError> {
        let mut registry = NameRegistry::new();
        self.stacks
            .iter()
            .map(|stack| {
                stack.names(self.ctx, &mut registry).map_err(|source| PassError {
                    operation: Operation::Plan,
                    resource: self.ctx.stack_id(stack.name()),
                    chain: Vec::new(),
                    applied: Vec::new(),
                    source,
                })
            })
            .collect()
    }

    /// Plan and check ownership of every stack, then apply each stack in
    /// declaration order.
    pub async fn deploy(
        &self,
        backend: &dyn ProvisioningBackend,
        retry: RetryPolicy,
    ) -> Result<Vec<DeployReport>, PassError> {
        let planned = self.plan()?;
        for (stack, names) in self.stacks.iter().zip(&planned) {
            stack.preflight(self.ctx, names, backend, &retry).await?;
        }
        let mut reports = Vec::with_capacity(planned.len());
        for (stack, names) in self.stacks.iter().zip(&planned) {
            reports.push(
                stack
                    .deploy_planned(self.ctx, names, backend, retry.clone())
                    .await?,
            );
        }
        Ok(reports)
    }

    /// Destroy stacks in reverse declaration order.
    pub async fn destroy(
        &self,
        backend: &dyn ProvisioningBackend,
        retry: RetryPolicy,
    ) -> Result<Vec<DestroyReport>, PassError> {
        let mut reports = Vec::with_capacity(self.stacks.len());
        for stack in self.stacks.iter().rev() {
            reports.push(stack.destroy(self.ctx, backend, retry.clone()).await?);
        }
        Ok(reports)
    }

    pub async fn outputs(
        &self,
        backend: &dyn ProvisioningBackend,
        retry: RetryPolicy,
    ) -> Result<Vec<(String, OutputSet)>, PassError> {
        let mut all = Vec::with_capacity(self.stacks.len());
        for stack in &self.stacks {
            let outputs = stack.outputs(self.ctx, backend, retry.clone()).await?;
            all.push((self.ctx.stack_id(stack.name()), outputs));
        }
        Ok(all)
    }
}
