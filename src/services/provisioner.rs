//! Create-or-update of declared resources.
//!
//! Each declaration is diffed against the backend's stored state: absent
//! resources are created, resources whose spec hash changed are updated, and
//! matching ones are left alone. The component operations (identity, storage,
//! distribution, publish) are implemented on `Provisioner` in their own
//! modules.

use crate::{
    errors::StackError,
    models::{
        context::StackContext,
        resource::{ResourceHandle, ResourceKind, ResourceSpec},
    },
    services::{
        backend::{BackendError, ProvisioningBackend},
        retry::RetryPolicy,
    },
};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyAction {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub physical_id: String,
    pub action: ApplyAction,
}

/// Applies resources for one stack during one pass.
pub struct Provisioner<'a> {
    pub(crate) backend: &'a dyn ProvisioningBackend,
    pub(crate) ctx: &'a StackContext,
    pub(crate) owner: String,
    pub(crate) retry: RetryPolicy,
    applied: Vec<AppliedResource>,
}

impl<'a> Provisioner<'a> {
    /// `stack_name` is the logical name of the stack within `ctx`; every
    /// resource is tagged with the derived stack id as its owner.
    pub fn new(
        backend: &'a dyn ProvisioningBackend,
        ctx: &'a StackContext,
        stack_name: &str,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            ctx,
            owner: ctx.stack_id(stack_name),
            retry,
            applied: Vec::new(),
        }
    }

    pub fn context(&self) -> &StackContext {
        self.ctx
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Resources applied so far in this pass, in application order.
    pub fn applied(&self) -> &[AppliedResource] {
        &self.applied
    }

    pub fn into_applied(self) -> Vec<AppliedResource> {
        self.applied
    }

    /// Converge `name` to `spec`.
    pub async fn apply(
        &mut self,
        name: &str,
        spec: &ResourceSpec,
    ) -> Result<ResourceHandle, StackError> {
        let kind = spec.kind();
        let backend = self.backend;
        let fail = |err: BackendError| StackError::from_backend(kind, name, err);

        let existing = self
            .retry
            .run("describe_resource", || backend.describe_resource(kind, name))
            .await
            .map_err(fail)?;

        let (handle, action) = match existing {
            None => {
                let handle = self
                    .retry
                    .run("create_resource", || {
                        backend.create_resource(name, &self.owner, spec)
                    })
                    .await
                    .map_err(fail)?;
                (handle, ApplyAction::Created)
            }
            Some(record) if record.owner != self.owner => {
                return Err(StackError::NameConflict {
                    kind,
                    name: name.to_string(),
                    owner: record.owner,
                });
            }
            Some(record) => {
                let current = record
                    .handle()
                    .map_err(|reason| fail(BackendError::Corrupt(reason)))?;
                let wanted = spec
                    .fingerprint()
                    .map_err(|err| fail(BackendError::Serde(err)))?;
                if record.spec_hash == wanted {
                    debug!(%kind, name, "resource unchanged");
                    (current, ApplyAction::Unchanged)
                } else {
                    let handle = self
                        .retry
                        .run("update_resource", || backend.update_resource(&current, spec))
                        .await
                        .map_err(fail)?;
                    (handle, ApplyAction::Updated)
                }
            }
        };

        info!(%kind, name, physical_id = %handle.physical_id, ?action, "applied");
        self.applied.push(AppliedResource {
            kind,
            name: name.to_string(),
            physical_id: handle.physical_id.clone(),
            action,
        });
        Ok(handle)
    }
}
