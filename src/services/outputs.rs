//! Output export.

use crate::models::{
    bucket::StorageResource,
    distribution::DistributionResource,
    identity::AccessIdentity,
    outputs::{OutputKey, OutputSet},
};

/// Fully created resources of a stack. Only obtainable from completed
/// creation calls, so every identifier in it is resolved.
#[derive(Debug, Clone)]
pub struct ProvisionedStack {
    pub identity: AccessIdentity,
    pub bucket: StorageResource,
    pub distribution: DistributionResource,
}

/// Project the identifiers downstream tooling needs.
pub fn export(resources: &ProvisionedStack) -> OutputSet {
    let mut outputs = OutputSet::default();
    outputs.insert(OutputKey::BucketName, resources.bucket.name());
    outputs.insert(OutputKey::DistributionId, resources.distribution.id());
    outputs.insert(
        OutputKey::DistributionDomainName,
        resources.distribution.domain_name(),
    );
    outputs
}
