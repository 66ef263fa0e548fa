//! The closed set of resource variants a backend knows how to provision.

use crate::models::{
    bucket::BucketProps, distribution::DistributionConfig, identity::AccessPolicyStatement,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::BTreeMap, fmt, str::FromStr};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Identity,
    Bucket,
    PolicyStatement,
    Distribution,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Identity => "identity",
            ResourceKind::Bucket => "bucket",
            ResourceKind::PolicyStatement => "policy_statement",
            ResourceKind::Distribution => "distribution",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(ResourceKind::Identity),
            "bucket" => Ok(ResourceKind::Bucket),
            "policy_statement" => Ok(ResourceKind::PolicyStatement),
            "distribution" => Ok(ResourceKind::Distribution),
            other => Err(format!("unknown resource kind `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySpec {
    pub comment: String,
}

/// Attach `statement` to the policy of the bucket named `bucket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatementSpec {
    pub bucket: String,
    pub statement: AccessPolicyStatement,
}

/// A distribution fronting `origin_bucket`, reading through `identity`.
/// Both fields hold physical ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSpec {
    pub origin_bucket: String,
    pub identity: String,
    pub config: DistributionConfig,
}

/// Desired state of one declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Identity(IdentitySpec),
    Bucket(BucketProps),
    PolicyStatement(PolicyStatementSpec),
    Distribution(DistributionSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Identity(_) => ResourceKind::Identity,
            ResourceSpec::Bucket(_) => ResourceKind::Bucket,
            ResourceSpec::PolicyStatement(_) => ResourceKind::PolicyStatement,
            ResourceSpec::Distribution(_) => ResourceKind::Distribution,
        }
    }

    /// Canonical JSON form; every collection inside a spec is ordered.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Hash of the canonical form, compared against the stored hash to decide
    /// whether a re-applied resource changed.
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        Ok(format!("{:x}", md5::compute(self.to_json()?)))
    }
}

/// A resolved reference to a resource the backend has created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub name: String,
    pub physical_id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ResourceHandle {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Stored state of a provisioned resource.
#[derive(Debug, Clone, FromRow)]
pub struct ResourceRecord {
    pub id: Uuid,
    pub kind: String,
    pub name: String,
    pub physical_id: String,
    /// Stack id of the stack that applied this resource.
    pub owner: String,
    /// Canonical JSON of the applied `ResourceSpec`.
    pub spec: String,
    pub spec_hash: String,
    /// JSON object of generated attributes (arn, domain name, ...).
    pub attributes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn kind(&self) -> Result<ResourceKind, String> {
        self.kind.parse()
    }

    pub fn spec(&self) -> serde_json::Result<ResourceSpec> {
        serde_json::from_str(&self.spec)
    }

    pub fn attributes(&self) -> serde_json::Result<BTreeMap<String, String>> {
        serde_json::from_str(&self.attributes)
    }

    pub fn handle(&self) -> Result<ResourceHandle, String> {
        Ok(ResourceHandle {
            kind: self.kind()?,
            name: self.name.clone(),
            physical_id: self.physical_id.clone(),
            attributes: self.attributes().map_err(|err| err.to_string())?,
        })
    }
}
