//! Access identities and the policy statements that bind them to storage.

use crate::models::resource::ResourceHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Read a single object.
pub const READ_OBJECT_ACTION: &str = "s3:GetObject";
/// List keys. Without it a missing key is reported as access denied.
pub const LIST_BUCKET_ACTION: &str = "s3:ListBucket";

/// Attribute holding the canonical user id a policy principal refers to.
pub const CANONICAL_USER_ATTR: &str = "canonical_user_id";

/// An opaque principal usable only as a policy subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessIdentity {
    handle: ResourceHandle,
}

impl AccessIdentity {
    pub fn new(handle: ResourceHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn id(&self) -> &str {
        &self.handle.physical_id
    }

    /// Principal reference used in bucket policy statements.
    pub fn canonical_user_id(&self) -> &str {
        self.handle
            .attr(CANONICAL_USER_ATTR)
            .unwrap_or(&self.handle.physical_id)
    }
}

/// An allow statement on a bucket policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicyStatement {
    pub sid: String,
    pub actions: BTreeSet<String>,
    /// Resource ARNs; a trailing `*` matches any suffix.
    pub resources: BTreeSet<String>,
    /// Canonical user ids.
    pub principals: BTreeSet<String>,
}

impl AccessPolicyStatement {
    /// Read-only access to every object under `objects_arn` for `principal`.
    pub fn read_only(sid: impl Into<String>, principal: &str, objects_arn: String) -> Self {
        Self {
            sid: sid.into(),
            actions: BTreeSet::from([READ_OBJECT_ACTION.to_string()]),
            resources: BTreeSet::from([objects_arn]),
            principals: BTreeSet::from([principal.to_string()]),
        }
    }

    /// Whether this statement lets `principal` perform `action` on `resource`.
    pub fn allows(&self, action: &str, resource: &str, principal: &str) -> bool {
        self.principals.contains(principal)
            && self.actions.iter().any(|a| pattern_matches(a, action))
            && self.resources.iter().any(|r| pattern_matches(r, resource))
    }
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}
