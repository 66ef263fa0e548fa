//! Represents the storage bucket that holds the site content.

use crate::{errors::StackError, models::resource::ResourceHandle};
use serde::{Deserialize, Serialize};

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Public access setting of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicAccess {
    /// Block public ACLs and public policies. Objects are only reachable
    /// through principals named in the bucket policy.
    #[default]
    BlockAll,
    /// Anonymous reads allowed. Must be requested explicitly.
    PublicRead,
}

impl PublicAccess {
    pub fn is_blocked(&self) -> bool {
        matches!(self, PublicAccess::BlockAll)
    }
}

/// What happens to the bucket when its stack is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Delete the bucket. With `auto_delete_objects` the contents are purged
    /// first; otherwise deleting a non-empty bucket is refused.
    Destroy { auto_delete_objects: bool },
    /// Leave the bucket and its objects behind.
    Retain,
}

impl Default for RemovalPolicy {
    fn default() -> Self {
        RemovalPolicy::Destroy {
            auto_delete_objects: true,
        }
    }
}

/// Declared properties of a bucket. Defaults are deny-all and
/// destroy-and-purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BucketProps {
    #[serde(default)]
    pub public_access: PublicAccess,
    #[serde(default)]
    pub removal: RemovalPolicy,
}

/// A created bucket. Owned by the stack, referenced by the distribution and
/// the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageResource {
    handle: ResourceHandle,
    props: BucketProps,
}

impl StorageResource {
    pub fn new(handle: ResourceHandle, props: BucketProps) -> Self {
        Self { handle, props }
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    /// Globally unique bucket name.
    pub fn name(&self) -> &str {
        &self.handle.physical_id
    }

    pub fn props(&self) -> &BucketProps {
        &self.props
    }

    pub fn arn(&self) -> String {
        bucket_arn(self.name())
    }

    /// ARN pattern matching objects under `key_pattern`, e.g. `arn:...:bucket/*`.
    pub fn arn_for_objects(&self, key_pattern: &str) -> String {
        format!("{}/{}", self.arn(), key_pattern)
    }
}

pub fn bucket_arn(name: &str) -> String {
    format!("arn:aws:s3:::{}", name)
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn validate_bucket_name(name: &str) -> Result<(), StackError> {
    let invalid = |reason: &str| StackError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with('.') || name.ends_with('.') || name.starts_with('-') || name.ends_with('-')
    {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }

    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deny_public_access_and_purge_on_removal() {
        let props = BucketProps::default();
        assert!(props.public_access.is_blocked());
        assert_eq!(
            props.removal,
            RemovalPolicy::Destroy {
                auto_delete_objects: true
            }
        );
    }

    #[test]
    fn derived_names_pass_validation() {
        assert!(validate_bucket_name("local-my-app-frontend-bucket").is_ok());
    }

    #[test]
    fn bad_names_are_rejected() {
        for name in [
            "ab",
            "Upper-Case",
            "under_score",
            "-leading",
            "trailing.",
            "double..dot",
            "dot.-hyphen",
            "192.168.10.1",
        ] {
            assert!(
                matches!(validate_bucket_name(name), Err(StackError::InvalidBucketName { .. })),
                "{} should be rejected",
                name
            );
        }
        assert!(validate_bucket_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn object_arns_are_scoped_to_bucket() {
        let handle = ResourceHandle {
            kind: crate::models::resource::ResourceKind::Bucket,
            name: "local-my-app-frontend-bucket".into(),
            physical_id: "local-my-app-frontend-bucket".into(),
            attributes: Default::default(),
        };
        let bucket = StorageResource::new(handle, BucketProps::default());
        assert_eq!(
            bucket.arn_for_objects("*"),
            "arn:aws:s3:::local-my-app-frontend-bucket/*"
        );
    }
}
