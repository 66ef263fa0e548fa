//! Stack identity shared by every resource of a provisioning pass.

use crate::errors::StackError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const SUPPORTED_REGIONS: [&str; 16] = [
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-southeast-1",
    "ap-northeast-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-2",
    "ap-northeast-3",
    "me-south-1",
];

/// Application name, deployment stage and target region.
///
/// Constructed once by the caller and passed by reference to every
/// construction call. All resource identifiers are derived from it, so two
/// stages of the same app never share a physical name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackContext {
    app: String,
    stage: String,
    region: String,
}

impl StackContext {
    /// Validate and freeze the context.
    ///
    /// `app` and `stage` must be non-empty and free of whitespace; the region
    /// is compared case-insensitively against the supported region list.
    pub fn new(
        app: impl Into<String>,
        stage: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, StackError> {
        let app = app.into();
        let stage = stage.into();
        let region = region.into().to_lowercase();

        for (field, value) in [("app", &app), ("stage", &stage)] {
            if value.is_empty() {
                return Err(StackError::InvalidContext(format!("{} must not be empty", field)));
            }
            if value.chars().any(char::is_whitespace) {
                return Err(StackError::InvalidContext(format!(
                    "{} `{}` must not contain whitespace",
                    field, value
                )));
            }
        }

        if !SUPPORTED_REGIONS.iter().any(|candidate| *candidate == region) {
            return Err(StackError::UnsupportedRegion(region));
        }

        Ok(Self { app, stage, region })
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// `{stage}-{app}-{name}`, the identifier of a stack and the owner tag of
    /// every resource it applies.
    pub fn stack_id(&self, name: &str) -> String {
        format!("{}-{}-{}", self.stage, self.app, name)
    }

    /// `{stage}-{app}-{name}-{suffix}`.
    pub fn resource_id(&self, name: &str, suffix: &str) -> String {
        format!("{}-{}", self.stack_id(name), suffix)
    }

    /// Storage names are case-insensitive on the provider side, so the
    /// derived identifier is lower-cased.
    pub fn bucket_name(&self, name: &str) -> String {
        self.resource_id(name, "bucket").to_lowercase()
    }
}

/// Identifiers claimed by sibling resources during one pass.
#[derive(Debug, Default)]
pub struct NameRegistry {
    claimed: BTreeSet<String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for one resource. A second claim of the same identifier
    /// fails with `NameCollision`.
    pub fn claim(&mut self, id: String) -> Result<String, StackError> {
        if !self.claimed.insert(id.clone()) {
            return Err(StackError::NameCollision(id));
        }
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> StackContext {
        StackContext::new("my-app", "local", "eu-west-1").unwrap()
    }

    #[test]
    fn bucket_name_is_lowercased_compound_identifier() {
        assert_eq!(ctx().bucket_name("Frontend"), "local-my-app-frontend-bucket");
    }

    #[test]
    fn resource_ids_keep_case_and_are_deterministic() {
        let first = ctx();
        assert_eq!(
            first.resource_id("Frontend", "Distribution"),
            "local-my-app-Frontend-Distribution"
        );
        assert_eq!(
            first.resource_id("Frontend", "Distribution"),
            ctx().resource_id("Frontend", "Distribution")
        );
    }

    #[test]
    fn region_is_normalized_and_checked() {
        let ctx = StackContext::new("my-app", "local", "EU-WEST-1").unwrap();
        assert_eq!(ctx.region(), "eu-west-1");

        let err = StackContext::new("my-app", "local", "mars-north-1").unwrap_err();
        assert!(matches!(err, StackError::UnsupportedRegion(r) if r == "mars-north-1"));
    }

    #[test]
    fn empty_or_spaced_fields_are_rejected() {
        assert!(matches!(
            StackContext::new("", "local", "local"),
            Err(StackError::InvalidContext(_))
        ));
        assert!(matches!(
            StackContext::new("my app", "local", "local"),
            Err(StackError::InvalidContext(_))
        ));
    }

    #[test]
    fn duplicate_claims_collide() {
        let ctx = ctx();
        let mut registry = NameRegistry::new();
        registry.claim(ctx.bucket_name("Frontend")).unwrap();
        registry.claim(ctx.resource_id("Frontend", "OAI")).unwrap();

        let err = registry.claim(ctx.bucket_name("FRONTEND")).unwrap_err();
        assert!(matches!(err, StackError::NameCollision(id) if id == "local-my-app-frontend-bucket"));
        assert_eq!(registry.len(), 2);
    }
}
