//! Values exported for downstream tooling.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputKey {
    BucketName,
    DistributionId,
    DistributionDomainName,
}

impl OutputKey {
    pub const ALL: [OutputKey; 3] = [
        OutputKey::BucketName,
        OutputKey::DistributionId,
        OutputKey::DistributionDomainName,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKey::BucketName => "BucketName",
            OutputKey::DistributionId => "DistributionId",
            OutputKey::DistributionDomainName => "DistributionDomainName",
        }
    }
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output key to resolved value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputSet(BTreeMap<String, String>);

impl OutputSet {
    pub fn insert(&mut self, key: OutputKey, value: impl Into<String>) {
        self.0.insert(key.as_str().to_string(), value.into());
    }

    pub fn get(&self, key: OutputKey) -> Option<&str> {
        self.0.get(key.as_str()).map(String::as_str)
    }

    /// True when every key is present with a non-empty value.
    pub fn is_complete(&self) -> bool {
        OutputKey::ALL
            .iter()
            .all(|key| self.get(*key).is_some_and(|v| !v.is_empty()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
