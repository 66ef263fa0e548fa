//! Distribution configuration: default document, TLS floor, error responses
//! and the default route.

use crate::models::resource::ResourceHandle;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Attribute holding the domain name viewers use to reach a distribution.
pub const DOMAIN_NAME_ATTR: &str = "domain_name";

/// Viewer-facing security policies, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "SSLv3")]
    SslV3,
    #[serde(rename = "TLSv1")]
    TlsV1,
    #[serde(rename = "TLSv1_2016")]
    TlsV1_2016,
    #[serde(rename = "TLSv1.1_2016")]
    TlsV1_1_2016,
    #[serde(rename = "TLSv1.2_2018")]
    TlsV1_2_2018,
    #[serde(rename = "TLSv1.2_2019")]
    TlsV1_2_2019,
    #[serde(rename = "TLSv1.2_2021")]
    TlsV1_2_2021,
}

impl TlsVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::SslV3 => "SSLv3",
            TlsVersion::TlsV1 => "TLSv1",
            TlsVersion::TlsV1_2016 => "TLSv1_2016",
            TlsVersion::TlsV1_1_2016 => "TLSv1.1_2016",
            TlsVersion::TlsV1_2_2018 => "TLSv1.2_2018",
            TlsVersion::TlsV1_2_2019 => "TLSv1.2_2019",
            TlsVersion::TlsV1_2_2021 => "TLSv1.2_2021",
        }
    }

    /// Lowest protocol a viewer may negotiate under this policy.
    pub fn protocol_floor(&self) -> TlsProtocol {
        match self {
            TlsVersion::SslV3 => TlsProtocol::Ssl3,
            TlsVersion::TlsV1 | TlsVersion::TlsV1_2016 => TlsProtocol::Tls1_0,
            TlsVersion::TlsV1_1_2016 => TlsProtocol::Tls1_1,
            TlsVersion::TlsV1_2_2018 | TlsVersion::TlsV1_2_2019 | TlsVersion::TlsV1_2_2021 => {
                TlsProtocol::Tls1_2
            }
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A negotiated protocol as reported by a TLS terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsProtocol {
    Ssl3,
    Tls1_0,
    Tls1_1,
    Tls1_2,
    Tls1_3,
}

impl TlsProtocol {
    /// Parse names such as `TLSv1.2` or `SSLv3`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SSLV3" => Some(TlsProtocol::Ssl3),
            "TLSV1" | "TLSV1.0" => Some(TlsProtocol::Tls1_0),
            "TLSV1.1" => Some(TlsProtocol::Tls1_1),
            "TLSV1.2" => Some(TlsProtocol::Tls1_2),
            "TLSV1.3" => Some(TlsProtocol::Tls1_3),
            _ => None,
        }
    }
}

/// Replace an origin status with a friendly page, cached for `ttl_secs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Origin status that triggers this rule.
    pub http_status: u16,
    /// Status sent to the viewer; defaults to `http_status`.
    #[serde(default)]
    pub response_http_status: Option<u16>,
    /// Object path served as the body, e.g. `/error.html`.
    #[serde(default)]
    pub response_page_path: Option<String>,
    pub ttl_secs: u64,
}

impl ErrorResponse {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn override_status(&self) -> u16 {
        self.response_http_status.unwrap_or(self.http_status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllowedMethods {
    AllowGetHead,
    AllowGetHeadOptions,
    AllowAll,
}

impl AllowedMethods {
    pub fn methods(&self) -> &'static [&'static str] {
        match self {
            AllowedMethods::AllowGetHead => &["GET", "HEAD"],
            AllowedMethods::AllowGetHeadOptions => &["GET", "HEAD", "OPTIONS"],
            AllowedMethods::AllowAll => {
                &["GET", "HEAD", "OPTIONS", "PUT", "PATCH", "POST", "DELETE"]
            }
        }
    }

    pub fn allows(&self, method: &str) -> bool {
        self.methods().iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerProtocolPolicy {
    AllowAll,
    RedirectToHttps,
    HttpsOnly,
}

/// Route applied to every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultBehavior {
    pub allowed_methods: AllowedMethods,
    pub viewer_protocol_policy: ViewerProtocolPolicy,
    pub compress: bool,
    /// How long successful origin responses stay cached.
    pub default_ttl_secs: u64,
}

impl Default for DefaultBehavior {
    fn default() -> Self {
        Self {
            allowed_methods: AllowedMethods::AllowGetHeadOptions,
            viewer_protocol_policy: ViewerProtocolPolicy::RedirectToHttps,
            compress: true,
            default_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionConfig {
    pub default_root_object: Option<String>,
    pub minimum_protocol_version: TlsVersion,
    #[serde(default)]
    pub error_responses: Vec<ErrorResponse>,
    #[serde(default)]
    pub default_behavior: DefaultBehavior,
}

impl Default for DistributionConfig {
    /// Static-site defaults: `index.html`, TLS 1.2 (2021 policy), and origin
    /// 403s answered with `/error.html` for thirty minutes.
    fn default() -> Self {
        Self {
            default_root_object: Some("index.html".into()),
            minimum_protocol_version: TlsVersion::TlsV1_2_2021,
            error_responses: vec![ErrorResponse {
                http_status: 403,
                response_http_status: Some(403),
                response_page_path: Some("/error.html".into()),
                ttl_secs: 30 * 60,
            }],
            default_behavior: DefaultBehavior::default(),
        }
    }
}

impl DistributionConfig {
    /// Structural checks that do not need the backend.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(root) = &self.default_root_object {
            if root.is_empty() || root.starts_with('/') {
                return Err(format!(
                    "default root object `{}` must be a non-empty relative key",
                    root
                ));
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for rule in &self.error_responses {
            if !(400..=599).contains(&rule.http_status) {
                return Err(format!(
                    "error response trigger {} is not an error status",
                    rule.http_status
                ));
            }
            if !seen.insert(rule.http_status) {
                return Err(format!(
                    "duplicate error response for status {}",
                    rule.http_status
                ));
            }
            if let Some(status) = rule.response_http_status {
                if !(200..=599).contains(&status) {
                    return Err(format!("override status {} is out of range", status));
                }
            }
            if let Some(path) = &rule.response_page_path {
                if !path.starts_with('/') {
                    return Err(format!("response page path `{}` must start with `/`", path));
                }
            }
        }
        Ok(())
    }

    pub fn error_response_for(&self, status: u16) -> Option<&ErrorResponse> {
        self.error_responses
            .iter()
            .find(|rule| rule.http_status == status)
    }
}

/// A created distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionResource {
    handle: ResourceHandle,
    config: DistributionConfig,
}

impl DistributionResource {
    pub fn new(handle: ResourceHandle, config: DistributionConfig) -> Self {
        Self { handle, config }
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn id(&self) -> &str {
        &self.handle.physical_id
    }

    pub fn domain_name(&self) -> &str {
        self.handle.attr(DOMAIN_NAME_ATTR).unwrap_or_default()
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_static_site_shape() {
        let config = DistributionConfig::default();
        assert_eq!(config.default_root_object.as_deref(), Some("index.html"));
        assert_eq!(config.minimum_protocol_version, TlsVersion::TlsV1_2_2021);

        let rule = config.error_response_for(403).unwrap();
        assert_eq!(rule.override_status(), 403);
        assert_eq!(rule.response_page_path.as_deref(), Some("/error.html"));
        assert_eq!(rule.ttl(), Duration::from_secs(1800));
        assert!(config.error_response_for(404).is_none());

        let behavior = &config.default_behavior;
        assert!(behavior.compress);
        assert_eq!(behavior.viewer_protocol_policy, ViewerProtocolPolicy::RedirectToHttps);
        assert!(behavior.allowed_methods.allows("get"));
        assert!(behavior.allowed_methods.allows("OPTIONS"));
        assert!(!behavior.allowed_methods.allows("POST"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tls_versions_order_by_strength() {
        assert!(TlsVersion::TlsV1 < TlsVersion::TlsV1_2_2021);
        assert_eq!(TlsVersion::TlsV1_2_2019.protocol_floor(), TlsProtocol::Tls1_2);
        assert!(TlsProtocol::parse("TLSv1.1").unwrap() < TlsVersion::TlsV1_2_2021.protocol_floor());
        assert_eq!(TlsProtocol::parse("tlsv1.3"), Some(TlsProtocol::Tls1_3));
        assert_eq!(TlsProtocol::parse("QUIC"), None);
        assert_eq!(
            serde_json::to_string(&TlsVersion::TlsV1_2_2021).unwrap(),
            r#""TLSv1.2_2021""#
        );
    }

    #[test]
    fn validate_rejects_malformed_error_rules() {
        let mut config = DistributionConfig::default();
        config.error_responses[0].response_page_path = Some("error.html".into());
        assert!(config.validate().is_err());

        let mut config = DistributionConfig::default();
        config.error_responses.push(config.error_responses[0].clone());
        assert!(config.validate().unwrap_err().contains("duplicate"));

        let mut config = DistributionConfig::default();
        config.error_responses[0].http_status = 302;
        assert!(config.validate().is_err());

        let mut config = DistributionConfig::default();
        config.default_root_object = Some("/index.html".into());
        assert!(config.validate().is_err());
    }
}
