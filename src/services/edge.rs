//! Edge emulator: answers viewer requests the way a provisioned distribution
//! would, reading its origin through the distribution's access identity.
//!
//! Per request:
//! 1. resolve the distribution from the `Host` header
//! 2. enforce viewer protocol policy, TLS floor and allowed methods
//! 3. serve from the edge cache when a live entry exists
//! 4. otherwise read the origin; a status listed in the error-response table
//!    is replaced by its override and cached for the rule's ttl, so a
//!    friendly page keeps being served while it is cached regardless of
//!    origin health.

use crate::{
    models::{
        bucket::{BucketProps, bucket_arn},
        distribution::{TlsProtocol, ViewerProtocolPolicy},
        identity::{CANONICAL_USER_ATTR, LIST_BUCKET_ACTION, READ_OBJECT_ACTION},
        resource::{DistributionSpec, ResourceKind, ResourceSpec},
    },
    services::{
        backend::{BackendError, BackendResult},
        local_backend::{CachedResponse, LocalBackend},
    },
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRequest {
    pub method: String,
    pub host: String,
    pub path: String,
    /// Scheme seen by the TLS terminator in front of the emulator.
    pub forwarded_proto: Option<String>,
    /// Protocol negotiated by the TLS terminator, e.g. `TLSv1.2`.
    pub tls_version: Option<String>,
}

impl EdgeRequest {
    pub fn get(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: "GET".into(),
            host: host.into(),
            path: path.into(),
            forwarded_proto: None,
            tls_version: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Error-response override, fresh from the origin.
    Error,
    /// Answered without consulting cache or origin.
    Bypass,
}

impl CacheStatus {
    pub fn header_value(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "Hit from edge",
            CacheStatus::Miss => "Miss from edge",
            CacheStatus::Error => "Error from edge",
            CacheStatus::Bypass => "Bypass",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub location: Option<String>,
    pub allow: Option<String>,
    pub cache: CacheStatus,
    pub compress: bool,
}

impl EdgeResponse {
    fn plain(status: u16, message: &str, cache: CacheStatus) -> Self {
        Self {
            status,
            content_type: Some("text/plain; charset=utf-8".into()),
            body: message.as_bytes().to_vec(),
            location: None,
            allow: None,
            cache,
            compress: false,
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// What the origin bucket answered for one key.
#[derive(Debug, Clone)]
struct OriginResponse {
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl OriginResponse {
    fn s3_error(status: u16, code: &str) -> Self {
        Self {
            status,
            content_type: Some("application/xml".into()),
            body: format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><Error><Code>{}</Code></Error>"#,
                code
            )
            .into_bytes(),
        }
    }
}

#[derive(Clone)]
pub struct EdgeService {
    pub backend: LocalBackend,
}

impl EdgeService {
    pub fn new(backend: LocalBackend) -> Self {
        Self { backend }
    }

    /// Answer `req` as of `now`.
    pub async fn handle(&self, req: &EdgeRequest, now: DateTime<Utc>) -> BackendResult<EdgeResponse> {
        let host = req.host.split(':').next().unwrap_or_default();
        let Some(record) = self.backend.find_distribution_by_domain(host).await? else {
            return Ok(EdgeResponse::plain(
                404,
                "no distribution serves this host",
                CacheStatus::Bypass,
            ));
        };
        let spec = match record.spec()? {
            ResourceSpec::Distribution(spec) => spec,
            other => {
                return Err(BackendError::Corrupt(format!(
                    "distribution `{}` holds a {} spec",
                    record.name,
                    other.kind()
                )));
            }
        };
        let distribution_id = record.physical_id.as_str();
        let behavior = &spec.config.default_behavior;

        let plaintext = req
            .forwarded_proto
            .as_deref()
            .is_some_and(|proto| proto.eq_ignore_ascii_case("http"));
        if plaintext {
            match behavior.viewer_protocol_policy {
                ViewerProtocolPolicy::RedirectToHttps => {
                    let mut response =
                        EdgeResponse::plain(301, "moved permanently", CacheStatus::Bypass);
                    response.location = Some(format!("https://{}{}", host, req.path));
                    return Ok(response);
                }
                ViewerProtocolPolicy::HttpsOnly => {
                    return Ok(EdgeResponse::plain(
                        403,
                        "https is required",
                        CacheStatus::Bypass,
                    ));
                }
                ViewerProtocolPolicy::AllowAll => {}
            }
        } else if let Some(negotiated) = req.tls_version.as_deref().and_then(TlsProtocol::parse) {
            let floor = spec.config.minimum_protocol_version.protocol_floor();
            if negotiated < floor {
                debug!(distribution = distribution_id, ?negotiated, ?floor, "viewer TLS below floor");
                return Ok(EdgeResponse::plain(
                    403,
                    "tls protocol below the distribution minimum",
                    CacheStatus::Bypass,
                ));
            }
        }

        let allow = behavior.allowed_methods.methods().join(", ");
        if !behavior.allowed_methods.allows(&req.method) {
            let mut response =
                EdgeResponse::plain(405, "method not allowed", CacheStatus::Bypass);
            response.allow = Some(allow);
            return Ok(response);
        }
        if req.method.eq_ignore_ascii_case("OPTIONS") {
            let mut response = EdgeResponse::plain(200, "", CacheStatus::Bypass);
            response.body.clear();
            response.allow = Some(allow);
            return Ok(response);
        }

        // Object keys are stored decoded; the request line is not.
        let Ok(decoded) = urlencoding::decode(&req.path) else {
            return Ok(EdgeResponse::plain(
                400,
                "request path is not valid UTF-8",
                CacheStatus::Bypass,
            ));
        };
        let path = match (decoded.as_ref(), &spec.config.default_root_object) {
            ("" | "/", Some(root)) => format!("/{}", root),
            ("", None) => "/".to_string(),
            (path, _) => path.to_string(),
        };

        let mut response = match self.backend.cache_get(distribution_id, &path, now).await? {
            Some(hit) => EdgeResponse {
                status: hit.status,
                content_type: hit.content_type,
                body: hit.body,
                location: None,
                allow: None,
                cache: CacheStatus::Hit,
                compress: behavior.compress,
            },
            None => {
                let origin = self.origin_get(&spec, &path).await?;
                if origin.status == 200 {
                    self.backend
                        .cache_put(
                            distribution_id,
                            &path,
                            &CachedResponse {
                                status: 200,
                                content_type: origin.content_type.clone(),
                                body: origin.body.clone(),
                                expires_at: expiry(now, behavior.default_ttl_secs),
                            },
                        )
                        .await?;
                    EdgeResponse {
                        status: 200,
                        content_type: origin.content_type,
                        body: origin.body,
                        location: None,
                        allow: None,
                        cache: CacheStatus::Miss,
                        compress: behavior.compress,
                    }
                } else {
                    self.error_response(distribution_id, &spec, &path, origin, now)
                        .await?
                }
            }
        };

        if req.method.eq_ignore_ascii_case("HEAD") {
            response.body.clear();
        }
        Ok(response)
    }

    /// Apply the error-response table to a failed origin read.
    async fn error_response(
        &self,
        distribution_id: &str,
        spec: &DistributionSpec,
        path: &str,
        origin: OriginResponse,
        now: DateTime<Utc>,
    ) -> BackendResult<EdgeResponse> {
        let compress = spec.config.default_behavior.compress;
        let Some(rule) = spec.config.error_response_for(origin.status) else {
            return Ok(EdgeResponse {
                status: origin.status,
                content_type: origin.content_type,
                body: origin.body,
                location: None,
                allow: None,
                cache: CacheStatus::Miss,
                compress,
            });
        };

        let status = rule.override_status();
        let (content_type, body) = match &rule.response_page_path {
            Some(page) => {
                let page_response = self.origin_get(spec, page).await?;
                if page_response.status == 200 {
                    (page_response.content_type, page_response.body)
                } else {
                    warn!(
                        distribution = distribution_id,
                        page = %page,
                        status = page_response.status,
                        "error page unavailable from origin"
                    );
                    (origin.content_type, origin.body)
                }
            }
            None => (origin.content_type, origin.body),
        };

        if rule.ttl_secs > 0 {
            self.backend
                .cache_put(
                    distribution_id,
                    path,
                    &CachedResponse {
                        status,
                        content_type: content_type.clone(),
                        body: body.clone(),
                        expires_at: expiry(now, rule.ttl_secs),
                    },
                )
                .await?;
        }

        Ok(EdgeResponse {
            status,
            content_type,
            body,
            location: None,
            allow: None,
            cache: CacheStatus::Error,
            compress,
        })
    }

    /// Read `path` from the origin bucket as the distribution's identity.
    ///
    /// Without list permission a missing key is reported as access denied,
    /// the same answer as an unreadable one.
    async fn origin_get(&self, spec: &DistributionSpec, path: &str) -> BackendResult<OriginResponse> {
        let bucket = spec.origin_bucket.as_str();
        let Some(bucket_record) = self
            .backend
            .find_by_physical(ResourceKind::Bucket, bucket)
            .await?
        else {
            return Ok(OriginResponse::s3_error(502, "OriginUnreachable"));
        };
        let public_read = match bucket_record.spec()? {
            ResourceSpec::Bucket(BucketProps { public_access, .. }) => !public_access.is_blocked(),
            _ => false,
        };

        let principal = match self
            .backend
            .find_by_physical(ResourceKind::Identity, &spec.identity)
            .await?
        {
            Some(identity) => identity.attributes()?.remove(CANONICAL_USER_ATTR),
            None => None,
        };
        let statements = self.backend.bucket_statements(bucket).await?;
        let permitted = |action: &str, resource: &str| {
            public_read
                || principal.as_deref().is_some_and(|p| {
                    statements
                        .iter()
                        .any(|statement| statement.allows(action, resource, p))
                })
        };

        let key = path.trim_start_matches('/');
        let bucket_resource = bucket_arn(bucket);
        if key.is_empty() || !permitted(READ_OBJECT_ACTION, &format!("{}/{}", bucket_resource, key))
        {
            return Ok(OriginResponse::s3_error(403, "AccessDenied"));
        }

        match self.backend.read_object(bucket, key).await {
            Ok(Some((object, body))) => Ok(OriginResponse {
                status: 200,
                content_type: object.content_type,
                body,
            }),
            Ok(None) if permitted(LIST_BUCKET_ACTION, &bucket_resource) => {
                Ok(OriginResponse::s3_error(404, "NoSuchKey"))
            }
            Ok(None) => Ok(OriginResponse::s3_error(403, "AccessDenied")),
            Err(BackendError::Rejected(_)) => Ok(OriginResponse::s3_error(400, "InvalidKey")),
            Err(err) => Err(err),
        }
    }
}

fn expiry(now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
