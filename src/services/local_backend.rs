//! src/services/local_backend.rs
//!
//! LocalBackend: provisions resources into SQLite (resource records, object
//! metadata, edge cache, invalidation log) and local disk (object payloads
//! sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`). It is the
//! backend used by the CLI and by the edge emulator.

use crate::{
    models::{
        bucket::{RemovalPolicy, bucket_arn, validate_bucket_name},
        distribution::{DOMAIN_NAME_ATTR, TlsVersion},
        identity::{AccessPolicyStatement, CANONICAL_USER_ATTR},
        object::StoredObject,
        publish::{ResourceLimits, SyncReport},
        resource::{DistributionSpec, ResourceHandle, ResourceKind, ResourceRecord, ResourceSpec},
    },
    services::backend::{BackendError, BackendResult, ProvisioningBackend},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");
const MAX_OBJECT_KEY_LEN: usize = 1024;
const RESOURCE_COLUMNS: &str =
    "id, kind, name, physical_id, owner, spec, spec_hash, attributes, created_at, updated_at";
const OBJECT_COLUMNS: &str = "id, bucket, key, content_type, size_bytes, etag, last_modified";

/// A response held by a distribution's edge cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

struct SourceFile {
    key: String,
    path: PathBuf,
    size: u64,
}

#[derive(Clone)]
pub struct LocalBackend {
    /// Shared SQLite connection pool used for all metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Parent domain of generated distribution domain names.
    edge_domain: String,

    min_tls: TlsVersion,
}

impl LocalBackend {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        edge_domain: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            edge_domain: edge_domain.into(),
            min_tls: TlsVersion::TlsV1,
        }
    }

    /// Refuse distributions whose security policy is older than `version`.
    pub fn with_min_tls_version(mut self, version: TlsVersion) -> Self {
        self.min_tls = version;
        self
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> BackendResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements...", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// A migrated backend over a private in-memory database. The pool holds
    /// a single connection so every query sees the same database.
    pub async fn in_memory(
        base_path: impl Into<PathBuf>,
        edge_domain: impl Into<String>,
    ) -> BackendResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let backend = Self::new(Arc::new(pool), base_path, edge_domain);
        backend.migrate().await?;
        Ok(backend)
    }

    /// Rejects empty, oversized, absolute or traversing keys.
    fn ensure_key_safe(&self, key: &str) -> BackendResult<()> {
        let invalid = || BackendError::Rejected(format!("invalid object key `{}`", key));
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(invalid());
        }
        if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
            return Err(invalid());
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(invalid());
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard from MD5(bucket/key) to bound entries per directory.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn generated_id(prefix: char) -> String {
        let raw = Uuid::new_v4().simple().to_string().to_uppercase();
        format!("{}{}", prefix, &raw[..13])
    }

    pub async fn find_by_physical(
        &self,
        kind: ResourceKind,
        physical_id: &str,
    ) -> BackendResult<Option<ResourceRecord>> {
        let record = sqlx::query_as::<_, ResourceRecord>(&format!(
            "SELECT {} FROM resources WHERE kind = ? AND physical_id = ?",
            RESOURCE_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(physical_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    async fn require_reference(
        &self,
        kind: ResourceKind,
        physical_id: &str,
    ) -> BackendResult<ResourceRecord> {
        self.find_by_physical(kind, physical_id)
            .await?
            .ok_or_else(|| BackendError::MissingReference {
                kind,
                id: physical_id.to_string(),
            })
    }

    async fn records_of_kind(&self, kind: ResourceKind) -> BackendResult<Vec<ResourceRecord>> {
        let records = sqlx::query_as::<_, ResourceRecord>(&format!(
            "SELECT {} FROM resources WHERE kind = ? ORDER BY created_at ASC",
            RESOURCE_COLUMNS
        ))
        .bind(kind.as_str())
        .fetch_all(&*self.db)
        .await?;
        Ok(records)
    }

    /// Resolve the distribution serving `domain`.
    pub async fn find_distribution_by_domain(
        &self,
        domain: &str,
    ) -> BackendResult<Option<ResourceRecord>> {
        for record in self.records_of_kind(ResourceKind::Distribution).await? {
            let attributes = record.attributes()?;
            if attributes
                .get(DOMAIN_NAME_ATTR)
                .is_some_and(|d| d.eq_ignore_ascii_case(domain))
            {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn identity_by_principal(&self, principal: &str) -> BackendResult<Option<ResourceRecord>> {
        for record in self.records_of_kind(ResourceKind::Identity).await? {
            if record.attributes()?.get(CANONICAL_USER_ATTR).map(String::as_str) == Some(principal)
            {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Every statement attached to the policy of `bucket`, oldest first.
    pub async fn bucket_statements(&self, bucket: &str) -> BackendResult<Vec<AccessPolicyStatement>> {
        let mut statements = Vec::new();
        for record in self.records_of_kind(ResourceKind::PolicyStatement).await? {
            if let ResourceSpec::PolicyStatement(spec) = record.spec()? {
                if spec.bucket == bucket {
                    statements.push(spec.statement);
                }
            }
        }
        Ok(statements)
    }

    /// Check references and generate the physical id and attributes of a
    /// resource about to be created.
    async fn materialize(
        &self,
        name: &str,
        spec: &ResourceSpec,
    ) -> BackendResult<(String, BTreeMap<String, String>)> {
        let mut attributes = BTreeMap::new();
        let physical_id = match spec {
            ResourceSpec::Identity(_) => {
                let id = Self::generated_id('E');
                attributes.insert(
                    CANONICAL_USER_ATTR.to_string(),
                    format!("{:x}", md5::compute(format!("canonical/{}", id))),
                );
                id
            }
            ResourceSpec::Bucket(props) => {
                validate_bucket_name(name).map_err(|err| BackendError::Rejected(err.to_string()))?;
                if !props.public_access.is_blocked() {
                    warn!(bucket = name, "creating bucket with public access allowed");
                }
                attributes.insert("arn".to_string(), bucket_arn(name));
                attributes.insert(
                    "regional_domain_name".to_string(),
                    format!("{}.s3.localhost", name),
                );
                name.to_string()
            }
            ResourceSpec::PolicyStatement(stmt) => {
                self.validate_statement(&stmt.bucket, &stmt.statement).await?;
                attributes.insert("bucket".to_string(), stmt.bucket.clone());
                format!("{}/{}", stmt.bucket, stmt.statement.sid)
            }
            ResourceSpec::Distribution(dist) => {
                self.validate_distribution(dist).await?;
                let id = Self::generated_id('E');
                attributes.insert(
                    DOMAIN_NAME_ATTR.to_string(),
                    format!("{}.{}", id.to_lowercase(), self.edge_domain),
                );
                id
            }
        };
        Ok((physical_id, attributes))
    }

    async fn validate_statement(
        &self,
        bucket: &str,
        statement: &AccessPolicyStatement,
    ) -> BackendResult<()> {
        self.require_reference(ResourceKind::Bucket, bucket).await?;
        if statement.principals.is_empty() {
            return Err(BackendError::Rejected(format!(
                "statement `{}` names no principal",
                statement.sid
            )));
        }
        for principal in &statement.principals {
            if self.identity_by_principal(principal).await?.is_none() {
                return Err(BackendError::MissingReference {
                    kind: ResourceKind::Identity,
                    id: principal.clone(),
                });
            }
        }
        Ok(())
    }

    async fn validate_distribution(&self, dist: &DistributionSpec) -> BackendResult<()> {
        self.require_reference(ResourceKind::Bucket, &dist.origin_bucket)
            .await?;
        self.require_reference(ResourceKind::Identity, &dist.identity)
            .await?;
        if dist.config.minimum_protocol_version < self.min_tls {
            return Err(BackendError::Rejected(format!(
                "security policy {} is older than {}",
                dist.config.minimum_protocol_version, self.min_tls
            )));
        }
        dist.config.validate().map_err(BackendError::Rejected)
    }

    /// Metadata of every object in `bucket`, ordered by key.
    pub async fn list_objects(&self, bucket: &str) -> BackendResult<Vec<StoredObject>> {
        let objects = sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {} FROM objects WHERE bucket = ? ORDER BY key ASC",
            OBJECT_COLUMNS
        ))
        .bind(bucket)
        .fetch_all(&*self.db)
        .await?;
        Ok(objects)
    }

    /// Write an object to disk and upsert its metadata.
    ///
    /// - Writes to a temporary file, fsyncs, then renames into place.
    /// - Overwrites any existing object under the same key.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        bytes: &[u8],
    ) -> BackendResult<StoredObject> {
        self.ensure_key_safe(key)?;
        self.require_reference(ResourceKind::Bucket, bucket).await?;

        let file_path = self.object_path(bucket, key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = write_synced(&tmp_path, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err));
            }
        }

        let etag = format!("{:x}", md5::compute(bytes));
        let insert_result = sqlx::query_as::<_, StoredObject>(&format!(
            r#"
            INSERT INTO objects ({columns})
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING {columns}
            "#,
            columns = OBJECT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .bind(bytes.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(object) => Ok(object),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(BackendError::Sqlx(err))
            }
        }
    }

    /// Metadata and payload of `key`, or `None` when it does not exist.
    pub async fn read_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> BackendResult<Option<(StoredObject, Vec<u8>)>> {
        self.ensure_key_safe(key)?;
        let object = sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {} FROM objects WHERE bucket = ? AND key = ?",
            OBJECT_COLUMNS
        ))
        .bind(bucket)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;

        let Some(object) = object else {
            return Ok(None);
        };
        match fs::read(self.object_path(bucket, key)).await {
            Ok(bytes) => Ok(Some((object, bytes))),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(bucket, key, "object metadata present but payload missing");
                Ok(None)
            }
            Err(err) => Err(BackendError::Io(err)),
        }
    }

    /// Remove an object's metadata and payload. Returns false if it was
    /// already gone.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> BackendResult<bool> {
        self.ensure_key_safe(key)?;
        let result = sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(BackendError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(result.rows_affected() > 0)
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    /// Cached response for `path`, ignoring entries that expired before `now`.
    pub async fn cache_get(
        &self,
        distribution_id: &str,
        path: &str,
        now: DateTime<Utc>,
    ) -> BackendResult<Option<CachedResponse>> {
        let row = sqlx::query_as::<_, (i64, Option<String>, Vec<u8>, i64)>(
            "SELECT status, content_type, body, expires_at FROM edge_cache
             WHERE distribution_id = ? AND cache_key = ?",
        )
        .bind(distribution_id)
        .bind(path)
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.and_then(|(status, content_type, body, expires_at)| {
            if expires_at <= now.timestamp_millis() {
                return None;
            }
            Some(CachedResponse {
                status: u16::try_from(status).unwrap_or(500),
                content_type,
                body,
                expires_at: DateTime::from_timestamp_millis(expires_at).unwrap_or(now),
            })
        }))
    }

    pub async fn cache_put(
        &self,
        distribution_id: &str,
        path: &str,
        entry: &CachedResponse,
    ) -> BackendResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO edge_cache
             (distribution_id, cache_key, status, content_type, body, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(distribution_id)
        .bind(path)
        .bind(i64::from(entry.status))
        .bind(&entry.content_type)
        .bind(&entry.body)
        .bind(entry.expires_at.timestamp_millis())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Number of invalidations recorded against a distribution.
    pub async fn invalidation_count(&self, distribution_id: &str) -> BackendResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM invalidations WHERE distribution_id = ?",
        )
        .bind(distribution_id)
        .fetch_one(&*self.db)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl ProvisioningBackend for LocalBackend {
    async fn create_resource(
        &self,
        name: &str,
        owner: &str,
        spec: &ResourceSpec,
    ) -> BackendResult<ResourceHandle> {
        let kind = spec.kind();
        if let Some(existing) = self.describe_resource(kind, name).await? {
            return Err(BackendError::AlreadyExists {
                kind,
                name: name.to_string(),
                owner: existing.owner,
            });
        }

        let (physical_id, attributes) = self.materialize(name, spec).await?;
        if kind == ResourceKind::Bucket {
            fs::create_dir_all(self.bucket_root(&physical_id)).await?;
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO resources
             (id, kind, name, physical_id, owner, spec, spec_hash, attributes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(kind.as_str())
        .bind(name)
        .bind(&physical_id)
        .bind(owner)
        .bind(spec.to_json()?)
        .bind(spec.fingerprint()?)
        .bind(serde_json::to_string(&attributes)?)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(BackendError::AlreadyExists {
                    kind,
                    name: name.to_string(),
                    owner: "unknown".to_string(),
                });
            }
            Err(err) => return Err(BackendError::Sqlx(err)),
        }

        info!(%kind, name, physical_id = %physical_id, "created resource");
        Ok(ResourceHandle {
            kind,
            name: name.to_string(),
            physical_id,
            attributes,
        })
    }

    async fn update_resource(
        &self,
        handle: &ResourceHandle,
        spec: &ResourceSpec,
    ) -> BackendResult<ResourceHandle> {
        let kind = spec.kind();
        if kind != handle.kind {
            return Err(BackendError::Rejected(format!(
                "cannot change {} `{}` into a {}",
                handle.kind, handle.name, kind
            )));
        }
        let record = self
            .describe_resource(kind, &handle.name)
            .await?
            .ok_or_else(|| BackendError::NotFound {
                kind,
                name: handle.name.clone(),
            })?;

        let physical_id = match spec {
            ResourceSpec::PolicyStatement(stmt) => {
                self.validate_statement(&stmt.bucket, &stmt.statement).await?;
                format!("{}/{}", stmt.bucket, stmt.statement.sid)
            }
            ResourceSpec::Distribution(dist) => {
                self.validate_distribution(dist).await?;
                record.physical_id.clone()
            }
            ResourceSpec::Bucket(props) => {
                if !props.public_access.is_blocked() {
                    warn!(bucket = %record.physical_id, "allowing public access on bucket");
                }
                record.physical_id.clone()
            }
            ResourceSpec::Identity(_) => record.physical_id.clone(),
        };

        sqlx::query(
            "UPDATE resources SET physical_id = ?, spec = ?, spec_hash = ?, updated_at = ?
             WHERE kind = ? AND name = ?",
        )
        .bind(&physical_id)
        .bind(spec.to_json()?)
        .bind(spec.fingerprint()?)
        .bind(Utc::now())
        .bind(kind.as_str())
        .bind(&handle.name)
        .execute(&*self.db)
        .await?;

        info!(%kind, name = %handle.name, "updated resource");
        Ok(ResourceHandle {
            kind,
            name: handle.name.clone(),
            physical_id,
            attributes: record.attributes()?,
        })
    }

    async fn delete_resource(&self, handle: &ResourceHandle) -> BackendResult<()> {
        let record = self
            .describe_resource(handle.kind, &handle.name)
            .await?
            .ok_or_else(|| BackendError::NotFound {
                kind: handle.kind,
                name: handle.name.clone(),
            })?;

        match record.spec()? {
            ResourceSpec::Bucket(props) => {
                let bucket = record.physical_id.as_str();
                let objects = self.list_objects(bucket).await?;
                let purge = matches!(
                    props.removal,
                    RemovalPolicy::Destroy {
                        auto_delete_objects: true
                    }
                );
                if !objects.is_empty() && !purge {
                    return Err(BackendError::Rejected(format!(
                        "bucket `{}` is not empty ({} objects)",
                        bucket,
                        objects.len()
                    )));
                }
                for object in &objects {
                    self.delete_object(bucket, &object.key).await?;
                }
                for statement in self.records_of_kind(ResourceKind::PolicyStatement).await? {
                    if statement.attributes()?.get("bucket").map(String::as_str) == Some(bucket) {
                        sqlx::query("DELETE FROM resources WHERE id = ?")
                            .bind(statement.id)
                            .execute(&*self.db)
                            .await?;
                    }
                }
                if let Err(err) = fs::remove_dir_all(self.bucket_root(bucket)).await {
                    if err.kind() != ErrorKind::NotFound {
                        debug!("failed to remove bucket directory for {}: {}", bucket, err);
                    }
                }
                debug!(bucket, purged = objects.len(), "purged bucket");
            }
            ResourceSpec::Identity(_) => {
                for dist in self.records_of_kind(ResourceKind::Distribution).await? {
                    if let ResourceSpec::Distribution(spec) = dist.spec()? {
                        if spec.identity == record.physical_id {
                            return Err(BackendError::Rejected(format!(
                                "identity `{}` is in use by distribution `{}`",
                                record.physical_id, dist.physical_id
                            )));
                        }
                    }
                }
            }
            ResourceSpec::Distribution(_) => {
                sqlx::query("DELETE FROM edge_cache WHERE distribution_id = ?")
                    .bind(&record.physical_id)
                    .execute(&*self.db)
                    .await?;
            }
            ResourceSpec::PolicyStatement(_) => {}
        }

        sqlx::query("DELETE FROM resources WHERE kind = ? AND name = ?")
            .bind(handle.kind.as_str())
            .bind(&handle.name)
            .execute(&*self.db)
            .await?;

        info!(kind = %handle.kind, name = %handle.name, "deleted resource");
        Ok(())
    }

    async fn describe_resource(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> BackendResult<Option<ResourceRecord>> {
        let record = sqlx::query_as::<_, ResourceRecord>(&format!(
            "SELECT {} FROM resources WHERE kind = ? AND name = ?",
            RESOURCE_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    async fn list_resources(&self, owner: &str) -> BackendResult<Vec<ResourceRecord>> {
        let records = sqlx::query_as::<_, ResourceRecord>(&format!(
            "SELECT {} FROM resources WHERE owner = ? ORDER BY created_at ASC",
            RESOURCE_COLUMNS
        ))
        .bind(owner)
        .fetch_all(&*self.db)
        .await?;
        Ok(records)
    }

    async fn sync_objects(
        &self,
        source: &Path,
        destination: &ResourceHandle,
        prune: bool,
        limits: &ResourceLimits,
    ) -> BackendResult<SyncReport> {
        let bucket = destination.physical_id.as_str();
        self.require_reference(ResourceKind::Bucket, bucket).await?;

        let files = collect_source(source.to_path_buf()).await?;

        // All limit and key checks happen before the first transfer.
        let total: u64 = files.iter().map(|f| f.size).sum();
        if total > limits.ephemeral_storage_bytes {
            return Err(BackendError::LimitExceeded(format!(
                "content set is {} bytes, ephemeral storage allows {}",
                total, limits.ephemeral_storage_bytes
            )));
        }
        if let Some(file) = files
            .iter()
            .find(|f| f.size > limits.memory_limit_bytes)
        {
            return Err(BackendError::LimitExceeded(format!(
                "`{}` is {} bytes, memory limit is {}",
                file.key, file.size, limits.memory_limit_bytes
            )));
        }
        for file in &files {
            self.ensure_key_safe(&file.key)?;
        }

        let existing: HashMap<String, String> = self
            .list_objects(bucket)
            .await?
            .into_iter()
            .map(|object| (object.key, object.etag))
            .collect();

        let mut report = SyncReport::default();
        for file in &files {
            let bytes = fs::read(&file.path).await?;
            let etag = format!("{:x}", md5::compute(&bytes));
            if existing.get(&file.key) == Some(&etag) {
                report.unchanged += 1;
                continue;
            }
            self.put_object(bucket, &file.key, Some(content_type_for(&file.key).into()), &bytes)
                .await?;
            report.bytes_uploaded += bytes.len() as u64;
            report.uploaded.push(file.key.clone());
        }

        if prune {
            let source_keys: HashSet<&str> = files.iter().map(|f| f.key.as_str()).collect();
            let mut stale: Vec<&String> = existing
                .keys()
                .filter(|key| !source_keys.contains(key.as_str()))
                .collect();
            stale.sort();
            for key in stale {
                self.delete_object(bucket, key).await?;
                report.deleted.push(key.clone());
            }
        }

        debug!(
            bucket,
            uploaded = report.uploaded.len(),
            unchanged = report.unchanged,
            deleted = report.deleted.len(),
            "synced objects"
        );
        Ok(report)
    }

    async fn invalidate_cache(
        &self,
        distribution: &ResourceHandle,
        paths: &[String],
    ) -> BackendResult<String> {
        let distribution_id = distribution.physical_id.as_str();
        let record = self
            .require_reference(ResourceKind::Distribution, distribution_id)
            .await?;
        let root_key = match record.spec()? {
            ResourceSpec::Distribution(spec) => spec
                .config
                .default_root_object
                .map(|root| format!("/{}", root)),
            _ => None,
        };

        if paths.is_empty() {
            return Err(BackendError::Rejected(
                "invalidation needs at least one path".into(),
            ));
        }
        if let Some(bad) = paths.iter().find(|p| !p.starts_with('/')) {
            return Err(BackendError::Rejected(format!(
                "invalidation path `{}` must start with `/`",
                bad
            )));
        }

        // `/` is cached under the default root object's key.
        let mut targets: Vec<&str> = paths.iter().map(String::as_str).collect();
        if let Some(root_key) = &root_key {
            if targets.contains(&"/") {
                targets.push(root_key);
            }
        }

        let mut evicted = 0;
        for path in targets {
            let result = match path.strip_suffix('*') {
                Some(prefix) => {
                    sqlx::query(
                        "DELETE FROM edge_cache
                         WHERE distribution_id = ? AND cache_key LIKE ? ESCAPE '\\'",
                    )
                    .bind(distribution_id)
                    .bind(format!("{}%", escape_like(prefix)))
                    .execute(&*self.db)
                    .await?
                }
                None => {
                    sqlx::query("DELETE FROM edge_cache WHERE distribution_id = ? AND cache_key = ?")
                        .bind(distribution_id)
                        .bind(path)
                        .execute(&*self.db)
                        .await?
                }
            };
            evicted += result.rows_affected();
        }

        let id = Self::generated_id('I');
        sqlx::query(
            "INSERT INTO invalidations (id, distribution_id, paths, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(distribution_id)
        .bind(serde_json::to_string(paths)?)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        info!(distribution = distribution_id, invalidation = %id, evicted, "invalidated cache");
        Ok(id)
    }

    fn min_tls_version(&self) -> TlsVersion {
        self.min_tls
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Walk `source` and return its regular files keyed by `/`-joined relative
/// path, in name order.
async fn collect_source(source: PathBuf) -> BackendResult<Vec<SourceFile>> {
    let scan = tokio::task::spawn_blocking(move || -> io::Result<Vec<SourceFile>> {
        if !source.is_dir() {
            return Err(io::Error::new(
                ErrorKind::NotFound,
                format!("content source {} is not a directory", source.display()),
            ));
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&source).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&source)
                .map_err(io::Error::other)?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let size = entry.metadata().map_err(io::Error::from)?.len();
            files.push(SourceFile {
                key,
                path: entry.path().to_path_buf(),
                size,
            });
        }
        Ok(files)
    })
    .await
    .map_err(|err| BackendError::Unavailable(format!("source scan task failed: {}", err)))?;

    Ok(scan?)
}

fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json" | "map") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
