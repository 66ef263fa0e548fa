//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness ("ok")
//! - GET /readyz   -> readiness of the metadata database and object directory

use crate::services::{edge::EdgeService, local_backend::LocalBackend};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// 200 when SQLite answers `SELECT 1` and a probe file can be written and
/// read back under the object directory, 503 otherwise.
pub async fn readyz(State(service): State<EdgeService>) -> impl IntoResponse {
    let backend = &service.backend;
    let mut checks = BTreeMap::new();
    checks.insert("sqlite", CheckStatus::from(sqlite_check(backend).await));
    checks.insert("disk", CheckStatus::from(disk_check(&backend.base_path).await));

    let ready = checks.values().all(|check| check.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        checks,
    };
    (status, Json(body))
}

async fn sqlite_check(
    backend: &LocalBackend,
) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*backend.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {}", v)),
        Err(e) => Err(format!("error: {}", e)),
    }
}

async fn disk_check(base_path: &Path) -> Result<(), String> {
    fs::create_dir_all(base_path)
        .await
        .map_err(|e| format!("could not create {}: {}", base_path.display(), e))?;

    let probe = base_path.join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&probe, b"readyz")
        .await
        .map_err(|e| format!("could not write probe file: {}", e))?;
    let read = fs::read(&probe).await;
    // best-effort cleanup
    let _ = fs::remove_file(&probe).await;

    match read {
        Ok(bytes) if bytes == b"readyz" => Ok(()),
        Ok(_) => Err("probe file content mismatch".to_string()),
        Err(e) => Err(format!("could not read probe file: {}", e)),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl From<Result<(), String>> for CheckStatus {
    fn from(result: Result<(), String>) -> Self {
        Self {
            ok: result.is_ok(),
            error: result.err(),
        }
    }
}
