//! Fixtures shared by unit tests. `tests/common` wraps the same constructor.

use crate::services::local_backend::LocalBackend;
use tempfile::TempDir;

/// A migrated in-memory backend whose objects live in a temporary
/// directory. Keep the `TempDir` alive for the duration of the test.
pub async fn memory_backend() -> (LocalBackend, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let backend = LocalBackend::in_memory(dir.path().join("objects"), "edge.localhost")
        .await
        .expect("in-memory backend");
    (backend, dir)
}
