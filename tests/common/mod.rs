#![allow(dead_code)]

use site_stack::{
    models::context::StackContext,
    services::{
        local_backend::LocalBackend,
        stack::{ContentSource, FrontendProps},
    },
};
use std::path::Path;
use tempfile::TempDir;

pub async fn memory_backend() -> (LocalBackend, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let backend = LocalBackend::in_memory(dir.path().join("objects"), "edge.localhost")
        .await
        .expect("in-memory backend");
    (backend, dir)
}

pub fn local_ctx() -> StackContext {
    StackContext::new("my-app", "local", "eu-west-1").expect("valid context")
}

/// A content directory holding `files` (relative path, contents).
pub fn write_site(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    for (path, contents) in files {
        put_file(dir.path(), path, contents);
    }
    dir
}

pub fn put_file(root: &Path, path: &str, contents: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(full, contents).expect("write file");
}

pub fn props_publishing(content: &Path) -> FrontendProps {
    FrontendProps {
        content: Some(ContentSource::new(content)),
        ..FrontendProps::default()
    }
}
