//! Core data models for the static-site stack.
//!
//! Resource descriptions and handles serialize via `serde`; the stored
//! records map to SQLite rows via `sqlx::FromRow`.

pub mod bucket;
pub mod context;
pub mod distribution;
pub mod identity;
pub mod object;
pub mod outputs;
pub mod publish;
pub mod resource;
