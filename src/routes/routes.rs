//! Router of the edge emulator.
//!
//! - `GET /healthz`, `GET /readyz`: probes
//! - anything else: served by the distribution whose domain matches `Host`

use crate::{
    handlers::{
        edge_handlers::serve_edge,
        health_handlers::{healthz, readyz},
    },
    services::edge::EdgeService,
};
use axum::{Router, routing::get};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

pub fn routes() -> Router<EdgeService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .fallback(serve_edge)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}
