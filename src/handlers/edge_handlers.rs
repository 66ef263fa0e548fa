//! Viewer-facing handler: every request that is not a probe is answered by
//! the edge emulator.

use crate::{
    errors::AppError,
    services::edge::{EdgeRequest, EdgeResponse, EdgeService},
};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;

/// Fallback for all paths; the distribution is picked by `Host`.
pub async fn serve_edge(
    State(service): State<EdgeService>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, AppError> {
    let host = header_value(&headers, header::HOST.as_str())
        .or_else(|| uri.host().map(str::to_string))
        .unwrap_or_default();

    let request = EdgeRequest {
        method: method.as_str().to_string(),
        host,
        path: uri.path().to_string(),
        forwarded_proto: header_value(&headers, "x-forwarded-proto"),
        tls_version: header_value(&headers, "x-forwarded-tls-version"),
    };

    let edge = service.handle(&request, Utc::now()).await?;
    Ok(edge_response(edge))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn edge_response(edge: EdgeResponse) -> Response {
    let status = StatusCode::from_u16(edge.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, Body::from(edge.body)).into_response();
    let headers = response.headers_mut();

    let optional = [
        (header::CONTENT_TYPE, edge.content_type),
        (header::LOCATION, edge.location),
        (header::ALLOW, edge.allow),
    ];
    for (name, value) in optional {
        if let Some(value) = value.and_then(|v| HeaderValue::from_str(&v).ok()) {
            headers.insert(name, value);
        }
    }
    headers.insert(
        "x-cache",
        HeaderValue::from_static(edge.cache.header_value()),
    );
    // An explicit identity encoding keeps the compression layer away.
    if !edge.compress {
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("identity"));
    }

    response
}
