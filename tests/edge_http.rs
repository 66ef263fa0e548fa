mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use common::{local_ctx, memory_backend, props_publishing, put_file, write_site};
use site_stack::{
    models::outputs::OutputKey,
    routes::routes::routes,
    services::{
        edge::EdgeService,
        local_backend::LocalBackend,
        retry::RetryPolicy,
        stack::{FrontendProps, StackApp},
    },
};
use tempfile::TempDir;
use tower::ServiceExt;

struct Deployed {
    router: Router,
    domain: String,
    backend: LocalBackend,
    content: TempDir,
    _data: TempDir,
}

fn page(title: &str) -> String {
    format!(
        "<html><body><h1>{}</h1>{}</body></html>",
        title,
        "<p>static content</p>".repeat(64)
    )
}

async fn deploy(tweak: impl FnOnce(&mut FrontendProps)) -> Deployed {
    let (backend, data) = memory_backend().await;
    let home = page("home");
    let content = write_site(&[("index.html", home.as_str()), ("error.html", "oops")]);
    let ctx = local_ctx();

    let mut props = props_publishing(content.path());
    tweak(&mut props);
    let mut app = StackApp::new(&ctx);
    app.add_frontend("Frontend", props);
    let reports = app.deploy(&backend, RetryPolicy::none()).await.unwrap();

    Deployed {
        router: routes().with_state(EdgeService::new(backend.clone())),
        domain: reports[0]
            .outputs
            .get(OutputKey::DistributionDomainName)
            .unwrap()
            .to_string(),
        backend,
        content,
        _data: data,
    }
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

fn get(domain: &str, path: &str) -> axum::http::request::Builder {
    Request::builder().uri(path).header(header::HOST, domain)
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_endpoints_answer_ok() {
    let site = deploy(|_| {}).await;

    let live = send(&site.router, Request::get("/healthz").body(Body::empty()).unwrap()).await;
    assert_eq!(live.status(), StatusCode::OK);

    let ready = send(&site.router, Request::get("/readyz").body(Body::empty()).unwrap()).await;
    assert_eq!(ready.status(), StatusCode::OK);
    assert!(body_text(ready).await.contains(r#""status":"ok""#));
}

#[tokio::test]
async fn root_is_served_and_cached() {
    let site = deploy(|_| {}).await;

    let first = send(&site.router, get(&site.domain, "/").body(Body::empty()).unwrap()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-cache"], "Miss from edge");
    assert_eq!(body_text(first).await, page("home"));

    let second = send(&site.router, get(&site.domain, "/").body(Body::empty()).unwrap()).await;
    assert_eq!(second.headers()["x-cache"], "Hit from edge");
}

#[tokio::test]
async fn compression_follows_the_behavior_flag() {
    let site = deploy(|_| {}).await;
    let gzip = send(
        &site.router,
        get(&site.domain, "/index.html")
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(gzip.headers()[header::CONTENT_ENCODING], "gzip");

    let plain = deploy(|props| props.distribution.default_behavior.compress = false).await;
    let identity = send(
        &plain.router,
        get(&plain.domain, "/index.html")
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(identity.headers()[header::CONTENT_ENCODING], "identity");
    assert_eq!(body_text(identity).await, page("home"));
}

#[tokio::test]
async fn plaintext_viewers_are_redirected_and_writes_refused() {
    let site = deploy(|_| {}).await;

    let redirect = send(
        &site.router,
        get(&site.domain, "/index.html")
            .header("x-forwarded-proto", "http")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(redirect.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        redirect.headers()[header::LOCATION],
        format!("https://{}/index.html", site.domain).as_str()
    );

    let post = send(
        &site.router,
        get(&site.domain, "/index.html")
            .method("POST")
            .body(Body::from("x"))
            .unwrap(),
    )
    .await;
    assert_eq!(post.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(post.headers()[header::ALLOW], "GET, HEAD, OPTIONS");
}

#[tokio::test]
async fn missing_pages_get_the_error_page() {
    let site = deploy(|_| {}).await;
    let resp = send(
        &site.router,
        get(&site.domain, "/nope.html").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(resp.headers()["x-cache"], "Error from edge");
    assert_eq!(body_text(resp).await, "oops");
}

#[tokio::test]
async fn percent_encoded_paths_address_decoded_keys() {
    let site = deploy(|_| {}).await;
    put_file(site.content.path(), "about us.html", "about");
    let ctx = local_ctx();
    let mut app = StackApp::new(&ctx);
    app.add_frontend("Frontend", props_publishing(site.content.path()));
    app.deploy(&site.backend, RetryPolicy::none()).await.unwrap();

    let resp = send(
        &site.router,
        get(&site.domain, "/about%20us.html").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "about");

    let invalid = send(
        &site.router,
        get(&site.domain, "/%FF.html").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn republishing_invalidates_cached_pages() {
    let site = deploy(|_| {}).await;
    let before = send(&site.router, get(&site.domain, "/").body(Body::empty()).unwrap()).await;
    assert_eq!(body_text(before).await, page("home"));

    put_file(site.content.path(), "index.html", &page("updated"));
    let ctx = local_ctx();
    let mut app = StackApp::new(&ctx);
    app.add_frontend("Frontend", props_publishing(site.content.path()));
    let reports = app.deploy(&site.backend, RetryPolicy::none()).await.unwrap();
    assert_eq!(
        reports[0].publish.as_ref().unwrap().report.uploaded,
        vec!["index.html"]
    );

    let after = send(&site.router, get(&site.domain, "/").body(Body::empty()).unwrap()).await;
    assert_eq!(after.headers()["x-cache"], "Miss from edge");
    assert_eq!(body_text(after).await, page("updated"));
}
