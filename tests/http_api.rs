#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use ritratto::{
    application::render::{RenderPolicy, RenderService},
    infra::http::{RenderState, build_router},
};
use tempfile::TempDir;
use tower::ServiceExt;

fn fake_renderer(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("fake-renderer");
    fs::write(&path, script).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set perms");
    path
}

fn router_for(script: PathBuf) -> Router {
    let renderer = Arc::new(RenderService::new(RenderPolicy {
        browser_path: script,
        ignore_cert_errors: true,
        disable_sandbox: false,
        proxy: None,
        debug: false,
    }));
    build_router(RenderState { renderer })
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
        .to_vec()
}

#[tokio::test]
async fn screenshot_endpoint_serves_png() {
    let dir = TempDir::new().expect("temp dir");
    let script = fake_renderer(
        dir.path(),
        "#!/bin/sh\nprintf '\\211PNG\\r\\n\\032\\n' > screenshot.png\n",
    );
    let router = router_for(script);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/screenshot?url=https://example.com&w=1024&h=768")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(b"image/png".as_slice())
    );
    let body = body_bytes(response).await;
    assert!(body.starts_with(b"\x89PNG"));
}

#[tokio::test]
async fn dom_endpoint_returns_renderer_stdout() {
    let dir = TempDir::new().expect("temp dir");
    let script = fake_renderer(
        dir.path(),
        "#!/bin/sh\nprintf '<html><body>ok</body></html>'\n",
    );
    let router = router_for(script);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/html?url=https://example.com")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(b"text/plain".as_slice())
    );
    let body = body_bytes(response).await;
    assert_eq!(body, b"<html><body>ok</body></html>");
}

#[tokio::test]
async fn missing_url_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let script = fake_renderer(dir.path(), "#!/bin/sh\nexit 0\n");
    let router = router_for(script);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/screenshot")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_dimensions_are_rejected_before_rendering() {
    let dir = TempDir::new().expect("temp dir");
    let invocations = dir.path().join("invocations.log");
    let script = fake_renderer(
        dir.path(),
        &format!("#!/bin/sh\necho invoked >> \"{}\"\n", invocations.display()),
    );
    let router = router_for(script);

    for query in ["w=abc", "w=0", "h=-5"] {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/screenshot?url=https://example.com&{query}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "query `{query}` was not rejected"
        );
    }

    assert!(
        !invocations.exists(),
        "renderer ran for an invalid request"
    );
}

#[tokio::test]
async fn width_without_height_renders_without_window_size() {
    let dir = TempDir::new().expect("temp dir");
    let args_log = dir.path().join("args.log");
    let script = fake_renderer(
        dir.path(),
        &format!(
            "#!/bin/sh\necho \"$@\" >> \"{}\"\nprintf '\\211PNG\\r\\n\\032\\n' > screenshot.png\n",
            args_log.display()
        ),
    );
    let router = router_for(script);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/screenshot?url=https://example.com&w=1024")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let log = fs::read_to_string(&args_log).expect("args log");
    assert!(!log.contains("--window-size"), "args: {log}");
}

#[tokio::test]
async fn html_to_pdf_renders_spooled_document() {
    let dir = TempDir::new().expect("temp dir");
    let args_log = dir.path().join("args.log");
    let script = fake_renderer(
        dir.path(),
        &format!(
            "#!/bin/sh\necho \"$@\" >> \"{}\"\nprintf '%%PDF-1.7 fake document' > output.pdf\n",
            args_log.display()
        ),
    );
    let router = router_for(script);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/html2pdf?w=1024&h=768")
                .body(Body::from("<html><body>fattura</body></html>"))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(b"application/pdf".as_slice())
    );
    let body = body_bytes(response).await;
    assert!(body.starts_with(b"%PDF"));

    // The renderer saw a spooled HTML file as its target, and the spool file
    // is gone once the response is produced.
    let log = fs::read_to_string(&args_log).expect("args log");
    let target = log
        .split_whitespace()
        .last()
        .expect("target argument")
        .to_string();
    assert!(target.ends_with(".html"), "target: {target}");
    assert!(!Path::new(&target).exists(), "spool file left behind");
}

#[tokio::test]
async fn empty_html_to_pdf_body_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let invocations = dir.path().join("invocations.log");
    let script = fake_renderer(
        dir.path(),
        &format!("#!/bin/sh\necho invoked >> \"{}\"\n", invocations.display()),
    );
    let router = router_for(script);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/html2pdf")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!invocations.exists(), "renderer ran for an empty body");
}

#[tokio::test]
async fn renderer_failure_yields_generic_error_response() {
    let dir = TempDir::new().expect("temp dir");
    let script = fake_renderer(
        dir.path(),
        "#!/bin/sh\necho 'secret internal path /srv/render' >&2\nexit 5\n",
    );
    let router = router_for(script);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/screenshot?url=https://example.com")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(response).await).expect("utf8 body");
    assert_eq!(body, "There was an error processing your request");
    assert!(!body.contains("/srv/render"), "diagnostics leaked: {body}");
}

#[tokio::test]
async fn unknown_routes_fall_back_to_not_found() {
    let dir = TempDir::new().expect("temp dir");
    let script = fake_renderer(dir.path(), "#!/bin/sh\nexit 0\n");
    let router = router_for(script);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/definitely-not-a-route")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get(header::CONNECTION).map(|v| v.as_bytes()),
        Some(b"close".as_slice())
    );
    let body = body_bytes(response).await;
    assert_eq!(body, b"Not found");
}

#[tokio::test]
async fn health_endpoint_responds_no_content() {
    let dir = TempDir::new().expect("temp dir");
    let script = fake_renderer(dir.path(), "#!/bin/sh\nexit 0\n");
    let router = router_for(script);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/_health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
