use std::{any::Any, io::Write, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

use crate::application::{
    error::{ErrorReport, HttpError},
    render::{Artifact, RenderAction, RenderRequest, RenderService},
};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct RenderState {
    pub renderer: Arc<RenderService>,
}

pub fn build_router(state: RenderState) -> Router {
    Router::new()
        .route("/screenshot", get(screenshot))
        .route("/url2pdf", get(url_to_pdf))
        .route("/html2pdf", post(html_to_pdf))
        .route("/html", get(dom_dump))
        .route("/_health", get(health))
        .fallback(not_found)
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RenderQuery {
    url: Option<String>,
    w: Option<String>,
    h: Option<String>,
    useragent: Option<String>,
}

// http://localhost:8080/screenshot?url=https://example.com&w=1024&h=768
async fn screenshot(
    State(state): State<RenderState>,
    Query(query): Query<RenderQuery>,
) -> Result<Response, HttpError> {
    let request = url_request("infra::http::render::screenshot", &query)?;
    let artifact = state
        .renderer
        .render(RenderAction::Screenshot, request)
        .await?;
    Ok(artifact_response(artifact))
}

// http://localhost:8080/url2pdf?url=https://example.com&w=1024&h=768
async fn url_to_pdf(
    State(state): State<RenderState>,
    Query(query): Query<RenderQuery>,
) -> Result<Response, HttpError> {
    let request = url_request("infra::http::render::url_to_pdf", &query)?;
    let artifact = state.renderer.render(RenderAction::Pdf, request).await?;
    Ok(artifact_response(artifact))
}

// http://localhost:8080/html?url=https://example.com
async fn dom_dump(
    State(state): State<RenderState>,
    Query(query): Query<RenderQuery>,
) -> Result<Response, HttpError> {
    let request = url_request("infra::http::render::dom_dump", &query)?;
    let artifact = state.renderer.render(RenderAction::Dom, request).await?;
    Ok(artifact_response(artifact))
}

// POST http://localhost:8080/html2pdf?w=1024&h=768 with the HTML as the body
async fn html_to_pdf(
    State(state): State<RenderState>,
    Query(query): Query<RenderQuery>,
    body: Bytes,
) -> Result<Response, HttpError> {
    const SOURCE: &str = "infra::http::render::html_to_pdf";

    let width = parse_dimension(SOURCE, "w", query.w.as_deref())?;
    let height = parse_dimension(SOURCE, "h", query.h.as_deref())?;

    if body.is_empty() {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Empty request body",
            "POST body must contain the HTML document to convert",
        ));
    }

    // The renderer only accepts URLs and file paths, so spool the document
    // to disk; the spool file is removed when it goes out of scope.
    let spool = spool_html(SOURCE, &body)?;
    let target = spool
        .path()
        .to_str()
        .ok_or_else(|| {
            HttpError::new(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "There was an error processing your request",
                "spool file path is not valid UTF-8",
            )
        })?
        .to_string();

    let request = RenderRequest {
        target,
        width,
        height,
        user_agent: user_agent(&query),
    };
    let artifact = state.renderer.render(RenderAction::Pdf, request).await?;
    Ok(artifact_response(artifact))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn not_found() -> Response {
    let mut response = (StatusCode::NOT_FOUND, "Not found").into_response();
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

fn url_request(source: &'static str, query: &RenderQuery) -> Result<RenderRequest, HttpError> {
    let url = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| {
            HttpError::new(
                source,
                StatusCode::BAD_REQUEST,
                "Missing required parameter",
                "query parameter `url` is required",
            )
        })?;

    Ok(RenderRequest {
        target: url.to_string(),
        width: parse_dimension(source, "w", query.w.as_deref())?,
        height: parse_dimension(source, "h", query.h.as_deref())?,
        user_agent: user_agent(query),
    })
}

fn user_agent(query: &RenderQuery) -> Option<String> {
    query
        .useragent
        .as_deref()
        .filter(|agent| !agent.is_empty())
        .map(str::to_string)
}

/// A dimension may be absent, but a present value must be a positive integer.
fn parse_dimension(
    source: &'static str,
    name: &'static str,
    value: Option<&str>,
) -> Result<Option<u32>, HttpError> {
    let Some(raw) = value.filter(|value| !value.is_empty()) else {
        return Ok(None);
    };

    match raw.parse::<u32>() {
        Ok(parsed) if parsed > 0 => Ok(Some(parsed)),
        _ => Err(HttpError::new(
            source,
            StatusCode::BAD_REQUEST,
            "Invalid parameter",
            format!("query parameter `{name}`=`{raw}` must be a positive integer"),
        )),
    }
}

fn spool_html(source: &'static str, body: &[u8]) -> Result<NamedTempFile, HttpError> {
    let mut spool = tempfile::Builder::new()
        .prefix("pdf-")
        .suffix(".html")
        .tempfile()
        .map_err(|err| {
            HttpError::new(
                source,
                StatusCode::INTERNAL_SERVER_ERROR,
                "There was an error processing your request",
                format!("failed to create spool file: {err}"),
            )
        })?;

    spool
        .write_all(body)
        .and_then(|()| spool.flush())
        .map_err(|err| {
            HttpError::new(
                source,
                StatusCode::INTERNAL_SERVER_ERROR,
                "There was an error processing your request",
                format!("failed to write spool file: {err}"),
            )
        })?;

    Ok(spool)
}

fn artifact_response(artifact: Artifact) -> Response {
    let length = artifact.bytes.len();
    let mut response = Response::new(Body::from(artifact.bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(artifact.content_type));
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }

    response
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "panic with non-string payload".to_string()
    };

    error!(
        target = "ritratto::http::panic",
        detail = %detail,
        "request handler panicked"
    );

    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        "There was an error processing your request",
    )
        .into_response();
    ErrorReport::from_message(
        "infra::http::render::panic_response",
        StatusCode::INTERNAL_SERVER_ERROR,
        detail,
    )
    .attach(&mut response);
    response
}
