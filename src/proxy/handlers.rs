//! HTTP request handlers for the gateway routes.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};

use super::gateway::{UpstreamReply, BASE_URL_OVERRIDE_HEADER, LOG_STATUS_HEADER};
use super::server::AppState;
use crate::error::Error;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Read the base URL override. A header that is present but not visible
/// ASCII is rejected rather than treated as absent.
fn override_header(headers: &HeaderMap) -> Result<Option<&str>, Error> {
    match headers.get(BASE_URL_OVERRIDE_HEADER) {
        None => Ok(None),
        Some(value) => value.to_str().map(Some).map_err(|_| {
            Error::bad_request(format!(
                "{} must be an absolute http(s) URL",
                BASE_URL_OVERRIDE_HEADER
            ))
        }),
    }
}

/// Relay an upstream reply, keeping its status, content type and body bytes.
fn relay(reply: UpstreamReply) -> Response {
    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = reply.status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        reply
            .content_type
            .unwrap_or_else(|| HeaderValue::from_static("application/json")),
    );
    if reply.log_failed {
        headers.insert(
            HeaderName::from_static(LOG_STATUS_HEADER),
            HeaderValue::from_static("failed"),
        );
    }
    response
}

/// Handle POST /v1/chat/completions
///
/// The forward and its log write run in their own task, so a client that
/// disconnects mid-call does not cancel the log write after the upstream
/// has answered.
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    let authorization = header_str(&headers, header::AUTHORIZATION.as_str()).map(str::to_string);
    let override_url = override_header(&headers)?.map(str::to_string);
    let gateway = state.gateway.clone();

    let reply = tokio::spawn(async move {
        gateway
            .chat_completion(authorization.as_deref(), override_url.as_deref(), body)
            .await
    })
    .await
    .map_err(|e| Error::Internal(format!("chat completion task failed: {}", e)))??;
    Ok(relay(reply))
}

/// Handle GET /v1/models
pub async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let reply = state
        .gateway
        .list_models(
            header_str(&headers, header::AUTHORIZATION.as_str()),
            override_header(&headers)?,
        )
        .await?;
    Ok(relay(reply))
}

/// Handle GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "keygate",
        "providers": state.registry.providers().len()
    }))
}
