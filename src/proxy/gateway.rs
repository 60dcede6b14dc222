//! Forwarding of OpenAI-compatible calls to a caller-chosen upstream.
//!
//! The caller's bearer token is reused as the upstream credential. Nothing is
//! looked up in the vault on this path.

use axum::http::{header, HeaderValue, StatusCode};
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;

use super::types::ChatCompletionRequest;
use crate::error::{Error, Result};
use crate::logger::{CallLogEntry, CallLogger};
use crate::registry::ProviderRegistry;

/// Header selecting the upstream base URL for a single call.
pub const BASE_URL_OVERRIDE_HEADER: &str = "x-openai-base-url";

/// Response header set when the call log could not be written.
pub const LOG_STATUS_HEADER: &str = "x-keygate-log-status";

/// An upstream reply passed back to the caller as-is.
#[derive(Debug)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
    /// Set when the call succeeded but its log entry was not persisted.
    pub log_failed: bool,
}

/// Extract the token from an `Authorization` header value.
///
/// The `Bearer ` prefix is optional. A missing or blank token is
/// [`Error::Unauthorized`].
pub fn bearer_token(authorization: Option<&str>) -> Result<&str> {
    let value = authorization.ok_or(Error::Unauthorized)?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();
    if token.is_empty() {
        return Err(Error::Unauthorized);
    }
    Ok(token)
}

#[derive(Clone)]
pub struct Gateway {
    http_client: Client,
    registry: Arc<ProviderRegistry>,
    logger: CallLogger,
}

impl Gateway {
    pub fn new(http_client: Client, registry: Arc<ProviderRegistry>, logger: CallLogger) -> Self {
        Self {
            http_client,
            registry,
            logger,
        }
    }

    /// Pick the base URL: the override header when present, else the
    /// registry default. Trailing slashes are dropped. Endpoint paths are
    /// appended to the result, so an override may not carry a query or
    /// fragment.
    fn base_url(&self, override_url: Option<&str>) -> Result<String> {
        let invalid = || {
            Error::bad_request(format!(
                "{} must be an absolute http(s) URL without query or fragment",
                BASE_URL_OVERRIDE_HEADER
            ))
        };
        let base = match override_url.map(str::trim) {
            Some(raw) => {
                let parsed = url::Url::parse(raw).map_err(|_| invalid())?;
                if !matches!(parsed.scheme(), "http" | "https")
                    || parsed.query().is_some()
                    || parsed.fragment().is_some()
                {
                    return Err(invalid());
                }
                raw.to_string()
            }
            None => self.registry.default_base_url()?.to_string(),
        };
        Ok(base.trim_end_matches('/').to_string())
    }

    /// Send the request and turn non-success statuses into [`Error::Upstream`].
    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<UpstreamReply> {
        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, url = %url, "Failed to reach upstream");
            Error::Upstream {
                status: None,
                message: "Failed to reach upstream provider".to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, url = %url, "Upstream returned error");
            return Err(Error::Upstream {
                status: Some(status.as_u16()),
                message: format!("Upstream provider returned {}", status),
            });
        }

        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(|e| {
            tracing::error!(error = %e, url = %url, "Failed to read upstream body");
            Error::Upstream {
                status: None,
                message: "Failed to read upstream response".to_string(),
            }
        })?;

        Ok(UpstreamReply {
            status,
            content_type,
            body,
            log_failed: false,
        })
    }

    /// Forward `GET {base}/models`.
    pub async fn list_models(
        &self,
        authorization: Option<&str>,
        override_url: Option<&str>,
    ) -> Result<UpstreamReply> {
        let token = bearer_token(authorization)?;
        let base = self.base_url(override_url)?;
        let url = format!("{}/models", base);

        tracing::info!(base_url = %base, "Forwarding model listing");
        let request = self.http_client.get(&url).bearer_auth(token);
        self.send(request, &url).await
    }

    /// Forward `POST {base}/chat/completions` with the caller's body bytes,
    /// then write the call log before returning.
    pub async fn chat_completion(
        &self,
        authorization: Option<&str>,
        override_url: Option<&str>,
        body: Bytes,
    ) -> Result<UpstreamReply> {
        let token = bearer_token(authorization)?;
        let base = self.base_url(override_url)?;
        let request = ChatCompletionRequest::from_body(&body)?;
        let url = format!("{}/chat/completions", base);

        tracing::info!(
            base_url = %base,
            model = %request.model,
            messages = request.messages.len(),
            "Forwarding chat completion"
        );

        let start = Instant::now();
        let upstream = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.clone());
        let mut reply = self.send(upstream, &url).await?;
        let latency_ms = start.elapsed().as_millis() as i64;

        let entry = CallLogEntry::from_exchange(
            &base,
            &request,
            &String::from_utf8_lossy(&body),
            &String::from_utf8_lossy(&reply.body),
            latency_ms,
        );
        if let Err(e) = self.logger.record(&entry).await {
            tracing::error!(
                error = %e,
                chat_id = %entry.chat_id,
                base_url = %base,
                "Failed to write call log"
            );
            reply.log_failed = true;
        }

        tracing::info!(
            model = %request.model,
            latency_ms,
            total_tokens = entry.usage.total_tokens,
            "Chat completion forwarded"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(Some("Bearer sk-1")).unwrap(), "sk-1");
        assert_eq!(bearer_token(Some("bearer sk-1")).unwrap(), "sk-1");
        assert_eq!(bearer_token(Some("sk-raw")).unwrap(), "sk-raw");
        assert!(matches!(bearer_token(None), Err(Error::Unauthorized)));
        assert!(matches!(bearer_token(Some("")), Err(Error::Unauthorized)));
        assert!(matches!(
            bearer_token(Some("Bearer   ")),
            Err(Error::Unauthorized)
        ));
    }

    fn gateway() -> Gateway {
        let registry = ProviderRegistry::from_providers(
            vec![crate::registry::ProviderType {
                id: 1,
                name: "OpenAI".to_string(),
                base_url: "https://api.openai.com/v1/".to_string(),
            }],
            "OpenAI",
        );
        let logger = CallLogger::new(Arc::new(
            crate::storage::memory::MemoryLogRepository::new(),
        ));
        Gateway::new(Client::new(), Arc::new(registry), logger)
    }

    #[test]
    fn base_url_selection() {
        let gw = gateway();
        assert_eq!(gw.base_url(None).unwrap(), "https://api.openai.com/v1");
        assert_eq!(
            gw.base_url(Some("https://api.groq.com/openai/v1/")).unwrap(),
            "https://api.groq.com/openai/v1"
        );
        assert!(matches!(
            gw.base_url(Some("ftp://example.com")),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            gw.base_url(Some("not a url")),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn base_url_with_query_or_fragment_is_rejected() {
        let gw = gateway();
        for raw in [
            "https://h/v1?x=1",
            "https://h/v1?",
            "https://h/v1#frag",
            "https://h/v1/?api-version=2024",
        ] {
            assert!(
                matches!(gw.base_url(Some(raw)), Err(Error::Validation { .. })),
                "{} should be rejected",
                raw
            );
        }
    }
}
