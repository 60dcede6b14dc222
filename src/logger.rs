//! Call logger: one append-only record per completed chat completion.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::proxy::types::ChatCompletionRequest;
use crate::storage::{LogRepository, LogWindow, StoredCallLog};

/// Token counts reported by the upstream. Missing counts are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    fn from_response(response: &Value) -> Self {
        let count = |field: &str| {
            response
                .pointer(&format!("/usage/{}", field))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        Self {
            prompt_tokens: count("prompt_tokens"),
            completion_tokens: count("completion_tokens"),
            total_tokens: count("total_tokens"),
        }
    }
}

/// A single forwarded call as written to the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct CallLogEntry {
    pub chat_id: String,
    pub base_url: String,
    pub request_model: String,
    /// JSON-encoded `messages` array
    pub request_messages: String,
    pub user_question: String,
    pub request_raw: String,
    pub response_object: String,
    /// Unix seconds
    pub response_created: i64,
    pub response_model: String,
    pub response_system_fingerprint: String,
    pub response_provider: String,
    pub usage: TokenUsage,
    pub assistant_reply: String,
    pub finish_reason: String,
    pub response_raw: String,
    pub latency_ms: i64,
    pub created_at: String,
}

fn string_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Text of a message `content`, which is either a string or an array of parts.
fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

impl CallLogEntry {
    /// Build an entry from a forwarded request and the upstream's body.
    ///
    /// Fields the upstream omitted fall back to empty strings and zero counts;
    /// `response_created` falls back to the current time.
    pub fn from_exchange(
        base_url: &str,
        request: &ChatCompletionRequest,
        request_raw: &str,
        response_raw: &str,
        latency_ms: i64,
    ) -> Self {
        let response: Value = serde_json::from_str(response_raw).unwrap_or(Value::Null);
        let now = chrono::Utc::now();

        let request_messages =
            serde_json::to_string(&request.messages).unwrap_or_else(|_| "[]".to_string());
        let user_question = content_text(request.messages.first().and_then(|m| m.get("content")));

        let first_choice = response.pointer("/choices/0");
        let assistant_reply = content_text(first_choice.and_then(|c| c.pointer("/message/content")));
        let finish_reason = first_choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self {
            chat_id: string_at(&response, "/id"),
            base_url: base_url.to_string(),
            request_model: request.model.clone(),
            request_messages,
            user_question,
            request_raw: request_raw.to_string(),
            response_object: string_at(&response, "/object"),
            response_created: response
                .get("created")
                .and_then(Value::as_i64)
                .unwrap_or_else(|| now.timestamp()),
            response_model: string_at(&response, "/model"),
            response_system_fingerprint: string_at(&response, "/system_fingerprint"),
            response_provider: string_at(&response, "/provider"),
            usage: TokenUsage::from_response(&response),
            assistant_reply,
            finish_reason,
            response_raw: response_raw.to_string(),
            latency_ms,
            created_at: now.to_rfc3339(),
        }
    }
}

/// Writes call log entries and reads them back for the admin listing.
#[derive(Clone)]
pub struct CallLogger {
    repo: Arc<dyn LogRepository>,
}

impl CallLogger {
    pub fn new(repo: Arc<dyn LogRepository>) -> Self {
        Self { repo }
    }

    /// Persist one entry. Any storage failure surfaces as [`Error::Log`].
    pub async fn record(&self, entry: &CallLogEntry) -> Result<i64> {
        let id = self
            .repo
            .insert(entry)
            .await
            .map_err(|e| Error::Log(e.to_string()))?;
        tracing::debug!(
            log_id = id,
            chat_id = %entry.chat_id,
            model = %entry.request_model,
            total_tokens = entry.usage.total_tokens,
            "Call log written"
        );
        Ok(id)
    }

    /// Entries in the window, newest first, plus the total count in the window.
    pub async fn list(&self, window: &LogWindow) -> Result<(Vec<StoredCallLog>, i64)> {
        let total = self.repo.count(&window.since, &window.until).await?;
        let entries = self.repo.query(window).await?;
        Ok((entries, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryLogRepository;
    use serde_json::json;

    fn request(messages: Value) -> ChatCompletionRequest {
        serde_json::from_value(json!({"model": "gpt-4", "messages": messages})).unwrap()
    }

    #[test]
    fn entry_from_full_response() {
        let req = request(json!([
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": "hi"}
        ]));
        let response = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4-0613",
            "system_fingerprint": "fp_1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        })
        .to_string();

        let entry = CallLogEntry::from_exchange(
            "https://api.openai.com/v1",
            &req,
            "{\"raw\":true}",
            &response,
            42,
        );

        assert_eq!(entry.chat_id, "chatcmpl-1");
        assert_eq!(entry.request_model, "gpt-4");
        assert_eq!(entry.user_question, "be brief");
        assert_eq!(entry.response_created, 1_700_000_000);
        assert_eq!(entry.response_system_fingerprint, "fp_1");
        assert_eq!(entry.response_provider, "");
        assert_eq!(entry.assistant_reply, "hello");
        assert_eq!(entry.finish_reason, "stop");
        assert_eq!(entry.usage.total_tokens, 7);
        assert_eq!(entry.request_raw, "{\"raw\":true}");
        assert_eq!(entry.response_raw, response);
        assert_eq!(entry.latency_ms, 42);
        let messages: Value = serde_json::from_str(&entry.request_messages).unwrap();
        assert_eq!(messages[1]["content"], "hi");
    }

    #[test]
    fn missing_response_fields_default() {
        let req = request(json!([{"role": "user", "content": [
            {"type": "text", "text": "what is "},
            {"type": "image_url", "image_url": {"url": "x"}},
            {"type": "text", "text": "this?"}
        ]}]));
        let before = chrono::Utc::now().timestamp();
        let entry = CallLogEntry::from_exchange("http://x", &req, "{}", "{\"choices\":[]}", 1);

        assert_eq!(entry.user_question, "what is this?");
        assert_eq!(entry.usage, TokenUsage::default());
        assert_eq!(entry.response_system_fingerprint, "");
        assert_eq!(entry.assistant_reply, "");
        assert_eq!(entry.finish_reason, "");
        assert!(entry.response_created >= before);
    }

    #[tokio::test]
    async fn record_failure_maps_to_log_error() {
        let logger = CallLogger::new(Arc::new(MemoryLogRepository::failing()));
        let entry = CallLogEntry::from_exchange(
            "http://x",
            &request(json!([])),
            "{}",
            "{}",
            0,
        );
        let err = logger.record(&entry).await.unwrap_err();
        assert!(matches!(err, Error::Log(_)));
    }

    #[tokio::test]
    async fn record_then_list() {
        let repo = Arc::new(MemoryLogRepository::new());
        let logger = CallLogger::new(repo.clone());
        let entry = CallLogEntry::from_exchange(
            "http://x",
            &request(json!([])),
            "{}",
            "{\"id\":\"c1\"}",
            0,
        );
        logger.record(&entry).await.unwrap();

        let window = LogWindow {
            since: "2000-01-01T00:00:00+00:00".to_string(),
            until: "2999-01-01T00:00:00+00:00".to_string(),
            offset: 0,
            limit: 20,
        };
        let (entries, total) = logger.list(&window).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(entries[0].chat_id, "c1");
    }
}
