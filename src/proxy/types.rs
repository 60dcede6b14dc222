//! Request and response shapes at the HTTP boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// The parts of an OpenAI-compatible chat request the gateway reads.
///
/// Everything else is kept in `extra` untouched; the raw body bytes are what
/// gets forwarded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionRequest {
    /// Parse and check a raw request body.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let request: Self = serde_json::from_slice(body).map_err(|e| {
            Error::bad_request(format!(
                "Request body must be a JSON object with a string 'model' and an array 'messages': {}",
                e
            ))
        })?;
        if request.stream == Some(true) {
            return Err(Error::bad_request(
                "Streaming responses are not supported by this gateway; set stream to false",
            ));
        }
        Ok(request)
    }
}

/// `{"success": true, "data": ...}` wrapper used by the credential routes.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
        }
    }
}
