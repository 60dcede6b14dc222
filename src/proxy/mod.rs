//! HTTP layer.
//!
//! This module provides the OpenAI-compatible forwarding routes, the
//! credential vault routes and the admin log listing.

pub mod gateway;
mod handlers;
pub mod keys;
pub mod logs;
mod server;
pub mod types;

pub use gateway::{bearer_token, Gateway, UpstreamReply};
pub use server::{create_router, http_client, run_server, AppState};
pub use types::ChatCompletionRequest;
