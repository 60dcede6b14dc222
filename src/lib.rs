//! keygate - encrypted credential vault with an OpenAI-compatible gateway
//!
//! This library provides the credential store, the envelope encryption it
//! relies on, the forwarding gateway and its append-only call log.

pub mod admin;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logger;
pub mod proxy;
pub mod registry;
pub mod storage;
pub mod vault;

pub use config::Config;
pub use error::{Error, Result};
