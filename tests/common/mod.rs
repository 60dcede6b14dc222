//! Shared fixtures for integration tests.
//!
//! Builds the real axum router over an in-memory SQLite database so tests can
//! drive it with `tower::ServiceExt::oneshot` (no TCP listener needed).

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use http::{Request, StatusCode};
use secrecy::SecretString;
use sqlx::SqlitePool;
use tower::ServiceExt;

use keygate::admin::SharedSecretAdmin;
use keygate::config::ProviderConfig;
use keygate::crypto::{Cipher, KdfParams};
use keygate::logger::CallLogger;
use keygate::proxy::{create_router, AppState, Gateway};
use keygate::registry::ProviderRegistry;
use keygate::storage::{
    self, LogRepository, SqliteCredentialRepository, SqliteLogRepository,
    SqliteProviderRepository,
};
use keygate::vault::CredentialStore;

pub const ADMIN_KEY: &str = "test-admin-key";

/// Argon2 parameters small enough for fast tests.
pub fn cheap_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

pub struct TestApp {
    pub router: axum::Router,
    pub pool: SqlitePool,
}

/// Options for [`setup`].
#[derive(Default)]
pub struct Options {
    /// Base URL registered for the default `OpenAI` provider.
    pub openai_base_url: Option<String>,
    /// Replacement log repository; defaults to SQLite.
    pub log_repo: Option<Arc<dyn LogRepository>>,
}

pub async fn setup(options: Options) -> TestApp {
    let pool = storage::init_memory_pool()
        .await
        .expect("Failed to create in-memory SQLite pool");

    let extra: Vec<ProviderConfig> = options
        .openai_base_url
        .map(|base_url| {
            vec![ProviderConfig {
                name: "OpenAI".to_string(),
                base_url,
            }]
        })
        .unwrap_or_default();

    let registry = Arc::new(
        ProviderRegistry::seed(&SqliteProviderRepository::new(pool.clone()), &extra, "OpenAI")
            .await
            .expect("seed providers"),
    );

    let cipher = Cipher::new(
        SecretString::from("integration-master-secret".to_string()),
        cheap_kdf(),
    )
    .expect("cipher");
    let store = CredentialStore::new(
        Arc::new(SqliteCredentialRepository::new(pool.clone())),
        registry.clone(),
        cipher,
    );

    let log_repo = options
        .log_repo
        .unwrap_or_else(|| Arc::new(SqliteLogRepository::new(pool.clone())));
    let logger = CallLogger::new(log_repo);
    let gateway = Gateway::new(reqwest::Client::new(), registry.clone(), logger.clone());

    let state = AppState {
        store,
        registry,
        gateway,
        logger,
        admin: Arc::new(SharedSecretAdmin::new(SecretString::from(
            ADMIN_KEY.to_string(),
        ))),
    };

    TestApp {
        router: create_router(state),
        pool,
    }
}

/// Send a request and return status, headers and parsed JSON body
/// (`Value::Null` when the body is not JSON).
pub async fn send(
    router: &axum::Router,
    request: Request<Body>,
) -> (StatusCode, http::HeaderMap, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, headers, json)
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}
