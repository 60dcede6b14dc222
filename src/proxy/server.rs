//! HTTP server setup and configuration.

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use super::gateway::Gateway;
use super::{handlers, keys, logs};
use crate::admin::{AdminCapability, SharedSecretAdmin};
use crate::config::Config;
use crate::logger::CallLogger;
use crate::registry::ProviderRegistry;
use crate::storage::{
    self, SqliteCredentialRepository, SqliteLogRepository, SqliteProviderRepository,
};
use crate::vault::CredentialStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: CredentialStore,
    pub registry: Arc<ProviderRegistry>,
    pub gateway: Gateway,
    pub logger: CallLogger,
    pub admin: Arc<dyn AdminCapability>,
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // OpenAI-compatible endpoints
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/logs", get(logs::logs_handler))
        // Credential vault
        .route("/api-key/keys", post(keys::create_key).get(keys::list_keys))
        .route(
            "/api-key/keys/:type",
            get(keys::get_key)
                .put(keys::update_key)
                .delete(keys::delete_key),
        )
        .route("/health", get(handlers::health))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Build the upstream HTTP client with the configured timeouts.
pub fn http_client(config: &Config) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.gateway.timeout_secs))
        .connect_timeout(Duration::from_secs(config.gateway.connect_timeout_secs))
        .build()
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let db_path = config.database().path;
    let pool = storage::init_pool(&db_path).await?;
    tracing::info!(path = %db_path, "Database initialized");

    let providers = SqliteProviderRepository::new(pool.clone());
    let registry = Arc::new(
        ProviderRegistry::seed(
            &providers,
            &config.providers,
            &config.gateway.default_provider,
        )
        .await?,
    );

    let cipher = config.security.cipher()?;
    let store = CredentialStore::new(
        Arc::new(SqliteCredentialRepository::new(pool.clone())),
        registry.clone(),
        cipher,
    );
    let logger = CallLogger::new(Arc::new(SqliteLogRepository::new(pool)));
    let gateway = Gateway::new(http_client(&config)?, registry.clone(), logger.clone());
    let admin: Arc<dyn AdminCapability> = Arc::new(SharedSecretAdmin::new(
        config.security.admin_key.to_secret_string(),
    ));

    let state = AppState {
        store,
        registry,
        gateway,
        logger,
        admin,
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting keygate server");

    axum::serve(listener, app).await?;

    Ok(())
}
