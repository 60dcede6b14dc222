//! Persistence for providers, credentials and call logs.
//!
//! Business logic talks to the repository traits below. [`sqlite`] holds the
//! production implementations and [`memory`] the in-process fakes used by
//! tests.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::error::Result;
use crate::logger::CallLogEntry;
use crate::registry::ProviderType;

pub use sqlite::{SqliteCredentialRepository, SqliteLogRepository, SqliteProviderRepository};

/// Message used when a second active credential is refused.
pub const DUPLICATE_ACTIVE_CREDENTIAL: &str = "API key already exists for this user and type";

/// A stored credential row. Secret columns hold envelopes, never plaintext.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CredentialRecord {
    pub id: String,
    pub owner_id: String,
    pub provider_type_id: i64,
    pub encrypted_api_key: String,
    pub encrypted_private_key: Option<String>,
    pub public_key: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Replacement values for an active credential. `None` keeps the stored value.
#[derive(Debug, Clone)]
pub struct CredentialUpdate {
    pub encrypted_api_key: String,
    pub encrypted_private_key: Option<String>,
    pub public_key: Option<String>,
    pub updated_at: String,
}

/// A call log row as read back from storage.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredCallLog {
    pub id: i64,
    pub chat_id: String,
    pub base_url: String,
    pub request_model: String,
    pub request_messages: String,
    pub user_question: String,
    pub request_raw: String,
    pub response_object: String,
    pub response_created: i64,
    pub response_model: String,
    pub response_system_fingerprint: String,
    pub response_provider: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub assistant_reply: String,
    pub finish_reason: String,
    pub response_raw: String,
    pub latency_ms: i64,
    pub created_at: String,
}

/// Time window and page for call log listing. Bounds are RFC 3339 strings.
#[derive(Debug, Clone)]
pub struct LogWindow {
    pub since: String,
    pub until: String,
    pub offset: u32,
    pub limit: u32,
}

/// Provider reference data.
#[async_trait]
pub trait ProviderRepository: Send + Sync {
    /// Insert or update a provider by name.
    async fn upsert(&self, name: &str, base_url: &str) -> Result<ProviderType>;

    async fn list(&self) -> Result<Vec<ProviderType>>;
}

/// Credential rows. Implementations must refuse a second active row for the
/// same `(owner_id, provider_type_id)` atomically with [`crate::Error::Conflict`].
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn insert(&self, record: CredentialRecord) -> Result<CredentialRecord>;

    async fn find_active(
        &self,
        owner_id: &str,
        provider_type_id: i64,
    ) -> Result<Option<CredentialRecord>>;

    async fn list_active(&self, owner_id: &str) -> Result<Vec<CredentialRecord>>;

    /// Overwrite the active row. Returns false when no active row matched.
    async fn update_active(
        &self,
        owner_id: &str,
        provider_type_id: i64,
        update: CredentialUpdate,
    ) -> Result<bool>;

    /// Flip the active row to inactive. Returns false when no active row matched.
    async fn deactivate(&self, owner_id: &str, provider_type_id: i64, at: &str) -> Result<bool>;
}

/// Append-only call log.
#[async_trait]
pub trait LogRepository: Send + Sync {
    /// Persist one entry, returning its row id.
    async fn insert(&self, entry: &CallLogEntry) -> Result<i64>;

    async fn count(&self, since: &str, until: &str) -> Result<i64>;

    /// Entries in the window, newest first.
    async fn query(&self, window: &LogWindow) -> Result<Vec<StoredCallLog>>;
}

/// Initialize the SQLite connection pool and run migrations.
///
/// The database file is created automatically if it doesn't exist.
/// WAL journal mode is used for concurrent read/write performance.
pub async fn init_pool(db_path: &str) -> std::result::Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;

    // Apply embedded migrations
    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with migrations applied.
pub async fn init_memory_pool() -> std::result::Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;
    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}
