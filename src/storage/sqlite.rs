//! SQLite repositories backed by a shared `sqlx` pool.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{
    CredentialRecord, CredentialRepository, CredentialUpdate, LogRepository, LogWindow,
    ProviderRepository, StoredCallLog, DUPLICATE_ACTIVE_CREDENTIAL,
};
use crate::error::{Error, Result};
use crate::logger::CallLogEntry;
use crate::registry::ProviderType;

#[derive(Clone)]
pub struct SqliteProviderRepository {
    pool: SqlitePool,
}

impl SqliteProviderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderRepository for SqliteProviderRepository {
    async fn upsert(&self, name: &str, base_url: &str) -> Result<ProviderType> {
        let provider = sqlx::query_as::<_, ProviderType>(
            "INSERT INTO provider_types (name, base_url) VALUES (?, ?)
             ON CONFLICT(name) DO UPDATE SET base_url = excluded.base_url
             RETURNING id, name, base_url",
        )
        .bind(name)
        .bind(base_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(provider)
    }

    async fn list(&self) -> Result<Vec<ProviderType>> {
        let providers = sqlx::query_as::<_, ProviderType>(
            "SELECT id, name, base_url FROM provider_types ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(providers)
    }
}

#[derive(Clone)]
pub struct SqliteCredentialRepository {
    pool: SqlitePool,
}

impl SqliteCredentialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const CREDENTIAL_COLUMNS: &str = "id, owner_id, provider_type_id, encrypted_api_key, \
     encrypted_private_key, public_key, is_active, created_at, updated_at";

/// Map a unique-index violation on the active-credential index to `Conflict`.
fn map_insert_error(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::Conflict(DUPLICATE_ACTIVE_CREDENTIAL.to_string())
        }
        _ => Error::Database(e),
    }
}

#[async_trait]
impl CredentialRepository for SqliteCredentialRepository {
    async fn insert(&self, record: CredentialRecord) -> Result<CredentialRecord> {
        sqlx::query(
            "INSERT INTO credentials (
                id, owner_id, provider_type_id, encrypted_api_key,
                encrypted_private_key, public_key, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(record.provider_type_id)
        .bind(&record.encrypted_api_key)
        .bind(record.encrypted_private_key.as_deref())
        .bind(record.public_key.as_deref())
        .bind(record.is_active)
        .bind(&record.created_at)
        .bind(&record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;
        Ok(record)
    }

    async fn find_active(
        &self,
        owner_id: &str,
        provider_type_id: i64,
    ) -> Result<Option<CredentialRecord>> {
        let sql = format!(
            "SELECT {} FROM credentials
             WHERE owner_id = ? AND provider_type_id = ? AND is_active = 1",
            CREDENTIAL_COLUMNS
        );
        let record = sqlx::query_as::<_, CredentialRecord>(&sql)
            .bind(owner_id)
            .bind(provider_type_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_active(&self, owner_id: &str) -> Result<Vec<CredentialRecord>> {
        let sql = format!(
            "SELECT {} FROM credentials
             WHERE owner_id = ? AND is_active = 1
             ORDER BY created_at, id",
            CREDENTIAL_COLUMNS
        );
        let records = sqlx::query_as::<_, CredentialRecord>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn update_active(
        &self,
        owner_id: &str,
        provider_type_id: i64,
        update: CredentialUpdate,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE credentials SET
                encrypted_api_key = ?,
                encrypted_private_key = COALESCE(?, encrypted_private_key),
                public_key = COALESCE(?, public_key),
                updated_at = ?
             WHERE owner_id = ? AND provider_type_id = ? AND is_active = 1",
        )
        .bind(&update.encrypted_api_key)
        .bind(update.encrypted_private_key.as_deref())
        .bind(update.public_key.as_deref())
        .bind(&update.updated_at)
        .bind(owner_id)
        .bind(provider_type_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate(&self, owner_id: &str, provider_type_id: i64, at: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE credentials SET is_active = 0, updated_at = ?
             WHERE owner_id = ? AND provider_type_id = ? AND is_active = 1",
        )
        .bind(at)
        .bind(owner_id)
        .bind(provider_type_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone)]
pub struct SqliteLogRepository {
    pool: SqlitePool,
}

impl SqliteLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogRepository for SqliteLogRepository {
    async fn insert(&self, entry: &CallLogEntry) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO call_logs (
                chat_id, base_url, request_model, request_messages, user_question,
                request_raw, response_object, response_created, response_model,
                response_system_fingerprint, response_provider,
                prompt_tokens, completion_tokens, total_tokens,
                assistant_reply, finish_reason, response_raw, latency_ms, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.chat_id)
        .bind(&entry.base_url)
        .bind(&entry.request_model)
        .bind(&entry.request_messages)
        .bind(&entry.user_question)
        .bind(&entry.request_raw)
        .bind(&entry.response_object)
        .bind(entry.response_created)
        .bind(&entry.response_model)
        .bind(&entry.response_system_fingerprint)
        .bind(&entry.response_provider)
        .bind(entry.usage.prompt_tokens as i64)
        .bind(entry.usage.completion_tokens as i64)
        .bind(entry.usage.total_tokens as i64)
        .bind(&entry.assistant_reply)
        .bind(&entry.finish_reason)
        .bind(&entry.response_raw)
        .bind(entry.latency_ms)
        .bind(&entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn count(&self, since: &str, until: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM call_logs WHERE created_at >= ? AND created_at <= ?",
        )
        .bind(since)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn query(&self, window: &LogWindow) -> Result<Vec<StoredCallLog>> {
        let rows = sqlx::query_as::<_, StoredCallLog>(
            "SELECT id, chat_id, base_url, request_model, request_messages, user_question,
                    request_raw, response_object, response_created, response_model,
                    response_system_fingerprint, response_provider,
                    prompt_tokens, completion_tokens, total_tokens,
                    assistant_reply, finish_reason, response_raw, latency_ms, created_at
             FROM call_logs
             WHERE created_at >= ? AND created_at <= ?
             ORDER BY created_at DESC, id DESC
             LIMIT ? OFFSET ?",
        )
        .bind(&window.since)
        .bind(&window.until)
        .bind(window.limit as i64)
        .bind(window.offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
