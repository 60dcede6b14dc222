//! In-process repositories for tests and tooling.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    CredentialRecord, CredentialRepository, CredentialUpdate, LogRepository, LogWindow,
    ProviderRepository, StoredCallLog, DUPLICATE_ACTIVE_CREDENTIAL,
};
use crate::error::{Error, Result};
use crate::logger::CallLogEntry;
use crate::registry::ProviderType;

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Internal("repository lock poisoned".to_string())
}

#[derive(Default)]
pub struct MemoryProviderRepository {
    providers: Mutex<Vec<ProviderType>>,
}

impl MemoryProviderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderRepository for MemoryProviderRepository {
    async fn upsert(&self, name: &str, base_url: &str) -> Result<ProviderType> {
        let mut providers = self.providers.lock().map_err(poisoned)?;
        if let Some(existing) = providers.iter_mut().find(|p| p.name == name) {
            existing.base_url = base_url.to_string();
            return Ok(existing.clone());
        }
        let provider = ProviderType {
            id: providers.len() as i64 + 1,
            name: name.to_string(),
            base_url: base_url.to_string(),
        };
        providers.push(provider.clone());
        Ok(provider)
    }

    async fn list(&self) -> Result<Vec<ProviderType>> {
        Ok(self.providers.lock().map_err(poisoned)?.clone())
    }
}

#[derive(Default)]
pub struct MemoryCredentialRepository {
    rows: Mutex<Vec<CredentialRecord>>,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored row, inactive ones included.
    pub fn all_rows(&self) -> Vec<CredentialRecord> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn insert(&self, record: CredentialRecord) -> Result<CredentialRecord> {
        let mut rows = self.rows.lock().map_err(poisoned)?;
        let taken = record.is_active
            && rows.iter().any(|r| {
                r.is_active
                    && r.owner_id == record.owner_id
                    && r.provider_type_id == record.provider_type_id
            });
        if taken {
            return Err(Error::Conflict(DUPLICATE_ACTIVE_CREDENTIAL.to_string()));
        }
        rows.push(record.clone());
        Ok(record)
    }

    async fn find_active(
        &self,
        owner_id: &str,
        provider_type_id: i64,
    ) -> Result<Option<CredentialRecord>> {
        let rows = self.rows.lock().map_err(poisoned)?;
        Ok(rows
            .iter()
            .find(|r| r.is_active && r.owner_id == owner_id && r.provider_type_id == provider_type_id)
            .cloned())
    }

    async fn list_active(&self, owner_id: &str) -> Result<Vec<CredentialRecord>> {
        let rows = self.rows.lock().map_err(poisoned)?;
        Ok(rows
            .iter()
            .filter(|r| r.is_active && r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn update_active(
        &self,
        owner_id: &str,
        provider_type_id: i64,
        update: CredentialUpdate,
    ) -> Result<bool> {
        let mut rows = self.rows.lock().map_err(poisoned)?;
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.is_active && r.owner_id == owner_id && r.provider_type_id == provider_type_id)
        else {
            return Ok(false);
        };
        row.encrypted_api_key = update.encrypted_api_key;
        if let Some(private_key) = update.encrypted_private_key {
            row.encrypted_private_key = Some(private_key);
        }
        if let Some(public_key) = update.public_key {
            row.public_key = Some(public_key);
        }
        row.updated_at = update.updated_at;
        Ok(true)
    }

    async fn deactivate(&self, owner_id: &str, provider_type_id: i64, at: &str) -> Result<bool> {
        let mut rows = self.rows.lock().map_err(poisoned)?;
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.is_active && r.owner_id == owner_id && r.provider_type_id == provider_type_id)
        else {
            return Ok(false);
        };
        row.is_active = false;
        row.updated_at = at.to_string();
        Ok(true)
    }
}

/// Log repository kept in memory. Can be switched into a failing mode to
/// exercise log write errors.
#[derive(Default)]
pub struct MemoryLogRepository {
    rows: Mutex<Vec<StoredCallLog>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository whose inserts always fail.
    pub fn failing() -> Self {
        let repo = Self::default();
        repo.fail_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
        repo
    }

    pub fn entries(&self) -> Vec<StoredCallLog> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LogRepository for MemoryLogRepository {
    async fn insert(&self, entry: &CallLogEntry) -> Result<i64> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Internal("log storage unavailable".to_string()));
        }
        let mut rows = self.rows.lock().map_err(poisoned)?;
        let id = rows.len() as i64 + 1;
        rows.push(StoredCallLog {
            id,
            chat_id: entry.chat_id.clone(),
            base_url: entry.base_url.clone(),
            request_model: entry.request_model.clone(),
            request_messages: entry.request_messages.clone(),
            user_question: entry.user_question.clone(),
            request_raw: entry.request_raw.clone(),
            response_object: entry.response_object.clone(),
            response_created: entry.response_created,
            response_model: entry.response_model.clone(),
            response_system_fingerprint: entry.response_system_fingerprint.clone(),
            response_provider: entry.response_provider.clone(),
            prompt_tokens: entry.usage.prompt_tokens as i64,
            completion_tokens: entry.usage.completion_tokens as i64,
            total_tokens: entry.usage.total_tokens as i64,
            assistant_reply: entry.assistant_reply.clone(),
            finish_reason: entry.finish_reason.clone(),
            response_raw: entry.response_raw.clone(),
            latency_ms: entry.latency_ms,
            created_at: entry.created_at.clone(),
        });
        Ok(id)
    }

    async fn count(&self, since: &str, until: &str) -> Result<i64> {
        let rows = self.rows.lock().map_err(poisoned)?;
        Ok(rows
            .iter()
            .filter(|r| r.created_at.as_str() >= since && r.created_at.as_str() <= until)
            .count() as i64)
    }

    async fn query(&self, window: &LogWindow) -> Result<Vec<StoredCallLog>> {
        let rows = self.rows.lock().map_err(poisoned)?;
        let mut matching: Vec<StoredCallLog> = rows
            .iter()
            .filter(|r| {
                r.created_at.as_str() >= window.since.as_str()
                    && r.created_at.as_str() <= window.until.as_str()
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matching
            .into_iter()
            .skip(window.offset as usize)
            .take(window.limit as usize)
            .collect())
    }
}
