//! Credential store: lifecycle of encrypted per-owner provider credentials.
//!
//! Secrets are encrypted before they reach the repository and decrypted only
//! when a caller asks for them. Key derivation is CPU-bound, so every
//! encrypt/decrypt runs on the blocking pool.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;

use crate::crypto::Cipher;
use crate::error::{Error, FieldError, Result};
use crate::registry::{ProviderRegistry, ProviderType};
use crate::storage::{
    CredentialRecord, CredentialRepository, CredentialUpdate, DUPLICATE_ACTIVE_CREDENTIAL,
};

/// Optional chromia keypair stored next to an API key.
#[derive(Debug, Clone, Default)]
pub struct ChromiaKeys {
    pub private_key: Option<SecretString>,
    pub public_key: Option<String>,
}

impl ChromiaKeys {
    /// Drop empty strings so they behave like omitted fields.
    fn normalized(self) -> Self {
        Self {
            private_key: self
                .private_key
                .filter(|k| !k.expose_secret().is_empty()),
            public_key: self.public_key.filter(|k| !k.is_empty()),
        }
    }
}

/// Secret material supplied on create and update.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub api_key: SecretString,
    pub chromia_keys: Option<ChromiaKeys>,
}

/// What a create returns. Never carries secret material.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub id: String,
    pub user_token: String,
    pub api_type: ProviderType,
    pub created_at: String,
}

/// A decrypted credential.
#[derive(Debug, Clone)]
pub struct CredentialDetail {
    pub id: String,
    pub owner_id: String,
    pub api_type: ProviderType,
    pub api_key: SecretString,
    pub chromia_keys: Option<ChromiaKeys>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn CredentialRepository>,
    registry: Arc<ProviderRegistry>,
    cipher: Cipher,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn not_found(provider: &str) -> Error {
    Error::NotFound(format!("No active API key found for {}", provider))
}

impl CredentialStore {
    pub fn new(
        repo: Arc<dyn CredentialRepository>,
        registry: Arc<ProviderRegistry>,
        cipher: Cipher,
    ) -> Self {
        Self {
            repo,
            registry,
            cipher,
        }
    }

    async fn seal(&self, plaintext: SecretString) -> Result<String> {
        let cipher = self.cipher.clone();
        let envelope =
            tokio::task::spawn_blocking(move || cipher.encrypt(plaintext.expose_secret()))
                .await
                .map_err(|e| Error::Internal(format!("encryption task failed: {}", e)))??;
        Ok(envelope)
    }

    async fn unseal(&self, envelope: String) -> Result<SecretString> {
        let cipher = self.cipher.clone();
        let plaintext = tokio::task::spawn_blocking(move || cipher.decrypt(&envelope))
            .await
            .map_err(|e| Error::Internal(format!("decryption task failed: {}", e)))??;
        Ok(plaintext)
    }

    async fn seal_optional(&self, plaintext: Option<SecretString>) -> Result<Option<String>> {
        match plaintext {
            Some(secret) => self.seal(secret).await.map(Some),
            None => Ok(None),
        }
    }

    fn validate(owner_id: &str, credential: &NewCredential) -> Result<()> {
        let mut fields = Vec::new();
        if owner_id.trim().is_empty() {
            fields.push(FieldError::new("user", "must not be empty"));
        }
        if credential.api_key.expose_secret().is_empty() {
            fields.push(FieldError::new("api_key", "must not be empty"));
        }
        if fields.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_fields(fields))
        }
    }

    /// Store a new active credential for `(owner_id, provider_name)`.
    ///
    /// The repository's unique index decides concurrent creates; the loser
    /// gets [`Error::Conflict`].
    pub async fn create_credential(
        &self,
        owner_id: &str,
        provider_name: &str,
        credential: NewCredential,
    ) -> Result<CredentialSummary> {
        Self::validate(owner_id, &credential)?;
        let provider = self.registry.resolve(provider_name)?.clone();

        if self
            .repo
            .find_active(owner_id, provider.id)
            .await?
            .is_some()
        {
            return Err(Error::Conflict(DUPLICATE_ACTIVE_CREDENTIAL.to_string()));
        }

        let chromia = credential.chromia_keys.unwrap_or_default().normalized();
        let encrypted_api_key = self.seal(credential.api_key).await?;
        let encrypted_private_key = self.seal_optional(chromia.private_key).await?;

        let timestamp = now();
        let record = CredentialRecord {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            provider_type_id: provider.id,
            encrypted_api_key,
            encrypted_private_key,
            public_key: chromia.public_key,
            is_active: true,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        };
        let record = self.repo.insert(record).await?;

        tracing::info!(
            credential_id = %record.id,
            owner = %owner_id,
            provider = %provider.name,
            "Credential created"
        );

        Ok(CredentialSummary {
            id: record.id,
            user_token: record.owner_id,
            api_type: provider,
            created_at: record.created_at,
        })
    }

    /// Re-encrypt and overwrite the active credential. Omitted chromia fields
    /// keep their stored values.
    pub async fn update_credential(
        &self,
        owner_id: &str,
        provider_name: &str,
        credential: NewCredential,
    ) -> Result<()> {
        Self::validate(owner_id, &credential)?;
        let provider = self.registry.resolve(provider_name)?;

        if self
            .repo
            .find_active(owner_id, provider.id)
            .await?
            .is_none()
        {
            return Err(not_found(provider_name));
        }

        let chromia = credential.chromia_keys.unwrap_or_default().normalized();
        let update = CredentialUpdate {
            encrypted_api_key: self.seal(credential.api_key).await?,
            encrypted_private_key: self.seal_optional(chromia.private_key).await?,
            public_key: chromia.public_key,
            updated_at: now(),
        };

        if !self.repo.update_active(owner_id, provider.id, update).await? {
            return Err(not_found(provider_name));
        }

        tracing::info!(owner = %owner_id, provider = %provider.name, "Credential updated");
        Ok(())
    }

    /// Soft-delete the active credential. Only admins may do this.
    pub async fn deactivate_credential(
        &self,
        owner_id: &str,
        provider_name: &str,
        caller_is_admin: bool,
    ) -> Result<()> {
        if !caller_is_admin {
            tracing::warn!(owner = %owner_id, provider = %provider_name, "Non-admin deactivation refused");
            return Err(Error::Forbidden);
        }
        let provider = self.registry.resolve(provider_name)?;

        if !self.repo.deactivate(owner_id, provider.id, &now()).await? {
            return Err(not_found(provider_name));
        }

        tracing::info!(owner = %owner_id, provider = %provider.name, "Credential deactivated");
        Ok(())
    }

    /// Fetch and decrypt the active credential.
    pub async fn get_credential(
        &self,
        owner_id: &str,
        provider_name: &str,
    ) -> Result<CredentialDetail> {
        let provider = self.registry.resolve(provider_name)?;
        let record = self
            .repo
            .find_active(owner_id, provider.id)
            .await?
            .ok_or_else(|| not_found(provider_name))?;
        self.decrypt_record(record, provider.clone()).await
    }

    /// Every active credential of `owner_id`, decrypted.
    pub async fn list_credentials(&self, owner_id: &str) -> Result<Vec<CredentialDetail>> {
        let records = self.repo.list_active(owner_id).await?;
        let mut details = Vec::with_capacity(records.len());
        for record in records {
            let provider = self
                .registry
                .by_id(record.provider_type_id)
                .cloned()
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "credential {} references unknown provider {}",
                        record.id, record.provider_type_id
                    ))
                })?;
            details.push(self.decrypt_record(record, provider).await?);
        }
        Ok(details)
    }

    async fn decrypt_record(
        &self,
        record: CredentialRecord,
        provider: ProviderType,
    ) -> Result<CredentialDetail> {
        let api_key = self.unseal(record.encrypted_api_key).await.map_err(|e| {
            tracing::error!(credential_id = %record.id, error = %e, "Failed to decrypt API key");
            e
        })?;
        let private_key = match record.encrypted_private_key {
            Some(envelope) => Some(self.unseal(envelope).await?),
            None => None,
        };

        let chromia_keys = if private_key.is_some() || record.public_key.is_some() {
            Some(ChromiaKeys {
                private_key,
                public_key: record.public_key,
            })
        } else {
            None
        };

        Ok(CredentialDetail {
            id: record.id,
            owner_id: record.owner_id,
            api_type: provider,
            api_key,
            chromia_keys,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
