//! Configuration parsing and validation for keygate.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;

use crate::crypto::{self, Cipher, CryptoError, KdfParams};
use crate::registry::DEFAULT_PROVIDERS;

/// Root configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub security: SecurityConfig,
    pub gateway: GatewayConfig,
    pub providers: Vec<ProviderConfig>,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8000")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "./keygate.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Secret wrapper that redacts in Debug/Display and zeroizes on drop.
///
/// The value is only reachable through `.expose_secret()`, so every use is
/// grep-auditable.
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn to_secret_string(&self) -> SecretString {
        self.0.clone()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Secret(SecretString::from(s))
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Secret(SecretString::from(s.to_string()))
    }
}

/// How a secret setting was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Literal string in config (no ${} references)
    Literal,
    /// Contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Read from the convention env var (holds var name)
    Convention(String),
    /// Not set anywhere
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Master secrets and key-derivation settings.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Master secret for credential encryption
    pub encryption_key: Secret,
    /// Shared secret expected in the `x-admin-key` header
    pub admin_key: Secret,
    /// Hex-encoded 32-byte key of the retired fixed-key scheme (decrypt only)
    pub legacy_key: Option<Secret>,
    pub kdf: KdfParams,
}

impl SecurityConfig {
    /// Build the process-wide cipher from the configured secrets.
    pub fn cipher(&self) -> Result<Cipher, CryptoError> {
        let master = self.encryption_key.to_secret_string();
        match &self.legacy_key {
            Some(legacy) => {
                let key = crypto::parse_hex_key(legacy.expose_secret())?;
                Cipher::with_legacy_key(master, self.kdf, key)
            }
            None => Cipher::new(master, self.kdf),
        }
    }
}

/// Upstream forwarding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Provider whose base URL is used when no override header is sent
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Total upstream request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upstream connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_provider() -> String {
    "OpenAI".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Additional provider seeded into the registry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name (matched against the `:type` path segment)
    pub name: String,
    /// Base URL of the provider's OpenAI-compatible API
    pub base_url: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Required secret '{field}' is not set (config [security] or env {var})")]
    MissingSecret { field: String, var: String },

    #[error("Environment variable '{var}' not set for '{field}': {message}")]
    EnvVar {
        var: String,
        field: String,
        message: String,
    },
}

/// Raw security section; secret values may contain `${VAR}` references.
#[derive(Deserialize, Default)]
pub struct RawSecurityConfig {
    encryption_key: Option<String>,
    admin_key: Option<String>,
    legacy_key: Option<String>,
    #[serde(default)]
    kdf: KdfParams,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    database: Option<DatabaseConfig>,
    #[serde(default)]
    security: RawSecurityConfig,
    #[serde(default)]
    gateway: GatewayConfig,
    #[serde(default)]
    providers: Vec<ProviderConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string. Fails on the first missing
/// variable, an unclosed `${`, or an empty variable name.
fn expand_env_vars_with<F>(input: &str, field: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            field: field.to_string(),
            message: "Unclosed '${' in config value".to_string(),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                field: field.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            field: field.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in '{}')",
                var_name, field
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Convention env var consulted when a secret is absent from the file.
///
/// - "encryption_key" -> "KEYGATE_ENCRYPTION_KEY"
/// - "admin_key" -> "KEYGATE_ADMIN_KEY"
pub fn convention_env_var_name(field: &str) -> String {
    format!("KEYGATE_{}", field.to_uppercase().replace(['-', ' '], "_"))
}

/// Resolve one secret setting: literal, `${VAR}` expansion, or convention lookup.
fn resolve_secret_with<F>(
    raw: Option<String>,
    field: &str,
    lookup: &F,
) -> Result<(Option<Secret>, KeySource), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let resolved = match raw {
        Some(value) if value.contains("${") => {
            let expanded = expand_env_vars_with(&value, field, lookup)?;
            (Some(Secret::from(expanded)), KeySource::EnvExpanded)
        }
        Some(value) => (Some(Secret::from(value)), KeySource::Literal),
        None => {
            let var = convention_env_var_name(field);
            match lookup(&var) {
                Some(value) => (Some(Secret::from(value)), KeySource::Convention(var)),
                None => (None, KeySource::None),
            }
        }
    };
    Ok(resolved)
}

fn require(secret: Option<Secret>, field: &str) -> Result<Secret, ConfigError> {
    secret
        .filter(|s| !s.expose_secret().is_empty())
        .ok_or_else(|| ConfigError::MissingSecret {
            field: field.to_string(),
            var: convention_env_var_name(field),
        })
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_env(path).map(|(config, _)| config)
    }

    /// Parse configuration from a TOML string, resolving secrets from the
    /// environment. Returns the config and where each secret came from.
    pub fn parse_str(content: &str) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        Self::from_raw(raw)
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Returns the config and where each secret came from.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Self::parse_str(&content)
    }

    /// Convert raw config to final config using real environment variables.
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        Self::from_raw_with(raw, |name| std::env::var(name).ok())
    }

    /// Convert raw config to final config with a custom variable lookup.
    pub fn from_raw_with<F>(
        raw: RawConfig,
        lookup: F,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut key_sources = Vec::with_capacity(3);

        let (encryption_key, source) =
            resolve_secret_with(raw.security.encryption_key, "encryption_key", &lookup)?;
        key_sources.push(("encryption_key".to_string(), source));

        let (admin_key, source) =
            resolve_secret_with(raw.security.admin_key, "admin_key", &lookup)?;
        key_sources.push(("admin_key".to_string(), source));

        let (legacy_key, source) =
            resolve_secret_with(raw.security.legacy_key, "legacy_key", &lookup)?;
        key_sources.push(("legacy_key".to_string(), source));

        let config = Config {
            server: raw.server,
            database: raw.database,
            security: SecurityConfig {
                encryption_key: require(encryption_key, "encryption_key")?,
                admin_key: require(admin_key, "admin_key")?,
                legacy_key: legacy_key.filter(|k| !k.expose_secret().is_empty()),
                kdf: raw.security.kdf,
            },
            gateway: raw.gateway,
            providers: raw.providers,
            logging: raw.logging,
        };
        config.validate()?;

        Ok((config, key_sources))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Provider with empty name".to_string(),
                ));
            }
            if provider.base_url.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has empty base_url",
                    provider.name
                )));
            }
            url::Url::parse(&provider.base_url).map_err(|e| {
                ConfigError::Validation(format!(
                    "Provider '{}' has invalid base_url: {}",
                    provider.name, e
                ))
            })?;
        }

        let default_known = DEFAULT_PROVIDERS
            .iter()
            .any(|(name, _)| *name == self.gateway.default_provider)
            || self
                .providers
                .iter()
                .any(|p| p.name == self.gateway.default_provider);
        if !default_known {
            return Err(ConfigError::Validation(format!(
                "gateway.default_provider '{}' is not a known provider",
                self.gateway.default_provider
            )));
        }

        self.security
            .cipher()
            .map_err(|e| ConfigError::Validation(format!("[security]: {}", e)))?;

        Ok(())
    }

    /// Get database config with defaults.
    pub fn database(&self) -> DatabaseConfig {
        self.database.clone().unwrap_or_default()
    }
}
