//! Store configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`) named `<PREFIX>_POSTGRES_<FIELD>`.
//! The five connection fields are required; the namespace and connect
//! timeout fall back to defaults.

use std::fmt;
use std::time::Duration;

use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::error::StoreError;

/// Prefix shared by every environment variable the store reads.
pub const ENV_PREFIX: &str = "STATUSPHERE";

/// Namespace holding the store's tables when none is configured.
pub const DEFAULT_NAMESPACE: &str = "mrs_hudson";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Connection settings for the persistence client.
///
/// Loaded once at startup via [`StoreConfig::from_env`] and passed
/// explicitly to [`crate::persistence::StoreClient::connect`].
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database server host name or address.
    pub host: String,

    /// Database server port.
    pub port: u16,

    /// Login role.
    pub user: String,

    /// Login password. Never printed by `Debug`.
    pub password: String,

    /// Database created on first start and used afterwards.
    pub database: String,

    /// Namespace (PostgreSQL schema) holding the tables.
    pub namespace: String,

    /// Timeout for establishing or acquiring a connection.
    pub connect_timeout: Duration,
}

impl StoreConfig {
    /// Loads configuration from the process environment.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file
    /// before reading `STATUSPHERE_POSTGRES_*`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] if a required variable is
    /// missing or any value is malformed.
    pub fn from_env() -> Result<Self, StoreError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(ENV_PREFIX, |key| std::env::var(key).ok())
    }

    /// Resolves configuration through `lookup` instead of the process
    /// environment. Keys are `<prefix>_POSTGRES_<FIELD>`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] naming the offending key if a
    /// required value is missing, the port or timeout is not a number, or
    /// the database or namespace is not a plain SQL identifier.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = |field: &str| format!("{prefix}_POSTGRES_{field}");
        let required = |field: &str| -> Result<String, StoreError> {
            let name = key(field);
            match lookup(&name) {
                Some(value) if !value.trim().is_empty() => Ok(value),
                _ => Err(StoreError::configuration(name, "required variable is not set")),
            }
        };

        let host = required("HOST")?;

        let port_key = key("PORT");
        let port = required("PORT")?
            .trim()
            .parse::<u16>()
            .map_err(|e| StoreError::configuration(&port_key, format!("invalid port: {e}")))?;

        let user = required("USER")?;
        let password = required("PASSWORD")?;

        let database = required("DATABASE")?;
        validate_identifier(&key("DATABASE"), &database)?;

        let namespace_key = key("SCHEMA");
        let namespace = lookup(&namespace_key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        validate_identifier(&namespace_key, &namespace)?;

        let timeout_key = key("CONNECT_TIMEOUT_SECS");
        let connect_timeout_secs = match lookup(&timeout_key) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                StoreError::configuration(&timeout_key, format!("invalid timeout: {e}"))
            })?,
            None => DEFAULT_CONNECT_TIMEOUT_SECS,
        };

        Ok(Self {
            host,
            port,
            user,
            password,
            database,
            namespace,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        })
    }

    /// Options for a server-level connection: no database selected,
    /// plaintext transport.
    #[must_use]
    pub fn server_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .ssl_mode(PgSslMode::Disable)
    }

    /// Options for the working connection to [`StoreConfig::database`].
    ///
    /// Statement logging is disabled entirely; values only ever travel as
    /// bind parameters.
    #[must_use]
    pub fn database_options(&self) -> PgConnectOptions {
        self.server_options()
            .database(&self.database)
            .disable_statement_logging()
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("namespace", &self.namespace)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to PostgreSQL's 63-byte limit.
fn validate_identifier(key: &str, value: &str) -> Result<(), StoreError> {
    let mut chars = value.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_start && valid_rest && value.len() <= 63 {
        Ok(())
    } else {
        Err(StoreError::configuration(
            key,
            format!("{value:?} is not a plain SQL identifier"),
        ))
    }
}
