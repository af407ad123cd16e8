//! Environment-driven configuration.
//!
//! All settings come from environment variables. [`AppConfig::from_lookup`]
//! takes an arbitrary key lookup so configuration parsing can be tested
//! without touching the process environment.

use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:forhealth.db?mode=rwc";

/// Base URL of the Boohee food database API.
pub const DEFAULT_BOOHEE_API_URL: &str = "https://fc.boohee.com";

/// Default per-request timeout for outbound calls, in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// One app id / app key pair issued by the third party.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credential {
    pub app_id: String,
    pub app_key: String,
}

/// Settings for the external food database client.
#[derive(Debug, Clone)]
pub struct ExternalApiConfig {
    /// Base URL, without a trailing slash.
    pub base_url: String,

    /// Ordered credential pool. Rotation walks this list cyclically.
    pub accounts: Vec<Credential>,

    /// Account the process starts on.
    pub start_index: usize,

    /// Client-side timeout applied to every outbound request.
    pub timeout: Duration,

    /// Feature flag; when false every external call short-circuits.
    pub enabled: bool,
}

impl ExternalApiConfig {
    /// Configuration pointing at `base_url` with the given pool.
    pub fn new(base_url: &str, accounts: Vec<Credential>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            accounts,
            start_index: 0,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            enabled: true,
        }
    }

    /// A disabled configuration with an empty pool.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(DEFAULT_BOOHEE_API_URL, Vec::new())
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub external: ExternalApiConfig,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("FORHEALTH_PORT") {
            Some(p) => p
                .parse()
                .with_context(|| format!("FORHEALTH_PORT is not a port number: {p}"))?,
            None => DEFAULT_PORT,
        };

        let database_url =
            lookup("FORHEALTH_DATABASE_URL").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let enabled = match lookup("EXTERNAL_API_ENABLED") {
            Some(v) => parse_flag(&v)
                .with_context(|| format!("EXTERNAL_API_ENABLED is not a boolean: {v}"))?,
            None => true,
        };

        let accounts: Vec<Credential> = match lookup("BOOHEE_ACCOUNTS") {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .context("BOOHEE_ACCOUNTS must be a JSON array of {app_id, app_key}")?,
            _ => Vec::new(),
        };

        if enabled && accounts.is_empty() {
            bail!("EXTERNAL_API_ENABLED is set but BOOHEE_ACCOUNTS is empty");
        }

        let start_index = match lookup("BOOHEE_ACCOUNT_INDEX") {
            Some(v) => v
                .parse::<usize>()
                .with_context(|| format!("BOOHEE_ACCOUNT_INDEX is not an index: {v}"))?,
            None => 0,
        };

        let timeout_secs = match lookup("EXTERNAL_API_TIMEOUT_SECS") {
            Some(v) => v
                .parse::<u64>()
                .with_context(|| format!("EXTERNAL_API_TIMEOUT_SECS is not a number: {v}"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let base_url = lookup("BOOHEE_API_URL").unwrap_or_else(|| DEFAULT_BOOHEE_API_URL.into());

        let external = ExternalApiConfig {
            start_index,
            timeout: Duration::from_secs(timeout_secs),
            enabled,
            ..ExternalApiConfig::new(&base_url, accounts)
        };

        Ok(Self {
            port,
            database_url,
            external,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
