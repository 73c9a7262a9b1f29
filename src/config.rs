//! TOML configuration parsing and validation.
//!
//! A [`Config`] is loaded once at process start and handed to every component
//! that needs it. The Keepa API key is never stored in the file; the file only
//! names the environment variable that holds it (see [`KeepaConfig::key_env`]).
//!
//! ```toml
//! [db]
//! path = "./data/scout.sqlite"
//!
//! [keepa]
//! domain = "1"
//!
//! [server]
//! bind = "127.0.0.1:8787"
//!
//! [auth.tokens]
//! "alice-token" = "alice"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub keepa: KeepaConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeepaConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Keepa regional domain code (`"1"` = amazon.com).
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_key_env")]
    pub key_env: String,
    /// Per-request timeout. When unset the HTTP client's default applies.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for KeepaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            domain: default_domain(),
            key_env: default_key_env(),
            timeout_secs: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.keepa.com".to_string()
}
fn default_domain() -> String {
    "1".to_string()
}
fn default_key_env() -> String {
    "KEEPA_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Bearer tokens accepted by the server, mapped to the user id they sign in as.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl AuthConfig {
    /// Resolve a bearer token to a user id.
    pub fn user_for(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }
}

impl KeepaConfig {
    /// Read the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        match std::env::var(&self.key_env) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => bail!(
                "Keepa API key not found: set the {} environment variable",
                self.key_env
            ),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let domain = config.keepa.domain.trim();
    if domain.is_empty() {
        bail!("keepa.domain must not be empty");
    }
    if domain.parse::<u32>().is_err() {
        bail!("keepa.domain must be a numeric Keepa domain code, got '{}'", domain);
    }
    if config.keepa.key_env.trim().is_empty() {
        bail!("keepa.key_env must not be empty");
    }
    if config.keepa.timeout_secs == Some(0) {
        bail!("keepa.timeout_secs must be > 0");
    }
    if config.server.bind.trim().is_empty() {
        bail!("server.bind must not be empty");
    }
    for (token, uid) in &config.auth.tokens {
        if token.trim().is_empty() || uid.trim().is_empty() {
            bail!("auth.tokens entries must have a non-empty token and user id");
        }
    }
    Ok(())
}
