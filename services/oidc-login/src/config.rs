//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `OIDC_CLIENT_ID` overrides the client id from the file so the same TOML
//! can be shared between registrations.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use oidc_auth::{AuthorizeOptions, Configuration, EssentialClaim, Prompt};
use oidc_session::KeyNaming;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub client: Configuration,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub login: LoginConfig,
}

/// Credential storage and refresh settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
    /// Read and write tokens under the per-account keys of older clients.
    #[serde(default)]
    pub legacy_account: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            timeout_secs: default_timeout(),
            refresh_interval_secs: default_refresh_interval(),
            refresh_threshold_secs: default_refresh_threshold(),
            legacy_account: None,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    pub fn key_naming(&self) -> KeyNaming {
        match &self.legacy_account {
            Some(account) => KeyNaming::Legacy {
                account: account.clone(),
            },
            None => KeyNaming::Current,
        }
    }
}

/// Authorization request settings
#[derive(Debug, Deserialize)]
pub struct LoginConfig {
    #[serde(default = "default_scopes")]
    pub scopes: BTreeSet<String>,
    #[serde(default)]
    pub prompt: Option<Prompt>,
    #[serde(default)]
    pub max_age: Option<u64>,
    #[serde(default)]
    pub ui_locales: BTreeSet<String>,
    #[serde(default)]
    pub login_hints: BTreeSet<String>,
    #[serde(default)]
    pub acr_values: BTreeSet<String>,
    #[serde(default)]
    pub essential_claims: BTreeSet<EssentialClaim>,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            scopes: default_scopes(),
            prompt: None,
            max_age: None,
            ui_locales: BTreeSet::new(),
            login_hints: BTreeSet::new(),
            acr_values: BTreeSet::new(),
            essential_claims: BTreeSet::new(),
        }
    }
}

impl LoginConfig {
    pub fn authorize_options(&self) -> AuthorizeOptions {
        AuthorizeOptions {
            prompt: self.prompt,
            max_age: self.max_age,
            login_hints: self.login_hints.clone(),
            acr_values: self.acr_values.clone(),
            essential_claims: self.essential_claims.clone(),
            ui_locales: self.ui_locales.clone(),
            ..AuthorizeOptions::default()
        }
    }
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("oidc-credentials.json")
}

fn default_timeout() -> u64 {
    60
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_refresh_threshold() -> u64 {
    300
}

fn default_scopes() -> BTreeSet<String> {
    ["openid", "profile"].into_iter().map(String::from).collect()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(client_id) = std::env::var("OIDC_CLIENT_ID") {
            config.client.client_id = client_id;
        }

        config.client.validate()?;

        if config.session.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.session.refresh_interval_secs == 0 {
            return Err(common::Error::Config(
                "refresh_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oidc-login.toml")
    }
}
