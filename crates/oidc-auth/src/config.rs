//! Client configuration and endpoint resolution
//!
//! `Configuration` is the immutable context handed to the lifecycle manager at
//! startup. `Endpoints::resolve` turns its environment and host generation into
//! concrete URLs exactly once; nothing downstream branches on hosts again.

use serde::Deserialize;
use url::Url;

/// Current-generation identity hosts.
pub const ID_HOST_PRODUCTION: &str = "id.telenor.no";
pub const ID_HOST_STAGING: &str = "id-test.telenor.no";

/// Legacy identity hosts, still served for older client registrations.
pub const LEGACY_ID_HOST_PRODUCTION: &str = "signin.telenorid.com";
pub const LEGACY_ID_HOST_STAGING: &str = "signin.telenorid-staging.com";
pub const LEGACY_ID_HOST_TEST: &str = "signin.telenorid-test.com";

/// Account self-service hosts.
pub const SELF_SERVICE_HOST_PRODUCTION: &str = "manage.telenorid.com";
pub const SELF_SERVICE_HOST_STAGING: &str = "manage.telenorid-staging.com";
pub const SELF_SERVICE_HOST_TEST: &str = "manage.telenorid-test.com";

const AUTHORIZATION_PATH: &str = "/connect/authorize";
const TOKEN_PATH: &str = "/connect/token";
const USERINFO_PATH: &str = "/connect/userinfo";
const REVOKE_PATH: &str = "/oauth/revoke";
const LOGOUT_PATH: &str = "/v1/logout";
const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Deployment the client talks to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    #[default]
    Staging,
    Test,
    /// Self-hosted or local identity provider; every endpoint hangs off this base.
    Custom(Url),
}

/// Which generation of identity hosts to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostGeneration {
    #[default]
    Current,
    Legacy,
}

/// Immutable client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    pub client_id: String,
    pub redirect_url: String,
    pub callback_url_scheme: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub host_generation: HostGeneration,
}

impl Configuration {
    pub fn new(
        environment: Environment,
        client_id: impl Into<String>,
        redirect_url: impl Into<String>,
        callback_url_scheme: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_url: redirect_url.into(),
            callback_url_scheme: callback_url_scheme.into(),
            environment,
            host_generation: HostGeneration::Current,
        }
    }

    /// Check the invariants the flow relies on.
    pub fn validate(&self) -> common::Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }
        Url::parse(&self.redirect_url)?;
        if self.callback_url_scheme.trim().is_empty() {
            return Err(common::Error::Config(
                "callback_url_scheme must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Fully resolved endpoint set for one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorization: Url,
    pub token: Url,
    pub userinfo: Url,
    pub revoke: Url,
    pub logout: Url,
    pub well_known: Url,
    /// Expected `iss` claim: the identity host root without a trailing slash.
    pub issuer: String,
    pub self_service: Url,
}

impl Endpoints {
    pub fn resolve(config: &Configuration) -> common::Result<Self> {
        let (id_base, self_service) = match &config.environment {
            Environment::Custom(base) => (base.clone(), base.clone()),
            env => (
                https_root(id_host(env, config.host_generation))?,
                https_root(self_service_host(env))?,
            ),
        };

        Ok(Self {
            authorization: id_base.join(AUTHORIZATION_PATH)?,
            token: id_base.join(TOKEN_PATH)?,
            userinfo: id_base.join(USERINFO_PATH)?,
            revoke: id_base.join(REVOKE_PATH)?,
            logout: id_base.join(LOGOUT_PATH)?,
            well_known: id_base.join(WELL_KNOWN_PATH)?,
            issuer: id_base.as_str().trim_end_matches('/').to_owned(),
            self_service,
        })
    }

    /// Link to the account self-service portal, pre-filled with locales and
    /// login hints.
    pub fn self_service_link<'a>(
        &self,
        ui_locales: impl IntoIterator<Item = &'a str>,
        login_hints: impl IntoIterator<Item = &'a str>,
    ) -> Url {
        let mut url = self.self_service.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("ui_locales", &ui_locales.into_iter().collect::<Vec<_>>().join(" "));
            for hint in login_hints {
                query.append_pair("login_hint", hint);
            }
        }
        url
    }
}

fn https_root(host: &str) -> common::Result<Url> {
    Ok(Url::parse(&format!("https://{host}"))?)
}

fn id_host(env: &Environment, generation: HostGeneration) -> &'static str {
    match (generation, env) {
        (HostGeneration::Current, Environment::Production) => ID_HOST_PRODUCTION,
        (HostGeneration::Current, _) => ID_HOST_STAGING,
        (HostGeneration::Legacy, Environment::Production) => LEGACY_ID_HOST_PRODUCTION,
        (HostGeneration::Legacy, Environment::Staging) => LEGACY_ID_HOST_STAGING,
        (HostGeneration::Legacy, _) => LEGACY_ID_HOST_TEST,
    }
}

fn self_service_host(env: &Environment) -> &'static str {
    match env {
        Environment::Production => SELF_SERVICE_HOST_PRODUCTION,
        Environment::Staging => SELF_SERVICE_HOST_STAGING,
        _ => SELF_SERVICE_HOST_TEST,
    }
}
