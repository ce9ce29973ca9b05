//! Authorization request construction
//!
//! Builds the authorization-endpoint URL for the code flow with PKCE and
//! returns the `AuthSession` that must be kept until the redirect comes back.
//! The session is never persisted; it is consumed by the redirect handler and
//! the single token exchange it was created for.

use std::collections::{BTreeMap, BTreeSet};
use std::time::SystemTime;

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::config::{Configuration, Endpoints};
use crate::error::{Error, Result};
use crate::pkce;

/// Value of the `prompt` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
    None,
    Login,
    NoSeam,
}

impl Prompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prompt::None => "none",
            Prompt::Login => "login",
            Prompt::NoSeam => "no_seam",
        }
    }
}

/// Userinfo claims that can be requested as essential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EssentialClaim {
    Name,
    Locale,
    Email,
    EmailVerified,
    PhoneNumber,
    PhoneNumberVerified,
}

impl EssentialClaim {
    pub fn as_str(&self) -> &'static str {
        match self {
            EssentialClaim::Name => "name",
            EssentialClaim::Locale => "locale",
            EssentialClaim::Email => "email",
            EssentialClaim::EmailVerified => "email_verified",
            EssentialClaim::PhoneNumber => "phone_number",
            EssentialClaim::PhoneNumberVerified => "phone_number_verified",
        }
    }
}

/// Optional knobs for a single authorization request.
#[derive(Debug, Clone, Default)]
pub struct AuthorizeOptions {
    /// Caller-supplied state; generated when absent.
    pub state: Option<String>,
    pub prompt: Option<Prompt>,
    /// Maximum authentication age in seconds.
    pub max_age: Option<u64>,
    pub login_hints: BTreeSet<String>,
    pub acr_values: BTreeSet<String>,
    pub essential_claims: BTreeSet<EssentialClaim>,
    pub ui_locales: BTreeSet<String>,
    /// Correlation id for server-side logs; a fresh UUID v4 when absent.
    pub log_session_id: Option<Uuid>,
}

/// State for one in-flight authorization attempt.
#[derive(Debug)]
pub struct AuthSession {
    code_verifier: Secret<String>,
    state: Secret<String>,
    requested_scopes: BTreeSet<String>,
    created_at: SystemTime,
}

impl AuthSession {
    pub fn new(code_verifier: String, state: String, requested_scopes: BTreeSet<String>) -> Self {
        Self {
            code_verifier: Secret::new(code_verifier),
            state: Secret::new(state),
            requested_scopes,
            created_at: SystemTime::now(),
        }
    }

    pub fn code_verifier(&self) -> &Secret<String> {
        &self.code_verifier
    }

    pub fn state(&self) -> &Secret<String> {
        &self.state
    }

    pub fn requested_scopes(&self) -> &BTreeSet<String> {
        &self.requested_scopes
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

#[derive(Serialize)]
struct EssentialFlag {
    essential: bool,
}

/// Build the authorization URL and the session that correlates its redirect.
///
/// Fails with `Error::Encoding` only if the essential-claims request cannot be
/// serialized; the flow must not continue with a silently different request.
pub fn build_authorization_request(
    config: &Configuration,
    endpoints: &Endpoints,
    scope: &BTreeSet<String>,
    options: &AuthorizeOptions,
) -> Result<(Url, AuthSession)> {
    let verifier = pkce::generate_verifier();
    let challenge = pkce::compute_challenge(&verifier);
    let state = options.state.clone().unwrap_or_else(pkce::generate_state);
    let log_session_id = options.log_session_id.unwrap_or_else(Uuid::new_v4);

    let mut params: Vec<(&str, String)> = vec![
        ("response_type", "code".to_owned()),
        ("client_id", config.client_id.clone()),
        ("redirect_uri", config.redirect_url.clone()),
        ("scope", join(scope)),
        ("code_challenge", challenge),
        ("code_challenge_method", pkce::CHALLENGE_METHOD.to_owned()),
        ("state", state.clone()),
        ("log_session_id", log_session_id.to_string()),
    ];

    if !options.ui_locales.is_empty() {
        params.push(("ui_locales", join(&options.ui_locales)));
    }
    if let Some(prompt) = options.prompt {
        params.push(("prompt", prompt.as_str().to_owned()));
    }
    if let Some(max_age) = options.max_age {
        params.push(("max_age", max_age.to_string()));
    }
    for hint in &options.login_hints {
        params.push(("login_hint", hint.clone()));
    }
    if !options.acr_values.is_empty() {
        params.push(("acr_values", join(&options.acr_values)));
    }
    if !options.essential_claims.is_empty() {
        params.push(("claims", essential_claims_request(&options.essential_claims)?));
    }

    let mut url = endpoints.authorization.clone();
    url.set_query(Some(&encode_query(&params)));

    debug!(
        scopes = scope.len(),
        essential_claims = options.essential_claims.len(),
        %log_session_id,
        "built authorization request"
    );

    Ok((url, AuthSession::new(verifier, state, scope.clone())))
}

/// `{"userinfo": {"<claim>": {"essential": true}, ...}}`
fn essential_claims_request(claims: &BTreeSet<EssentialClaim>) -> Result<String> {
    let userinfo: BTreeMap<&str, EssentialFlag> = claims
        .iter()
        .map(|claim| (claim.as_str(), EssentialFlag { essential: true }))
        .collect();
    let request = BTreeMap::from([("userinfo", userinfo)]);
    serde_json::to_string(&request)
        .map_err(|e| Error::Encoding(format!("essential claims request: {e}")))
}

/// Percent-encode every reserved character, so a literal `+` travels as `%2B`
/// and spaces as `%20`; identity providers decode `+` as a space otherwise.
fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use std::collections::HashSet;

    fn fixture() -> (Configuration, Endpoints) {
        let config = Configuration::new(
            Environment::Production,
            "client-123",
            "com.example.app://oauth2callback",
            "com.example.app",
        );
        let endpoints = Endpoints::resolve(&config).unwrap();
        (config, endpoints)
    }

    fn scopes(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn param(url: &Url, name: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn url_contains_required_params() {
        let (config, endpoints) = fixture();
        let (url, session) = build_authorization_request(
            &config,
            &endpoints,
            &scopes(&["openid", "profile"]),
            &AuthorizeOptions::default(),
        )
        .unwrap();

        assert!(url.as_str().starts_with("https://id.telenor.no/connect/authorize?"));
        assert_eq!(param(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(param(&url, "client_id").as_deref(), Some("client-123"));
        assert_eq!(
            param(&url, "redirect_uri").as_deref(),
            Some("com.example.app://oauth2callback")
        );
        assert_eq!(param(&url, "scope").as_deref(), Some("openid profile"));
        assert_eq!(param(&url, "code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(param(&url, "state").as_deref(), Some(session.state().expose_str()));
        assert!(param(&url, "log_session_id").is_some());
        assert!(param(&url, "prompt").is_none());
        assert!(param(&url, "claims").is_none());
    }

    #[test]
    fn challenge_matches_session_verifier() {
        let (config, endpoints) = fixture();
        let (url, session) = build_authorization_request(
            &config,
            &endpoints,
            &scopes(&["openid"]),
            &AuthorizeOptions::default(),
        )
        .unwrap();

        let expected = pkce::compute_challenge(session.code_verifier().expose_str());
        assert_eq!(param(&url, "code_challenge"), Some(expected));
        assert!(!url.as_str().contains(session.code_verifier().expose_str()));
    }

    #[test]
    fn generated_states_are_unique() {
        let (config, endpoints) = fixture();
        let scope = scopes(&["openid"]);
        let options = AuthorizeOptions::default();
        let states: HashSet<String> = (0..10_000)
            .map(|_| {
                let (_, session) =
                    build_authorization_request(&config, &endpoints, &scope, &options).unwrap();
                session.state().expose_str().to_owned()
            })
            .collect();
        assert_eq!(states.len(), 10_000);
        assert!(states.iter().all(|s| !s.is_empty()));
    }

    #[test]
    fn explicit_state_is_used_verbatim() {
        let (config, endpoints) = fixture();
        let options = AuthorizeOptions {
            state: Some("caller-state".into()),
            ..Default::default()
        };
        let (url, session) =
            build_authorization_request(&config, &endpoints, &scopes(&["openid"]), &options)
                .unwrap();
        assert_eq!(session.state().expose_str(), "caller-state");
        assert_eq!(param(&url, "state").as_deref(), Some("caller-state"));
        assert_eq!(session.requested_scopes(), &scopes(&["openid"]));
    }

    #[test]
    fn plus_is_percent_encoded() {
        let (config, endpoints) = fixture();
        let options = AuthorizeOptions {
            login_hints: BTreeSet::from(["phone:+4790000000".to_string()]),
            ..Default::default()
        };
        let (url, _) =
            build_authorization_request(&config, &endpoints, &scopes(&["openid", "profile"]), &options)
                .unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("login_hint=phone%3A%2B4790000000"), "{query}");
        assert!(query.contains("scope=openid%20profile"), "{query}");
        assert!(!query.contains('+'), "{query}");
    }

    #[test]
    fn optional_params_are_emitted() {
        let (config, endpoints) = fixture();
        let log_session_id = Uuid::new_v4();
        let options = AuthorizeOptions {
            prompt: Some(Prompt::NoSeam),
            max_age: Some(3600),
            login_hints: BTreeSet::from(["a@example.com".to_string(), "b@example.com".to_string()]),
            acr_values: BTreeSet::from(["1".to_string(), "2".to_string()]),
            ui_locales: BTreeSet::from(["en".to_string(), "nb".to_string()]),
            log_session_id: Some(log_session_id),
            ..Default::default()
        };
        let (url, _) =
            build_authorization_request(&config, &endpoints, &scopes(&["openid"]), &options)
                .unwrap();

        assert_eq!(param(&url, "prompt").as_deref(), Some("no_seam"));
        assert_eq!(param(&url, "max_age").as_deref(), Some("3600"));
        assert_eq!(param(&url, "acr_values").as_deref(), Some("1 2"));
        assert_eq!(param(&url, "ui_locales").as_deref(), Some("en nb"));
        assert_eq!(param(&url, "log_session_id"), Some(log_session_id.to_string()));
        let hints: Vec<String> = url
            .query_pairs()
            .filter(|(k, _)| k == "login_hint")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(hints, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn essential_claims_are_one_json_param() {
        let (config, endpoints) = fixture();
        let options = AuthorizeOptions {
            essential_claims: BTreeSet::from([EssentialClaim::Email, EssentialClaim::PhoneNumber]),
            ..Default::default()
        };
        let (url, _) =
            build_authorization_request(&config, &endpoints, &scopes(&["openid"]), &options)
                .unwrap();

        let claims: serde_json::Value =
            serde_json::from_str(&param(&url, "claims").unwrap()).unwrap();
        assert_eq!(
            claims,
            serde_json::json!({
                "userinfo": {
                    "email": {"essential": true},
                    "phone_number": {"essential": true}
                }
            })
        );
    }
}
