//! Test doubles shared by the manager and refresh tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use oidc_auth::{
    BoxFuture, Browser, BrowserOutcome, Configuration, Environment, HttpRequest, HttpResponse, ManualClock,
    Transport, TransportError,
};
use serde_json::json;
use url::Url;

use crate::manager::{Collaborators, TokenLifecycleManager};
use crate::store::{CredentialStore, KeyNaming};

pub const NOW: u64 = 1_700_000_000;
pub const BASE: &str = "http://idp.test";
pub const CLIENT_ID: &str = "client-123";

pub fn config() -> Configuration {
    let base = Url::parse(BASE).unwrap();
    Configuration::new(Environment::Custom(base), CLIENT_ID, "com.example.app://cb", "com.example.app")
}

pub fn id_token() -> String {
    let claims = json!({"iss": BASE, "aud": CLIENT_ID, "exp": NOW + 600, "iat": NOW});
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// Endpoint behaviour for `MockIdp`.
#[derive(Debug, Clone)]
pub struct Behaviour {
    pub token_status: u16,
    pub logout_status: u16,
    pub revoke_status: u16,
    /// Whether refresh-grant responses carry a fresh ID token.
    pub refresh_id_token: bool,
    pub expires_in: i64,
    pub latency: Duration,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            token_status: 200,
            logout_status: 200,
            revoke_status: 200,
            refresh_id_token: false,
            expires_in: 3600,
            latency: Duration::ZERO,
        }
    }
}

/// In-process identity provider. Every successful token response is
/// numbered, so tokens from the same response share a suffix.
#[derive(Default)]
pub struct MockIdp {
    issued: AtomicUsize,
    behaviour: Mutex<Behaviour>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockIdp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(behaviour: Behaviour) -> Arc<Self> {
        let idp = Self::default();
        *idp.behaviour.lock().unwrap() = behaviour;
        Arc::new(idp)
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == path)
            .cloned()
            .collect()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.path().to_owned())
            .collect()
    }

    /// Wait until `count` requests have reached `path`.
    pub async fn wait_for(&self, path: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.requests_to(path).len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        let behaviour = self.behaviour.lock().unwrap().clone();
        let (status, body) = match request.url.path() {
            "/connect/token" if behaviour.token_status == 200 => {
                let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
                let grant = request.param("grant_type").unwrap_or_default();
                let mut body = json!({
                    "access_token": format!("at_{n}"),
                    "refresh_token": format!("rt_{n}"),
                    "scope": format!("scope_{n}"),
                    "token_type": "Bearer",
                    "expires_in": behaviour.expires_in
                });
                if grant == "authorization_code" || behaviour.refresh_id_token {
                    body["id_token"] = json!(id_token());
                }
                (200, body.to_string())
            }
            "/connect/token" => (behaviour.token_status, r#"{"error":"invalid_grant"}"#.to_owned()),
            "/v1/logout" => (behaviour.logout_status, String::new()),
            "/oauth/revoke" => (behaviour.revoke_status, String::new()),
            _ => (404, String::new()),
        };
        HttpResponse {
            status,
            date: None,
            body: body.into_bytes(),
        }
    }
}

impl Transport for MockIdp {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        let latency = self.behaviour.lock().unwrap().latency;
        let response = self.respond(&request);
        self.requests.lock().unwrap().push(request);
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            Ok(response)
        })
    }
}

/// What the simulated user does with the authorization page.
#[derive(Debug, Clone, Copy)]
pub enum UserAction {
    Approve,
    Cancel,
    ForgeState,
}

pub struct ScriptedBrowser {
    action: UserAction,
    presented: Mutex<Vec<Url>>,
}

impl ScriptedBrowser {
    pub fn new(action: UserAction) -> Arc<Self> {
        Arc::new(Self {
            action,
            presented: Mutex::new(Vec::new()),
        })
    }

    pub fn presented(&self) -> Vec<Url> {
        self.presented.lock().unwrap().clone()
    }
}

impl Browser for ScriptedBrowser {
    fn present<'a>(&'a self, url: &'a Url, callback_scheme: &'a str) -> BoxFuture<'a, BrowserOutcome> {
        self.presented.lock().unwrap().push(url.clone());
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        let outcome = match self.action {
            UserAction::Approve => {
                BrowserOutcome::RedirectReceived(format!("{callback_scheme}://cb?code=code-1&state={state}"))
            }
            UserAction::Cancel => BrowserOutcome::Cancelled,
            UserAction::ForgeState => {
                BrowserOutcome::RedirectReceived(format!("{callback_scheme}://cb?code=code-1&state=forged"))
            }
        };
        Box::pin(async move { outcome })
    }
}

pub fn manager(
    idp: Arc<MockIdp>,
    store: Arc<dyn CredentialStore>,
    browser: Arc<ScriptedBrowser>,
    clock: Arc<ManualClock>,
) -> TokenLifecycleManager {
    let deps = Collaborators::new(idp, store, browser).with_clock(clock);
    TokenLifecycleManager::spawn(config(), KeyNaming::Current, deps).unwrap()
}
