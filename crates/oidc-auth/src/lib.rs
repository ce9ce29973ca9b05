//! OpenID Connect authorization-code flow with PKCE
//!
//! Protocol core with no storage concerns: builds the authorization request,
//! correlates the browser redirect, exchanges the code and validates the ID
//! token claims. Persistence and serialization of concurrent callers live in
//! `oidc-session`.
//!
//! Flow:
//! 1. `authorize::build_authorization_request()` → URL + `AuthSession`
//! 2. Host `Browser` presents the URL and returns the redirect
//! 3. `redirect::handle_redirect()` checks `state` and extracts the code
//! 4. `TokenExchangeClient::exchange_code()` trades code + verifier for tokens
//! 5. `ClaimValidator` accepts or rejects the ID token before anything is kept

pub mod authorize;
pub mod browser;
pub mod claims;
pub mod clock;
pub mod config;
pub mod error;
pub mod id_token;
pub mod pkce;
pub mod redirect;
pub mod token;
pub mod transport;

use std::future::Future;
use std::pin::Pin;

pub use authorize::{AuthSession, AuthorizeOptions, EssentialClaim, Prompt, build_authorization_request};
pub use browser::{Browser, BrowserOutcome};
pub use claims::ClaimValidator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Configuration, Endpoints, Environment, HostGeneration};
pub use error::{Error, IdTokenValidationError, RedirectError, Result};
pub use id_token::{Audience, IdTokenClaims};
pub use pkce::{compute_challenge, generate_state, generate_verifier};
pub use redirect::{RedirectState, handle_redirect};
pub use token::{TokenExchangeClient, TokenResponse, TokenSet};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TransportError};

/// Boxed future returned by the collaborator traits, so they stay
/// dyn-compatible (`Arc<dyn Transport>`, `Arc<dyn Browser>`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
