//! Token endpoint interactions
//!
//! Handles every call the client makes after the browser step:
//! 1. Authorization code exchange (with ID token validation)
//! 2. Token refresh (no ID token re-validation; the response may omit it)
//! 3. Logout with `id_token_hint`
//! 4. Token revocation
//!
//! Every call is a form-encoded POST. Anything other than 200 is an
//! `UnsuccessfulResponse` carrying the body text when there is one.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::authorize::AuthSession;
use crate::claims::ClaimValidator;
use crate::clock::Clock;
use crate::config::{Configuration, Endpoints};
use crate::error::{Error, Result};
use crate::id_token::IdTokenClaims;
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Token endpoint response body for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time; it is turned into
/// an absolute `expires_at` before anything is stored.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Credential material produced by an exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    /// Always present after a code exchange; a refresh may not return one.
    pub id_token: Option<Secret<String>>,
    pub token_type: String,
    pub scope: String,
    pub expires_at: SystemTime,
}

/// Client for the token, logout and revoke endpoints.
pub struct TokenExchangeClient {
    config: Configuration,
    endpoints: Endpoints,
    transport: Arc<dyn Transport>,
    validator: ClaimValidator,
    clock: Arc<dyn Clock>,
}

impl TokenExchangeClient {
    pub fn new(
        config: Configuration,
        endpoints: Endpoints,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            endpoints,
            transport,
            validator: ClaimValidator::new(clock.clone()),
            clock,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Exchange an authorization code for tokens.
    ///
    /// Consumes the session: its verifier is sent here and nowhere else. The
    /// ID token must pass claim validation against the configured issuer and
    /// client ID, using the response's `Date` header as a fallback clock;
    /// otherwise the whole response is discarded.
    pub async fn exchange_code(&self, session: AuthSession, code: &str) -> Result<(TokenSet, u16)> {
        let response = self
            .post(
                self.endpoints.token.clone(),
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("code_verifier", session.code_verifier().expose_str()),
                    ("client_id", self.config.client_id.as_str()),
                    ("redirect_uri", self.config.redirect_url.as_str()),
                ],
            )
            .await?;
        drop(session);

        let body = parse_token_response(&response)?;
        let id_token = body
            .id_token
            .as_deref()
            .ok_or_else(|| Error::IdTokenDecode("token response has no id_token".into()))?;
        let claims = IdTokenClaims::decode(id_token)?;
        let server_time = response
            .date
            .as_deref()
            .and_then(|d| httpdate::parse_http_date(d).ok());
        self.validator.validate(
            &claims,
            &self.endpoints.issuer,
            &self.config.client_id,
            server_time,
        )?;

        let refresh_token = body.refresh_token.clone().ok_or_else(|| Error::UnsuccessfulResponse {
            status: Some(response.status),
            message: "token response has no refresh_token".into(),
        })?;

        info!(scope = %body.scope, expires_in = body.expires_in, "authorization code exchanged");
        Ok((self.token_set(body, refresh_token, response.status)?, response.status))
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// When the response does not rotate the refresh token, the one that was
    /// sent is kept.
    pub async fn exchange_refresh_token(&self, refresh_token: &Secret<String>) -> Result<(TokenSet, u16)> {
        let response = self
            .post(
                self.endpoints.token.clone(),
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.expose_str()),
                    ("client_id", self.config.client_id.as_str()),
                ],
            )
            .await?;

        let body = parse_token_response(&response)?;
        let next_refresh = body
            .refresh_token
            .clone()
            .unwrap_or_else(|| refresh_token.expose_str().to_owned());

        debug!(rotated = body.refresh_token.is_some(), "access token refreshed");
        Ok((self.token_set(body, next_refresh, response.status)?, response.status))
    }

    /// End the session at the identity provider.
    pub async fn logout(&self, id_token: &Secret<String>) -> Result<u16> {
        let response = self
            .post(
                self.endpoints.logout.clone(),
                &[("id_token_hint", id_token.expose_str())],
            )
            .await?;
        Ok(response.status)
    }

    /// Ask the identity provider to invalidate a token.
    pub async fn revoke(&self, token: &Secret<String>) -> Result<u16> {
        let response = self
            .post(
                self.endpoints.revoke.clone(),
                &[("token", token.expose_str()), ("client_id", self.config.client_id.as_str())],
            )
            .await?;
        Ok(response.status)
    }

    async fn post(&self, url: Url, params: &[(&str, &str)]) -> Result<HttpResponse> {
        let response = self
            .transport
            .send(HttpRequest::post_form(url.clone(), params))
            .await
            .map_err(|e| {
                warn!(%url, error = %e, "request failed without a response");
                Error::UnsuccessfulResponse {
                    status: None,
                    message: e.to_string(),
                }
            })?;

        if response.status != 200 {
            let message = if response.body.is_empty() {
                String::from("<no body>")
            } else {
                response.body_text()
            };
            warn!(%url, status = response.status, "endpoint returned an unsuccessful status");
            return Err(Error::UnsuccessfulResponse {
                status: Some(response.status),
                message,
            });
        }
        Ok(response)
    }

    fn token_set(&self, body: TokenResponse, refresh_token: String, status: u16) -> Result<TokenSet> {
        let lifetime = Duration::from_secs(body.expires_in.max(0).unsigned_abs());
        let expires_at = self
            .clock
            .now()
            .checked_add(lifetime)
            .ok_or_else(|| Error::UnsuccessfulResponse {
                status: Some(status),
                message: format!("expires_in out of range: {}", body.expires_in),
            })?;
        Ok(TokenSet {
            access_token: Secret::new(body.access_token),
            refresh_token: Secret::new(refresh_token),
            id_token: body.id_token.map(Secret::new),
            token_type: body.token_type,
            scope: body.scope,
            expires_at,
        })
    }
}

fn parse_token_response(response: &HttpResponse) -> Result<TokenResponse> {
    serde_json::from_slice(&response.body).map_err(|e| Error::UnsuccessfulResponse {
        status: Some(response.status),
        message: format!("invalid token response: {e}"),
    })
}
