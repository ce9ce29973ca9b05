//! ID token claim validation
//!
//! Checks run in a fixed order (issuer, audience, authorized party, untrusted
//! audiences, expiry, issue time) and stop at the first failure.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::clock::Clock;
use crate::error::IdTokenValidationError;
use crate::id_token::{Audience, IdTokenClaims};

/// Validates decoded ID token claims against the client's expectations.
#[derive(Clone)]
pub struct ClaimValidator {
    clock: Arc<dyn Clock>,
}

impl ClaimValidator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Validate `claims`.
    ///
    /// `server_time` is the token endpoint's `Date` header. When the local
    /// clock says the token has expired, the server's view is consulted before
    /// rejecting it, which tolerates a device clock running ahead.
    pub fn validate(
        &self,
        claims: &IdTokenClaims,
        expected_issuer: &str,
        expected_audience: &str,
        server_time: Option<SystemTime>,
    ) -> Result<(), IdTokenValidationError> {
        let issuer = claims.issuer().ok_or(IdTokenValidationError::MissingIssuer)?;
        if issuer != expected_issuer {
            return Err(IdTokenValidationError::IncorrectIssuer(format!(
                "found issuer {issuer} while expecting {expected_issuer}"
            )));
        }

        let audience = claims.audience().ok_or_else(|| {
            IdTokenValidationError::MissingAudience("ID token has no audience".into())
        })?;
        if !audience.contains(expected_audience) {
            return Err(IdTokenValidationError::MissingAudience(
                "ID token audience does not contain the configured client ID".into(),
            ));
        }

        if let Audience::Multiple(list) = &audience {
            if list.len() > 1 {
                match claims.authorized_party() {
                    None => {
                        return Err(IdTokenValidationError::AuthorizedPartyMissing(
                            "multiple audiences require an azp claim".into(),
                        ));
                    }
                    Some(azp) if azp != expected_audience => {
                        return Err(IdTokenValidationError::AuthorizedPartyMismatch(format!(
                            "azp {azp} is not the configured client ID"
                        )));
                    }
                    Some(_) => {}
                }
            }

            let untrusted: Vec<&str> = list
                .iter()
                .map(String::as_str)
                .filter(|a| *a != expected_audience)
                .collect();
            if !untrusted.is_empty() {
                return Err(IdTokenValidationError::UntrustedAudiences(untrusted.join(", ")));
            }
        }

        // A numeric exp before the epoch is present but long past.
        let expires_at = claims
            .expiration()
            .and_then(|exp| Duration::try_from_secs_f64(exp.max(0.0)).ok())
            .and_then(|exp| UNIX_EPOCH.checked_add(exp))
            .ok_or(IdTokenValidationError::ExpirationTimeMissing)?;
        if !self.is_unexpired(expires_at, server_time) {
            return Err(IdTokenValidationError::Expired("ID token has expired".into()));
        }

        if !claims.has_issued_at() {
            return Err(IdTokenValidationError::MissingIssueTime(
                "ID token is missing the \"iat\" claim".into(),
            ));
        }

        debug!("ID token claims validated");
        Ok(())
    }

    fn is_unexpired(&self, expires_at: SystemTime, server_time: Option<SystemTime>) -> bool {
        if expires_at > self.clock.now() {
            return true;
        }
        server_time.is_some_and(|server| expires_at > server)
    }
}
