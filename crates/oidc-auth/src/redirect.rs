//! Redirect handling
//!
//! Pure state machine: one `AwaitingRedirect` state per authorization attempt,
//! fed exactly one browser outcome, ending in `Succeeded` or `Failed`. No I/O.
//!
//! The state comparison always happens before the code is looked at, so a code
//! whose originating request cannot be verified is never surfaced.

use url::Url;

use crate::authorize::AuthSession;
use crate::browser::BrowserOutcome;
use crate::error::RedirectError;

/// Redirect correlation states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectState {
    AwaitingRedirect,
    Succeeded { code: String },
    Failed(RedirectError),
}

impl RedirectState {
    /// Feed the browser outcome. Terminal states ignore further input.
    pub fn on_outcome(self, outcome: BrowserOutcome, session: &AuthSession) -> Self {
        match self {
            RedirectState::AwaitingRedirect => match classify(outcome, session) {
                Ok(code) => RedirectState::Succeeded { code },
                Err(reason) => RedirectState::Failed(reason),
            },
            terminal => terminal,
        }
    }

    pub fn into_result(self) -> Result<String, RedirectError> {
        match self {
            RedirectState::Succeeded { code } => Ok(code),
            RedirectState::Failed(reason) => Err(reason),
            RedirectState::AwaitingRedirect => Err(RedirectError::MalformedRedirect(
                "no redirect has been received".into(),
            )),
        }
    }
}

/// Extract the authorization code from a browser outcome, or classify why the
/// redirect cannot be trusted.
pub fn handle_redirect(outcome: BrowserOutcome, session: &AuthSession) -> Result<String, RedirectError> {
    RedirectState::AwaitingRedirect
        .on_outcome(outcome, session)
        .into_result()
}

fn classify(outcome: BrowserOutcome, session: &AuthSession) -> Result<String, RedirectError> {
    let raw = match outcome {
        BrowserOutcome::RedirectReceived(raw) => raw,
        BrowserOutcome::Cancelled => {
            return Err(RedirectError::UserCancelledOrBrowserError(
                "user cancelled the authorization".into(),
            ));
        }
        BrowserOutcome::Error(e) => return Err(RedirectError::UserCancelledOrBrowserError(e)),
    };

    if raw.trim().is_empty() {
        return Err(RedirectError::MalformedRedirect("empty redirect URL".into()));
    }
    let url = Url::parse(&raw).map_err(|e| RedirectError::MalformedRedirect(e.to_string()))?;
    if url.query().is_none() {
        return Err(RedirectError::MalformedRedirect(
            "redirect URL has no query component".into(),
        ));
    }

    match query_param(&url, "state") {
        Some(state) if session.state().matches(&state) => {}
        _ => return Err(RedirectError::StateMismatch),
    }

    query_param(&url, "code").ok_or(RedirectError::MissingCode)
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
