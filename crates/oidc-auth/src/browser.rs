//! Browser collaborator
//!
//! The host application owns the user-agent: it opens the authorization URL and
//! hands back whatever came to the callback scheme. The core never inspects
//! host UI types.

use url::Url;

use crate::BoxFuture;

/// Result of presenting the authorization URL to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserOutcome {
    /// The user-agent was redirected to the callback scheme with this URL.
    RedirectReceived(String),
    /// The user dismissed the browser.
    Cancelled,
    /// The user-agent could not complete the presentation.
    Error(String),
}

/// Single-shot, user-driven presentation surface.
///
/// Uses `Pin<Box<dyn Future>>` return types so hosts can hand the manager an
/// `Arc<dyn Browser>`.
pub trait Browser: Send + Sync {
    fn present<'a>(&'a self, url: &'a Url, callback_scheme: &'a str) -> BoxFuture<'a, BrowserOutcome>;
}
