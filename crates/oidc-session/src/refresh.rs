//! Proactive background token refresh
//!
//! Spawns a periodic task that refreshes the stored session before its access
//! token expires, so callers rarely see an expired token. Everything goes
//! through the manager, so the task is just another serialized caller.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::manager::TokenLifecycleManager;

/// Result of one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Token is valid beyond the threshold.
    Fresh,
    /// Nothing stored to refresh.
    NoSession,
    Refreshed,
    /// The identity provider refused the refresh token. Only a new
    /// authorization recovers from this.
    Rejected,
    /// Transient failure, retried next cycle.
    Failed,
}

/// Spawn a background task that refreshes the session when its access token
/// expires within `threshold`. Runs every `interval`.
pub fn spawn_refresh_task(
    manager: TokenLifecycleManager,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&manager, threshold).await;
        }
    })
}

/// Check the stored expiry and refresh if needed.
pub async fn refresh_cycle(manager: &TokenLifecycleManager, threshold: Duration) -> CycleOutcome {
    if manager.is_access_token_valid(threshold).await {
        return CycleOutcome::Fresh;
    }
    if manager.token_set().await.is_err() {
        debug!("no stored session, skipping refresh");
        return CycleOutcome::NoSession;
    }

    debug!("access token expiring within threshold, refreshing");
    match manager.refresh().await {
        Ok(_) => {
            info!("background token refresh succeeded");
            CycleOutcome::Refreshed
        }
        Err(Error::Auth(oidc_auth::Error::UnsuccessfulResponse {
            status: Some(status @ (400 | 401 | 403)),
            message,
        })) => {
            warn!(status, error = %message, "refresh token rejected, re-authorization required");
            CycleOutcome::Rejected
        }
        Err(e) => {
            warn!(error = %e, "background refresh failed (transient), will retry next cycle");
            CycleOutcome::Failed
        }
    }
}
