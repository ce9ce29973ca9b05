//! Token lifecycle manager
//!
//! All reads and writes of stored credentials go through a single worker task
//! that owns the store. Callers hold a cheap `TokenLifecycleManager` handle and
//! talk to the worker over an mpsc channel, so two operations never interleave
//! their store access. Browser interaction and the code exchange happen on the
//! caller's task; only the resulting write is queued to the worker.
//!
//! Lifecycle of a session:
//! 1. `authorize()` → browser → redirect → code exchange → persist
//! 2. `refresh()` trades the stored refresh token for a new set
//! 3. `revoke()` forgets one token locally after asking the server to drop it
//! 4. `logout()` ends the server session, revokes both tokens, wipes the store

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::Secret;
use oidc_auth::{
    AuthorizeOptions, Browser, Clock, Configuration, Endpoints, SystemClock, TokenExchangeClient, TokenSet,
    Transport, build_authorization_request, handle_redirect,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::{
    CredentialStore, KeyNaming, StorageItem, StoreError, TokenKind, read_expires_at, read_token_set, token_entries,
};

const COMMAND_BUFFER: usize = 32;

/// Everything the manager talks to outside the process.
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn CredentialStore>,
    pub browser: Arc<dyn Browser>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn CredentialStore>, browser: Arc<dyn Browser>) -> Self {
        Self {
            transport,
            store,
            browser,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Outcome of a completed authorization.
#[derive(Debug)]
pub struct Authorized {
    pub access_token: Secret<String>,
    pub http_status: u16,
}

enum Command {
    Persist {
        tokens: TokenSet,
        reply: oneshot::Sender<Result<()>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<TokenSet>>,
    },
    Logout {
        reply: oneshot::Sender<Result<()>>,
    },
    Revoke {
        kind: TokenKind,
        reply: oneshot::Sender<Result<()>>,
    },
    ExpiresAt {
        reply: oneshot::Sender<Result<SystemTime>>,
    },
    Load {
        reply: oneshot::Sender<Result<TokenSet>>,
    },
}

/// Handle to the session worker. Clones share the same worker.
#[derive(Clone)]
pub struct TokenLifecycleManager {
    commands: mpsc::Sender<Command>,
    client: Arc<TokenExchangeClient>,
    browser: Arc<dyn Browser>,
    clock: Arc<dyn Clock>,
}

impl TokenLifecycleManager {
    /// Validate the configuration, resolve endpoints and start the worker.
    ///
    /// Must be called from within a tokio runtime. The worker exits once
    /// every handle has been dropped.
    pub fn spawn(config: Configuration, naming: KeyNaming, deps: Collaborators) -> Result<Self> {
        config.validate()?;
        let endpoints = Endpoints::resolve(&config)?;
        info!(
            client_id = %config.client_id,
            issuer = %endpoints.issuer,
            "starting token lifecycle manager"
        );

        let client = Arc::new(TokenExchangeClient::new(
            config,
            endpoints,
            deps.transport,
            deps.clock.clone(),
        ));
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let worker = Worker {
            client: client.clone(),
            store: deps.store,
            naming,
        };
        tokio::spawn(worker.run(receiver));

        Ok(Self {
            commands,
            client,
            browser: deps.browser,
            clock: deps.clock,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        self.client.endpoints()
    }

    /// Run the full authorization-code flow and persist the resulting tokens.
    ///
    /// Nothing is written unless the redirect, the exchange and ID token
    /// validation all succeed. A failed write is reported even though the
    /// server issued tokens.
    pub async fn authorize(&self, scope: &BTreeSet<String>, options: &AuthorizeOptions) -> Result<Authorized> {
        let (url, session) = build_authorization_request(self.client.config(), self.client.endpoints(), scope, options)?;
        debug!(%url, "presenting authorization request");

        let outcome = self
            .browser
            .present(&url, &self.client.config().callback_url_scheme)
            .await;
        let code = handle_redirect(outcome, &session).inspect_err(|e| {
            warn!(error = %e, "authorization redirect rejected");
        })?;

        let (tokens, http_status) = self.client.exchange_code(session, &code).await?;
        let access_token = tokens.access_token.clone();
        self.request(|reply| Command::Persist { tokens, reply }).await?;

        info!(http_status, "authorization complete");
        Ok(Authorized {
            access_token,
            http_status,
        })
    }

    /// Exchange the stored refresh token for a new token set.
    pub async fn refresh(&self) -> Result<TokenSet> {
        self.request(|reply| Command::Refresh { reply }).await
    }

    /// End the session: server logout when an ID token is available,
    /// best-effort revocation of both tokens, then a full local wipe.
    ///
    /// Server-side failures are logged, not returned.
    pub async fn logout(&self) -> Result<()> {
        self.request(|reply| Command::Logout { reply }).await
    }

    /// Ask the server to revoke one stored token and forget it locally.
    pub async fn revoke(&self, kind: TokenKind) -> Result<()> {
        self.request(|reply| Command::Revoke { kind, reply }).await
    }

    /// Whether the stored access token outlives `tolerance` from now.
    ///
    /// Any failure to read the expiry counts as invalid.
    pub async fn is_access_token_valid(&self, tolerance: Duration) -> bool {
        match self.request(|reply| Command::ExpiresAt { reply }).await {
            Ok(expires_at) => expires_at
                .duration_since(self.clock.now())
                .is_ok_and(|remaining| remaining > tolerance),
            Err(e) => {
                debug!(error = %e, "no usable access token expiry");
                false
            }
        }
    }

    /// The complete stored token set.
    pub async fn token_set(&self) -> Result<TokenSet> {
        self.request(|reply| Command::Load { reply }).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::Stopped)?;
        response.await.map_err(|_| Error::Stopped)?
    }
}

/// Owns the store. Commands run to completion one at a time.
struct Worker {
    client: Arc<TokenExchangeClient>,
    store: Arc<dyn CredentialStore>,
    naming: KeyNaming,
}

impl Worker {
    async fn run(self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Persist { tokens, reply } => {
                    let _ = reply.send(self.persist(&tokens).await);
                }
                Command::Refresh { reply } => {
                    let _ = reply.send(self.refresh().await);
                }
                Command::Logout { reply } => {
                    let _ = reply.send(self.logout().await);
                }
                Command::Revoke { kind, reply } => {
                    let _ = reply.send(self.revoke(kind).await);
                }
                Command::ExpiresAt { reply } => {
                    let result = read_expires_at(self.store.as_ref(), &self.naming).await;
                    let _ = reply.send(result.map_err(Error::from));
                }
                Command::Load { reply } => {
                    let result = read_token_set(self.store.as_ref(), &self.naming).await;
                    let _ = reply.send(result.map_err(Error::from));
                }
            }
        }
        debug!("token lifecycle manager stopped");
    }

    async fn read(&self, item: StorageItem) -> std::result::Result<Secret<String>, StoreError> {
        self.store.get(&item.key(&self.naming)).await.map(Secret::new)
    }

    async fn persist(&self, tokens: &TokenSet) -> Result<()> {
        let entries = token_entries(tokens, &self.naming);
        self.store.set_all(&entries).await.inspect_err(|e| {
            warn!(error = %e, "failed to persist token set");
        })?;
        debug!(entries = entries.len(), "persisted token set");
        Ok(())
    }

    async fn refresh(&self) -> Result<TokenSet> {
        let refresh_token = self.read(StorageItem::RefreshToken).await?;
        let (mut tokens, _) = self.client.exchange_refresh_token(&refresh_token).await?;

        if tokens.id_token.is_none() {
            tokens.id_token = self.read(StorageItem::IdToken).await.ok();
        }
        self.persist(&tokens).await?;
        info!(scope = %tokens.scope, "token set refreshed");
        Ok(tokens)
    }

    async fn logout(&self) -> Result<()> {
        let mut refreshed = false;
        loop {
            match self.read(StorageItem::IdToken).await {
                Ok(id_token) => {
                    match self.client.logout(&id_token).await {
                        Ok(status) => info!(status, "server session ended"),
                        Err(e) => warn!(error = %e, "server logout failed, continuing local logout"),
                    }
                    break;
                }
                Err(_) if !refreshed => {
                    refreshed = true;
                    debug!("no ID token stored, refreshing before logout");
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "refresh before logout failed, skipping server logout");
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        self.revoke_in_background(StorageItem::AccessToken).await;
        self.revoke_in_background(StorageItem::RefreshToken).await;
        self.store.wipe_all(&self.naming.all_keys()).await?;
        info!("logged out");
        Ok(())
    }

    /// Fire-and-forget revocation. The result is only logged.
    async fn revoke_in_background(&self, item: StorageItem) {
        let Ok(token) = self.read(item).await else {
            return;
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            match client.revoke(&token).await {
                Ok(status) => debug!(?item, status, "token revoked"),
                Err(e) => debug!(?item, error = %e, "token revocation failed"),
            }
        });
    }

    async fn revoke(&self, kind: TokenKind) -> Result<()> {
        let item = kind.storage_item();
        let token = self.read(item).await?;
        match self.client.revoke(&token).await {
            Ok(status) => info!(?kind, status, "token revoked"),
            Err(e) => warn!(?kind, error = %e, "server revocation failed, forgetting token locally"),
        }
        self.store.delete(&item.key(&self.naming)).await?;
        Ok(())
    }
}
