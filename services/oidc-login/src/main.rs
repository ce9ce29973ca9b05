//! OpenID Connect login CLI
//!
//! Single binary that:
//! 1. Loads the client registration from TOML
//! 2. Runs the authorization-code flow with PKCE through the terminal
//! 3. Keeps tokens in a local credential file
//! 4. Refreshes, revokes and logs out on request

mod cli;
mod config;
mod terminal;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use oidc_auth::ReqwestTransport;
use oidc_auth::clock::unix_seconds;
use oidc_session::{Collaborators, FileStore, TokenLifecycleManager, spawn_refresh_task};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::terminal::TerminalBrowser;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support.
    // Logs go to stderr; stdout is for the user.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = Cli::parse(&args)?;

    let config_path = Config::resolve_path(cli.config_path.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        client_id = %config.client.client_id,
        environment = ?config.client.environment,
        credentials = %config.session.credentials_path.display(),
        "configuration loaded"
    );

    let transport = ReqwestTransport::new(config.session.timeout()).context("failed to build HTTP client")?;
    let store = FileStore::load(config.session.credentials_path.clone())
        .await
        .context("failed to open credential file")?;
    let deps = Collaborators::new(
        Arc::new(transport),
        Arc::new(store),
        Arc::new(TerminalBrowser::stdio()),
    );
    let manager = TokenLifecycleManager::spawn(config.client.clone(), config.session.key_naming(), deps)?;

    run(cli.command, &manager, &config).await
}

async fn run(command: Command, manager: &TokenLifecycleManager, config: &Config) -> Result<()> {
    match command {
        Command::Login => {
            let authorized = manager
                .authorize(&config.login.scopes, &config.login.authorize_options())
                .await
                .context("login failed")?;
            println!("logged in (token endpoint returned HTTP {})", authorized.http_status);
        }
        Command::Refresh => {
            let tokens = manager.refresh().await.context("refresh failed")?;
            println!("refreshed, access token expires at {}", unix_seconds(tokens.expires_at));
        }
        Command::Logout => {
            manager.logout().await.context("logout failed")?;
            println!("logged out");
        }
        Command::Revoke(kind) => {
            manager
                .revoke(kind)
                .await
                .with_context(|| format!("revoking {kind:?} token failed"))?;
            println!("{kind:?} token revoked");
        }
        Command::Status => status(manager).await,
        Command::SelfService => {
            let link = manager.endpoints().self_service_link(
                config.login.ui_locales.iter().map(String::as_str),
                config.login.login_hints.iter().map(String::as_str),
            );
            println!("{link}");
        }
        Command::Watch => {
            let handle = spawn_refresh_task(
                manager.clone(),
                config.session.refresh_interval(),
                config.session.refresh_threshold(),
            );
            info!(
                interval_secs = config.session.refresh_interval_secs,
                threshold_secs = config.session.refresh_threshold_secs,
                "background refresh running, press Ctrl-C to stop"
            );
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            handle.abort();
            info!("background refresh stopped");
        }
    }
    Ok(())
}

async fn status(manager: &TokenLifecycleManager) {
    match manager.token_set().await {
        Ok(tokens) => {
            let valid = manager.is_access_token_valid(Duration::ZERO).await;
            println!("token type:  {}", tokens.token_type);
            println!("scope:       {}", tokens.scope);
            println!("expires at:  {}", unix_seconds(tokens.expires_at));
            println!("id token:    {}", if tokens.id_token.is_some() { "present" } else { "absent" });
            println!("valid:       {}", if valid { "yes" } else { "no" });
        }
        Err(e) => println!("no stored session ({e})"),
    }
}

