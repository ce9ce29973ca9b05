//! Command-line parsing
//!
//! Deliberately small: `--config <path>` anywhere, then one subcommand.

use anyhow::{Result, bail};
use oidc_session::TokenKind;

pub const USAGE: &str = "\
usage: oidc-login [--config <path>] <command>

commands:
  login                      authorize in the browser and store the tokens
  refresh                    exchange the stored refresh token
  logout                     end the session and wipe stored tokens
  revoke <access|refresh>    revoke one token and forget it locally
  status                     show whether the stored access token is valid
  self-service               print the account self-service link
  watch                      keep the session fresh until interrupted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login,
    Refresh,
    Logout,
    Revoke(TokenKind),
    Status,
    SelfService,
    Watch,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Cli {
    pub config_path: Option<String>,
    pub command: Command,
}

impl Cli {
    /// Parse arguments, excluding the program name.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut config_path = None;
        let mut rest = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "--config" {
                match iter.next() {
                    Some(path) => config_path = Some(path.clone()),
                    None => bail!("--config requires a path\n\n{USAGE}"),
                }
            } else {
                rest.push(arg.as_str());
            }
        }

        let command = match rest.as_slice() {
            ["login"] => Command::Login,
            ["refresh"] => Command::Refresh,
            ["logout"] => Command::Logout,
            ["revoke", "access"] => Command::Revoke(TokenKind::Access),
            ["revoke", "refresh"] => Command::Revoke(TokenKind::Refresh),
            ["status"] => Command::Status,
            ["self-service"] => Command::SelfService,
            ["watch"] => Command::Watch,
            [] => bail!("missing command\n\n{USAGE}"),
            other => bail!("unrecognized arguments: {}\n\n{USAGE}", other.join(" ")),
        };

        Ok(Self {
            config_path,
            command,
        })
    }
}
