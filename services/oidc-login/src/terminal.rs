//! Terminal browser collaborator
//!
//! Prints the authorization URL and waits for the user to paste the URL the
//! browser was redirected to. An empty line cancels the flow.

use oidc_auth::{BoxFuture, Browser, BrowserOutcome};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;
use url::Url;

pub struct TerminalBrowser<R, W> {
    io: Mutex<(R, W)>,
}

impl TerminalBrowser<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> TerminalBrowser<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }

    async fn prompt(&self, url: &Url, callback_scheme: &str) -> std::io::Result<String> {
        let mut io = self.io.lock().await;
        let (input, output) = &mut *io;
        let message = format!(
            "Open this URL in a browser and sign in:\n\n  {url}\n\n\
             Paste the {callback_scheme}:// URL you were redirected to (empty line to cancel):\n"
        );
        output.write_all(message.as_bytes()).await?;
        output.flush().await?;

        let mut line = String::new();
        input.read_line(&mut line).await?;
        Ok(line.trim().to_owned())
    }
}

impl<R, W> Browser for TerminalBrowser<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn present<'a>(&'a self, url: &'a Url, callback_scheme: &'a str) -> BoxFuture<'a, BrowserOutcome> {
        Box::pin(async move {
            match self.prompt(url, callback_scheme).await {
                Ok(line) if line.is_empty() => BrowserOutcome::Cancelled,
                Ok(line) => BrowserOutcome::RedirectReceived(line),
                Err(e) => BrowserOutcome::Error(format!("reading redirect from terminal: {e}")),
            }
        })
    }
}
