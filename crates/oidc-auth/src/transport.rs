//! HTTP transport collaborator
//!
//! The protocol code only needs form-encoded POSTs and query-string GETs, plus
//! the `Date` response header. `ReqwestTransport` is the production
//! implementation; tests script their own.

use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::BoxFuture;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Outgoing request. `params` become the form body for POST and the query
/// string for GET.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub params: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn post_form(url: Url, params: &[(&str, &str)]) -> Self {
        Self {
            method: Method::Post,
            url,
            params: params
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Response as seen by the protocol layer.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Raw `Date` header, when the server sent one.
    pub date: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failure before any response was received (DNS, connect, TLS, timeout).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Issues HTTP requests on behalf of the protocol layer.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

/// `reqwest`-backed transport with a fixed per-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError(format!("building HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let builder = match request.method {
            Method::Post => self.client.post(request.url.clone()).form(&request.params),
            Method::Get => self.client.get(request.url.clone()).query(&request.params),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(format!("request to {} failed: {e}", request.url)))?;

        let status = response.status().as_u16();
        let date = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError(format!("reading response body: {e}")))?
            .to_vec();

        debug!(url = %request.url, status, bytes = body.len(), "HTTP exchange completed");
        Ok(HttpResponse { status, date, body })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(self.execute(request))
    }
}
