//! Fetcher — the lightweight HTTP path. Never touches a browser; escalating
//! to one is the Extraction Engine's job, not this module's.

use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

const MAX_REDIRECTS: usize = 5;

/// What came back, regardless of HTTP status — only a true transport
/// failure (DNS, connect, TLS, timeout, malformed proxy) is an `Err`.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub final_url: String,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub extra_headers: HashMap<String, String>,
    pub proxy_url: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub accept_invalid_certs: bool,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(30),
            user_agent: user_agent.into(),
            extra_headers: HashMap::new(),
            proxy_url: None,
            proxy_username: None,
            proxy_password: None,
            accept_invalid_certs: false,
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// `reqwest`-backed [`Fetcher`]. Builds a fresh client per request so that
/// per-domain proxy settings and certificate relaxation never leak across
/// unrelated scrapes.
pub struct HttpFetcher;

impl HttpFetcher {
    pub fn new() -> Self {
        Self
    }

    fn build_client(&self, request: &FetchRequest) -> Result<Client, FetchError> {
        let mut builder = Client::builder()
            .timeout(request.timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .danger_accept_invalid_certs(request.accept_invalid_certs);

        if let Some(proxy_url) = &request.proxy_url {
            let mut proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| FetchError::MalformedProxy(e.to_string()))?;
            if let (Some(user), Some(pass)) = (&request.proxy_username, &request.proxy_password) {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }

        builder.build().map_err(|e| FetchError::Other(e.to_string()))
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let client = self.build_client(request)?;

        let mut builder = client
            .get(&request.url)
            .header(reqwest::header::USER_AGENT, &request.user_agent);
        for (name, value) in &request.extra_headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_send_error(e, request.timeout))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Other(e.to_string()))?;

        Ok(FetchResponse {
            status,
            body,
            final_url,
        })
    }
}

fn classify_send_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout(timeout);
    }
    if err.is_connect() {
        return FetchError::Connect(err.to_string());
    }
    FetchError::Other(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_caps_redirects_via_policy_not_field() {
        let req = FetchRequest::new("https://example.com", "test-agent/1.0");
        assert_eq!(req.timeout, Duration::from_secs(30));
        assert!(req.proxy_url.is_none());
    }

    #[test]
    fn malformed_proxy_url_is_a_typed_error() {
        let fetcher = HttpFetcher::new();
        let mut req = FetchRequest::new("https://example.com", "ua");
        req.proxy_url = Some("::::not a url".to_string());
        let result = fetcher.build_client(&req);
        assert!(matches!(result, Err(FetchError::MalformedProxy(_))));
    }
}
