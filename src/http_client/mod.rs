//! Single-shot JSON POST transport.
//!
//! No retries here; [`RequestDispatcher`](crate::dispatch::RequestDispatcher)
//! owns the retry policy. Responses are decompressed (gzip, deflate, brotli)
//! by reqwest and decoded UTF-8 first, Latin-1 second.
//!
//! Proxy support:
//! - `http://`, `https://` and `socks5://` / `socks5h://` URLs via `Proxy::all`

mod response;

pub use response::{decode_body, HttpResponse};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use tracing::debug;

use crate::ocr::OcrError;

/// Default user agent for vendor requests.
pub const USER_AGENT: &str = concat!("ocrbridge/", env!("CARGO_PKG_VERSION"));

/// `post(url, headers, body) -> {status, text}` seam used by the dispatcher.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Result<HttpResponse, OcrError>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    timeout: Duration,
    user_agent: Option<String>,
    proxy: Option<String>,
}

impl HttpClientBuilder {
    /// Set the user agent string.
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }

    /// Route every request through `proxy_url`. Empty strings are ignored.
    pub fn proxy(mut self, proxy_url: Option<&str>) -> Self {
        self.proxy = proxy_url
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        self
    }

    pub fn build(self) -> Result<HttpClient, OcrError> {
        let mut builder = Client::builder()
            .user_agent(self.user_agent.as_deref().unwrap_or(USER_AGENT))
            .timeout(self.timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true);

        if let Some(proxy_url) = &self.proxy {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                OcrError::Configuration(format!("Invalid proxy URL '{}': {}", proxy_url, e))
            })?;
            debug!("Routing vendor requests through proxy {}", proxy_url);
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| OcrError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(HttpClient { client })
    }
}

impl HttpClient {
    pub fn builder(timeout: Duration) -> HttpClientBuilder {
        HttpClientBuilder {
            timeout,
            user_agent: None,
            proxy: None,
        }
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Result<HttpResponse, OcrError> {
        let mut request = self.client.post(url).body(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                "timed out"
            } else if e.is_connect() {
                "connection failed"
            } else {
                "request failed"
            };
            // reqwest errors embed the URL, which may carry a query-string key
            OcrError::Transport(format!("{}: {}", kind, e.without_url()))
        })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| OcrError::Transport(format!("failed to read body: {}", e.without_url())))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
