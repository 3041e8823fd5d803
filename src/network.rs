//! Network abstraction for fetching requests that miss the store.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{ACCESS_CONTROL_ALLOW_ORIGIN, HeaderMap};

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::request::{Request, Response, ResponseType};

/// Abstraction over the host's network API.
#[async_trait]
pub trait Network: Send + Sync {
    /// Sends `request` and reads the whole response.
    ///
    /// Any transport failure (no connectivity, DNS, timeout) is an
    /// [`Error::Network`]. Non-2xx statuses are successful fetches.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// [`Network`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
    scope: Url,
}

impl HttpNetwork {
    /// Builds a client tuned for asset fetching. Responses are classified
    /// relative to `scope`'s origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(scope: Url, config: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(config.timeout())
            .build()?;
        Ok(Self::with_client(client, scope))
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client, scope: Url) -> Self {
        Self { client, scope }
    }

    /// Returns the underlying client.
    #[must_use]
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::network(request.url.as_str(), e))?;

        let final_url = response.url().clone();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::network(request.url.as_str(), e))?;

        Ok(Response {
            status,
            kind: classify(&self.scope, &final_url, &headers),
            redirected: without_fragment(&final_url) != without_fragment(&request.url),
            headers,
            body,
            url: Some(final_url),
        })
    }
}

/// Classifies a response by where it finally came from.
#[must_use]
pub fn classify(scope: &Url, final_url: &Url, headers: &HeaderMap) -> ResponseType {
    if scope.origin() == final_url.origin() {
        ResponseType::Basic
    } else if headers.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
        ResponseType::Cors
    } else {
        ResponseType::Opaque
    }
}

fn without_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}
