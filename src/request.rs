//! Request and response descriptors exchanged with the host.

use std::fmt;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, VARY};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An outgoing request as seen by the fetch interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Absolute target URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body (empty for GET).
    pub body: Bytes,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parses `url` and creates a request for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `url` is not absolute.
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::new(method, url))
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the key this request is stored and looked up under.
    #[must_use]
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// Identity of a request inside a store: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    /// Builds a key, dropping any URL fragment.
    #[must_use]
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    /// Returns the method part.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the URL part.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Classification of a response relative to the requesting scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response.
    Basic,
    /// Cross-origin response exposed through CORS.
    Cors,
    /// Cross-origin response with nothing exposed.
    Opaque,
    /// Network error placeholder.
    Error,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Cors => write!(f, "cors"),
            Self::Opaque => write!(f, "opaque"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A complete response. Bodies are reference counted, so [`Response::duplicate`]
/// never copies the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Full body.
    pub body: Bytes,
    /// Origin classification.
    pub kind: ResponseType,
    /// Whether one or more redirects were followed.
    pub redirected: bool,
    /// Final URL after redirects, if known.
    pub url: Option<Url>,
}

impl Response {
    /// Creates a same-origin response.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            kind: ResponseType::Basic,
            redirected: false,
            url: None,
        }
    }

    /// Sets the response type.
    #[must_use]
    pub const fn with_kind(mut self, kind: ResponseType) -> Self {
        self.kind = kind;
        self
    }

    /// Marks the response as redirected.
    #[must_use]
    pub const fn with_redirected(mut self, redirected: bool) -> Self {
        self.redirected = redirected;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the final URL.
    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Returns true for a 2xx status.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the response may be written to the store: a plain
    /// `200` from the same origin that was not reached through a redirect.
    #[must_use]
    pub fn is_storable(&self) -> bool {
        self.status == StatusCode::OK && self.kind == ResponseType::Basic && !self.redirected
    }

    /// Returns an independent copy to persist while the original goes to the caller.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Parses the `Vary` header.
    #[must_use]
    pub fn vary(&self) -> Vary {
        let mut names = Vec::new();
        for value in self.headers.get_all(VARY) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                if token == "*" {
                    return Vary::Any;
                }
                if let Ok(name) = HeaderName::from_bytes(token.as_bytes()) {
                    names.push(name);
                }
            }
        }
        if names.is_empty() {
            Vary::None
        } else {
            Vary::Headers(names)
        }
    }
}

/// Which request headers select between stored variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vary {
    /// The URL alone identifies the response.
    None,
    /// `Vary: *`; a stored copy never matches.
    Any,
    /// These request headers must match.
    Headers(Vec<HeaderName>),
}
