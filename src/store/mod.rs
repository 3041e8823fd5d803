//! Named response stores.
//!
//! A [`CacheStorage`] holds any number of stores, each identified by a
//! string and mapping [`RequestKey`]s to captured responses. Two
//! implementations ship with the crate: [`MemoryCacheStorage`] and the
//! persistent [`DiskCacheStorage`].

mod disk;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::request::{Request, RequestKey, Response, Vary};

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Abstraction over the host's store API.
///
/// Implementations must tolerate concurrent reads and concurrent writes to
/// different keys. Concurrent writes to the same key are last-write-wins.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the store if it does not exist yet.
    async fn open(&self, name: &str) -> Result<()>;

    /// Returns true if a store with this identifier exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Lists store identifiers in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Deletes a store and every entry in it. Returns `false` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Looks up `request` in the named store.
    ///
    /// Fails with [`Error::StoreNotFound`](crate::Error::StoreNotFound) if the
    /// store does not exist.
    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>>;

    /// Inserts an entry, replacing any entry under the same key. Creates the
    /// store if needed.
    async fn put(&self, name: &str, entry: CacheEntry) -> Result<()>;

    /// Inserts every entry or none of them.
    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()>;

    /// Returns every entry of the named store.
    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>>;
}

/// A captured response together with what is needed to match it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Lookup key.
    pub key: RequestKey,
    /// Values of the request headers named by the response's `Vary` header,
    /// captured at insert time. Absent headers are recorded as empty strings.
    pub vary_headers: Vec<(String, String)>,
    /// The stored response.
    pub response: Response,
    /// When the entry was captured.
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Captures `response` as the answer to `request`.
    #[must_use]
    pub fn new(request: &Request, response: Response) -> Self {
        let vary_headers = match response.vary() {
            Vary::Headers(names) => names
                .iter()
                .map(|name| (name.as_str().to_string(), header_value(request, name.as_str())))
                .collect(),
            Vary::None | Vary::Any => Vec::new(),
        };
        Self {
            key: request.key(),
            vary_headers,
            response,
            stored_at: Utc::now(),
        }
    }

    /// Returns true if this entry answers `request`.
    #[must_use]
    pub fn matches(&self, request: &Request) -> bool {
        if self.key != request.key() {
            return false;
        }
        match self.response.vary() {
            Vary::None => true,
            Vary::Any => false,
            Vary::Headers(names) => names.iter().all(|name| {
                let captured = self
                    .vary_headers
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(name.as_str()))
                    .map_or("", |(_, v)| v.as_str());
                header_value(request, name.as_str()) == captured
            }),
        }
    }

    /// Size of the stored body in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.response.body.len() as u64
    }
}

/// Headers set by the transport rather than the page. They never select a
/// variant, so install-time fetches (which send none of them) match
/// browser requests (which send all of them).
const NETWORK_HEADERS: &[&str] = &[
    "accept-charset",
    "accept-encoding",
    "connection",
    "content-length",
    "cookie",
    "date",
    "dnt",
    "expect",
    "host",
    "keep-alive",
    "origin",
    "referer",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "user-agent",
    "via",
];

fn header_value(request: &Request, name: &str) -> String {
    if NETWORK_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
        return String::new();
    }
    request
        .headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}
