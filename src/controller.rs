//! The asset cache controller: install, activate, fetch interception and
//! control messages.

use std::sync::Arc;

use futures::future::join_all;
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::Method;
use serde_json::Value;
use tokio_util::task::TaskTracker;

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::message::ControlMessage;
use crate::network::Network;
use crate::request::{Request, Response};
use crate::store::{CacheEntry, CacheStorage};

/// Summary of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Store the manifest was written to.
    pub cache_name: String,
    /// Number of entries written.
    pub entries: usize,
    /// Sum of stored body sizes in bytes.
    pub bytes: u64,
}

/// How a single intercepted request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not eligible for interception; the host must send it itself.
    Passthrough(Request),
    /// Served from the current store without touching the network.
    Cached(Response),
    /// Served from the network.
    Network(Response),
    /// The network failed and nothing was served.
    Failed,
}

impl FetchOutcome {
    /// Returns the response delivered to the caller, if any.
    #[must_use]
    pub const fn response(&self) -> Option<&Response> {
        match self {
            Self::Cached(response) | Self::Network(response) => Some(response),
            Self::Passthrough(_) | Self::Failed => None,
        }
    }

    /// Consumes the outcome, returning the delivered response.
    #[must_use]
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Cached(response) | Self::Network(response) => Some(response),
            Self::Passthrough(_) | Self::Failed => None,
        }
    }
}

/// Cache-first asset controller for one store generation.
///
/// The controller owns no threads. Store writes triggered by fetches are
/// spawned on the current tokio runtime and tracked so that
/// [`settle`](Self::settle) can wait for them.
pub struct AssetCacheController<S, N, H> {
    config: ControllerConfig,
    storage: Arc<S>,
    network: Arc<N>,
    host: Arc<H>,
    writes: TaskTracker,
}

impl<S, N, H> AssetCacheController<S, N, H>
where
    S: CacheStorage + 'static,
    N: Network + 'static,
    H: Host + 'static,
{
    /// Creates a controller.
    #[must_use]
    pub fn new(config: ControllerConfig, storage: Arc<S>, network: Arc<N>, host: Arc<H>) -> Self {
        Self {
            config,
            storage,
            network,
            host,
            writes: TaskTracker::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Identifier of the current store.
    #[must_use]
    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    /// Returns the store backend.
    #[must_use]
    pub const fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Returns the network backend.
    #[must_use]
    pub const fn network(&self) -> &Arc<N> {
        &self.network
    }

    /// Returns the host.
    #[must_use]
    pub const fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Pre-caches every manifest asset into the current store, then asks the
    /// host to skip waiting.
    ///
    /// All assets are fetched before anything is written, and the batch is
    /// inserted with [`CacheStorage::put_all`], so a failed install leaves no
    /// manifest entry behind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Install`] if any asset fails to fetch or answers with
    /// a non-2xx status, or a store error.
    pub async fn install(&self) -> Result<InstallReport> {
        let name = self.cache_name();
        let urls = self.config.resolve_manifest()?;
        log::info!("Installing {name}: caching {} assets", urls.len());

        self.storage.open(name).await?;

        let entries: Vec<CacheEntry> = stream::iter(urls)
            .map(|url| async move {
                let request = Request::get(url);
                let response = match self.network.fetch(&request).await {
                    Ok(response) => response,
                    Err(e) => {
                        return Err(Error::Install {
                            url: request.url.to_string(),
                            reason: e.to_string(),
                        });
                    }
                };
                if !response.ok() {
                    return Err(Error::Install {
                        url: request.url.to_string(),
                        reason: format!("HTTP {}", response.status),
                    });
                }
                Ok(CacheEntry::new(&request, response))
            })
            .buffered(self.config.install_concurrency.max(1))
            .try_collect()
            .await?;

        let report = InstallReport {
            cache_name: name.to_string(),
            entries: entries.len(),
            bytes: entries.iter().map(CacheEntry::size).sum(),
        };
        self.storage.put_all(name, entries).await?;

        log::info!("Installed {name}; requesting skip-waiting");
        self.host.skip_waiting();
        Ok(report)
    }

    /// Deletes every store except the current one, then claims clients.
    /// Returns the identifiers actually deleted.
    ///
    /// Deletions run concurrently. A failed deletion is logged and does not
    /// fail activation.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store identifiers cannot be listed.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let current = self.cache_name();
        log::info!("Activating {current}");

        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != current)
            .collect();

        let results = join_all(stale.iter().map(|name| async move {
            (name, self.storage.delete(name).await)
        }))
        .await;

        let mut deleted = Vec::new();
        for (name, result) in results {
            match result {
                Ok(true) => {
                    log::info!("Deleted stale store {name}");
                    deleted.push(name.clone());
                }
                Ok(false) => {}
                Err(e) => log::warn!("Failed to delete stale store {name}: {e}"),
            }
        }

        log::info!("Activated {current}; claiming clients");
        self.host.claim_clients();
        Ok(deleted)
    }

    /// Returns true if `request` is a GET whose URL matches no exclusion.
    #[must_use]
    pub fn is_eligible(&self, request: &Request) -> bool {
        request.method == Method::GET && !self.config.is_excluded(request.url.as_str())
    }

    /// Intercepts one request, cache first.
    ///
    /// A storable network response is returned immediately while its
    /// duplicate is written to the store in the background.
    pub async fn fetch(&self, request: Request) -> FetchOutcome {
        if !self.is_eligible(&request) {
            log::trace!("Passing through {} {}", request.method, request.url);
            return FetchOutcome::Passthrough(request);
        }

        let name = self.cache_name();
        match self.storage.match_request(name, &request).await {
            Ok(Some(response)) => {
                log::debug!("Cache hit: {}", request.url);
                return FetchOutcome::Cached(response);
            }
            Ok(None) | Err(Error::StoreNotFound(_)) => {
                log::debug!("Cache miss: {}", request.url);
            }
            Err(e) => log::warn!("Store lookup failed for {}: {e}", request.url),
        }

        match self.network.fetch(&request).await {
            Ok(response) => {
                if response.is_storable() {
                    self.store_in_background(&request, response.duplicate());
                }
                FetchOutcome::Network(response)
            }
            Err(e) => {
                log::warn!("Fetch failed (offline?) for {}: {e}", request.url);
                FetchOutcome::Failed
            }
        }
    }

    fn store_in_background(&self, request: &Request, response: Response) {
        let storage = Arc::clone(&self.storage);
        let name = self.config.cache_name.clone();
        let entry = CacheEntry::new(request, response);
        self.writes.spawn(async move {
            let key = entry.key.clone();
            if let Err(e) = storage.put(&name, entry).await {
                log::warn!("Failed to store {key}: {e}");
            }
        });
    }

    /// Waits for every background store write started so far.
    pub async fn settle(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Handles a control message. Returns true if it triggered an instruction.
    pub fn handle_message(&self, message: &Value) -> bool {
        match ControlMessage::from_value(message) {
            Some(ControlMessage::SkipWaiting) => {
                log::info!("SKIP_WAITING received; forcing activation");
                self.host.skip_waiting();
                true
            }
            Some(ControlMessage::Unknown) | None => false,
        }
    }

    /// Parses and handles a raw JSON control message. Malformed input is ignored.
    pub fn handle_message_str(&self, raw: &str) -> bool {
        serde_json::from_str::<Value>(raw).is_ok_and(|value| self.handle_message(&value))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use reqwest::{StatusCode, Url};
    use serde_json::json;

    use crate::request::ResponseType;
    use crate::store::{DiskCacheStorage, MemoryCacheStorage};

    pub(crate) fn scope() -> Url {
        Url::parse("https://atelier.example/app/").unwrap()
    }

    fn url(path: &str) -> Url {
        scope().join(path).unwrap()
    }

    /// A scripted network that counts calls per URL.
    pub(crate) struct MockNetwork {
        responses: Mutex<HashMap<String, Response>>,
        calls: Mutex<Vec<String>>,
        offline: AtomicBool,
    }

    impl MockNetwork {
        pub(crate) fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                offline: AtomicBool::new(false),
            }
        }

        /// Serves a same-origin 200 for `path` relative to the scope.
        pub(crate) fn serve(&self, path: &str, body: &'static str) {
            let target = scope().join(path.trim_start_matches('/')).unwrap();
            let response = Response::new(StatusCode::OK, body).with_url(target.clone());
            self.serve_response(target, response);
        }

        pub(crate) fn serve_response(&self, target: Url, response: Response) {
            self.responses
                .lock()
                .unwrap()
                .insert(target.to_string(), response);
        }

        pub(crate) fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub(crate) fn calls_for(&self, target: &Url) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|u| *u == target.as_str())
                .count()
        }
    }

    #[async_trait]
    impl Network for MockNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response> {
            self.calls.lock().unwrap().push(request.url.to_string());
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::network(request.url.as_str(), "connection refused"));
            }
            Ok(self
                .responses
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .unwrap_or_else(|| Response::new(StatusCode::NOT_FOUND, "")))
        }
    }

    /// A host that only counts instructions.
    #[derive(Default)]
    pub(crate) struct CountingHost {
        skip_waiting: AtomicUsize,
        claims: AtomicUsize,
    }

    impl CountingHost {
        pub(crate) fn skip_waiting_count(&self) -> usize {
            self.skip_waiting.load(Ordering::SeqCst)
        }
    }

    impl Host for CountingHost {
        fn skip_waiting(&self) {
            self.skip_waiting.fetch_add(1, Ordering::SeqCst);
        }

        fn claim_clients(&self) {
            self.claims.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Wraps a storage and counts every call made to it.
    struct CountingStorage<S> {
        inner: S,
        calls: AtomicUsize,
    }

    impl<S> CountingStorage<S> {
        fn new(inner: S) -> Self {
            Self {
                inner,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn tick(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl<S: CacheStorage> CacheStorage for CountingStorage<S> {
        async fn open(&self, name: &str) -> Result<()> {
            self.tick();
            self.inner.open(name).await
        }

        async fn has(&self, name: &str) -> Result<bool> {
            self.tick();
            self.inner.has(name).await
        }

        async fn keys(&self) -> Result<Vec<String>> {
            self.tick();
            self.inner.keys().await
        }

        async fn delete(&self, name: &str) -> Result<bool> {
            self.tick();
            self.inner.delete(name).await
        }

        async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
            self.tick();
            self.inner.match_request(name, request).await
        }

        async fn put(&self, name: &str, entry: CacheEntry) -> Result<()> {
            self.tick();
            self.inner.put(name, entry).await
        }

        async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
            self.tick();
            self.inner.put_all(name, entries).await
        }

        async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>> {
            self.tick();
            self.inner.entries(name).await
        }
    }

    const MANIFEST: &[&str] = &["./", "./index.html", "./styles.css", "./script.js"];

    fn config() -> ControllerConfig {
        ControllerConfig::new()
            .with_cache_name("atelier-v3")
            .with_scope(scope().as_str())
            .with_manifest(MANIFEST.iter().copied())
    }

    fn full_network() -> MockNetwork {
        let network = MockNetwork::new();
        network.serve("", "<html>root</html>");
        network.serve("index.html", "<html>index</html>");
        network.serve("styles.css", "body{}");
        network.serve("script.js", "main()");
        network
    }

    type Controller<S> = AssetCacheController<S, MockNetwork, CountingHost>;

    fn controller_with<S>(storage: S, network: MockNetwork) -> Controller<S>
    where
        S: CacheStorage + 'static,
    {
        AssetCacheController::new(
            config(),
            Arc::new(storage),
            Arc::new(network),
            Arc::new(CountingHost::default()),
        )
    }

    // =========================================================================
    // Install
    // =========================================================================

    #[tokio::test]
    async fn install_stores_every_manifest_asset() {
        let controller = controller_with(MemoryCacheStorage::new(), full_network());
        let report = controller.install().await.unwrap();

        assert_eq!(report.cache_name, "atelier-v3");
        assert_eq!(report.entries, MANIFEST.len());
        assert_eq!(report.bytes, 17 + 18 + 6 + 6);
        assert_eq!(controller.host().skip_waiting.load(Ordering::SeqCst), 1);

        for (path, body) in [
            ("", "<html>root</html>"),
            ("index.html", "<html>index</html>"),
            ("styles.css", "body{}"),
            ("script.js", "main()"),
        ] {
            let hit = controller
                .storage()
                .match_request("atelier-v3", &Request::get(url(path)))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&hit.body[..], body.as_bytes());
        }
    }

    #[tokio::test]
    async fn install_round_trips_through_disk_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let controller = controller_with(DiskCacheStorage::new(dir.path()), full_network());
        controller.install().await.unwrap();

        let reopened = DiskCacheStorage::new(dir.path());
        let hit = reopened
            .match_request("atelier-v3", &Request::get(url("styles.css")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&hit.body[..], b"body{}");
        assert_eq!(hit.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn installed_asset_with_vary_serves_browser_request_offline() {
        use reqwest::header::{ACCEPT_ENCODING, HeaderValue, USER_AGENT, VARY};

        let network = full_network();
        network.serve_response(
            url("styles.css"),
            Response::new(StatusCode::OK, "body{}")
                .with_header(VARY, HeaderValue::from_static("Accept-Encoding")),
        );
        let controller = controller_with(MemoryCacheStorage::new(), network);
        controller.install().await.unwrap();
        controller.network().set_offline(true);

        let browser = Request::get(url("styles.css"))
            .with_header(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"))
            .with_header(USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        let outcome = controller.fetch(browser).await;
        let FetchOutcome::Cached(response) = outcome else {
            panic!("expected a cache hit after install");
        };
        assert_eq!(&response.body[..], b"body{}");
    }

    #[tokio::test]
    async fn install_fails_atomically_on_missing_asset() {
        let network = full_network();
        network.serve_response(url("script.js"), Response::new(StatusCode::NOT_FOUND, ""));
        let controller = controller_with(MemoryCacheStorage::new(), network);

        let err = controller.install().await.unwrap_err();
        assert!(
            matches!(&err, Error::Install { url: failed, .. } if failed.ends_with("/script.js")),
            "unexpected error: {err}"
        );
        assert!(controller.storage().entries("atelier-v3").await.unwrap().is_empty());
        assert_eq!(controller.host().skip_waiting.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn install_fails_when_offline() {
        let network = full_network();
        network.set_offline(true);
        let controller = controller_with(MemoryCacheStorage::new(), network);

        assert!(matches!(controller.install().await, Err(Error::Install { .. })));
        assert!(controller.storage().entries("atelier-v3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn install_retry_after_failure_starts_clean() {
        let network = full_network();
        network.set_offline(true);
        let controller = controller_with(MemoryCacheStorage::new(), network);
        assert!(controller.install().await.is_err());

        controller.network().set_offline(false);
        let report = controller.install().await.unwrap();
        assert_eq!(report.entries, MANIFEST.len());
        assert_eq!(
            controller.storage().entries("atelier-v3").await.unwrap().len(),
            MANIFEST.len()
        );
    }

    #[tokio::test]
    async fn install_leaves_other_stores_alone() {
        let storage = MemoryCacheStorage::new();
        storage.open("atelier-v2").await.unwrap();
        let controller = controller_with(storage, full_network());
        controller.install().await.unwrap();
        assert_eq!(
            controller.storage().keys().await.unwrap(),
            vec!["atelier-v2", "atelier-v3"]
        );
    }

    // =========================================================================
    // Activate
    // =========================================================================

    #[tokio::test]
    async fn activate_keeps_only_current_store() {
        let storage = MemoryCacheStorage::new();
        for name in ["atelier-v1", "atelier-v2", "atelier-v3"] {
            storage
                .put(
                    name,
                    CacheEntry::new(
                        &Request::get(url("index.html")),
                        Response::new(StatusCode::OK, name),
                    ),
                )
                .await
                .unwrap();
        }
        let controller = controller_with(storage, MockNetwork::new());

        let deleted = controller.activate().await.unwrap();
        assert_eq!(deleted, vec!["atelier-v1", "atelier-v2"]);
        assert_eq!(controller.storage().keys().await.unwrap(), vec!["atelier-v3"]);
        assert_eq!(controller.host().claims.load(Ordering::SeqCst), 1);

        for gone in ["atelier-v1", "atelier-v2"] {
            assert!(matches!(
                controller
                    .storage()
                    .match_request(gone, &Request::get(url("index.html")))
                    .await,
                Err(Error::StoreNotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn activate_with_nothing_stale_still_claims() {
        let controller = controller_with(MemoryCacheStorage::new(), MockNetwork::new());
        assert!(controller.activate().await.unwrap().is_empty());
        assert_eq!(controller.host().claims.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn activate_on_disk_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.open("atelier-v1").await.unwrap();
        storage.open("atelier-v3").await.unwrap();
        let controller = controller_with(storage, MockNetwork::new());

        assert_eq!(controller.activate().await.unwrap(), vec!["atelier-v1"]);
        assert_eq!(controller.storage().keys().await.unwrap(), vec!["atelier-v3"]);
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    #[tokio::test]
    async fn excluded_urls_never_touch_the_store() {
        let controller =
            controller_with(CountingStorage::new(MemoryCacheStorage::new()), MockNetwork::new());
        let font = Url::parse("https://fonts.gstatic.com/s/inter/v12/font.woff2").unwrap();

        let outcome = controller.fetch(Request::get(font.clone())).await;
        assert!(matches!(&outcome, FetchOutcome::Passthrough(r) if r.url == font));
        assert_eq!(controller.storage().calls(), 0);
        assert_eq!(controller.network().calls(), 0);
    }

    #[tokio::test]
    async fn post_is_never_intercepted() {
        let controller =
            controller_with(CountingStorage::new(MemoryCacheStorage::new()), full_network());
        let request = Request::new(Method::POST, url("index.html")).with_body("form=1");

        let outcome = controller.fetch(request).await;
        assert!(matches!(&outcome, FetchOutcome::Passthrough(r) if r.method == Method::POST));
        controller.settle().await;
        assert_eq!(controller.storage().calls(), 0);
    }

    #[tokio::test]
    async fn miss_then_hit_without_network() {
        let network = MockNetwork::new();
        network.serve("icons/logo.png", "PNG");
        let controller = controller_with(MemoryCacheStorage::new(), network);
        let target = url("icons/logo.png");

        let first = controller.fetch(Request::get(target.clone())).await;
        let FetchOutcome::Network(response) = first else {
            panic!("expected a network response");
        };
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"PNG");

        controller.settle().await;
        controller.network().set_offline(true);

        let second = controller.fetch(Request::get(target.clone())).await;
        let FetchOutcome::Cached(cached) = second else {
            panic!("expected a cached response");
        };
        assert_eq!(cached.status, StatusCode::OK);
        assert_eq!(cached.body, response.body);
        assert_eq!(controller.network().calls_for(&target), 1);
    }

    #[tokio::test]
    async fn hit_is_served_without_freshness_check() {
        let controller = controller_with(MemoryCacheStorage::new(), full_network());
        controller.install().await.unwrap();
        let before = controller.network().calls();

        let outcome = controller.fetch(Request::get(url("styles.css"))).await;
        assert!(matches!(outcome, FetchOutcome::Cached(_)));
        assert_eq!(controller.network().calls(), before);
    }

    #[tokio::test]
    async fn opaque_response_is_returned_but_not_stored() {
        let network = MockNetwork::new();
        let cdn = Url::parse("https://cdn.example/lib.js").unwrap();
        network.serve_response(
            cdn.clone(),
            Response::new(StatusCode::OK, "lib()").with_kind(ResponseType::Opaque),
        );
        let controller = controller_with(MemoryCacheStorage::new(), network);

        let outcome = controller.fetch(Request::get(cdn.clone())).await;
        assert_eq!(outcome.response().map(|r| r.kind), Some(ResponseType::Opaque));
        controller.settle().await;

        assert!(matches!(
            controller.storage().entries("atelier-v3").await,
            Err(Error::StoreNotFound(_))
        ));
        assert!(matches!(controller.fetch(Request::get(cdn)).await, FetchOutcome::Network(_)));
        assert_eq!(controller.network().calls(), 2);
    }

    #[tokio::test]
    async fn error_and_redirected_responses_are_not_stored() {
        let network = MockNetwork::new();
        network.serve_response(url("missing.css"), Response::new(StatusCode::NOT_FOUND, "nope"));
        network.serve_response(
            url("moved.css"),
            Response::new(StatusCode::OK, "body{}").with_redirected(true),
        );
        let controller = controller_with(MemoryCacheStorage::new(), network);
        controller.storage().open("atelier-v3").await.unwrap();

        let missing = controller.fetch(Request::get(url("missing.css"))).await;
        assert_eq!(missing.response().map(|r| r.status), Some(StatusCode::NOT_FOUND));
        let moved = controller.fetch(Request::get(url("moved.css"))).await;
        assert!(moved.response().is_some_and(|r| r.redirected));

        controller.settle().await;
        assert!(controller.storage().entries("atelier-v3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn network_failure_is_swallowed() {
        let network = MockNetwork::new();
        network.set_offline(true);
        let controller = controller_with(MemoryCacheStorage::new(), network);

        let outcome = controller.fetch(Request::get(url("page.html"))).await;
        assert_eq!(outcome, FetchOutcome::Failed);
        assert!(outcome.into_response().is_none());
    }

    #[tokio::test]
    async fn fetch_fills_current_store_only() {
        let storage = MemoryCacheStorage::new();
        storage.open("atelier-v1").await.unwrap();
        let network = MockNetwork::new();
        network.serve("extra.js", "extra()");
        let controller = controller_with(storage, network);

        controller.fetch(Request::get(url("extra.js"))).await;
        controller.settle().await;

        assert!(controller.storage().entries("atelier-v1").await.unwrap().is_empty());
        assert_eq!(controller.storage().entries("atelier-v3").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_fetches_store_every_key() {
        let network = MockNetwork::new();
        let paths = ["a.js", "b.js", "c.js", "d.js", "e.js"];
        for path in paths {
            network.serve(path, "x");
        }
        let controller = controller_with(MemoryCacheStorage::new(), network);

        let outcomes = join_all(paths.iter().map(|p| controller.fetch(Request::get(url(p))))).await;
        assert!(outcomes.iter().all(|o| matches!(o, FetchOutcome::Network(_))));
        controller.settle().await;

        assert_eq!(
            controller.storage().entries("atelier-v3").await.unwrap().len(),
            paths.len()
        );
    }

    // =========================================================================
    // Messages
    // =========================================================================

    #[tokio::test]
    async fn skip_waiting_message_triggers_once_per_message() {
        let controller = controller_with(MemoryCacheStorage::new(), MockNetwork::new());
        assert!(controller.handle_message(&json!({"type": "SKIP_WAITING"})));
        assert!(controller.handle_message_str(r#"{"type":"SKIP_WAITING"}"#));
        assert_eq!(controller.host().skip_waiting.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_messages_are_ignored() {
        let controller = controller_with(MemoryCacheStorage::new(), MockNetwork::new());
        assert!(!controller.handle_message(&json!({"type": "PING"})));
        assert!(!controller.handle_message(&json!({"kind": "SKIP_WAITING"})));
        assert!(!controller.handle_message(&json!(42)));
        assert!(!controller.handle_message_str("SKIP_WAITING"));
        assert_eq!(controller.host().skip_waiting.load(Ordering::SeqCst), 0);
        assert_eq!(controller.host().claims.load(Ordering::SeqCst), 0);
    }
}
