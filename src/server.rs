//! Offline proxy: serves the web application through the controller.
//!
//! Every incoming request is mapped onto the controller scope and handed
//! to [`AssetCacheController::fetch`]. Control messages are accepted on
//! `POST /__offline/message`.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::controller::{AssetCacheController, FetchOutcome};
use crate::error::{Error, Result};
use crate::host::{Host, Registration};
use crate::network::{HttpNetwork, Network};
use crate::request::{Request, Response};
use crate::store::{CacheStorage, DiskCacheStorage};

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Headers that describe one hop and are never forwarded.
const HOP_HEADERS: &[header::HeaderName] = &[
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

type Shared<S, N, H> = Arc<AssetCacheController<S, N, H>>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    cache: String,
}

#[derive(Serialize)]
struct MessageResponse {
    handled: bool,
}

async fn health<S, N, H>(State(controller): State<Shared<S, N, H>>) -> impl IntoResponse
where
    S: CacheStorage + 'static,
    N: Network + 'static,
    H: Host + 'static,
{
    axum::Json(HealthResponse {
        status: "ok",
        cache: controller.cache_name().to_string(),
    })
}

async fn message<S, N, H>(
    State(controller): State<Shared<S, N, H>>,
    body: Bytes,
) -> impl IntoResponse
where
    S: CacheStorage + 'static,
    N: Network + 'static,
    H: Host + 'static,
{
    let handled = std::str::from_utf8(&body).is_ok_and(|raw| controller.handle_message_str(raw));
    (StatusCode::ACCEPTED, axum::Json(MessageResponse { handled }))
}

async fn proxy<S, N, H>(
    State(controller): State<Shared<S, N, H>>,
    incoming: axum::extract::Request,
) -> HttpResponse
where
    S: CacheStorage + 'static,
    N: Network + 'static,
    H: Host + 'static,
{
    let request = match to_request(controller.config().scope_url(), incoming).await {
        Ok(request) => request,
        Err(e) => {
            log::warn!("Rejected request: {e}");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    // Until the version activates, requests go straight to the network.
    let outcome = if controller.host().is_active() {
        controller.fetch(request).await
    } else {
        FetchOutcome::Passthrough(request)
    };

    match outcome {
        FetchOutcome::Cached(response) | FetchOutcome::Network(response) => to_http(response),
        FetchOutcome::Passthrough(request) => match controller.network().fetch(&request).await {
            Ok(response) => to_http(response),
            Err(e) => {
                log::warn!("Passthrough failed for {}: {e}", request.url);
                StatusCode::BAD_GATEWAY.into_response()
            }
        },
        FetchOutcome::Failed => StatusCode::GATEWAY_TIMEOUT.into_response(),
    }
}

/// Maps an incoming request onto the scope.
async fn to_request(
    scope: Result<reqwest::Url>,
    incoming: axum::extract::Request,
) -> Result<Request> {
    let scope = scope?;
    let (parts, body) = incoming.into_parts();
    let relative = parts
        .uri
        .path_and_query()
        .map_or("", |pq| pq.as_str())
        .trim_start_matches('/');
    let url = scope
        .join(relative)
        .map_err(|e| Error::InvalidUrl(format!("{relative}: {e}")))?;

    let mut headers = parts.headers;
    for name in HOP_HEADERS {
        headers.remove(name);
    }

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| Error::network(url.as_str(), e))?;

    Ok(Request {
        method: parts.method,
        url,
        headers,
        body,
    })
}

fn to_http(response: Response) -> HttpResponse {
    let mut headers: HeaderMap = response.headers;
    for name in HOP_HEADERS {
        headers.remove(name);
    }
    (response.status, headers, response.body).into_response()
}

/// Builds the proxy router around a controller.
pub fn router<S, N, H>(controller: Shared<S, N, H>) -> Router
where
    S: CacheStorage + 'static,
    N: Network + 'static,
    H: Host + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let control = Router::new()
        .route("/__offline/health", get(health::<S, N, H>))
        .route("/__offline/message", post(message::<S, N, H>))
        .layer(cors);

    control
        .fallback(proxy::<S, N, H>)
        .with_state(controller)
}

/// Installs and activates the configured version against the disk store,
/// then serves until Ctrl-C.
///
/// # Errors
///
/// Returns an error if activate fails after a successful install, or the
/// listener cannot bind. A failed install is logged and the proxy serves
/// without a cache.
pub async fn run(config: AppConfig) -> Result<()> {
    let scope = config.controller.scope_url()?;
    let storage = Arc::new(DiskCacheStorage::new(&config.paths.store_dir));
    let network = Arc::new(HttpNetwork::new(scope, &config.network)?);
    let registration = Arc::new(Registration::new());
    let controller = Arc::new(AssetCacheController::new(
        config.controller.clone(),
        storage,
        network,
        Arc::clone(&registration),
    ));

    match registration.run_install(&controller).await {
        Ok(report) => {
            log::info!(
                "Cached {} assets ({}) into {}",
                report.entries,
                crate::format::format_bytes(report.bytes),
                report.cache_name
            );
            registration.run_activate(&controller).await?;
        }
        // The registration is redundant now; the proxy forwards everything
        // upstream without touching any store.
        Err(e) => log::error!("Install failed, serving without a cache: {e}"),
    }

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    let addr = listener.local_addr()?;
    log::info!("Serving {} on http://{addr}", config.controller.scope);

    axum::serve(listener, router(Arc::clone(&controller)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Received SIGINT");
        })
        .await?;

    controller.settle().await;
    log::info!("Shutdown complete");
    Ok(())
}
