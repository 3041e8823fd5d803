//! offline-cache - An offline-first asset cache controller.
//!
//! The controller pre-caches a fixed manifest of application assets into a
//! versioned store when a version installs, removes stores left by older
//! versions when it activates, and answers eligible requests cache-first,
//! falling back to the network and filling the store as it goes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use offline_cache::{
//!     AssetCacheController, ControllerConfig, DiskCacheStorage, HttpNetwork, NetworkConfig,
//!     Registration, Request,
//! };
//!
//! # async fn example() -> offline_cache::Result<()> {
//! let config = ControllerConfig::new().with_scope("https://app.example/");
//! let network = HttpNetwork::new(config.scope_url()?, &NetworkConfig::default())?;
//! let registration = Arc::new(Registration::new());
//! let controller = AssetCacheController::new(
//!     config,
//!     Arc::new(DiskCacheStorage::new("/var/cache/app")),
//!     Arc::new(network),
//!     Arc::clone(&registration),
//! );
//!
//! registration.run_install(&controller).await?;
//! registration.run_activate(&controller).await?;
//!
//! let request = Request::get("https://app.example/styles.css".parse().unwrap());
//! let outcome = controller.fetch(request).await;
//! println!("served: {}", outcome.response().is_some());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod controller;
pub mod error;
pub mod format;
pub mod host;
pub mod message;
pub mod network;
pub mod request;
#[cfg(feature = "server")]
pub mod server;
pub mod store;

// Re-export main types for convenience
pub use config::{AppConfig, ControllerConfig, NetworkConfig};
pub use controller::{AssetCacheController, FetchOutcome, InstallReport};
pub use error::{Error, Result};
pub use format::{format_age, format_bytes};
pub use host::{Host, Registration, WorkerState};
pub use message::ControlMessage;
pub use network::{HttpNetwork, Network};
pub use request::{Request, RequestKey, Response, ResponseType};
pub use store::{CacheEntry, CacheStorage, DiskCacheStorage, MemoryCacheStorage};
