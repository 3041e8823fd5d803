//! Lifecycle instructions sent to the host, and an in-process host that
//! tracks the registration state machine.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio::sync::Notify;

use crate::controller::{AssetCacheController, InstallReport};
use crate::error::{Error, Result};
use crate::network::Network;
use crate::store::CacheStorage;

/// Outbound control signals. Both are fire-and-forget.
pub trait Host: Send + Sync {
    /// Make the installed version eligible for activation without waiting
    /// for pages controlled by an older version to close.
    fn skip_waiting(&self);

    /// Route every open client through the active version immediately.
    fn claim_clients(&self);

    /// Returns true once this version may intercept fetches. Hosts that do
    /// not track a lifecycle are always active.
    fn is_active(&self) -> bool {
        true
    }
}

/// Registration lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Registered, not yet installed.
    Parsed,
    /// Install handler running.
    Installing,
    /// Installed and waiting to activate.
    Installed,
    /// Activate handler running.
    Activating,
    /// Active; fetch events may be dispatched.
    Activated,
    /// Install failed or the version was replaced.
    Redundant,
}

impl WorkerState {
    /// Returns true if fetch events may be dispatched.
    #[must_use]
    pub const fn can_intercept(self) -> bool {
        matches!(self, Self::Activated)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsed => write!(f, "parsed"),
            Self::Installing => write!(f, "installing"),
            Self::Installed => write!(f, "installed"),
            Self::Activating => write!(f, "activating"),
            Self::Activated => write!(f, "activated"),
            Self::Redundant => write!(f, "redundant"),
        }
    }
}

/// In-process [`Host`] that sequences install and activate for one version.
///
/// Activation waits until either [`Host::skip_waiting`] was called or no
/// client is still held by a previous version.
#[derive(Debug)]
pub struct Registration {
    state: RwLock<WorkerState>,
    skip_requested: AtomicBool,
    skip_waiting_calls: AtomicU64,
    claim_calls: AtomicU64,
    previous_clients: AtomicUsize,
    wake: Notify,
}

impl Default for Registration {
    fn default() -> Self {
        Self::new()
    }
}

impl Registration {
    /// Creates a registration with no clients held by older versions.
    #[must_use]
    pub fn new() -> Self {
        Self::with_previous_clients(0)
    }

    /// Creates a registration where `clients` pages are still controlled by
    /// an older version.
    #[must_use]
    pub fn with_previous_clients(clients: usize) -> Self {
        Self {
            state: RwLock::new(WorkerState::Parsed),
            skip_requested: AtomicBool::new(false),
            skip_waiting_calls: AtomicU64::new(0),
            claim_calls: AtomicU64::new(0),
            previous_clients: AtomicUsize::new(clients),
            wake: Notify::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WorkerState) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *guard != state {
            log::info!("Registration {} -> {state}", *guard);
            *guard = state;
        }
    }

    /// Moves `from` to `to` under one lock, failing if another step got
    /// there first.
    fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *guard != from {
            return Err(Error::Lifecycle(format!("cannot move to {to} from state {}", *guard)));
        }
        log::info!("Registration {from} -> {to}");
        *guard = to;
        Ok(())
    }

    /// Number of skip-waiting instructions received.
    #[must_use]
    pub fn skip_waiting_calls(&self) -> u64 {
        self.skip_waiting_calls.load(Ordering::SeqCst)
    }

    /// Number of claim instructions received.
    #[must_use]
    pub fn claim_calls(&self) -> u64 {
        self.claim_calls.load(Ordering::SeqCst)
    }

    /// Records that a page held by an older version closed.
    pub fn release_client(&self) {
        let _ = self
            .previous_clients
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.wake.notify_waiters();
    }

    fn may_activate(&self) -> bool {
        self.skip_requested.load(Ordering::SeqCst)
            || self.previous_clients.load(Ordering::SeqCst) == 0
    }

    /// Runs the install handler. A failure leaves the registration redundant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lifecycle`] if install already ran, or the install error.
    pub async fn run_install<S, N>(
        &self,
        controller: &AssetCacheController<S, N, Self>,
    ) -> Result<InstallReport>
    where
        S: CacheStorage + 'static,
        N: Network + 'static,
    {
        self.transition(WorkerState::Parsed, WorkerState::Installing)?;
        match controller.install().await {
            Ok(report) => {
                self.set_state(WorkerState::Installed);
                Ok(report)
            }
            Err(e) => {
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Waits until activation is allowed, then runs the activate handler.
    /// Returns the identifiers of deleted stores. A failed activate leaves
    /// the registration installed so it can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lifecycle`] unless the registration is installed, or
    /// the activate error.
    pub async fn run_activate<S, N>(
        &self,
        controller: &AssetCacheController<S, N, Self>,
    ) -> Result<Vec<String>>
    where
        S: CacheStorage + 'static,
        N: Network + 'static,
    {
        let state = self.state();
        if state != WorkerState::Installed {
            return Err(Error::Lifecycle(format!("cannot activate from state {state}")));
        }

        loop {
            let woken = self.wake.notified();
            if self.may_activate() {
                break;
            }
            log::info!("Waiting for older clients to close before activating");
            woken.await;
        }

        self.transition(WorkerState::Installed, WorkerState::Activating)?;
        match controller.activate().await {
            Ok(deleted) => {
                self.set_state(WorkerState::Activated);
                Ok(deleted)
            }
            Err(e) => {
                log::warn!("Activate failed: {e}");
                self.set_state(WorkerState::Installed);
                Err(e)
            }
        }
    }
}

impl Host for Registration {
    fn skip_waiting(&self) {
        self.skip_waiting_calls.fetch_add(1, Ordering::SeqCst);
        self.skip_requested.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    fn claim_clients(&self) {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        self.previous_clients.store(0, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.state().can_intercept()
    }
}
