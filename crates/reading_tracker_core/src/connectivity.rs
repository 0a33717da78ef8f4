//! crates/reading_tracker_core/src/connectivity.rs
//!
//! Tracks online/offline transitions reported by the host and gates every
//! network-optional operation on them.

use serde::Serialize;
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The outcome of an operation that needs the network.
///
/// `Offline` is a deliberate skip, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Gated<T> {
    Ready(T),
    Offline,
}

impl<T> Gated<T> {
    pub fn is_offline(&self) -> bool {
        matches!(self, Gated::Offline)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Gated::Ready(value) => Some(value),
            Gated::Offline => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Gated<U> {
        match self {
            Gated::Ready(value) => Gated::Ready(f(value)),
            Gated::Offline => Gated::Offline,
        }
    }
}

/// A single boolean reachability signal. Purely event-driven.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    online: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self { online }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Records an `online`/`offline` transition event. Repeated events are ignored.
    pub fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return;
        }
        if online {
            info!("Connectivity restored.");
        } else {
            warn!("Connectivity lost. Network operations will be skipped.");
        }
    }

    /// Watches transitions; the receiver sees the current value immediately.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Runs `op` only if the signal currently reads online.
    ///
    /// The signal is read before the future is created, so nothing touches the
    /// network while offline.
    pub async fn when_online<F, Fut, T>(&self, operation: &str, op: F) -> Gated<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.is_online() {
            debug!("Offline: skipping {}", operation);
            return Gated::Offline;
        }
        Gated::Ready(op().await)
    }
}
