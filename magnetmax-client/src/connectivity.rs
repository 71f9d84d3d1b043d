//! Network connectivity source.

use std::fmt::Debug;

use magnetmax_core::NetworkClass;
use tokio::sync::watch;
use tracing::info;

/// Current network class plus change notifications.
pub trait ConnectivitySource: Send + Sync + Debug {
    /// Returns the current network class.
    fn current(&self) -> NetworkClass;

    /// Subscribes to network class changes.
    fn subscribe(&self) -> watch::Receiver<NetworkClass>;
}

/// Connectivity state pushed in by the host.
///
/// The host application (or a test) reports transitions with [`set`].
///
/// [`set`]: ConnectivityMonitor::set
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<NetworkClass>,
}

impl ConnectivityMonitor {
    /// Creates a monitor starting at `initial`.
    pub fn new(initial: NetworkClass) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Records the current network class.
    ///
    /// Subscribers are only woken on an actual change; returns true if the
    /// class changed.
    pub fn set(&self, class: NetworkClass) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == class {
                false
            } else {
                *current = class;
                true
            }
        });
        if changed {
            info!(network = ?class, "Connectivity changed");
        }
        changed
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(NetworkClass::Unknown)
    }
}

impl ConnectivitySource for ConnectivityMonitor {
    fn current(&self) -> NetworkClass {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<NetworkClass> {
        self.tx.subscribe()
    }
}
