//! Target pool with lock-free healthy snapshots.
//!
//! # Data Flow
//! ```text
//! Health Target flips Status
//!     → subscriber channel signal
//!     → check_health task wakes
//!     → drain queued signals (coalesce)
//!     → refresh_healthy(): one pass builds both views
//!     → atomic store of healthy_handlers / healthy_targets
//!
//! Request hot path: one atomic load, no locks
//! ```
//!
//! # Design Decisions
//! - Both healthy views are rebuilt together, so readers always see a
//!   consistent pair of snapshots
//! - healthy_floor: -1 always-available, 0 fail-open on Unknown,
//!   1 strictly-healthy-only

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::health::Status;
use crate::proxy::SharedHandler;

/// Immutable pairing of a backend handler and its health status. A
/// target without a status is treated as Unknown (0).
#[derive(Clone)]
pub struct Target {
    pub handler: SharedHandler,
    pub status: Option<Arc<Status>>,
}

impl Target {
    pub fn new(handler: SharedHandler, status: Option<Arc<Status>>) -> Self {
        Self { handler, status }
    }

    fn current_status(&self) -> i32 {
        self.status.as_ref().map(|s| s.get()).unwrap_or(0)
    }
}

/// The authoritative target list plus two atomically-swapped healthy
/// views.
pub struct Pool {
    targets: Vec<Target>,
    healthy_floor: i32,
    healthy_handlers: ArcSwap<Vec<SharedHandler>>,
    healthy_targets: ArcSwap<Vec<Target>>,
    cancel: CancellationToken,
}

impl Pool {
    /// Build a pool, subscribe it to every target's status, compute
    /// the initial snapshot, and start the background rebuild task.
    pub fn new(targets: Vec<Target>, healthy_floor: i32) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(32);
        for t in &targets {
            if let Some(status) = &t.status {
                status.subscribe(tx.clone());
            }
        }
        let pool = Arc::new(Self {
            targets,
            healthy_floor,
            healthy_handlers: ArcSwap::from_pointee(Vec::new()),
            healthy_targets: ArcSwap::from_pointee(Vec::new()),
            cancel: CancellationToken::new(),
        });
        pool.refresh_healthy();
        tokio::spawn(Self::check_health(pool.clone(), rx));
        pool
    }

    /// The single authoritative rebuild: a target is available iff its
    /// status is at or above the healthy floor.
    pub fn refresh_healthy(&self) {
        let mut handlers = Vec::with_capacity(self.targets.len());
        let mut targets = Vec::with_capacity(self.targets.len());
        for t in &self.targets {
            if let Some(status) = &t.status {
                crate::observability::metrics::record_backend_health(status.name(), status.get());
            }
            if t.current_status() >= self.healthy_floor {
                handlers.push(t.handler.clone());
                targets.push(t.clone());
            }
        }
        tracing::debug!(
            healthy = handlers.len(),
            total = self.targets.len(),
            floor = self.healthy_floor,
            "Pool healthy snapshot refreshed"
        );
        self.healthy_handlers.store(Arc::new(handlers));
        self.healthy_targets.store(Arc::new(targets));
    }

    async fn check_health(self: Arc<Self>, mut rx: mpsc::Receiver<()>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                signal = rx.recv() => {
                    if signal.is_none() {
                        return;
                    }
                    // coalesce queued signals into one rebuild
                    while rx.try_recv().is_ok() {}
                    self.refresh_healthy();
                }
            }
        }
    }

    /// Current healthy handlers, one atomic load.
    pub fn healthy_handlers(&self) -> Arc<Vec<SharedHandler>> {
        self.healthy_handlers.load_full()
    }

    /// Current healthy targets, one atomic load.
    pub fn healthy_targets(&self) -> Arc<Vec<Target>> {
        self.healthy_targets.load_full()
    }

    /// All targets, regardless of health.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// End the background rebuild task. Targets are owned and stopped
    /// by the health checker, not the pool.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
