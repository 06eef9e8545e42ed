//! Health target registry and lifecycle.
//!
//! # Responsibilities
//! - Register/unregister probe targets by backend name
//! - Guarantee a registered target's probe loop is live before
//!   `register` returns
//! - Provide the name → Status map consumed by Pool construction

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigError;
use crate::health::status::Status;
use crate::health::target::{ProbeOptions, Prober};

struct RegisteredTarget {
    prober: Arc<Prober>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RegisteredTarget {
    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Registry of health check targets.
#[derive(Default)]
pub struct HealthChecker {
    targets: DashMap<String, RegisteredTarget>,
}

impl HealthChecker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a target, replacing (and stopping) any prior target of
    /// the same name. Returns once the new probe loop is confirmed
    /// running, so the returned `Status` reflects an actively-probed
    /// target.
    pub async fn register(
        &self,
        name: &str,
        description: &str,
        origin_url: &str,
        opts: ProbeOptions,
    ) -> Result<Arc<Status>, ConfigError> {
        let prober = Prober::new(name, description, origin_url, opts)?;
        if let Some((_, old)) = self.targets.remove(name) {
            old.stop().await;
        }
        let cancel = CancellationToken::new();
        let (started_tx, mut started_rx) = watch::channel(false);
        let handle = tokio::spawn(prober.clone().run_loop(cancel.clone(), started_tx));
        while !*started_rx.borrow() {
            if started_rx.changed().await.is_err() {
                break;
            }
        }
        let status = prober.status();
        tracing::debug!(target_name = %name, "Health check target registered");
        self.targets
            .insert(name.to_string(), RegisteredTarget { prober, cancel, handle });
        Ok(status)
    }

    /// Stop and remove one target.
    pub async fn unregister(&self, name: &str) {
        if let Some((_, t)) = self.targets.remove(name) {
            t.stop().await;
            tracing::debug!(target_name = %name, "Health check target unregistered");
        }
    }

    /// Stop every target, then signal all status subscribers so
    /// dependent tasks (e.g. a previous generation's pool) observe the
    /// final state.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.targets.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, t)) = self.targets.remove(&name) {
                let status = t.prober.status();
                t.stop().await;
                status.notify_subscribers();
            }
        }
        tracing::info!("Health checker shut down");
    }

    /// Status for one backend, if registered.
    pub fn status(&self, name: &str) -> Option<Arc<Status>> {
        self.targets.get(name).map(|t| t.prober.status())
    }

    /// The full name → Status map, for pool construction.
    pub fn statuses(&self) -> HashMap<String, Arc<Status>> {
        self.targets
            .iter()
            .map(|e| (e.key().clone(), e.value().prober.status()))
            .collect()
    }

    /// The prober for one backend, for demand-probe endpoints.
    pub fn prober(&self, name: &str) -> Option<Arc<Prober>> {
        self.targets.get(name).map(|t| t.prober.clone())
    }
}
