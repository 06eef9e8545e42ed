//! Application load balancer subsystem.
//!
//! # Data Flow
//! ```text
//! GatewayConfig
//!     → build_runtime(): backends resolved to ReverseProxy handlers
//!     → health targets registered (probe loops live before return)
//!     → Pool built from (handler, Status) pairs + healthy_floor
//!     → mechanism constructed by the registry, given the pool
//!     → AlbRuntime { mechanism, checker }
//!
//! Per request: mechanism reads the pool's healthy snapshot (one
//! atomic load) and executes its strategy; exactly one response
//! reaches the client.
//! ```
//!
//! # Design Decisions
//! - Mechanisms are trait objects behind `Arc`, swapped wholesale on
//!   config reload; the old runtime is stopped after the swap
//! - The registry and provider registry are built once at startup and
//!   injected, never global

pub mod capture;
pub mod claim;
pub mod mech;
pub mod pool;
pub mod registry;

pub use capture::{CapturePool, CaptureSet, ResponseCapture};
pub use claim::ResponderClaim;
pub use pool::{Pool, Target};
pub use registry::MechanismRegistry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, GatewayConfig};
use crate::health::HealthChecker;
use crate::proxy::{Authenticator, Handler, ReverseProxy, SharedHandler};
use crate::timeseries::ProviderRegistry;

/// Identity of a registered mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismId {
    RoundRobin,
    FirstResponse,
    FirstGoodResponse,
    NewestLastModified,
    TimeSeriesMerge,
    UserRouter,
}

/// A load balancing strategy. Every mechanism is also a plain
/// `Handler`; the extra surface exists for construction and teardown.
pub trait Mechanism: Handler {
    fn id(&self) -> MechanismId;

    fn name(&self) -> &'static str;

    /// Attach the pool. Called exactly once, before the mechanism
    /// starts serving.
    fn set_pool(&mut self, pool: Arc<Pool>);

    /// Stop the pool's background rebuild task.
    fn stop_pool(&self);
}

/// Everything a mechanism constructor may draw on.
pub struct FactoryContext<'a> {
    pub config: &'a crate::config::AlbConfig,
    pub backends: &'a HashMap<String, SharedHandler>,
    pub providers: &'a ProviderRegistry,
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

/// One generation of the load balancer: a live mechanism plus the
/// health checker probing its backends. Replaced wholesale on reload.
pub struct AlbRuntime {
    mechanism: Arc<dyn Mechanism>,
    checker: Arc<HealthChecker>,
}

impl std::fmt::Debug for AlbRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlbRuntime").finish_non_exhaustive()
    }
}

impl AlbRuntime {
    pub fn mechanism(&self) -> Arc<dyn Mechanism> {
        self.mechanism.clone()
    }

    pub fn checker(&self) -> Arc<HealthChecker> {
        self.checker.clone()
    }

    /// Stop this generation: the pool's rebuild task first, then every
    /// probe loop.
    pub async fn stop(&self) {
        self.mechanism.stop_pool();
        self.checker.shutdown().await;
    }
}

/// Construct a complete runtime from a validated configuration.
pub async fn build_runtime(
    config: &GatewayConfig,
    registry: &MechanismRegistry,
    providers: &ProviderRegistry,
    authenticator: Option<Arc<dyn Authenticator>>,
) -> Result<AlbRuntime, ConfigError> {
    let entry = registry
        .resolve(&config.alb.mechanism)
        .ok_or_else(|| ConfigError::UnknownMechanism {
            name: config.alb.mechanism.clone(),
            known: registry.known_names().join(", "),
        })?;

    let timeout = Duration::from_secs(config.listener.request_timeout_secs.max(1));
    let mut backends: HashMap<String, SharedHandler> = HashMap::new();
    for b in &config.backends {
        let proxy = ReverseProxy::new(&b.name, &b.origin_url, timeout)?;
        backends.insert(b.name.clone(), Arc::new(proxy));
    }

    let checker = HealthChecker::new();
    for b in &config.backends {
        if !b.health_check.enabled {
            continue;
        }
        let opts = b.health_check.probe_options(&b.name)?;
        checker
            .register(&b.name, &b.description, &b.origin_url, opts)
            .await?;
    }

    let ctx = FactoryContext {
        config: &config.alb,
        backends: &backends,
        providers,
        authenticator,
    };
    let mut mechanism = entry.build(&ctx)?;

    // the user router selects targets by username and carries no pool
    if entry.id != MechanismId::UserRouter {
        let mut targets = Vec::with_capacity(config.alb.pool.len());
        for name in &config.alb.pool {
            let handler = backends
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownPoolMember(name.clone()))?;
            targets.push(Target::new(handler, checker.status(name)));
        }
        let pool = Pool::new(targets, config.alb.healthy_floor);
        mechanism.set_pool(pool);
    }

    tracing::info!(
        mechanism = mechanism.name(),
        pool_size = config.alb.pool.len(),
        healthy_floor = config.alb.healthy_floor,
        "Load balancer runtime built"
    );

    Ok(AlbRuntime {
        mechanism: Arc::from(mechanism),
        checker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, HealthCheckConfig};

    fn config(mechanism: &str, pool: &[&str]) -> GatewayConfig {
        let mut cfg = GatewayConfig::default();
        cfg.backends = pool
            .iter()
            .map(|name| BackendConfig {
                name: name.to_string(),
                origin_url: "http://127.0.0.1:1".to_string(),
                description: String::new(),
                health_check: HealthCheckConfig {
                    // keep probe loops quiet during the test
                    interval_secs: 3600,
                    ..Default::default()
                },
            })
            .collect();
        cfg.alb.mechanism = mechanism.to_string();
        cfg.alb.pool = pool.iter().map(|s| s.to_string()).collect();
        cfg
    }

    #[tokio::test]
    async fn test_build_runtime_round_robin() {
        let cfg = config("rr", &["b1", "b2"]);
        let runtime = build_runtime(
            &cfg,
            &MechanismRegistry::new(),
            &ProviderRegistry::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(runtime.mechanism().id(), MechanismId::RoundRobin);
        assert!(runtime.checker().status("b1").is_some());
        runtime.stop().await;
        assert!(runtime.checker().status("b1").is_none());
    }

    #[tokio::test]
    async fn test_unknown_mechanism_is_fatal() {
        let cfg = config("least_conn", &["b1"]);
        let err = build_runtime(
            &cfg,
            &MechanismRegistry::new(),
            &ProviderRegistry::new(),
            None,
        )
        .await
        .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, ConfigError::UnknownMechanism { .. }));
        // the error names every valid mechanism
        assert!(msg.contains("least_conn") && msg.contains("round_robin") && msg.contains("tsm"));
    }

    #[tokio::test]
    async fn test_unknown_pool_member_is_fatal() {
        let mut cfg = config("rr", &["b1"]);
        cfg.alb.pool.push("ghost".to_string());
        let err = build_runtime(
            &cfg,
            &MechanismRegistry::new(),
            &ProviderRegistry::new(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPoolMember(_)));
    }
}
