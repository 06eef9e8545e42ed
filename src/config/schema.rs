//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config
//! files, and every field has a default so minimal configs work.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};

use crate::config::loader::ConfigError;
use crate::health::ProbeOptions;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Backend origin definitions.
    pub backends: Vec<BackendConfig>,

    /// Load balancer configuration.
    pub alb: AlbConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8480").
    pub bind_address: String,

    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,

    /// Total request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8480".to_string(),
            max_body_bytes: 16 * 1024 * 1024,
            request_timeout_secs: 30,
        }
    }
}

/// Backend origin configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub name: String,

    /// Origin base URL (e.g., "http://prom1:9090").
    pub origin_url: String,

    /// Optional human-readable description, surfaced on the health
    /// endpoint.
    #[serde(default)]
    pub description: String,

    /// Active health check settings for this backend.
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,

    /// HTTP method for the probe.
    pub verb: String,

    /// Path to probe on the origin.
    pub path: String,

    /// Extra headers sent with each probe.
    pub headers: BTreeMap<String, String>,

    /// Optional probe request body.
    pub body: Option<String>,

    /// Status codes considered passing (default: 200).
    pub expected_codes: Vec<u16>,

    /// Response headers required for a passing probe.
    pub expected_headers: BTreeMap<String, String>,

    /// Exact response body required for a passing probe.
    pub expected_body: Option<String>,

    /// Consecutive failures before marking failing.
    pub failure_threshold: u32,

    /// Consecutive successes before marking passing.
    pub recovery_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            verb: "GET".to_string(),
            path: "/health".to_string(),
            headers: BTreeMap::new(),
            body: None,
            expected_codes: Vec::new(),
            expected_headers: BTreeMap::new(),
            expected_body: None,
            failure_threshold: 3,
            recovery_threshold: 3,
        }
    }
}

fn parse_headers(backend: &str, map: &BTreeMap<String, String>) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    for (k, v) in map {
        let name = HeaderName::from_bytes(k.as_bytes()).map_err(|_| {
            ConfigError::Invalid(format!("invalid header name [{k}] for backend [{backend}]"))
        })?;
        let value = HeaderValue::from_str(v).map_err(|_| {
            ConfigError::Invalid(format!("invalid header value for [{k}] in backend [{backend}]"))
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

impl HealthCheckConfig {
    /// Convert to probe options for the named backend.
    pub fn probe_options(&self, backend: &str) -> Result<ProbeOptions, ConfigError> {
        let verb = Method::from_bytes(self.verb.as_bytes()).map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid health check verb [{}] for backend [{backend}]",
                self.verb
            ))
        })?;
        Ok(ProbeOptions {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            verb,
            path: self.path.clone(),
            headers: parse_headers(backend, &self.headers)?,
            body: self.body.clone(),
            expected_codes: self.expected_codes.clone(),
            expected_headers: parse_headers(backend, &self.expected_headers)?,
            expected_body: self.expected_body.clone(),
            failure_threshold: self.failure_threshold,
            recovery_threshold: self.recovery_threshold,
        })
    }
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlbConfig {
    /// Mechanism name, short or long form (e.g., "rr" or
    /// "round_robin").
    pub mechanism: String,

    /// Backend names forming the pool.
    pub pool: Vec<String>,

    /// Minimum health status for pool membership: -1 admits every
    /// target, 0 excludes known-failing, 1 admits only known-passing.
    pub healthy_floor: i32,

    /// Time-series output format for the merge mechanism.
    pub output_format: Option<String>,

    /// Status codes eligible to win under first-good-response. Empty
    /// means any status below 400.
    pub fgr_status_codes: Option<Vec<u16>>,

    /// Maximum simultaneous upstream requests during a merge fanout.
    pub concurrency_limit: Option<usize>,

    /// User routing table for the user-router mechanism.
    pub user_router: Option<UserRouterConfig>,
}

impl Default for AlbConfig {
    fn default() -> Self {
        Self {
            mechanism: "rr".to_string(),
            pool: Vec::new(),
            healthy_floor: 0,
            output_format: None,
            fgr_status_codes: None,
            concurrency_limit: None,
            user_router: None,
        }
    }
}

/// User-router configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UserRouterConfig {
    /// Backend for users with no explicit route. Empty rejects
    /// unmatched users with `no_route_status_code`.
    pub default_backend: Option<String>,

    /// Canned status served to unmatched users when no default backend
    /// is configured. One of 400, 401, 404, 500, 502.
    pub no_route_status_code: u16,

    /// Replace the inbound credential with the route's credential when
    /// the user was verified by the authenticator.
    pub replace_credentials: bool,

    /// Per-user routes.
    pub users: Vec<UserRouteConfig>,
}

impl Default for UserRouterConfig {
    fn default() -> Self {
        Self {
            default_backend: None,
            no_route_status_code: 401,
            replace_credentials: false,
            users: Vec::new(),
        }
    }
}

/// One user route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserRouteConfig {
    /// Inbound username to match.
    pub username: String,

    /// Username to substitute upstream. Empty keeps the inbound name.
    #[serde(default)]
    pub to_user: String,

    /// Credential to substitute upstream.
    #[serde(default)]
    pub to_credential: String,

    /// Backend to route this user to.
    pub to_backend: String,
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level filter (e.g., "info", "tsgate=debug").
    pub log_level: String,

    /// Expose Prometheus metrics.
    pub metrics_enabled: bool,

    /// Metrics exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9480".to_string(),
        }
    }
}
