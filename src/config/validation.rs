//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (pool and user routes reference
//!   existing backends)
//! - Validate value ranges and mechanism-specific requirements
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function over GatewayConfig
//! - Runs before a config is accepted into the system, at startup and
//!   on reload

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("listener bind_address [{0}] is not a valid socket address")]
    BadBindAddress(String),

    #[error("duplicate backend name [{0}]")]
    DuplicateBackend(String),

    #[error("backend [{0}] has invalid origin_url: {1}")]
    BadOriginUrl(String, String),

    #[error("backend [{0}] health check threshold must be at least 1")]
    BadThreshold(String),

    #[error("alb mechanism name must not be empty")]
    EmptyMechanism,

    #[error("alb pool must name at least one backend")]
    EmptyPool,

    #[error("alb pool references unknown backend [{0}]")]
    UnknownPoolMember(String),

    #[error("healthy_floor must be -1, 0, or 1, got [{0}]")]
    BadHealthyFloor(i32),

    #[error("mechanism [{0}] requires alb.output_format")]
    MissingOutputFormat(String),

    #[error("mechanism [{0}] requires an [alb.user_router] table")]
    MissingUserRouter(String),

    #[error("user route for [{0}] references unknown backend [{1}]")]
    UnknownUserBackend(String, String),

    #[error("user_router default_backend [{0}] is not a configured backend")]
    UnknownDefaultBackend(String),

    #[error("user_router no_route_status_code must be one of 400, 401, 404, 500, 502, got [{0}]")]
    BadNoRouteStatus(u16),
}

const USER_ROUTER_NAMES: &[&str] = &["ur", "user_router"];
const MERGE_NAMES: &[&str] = &["tsm", "time_series_merge"];
const NO_ROUTE_STATUS_CODES: &[u16] = &[400, 401, 404, 500, 502];

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BadBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let mut names: HashSet<&str> = HashSet::new();
    for backend in &config.backends {
        if !names.insert(&backend.name) {
            errors.push(ValidationError::DuplicateBackend(backend.name.clone()));
        }
        if let Err(e) = Url::parse(&backend.origin_url) {
            errors.push(ValidationError::BadOriginUrl(
                backend.name.clone(),
                e.to_string(),
            ));
        }
        let hc = &backend.health_check;
        if hc.enabled && (hc.failure_threshold == 0 || hc.recovery_threshold == 0) {
            errors.push(ValidationError::BadThreshold(backend.name.clone()));
        }
    }

    let alb = &config.alb;
    let mechanism = alb.mechanism.as_str();
    let is_user_router = USER_ROUTER_NAMES.contains(&mechanism);

    if mechanism.is_empty() {
        errors.push(ValidationError::EmptyMechanism);
    }
    if !(-1..=1).contains(&alb.healthy_floor) {
        errors.push(ValidationError::BadHealthyFloor(alb.healthy_floor));
    }

    // the user router selects targets by username, not pool order
    if !is_user_router {
        if alb.pool.is_empty() {
            errors.push(ValidationError::EmptyPool);
        }
        for member in &alb.pool {
            if !names.contains(member.as_str()) {
                errors.push(ValidationError::UnknownPoolMember(member.clone()));
            }
        }
    }

    if MERGE_NAMES.contains(&mechanism) && alb.output_format.is_none() {
        errors.push(ValidationError::MissingOutputFormat(mechanism.to_string()));
    }

    if is_user_router {
        match &alb.user_router {
            None => errors.push(ValidationError::MissingUserRouter(mechanism.to_string())),
            Some(ur) => {
                for route in &ur.users {
                    if !names.contains(route.to_backend.as_str()) {
                        errors.push(ValidationError::UnknownUserBackend(
                            route.username.clone(),
                            route.to_backend.clone(),
                        ));
                    }
                }
                if let Some(default) = &ur.default_backend {
                    if !names.contains(default.as_str()) {
                        errors.push(ValidationError::UnknownDefaultBackend(default.clone()));
                    }
                }
                if !NO_ROUTE_STATUS_CODES.contains(&ur.no_route_status_code) {
                    errors.push(ValidationError::BadNoRouteStatus(ur.no_route_status_code));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BackendConfig, UserRouteConfig, UserRouterConfig};

    fn backend(name: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            origin_url: format!("http://{name}:9090"),
            description: String::new(),
            health_check: Default::default(),
        }
    }

    fn base_config() -> GatewayConfig {
        let mut cfg = GatewayConfig::default();
        cfg.backends = vec![backend("prom1"), backend("prom2")];
        cfg.alb.pool = vec!["prom1".to_string(), "prom2".to_string()];
        cfg
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut cfg = base_config();
        cfg.listener.bind_address = "not-an-addr".to_string();
        cfg.alb.pool.push("ghost".to_string());
        cfg.alb.healthy_floor = 5;
        let errors = validate_config(&cfg).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_duplicate_backend_rejected() {
        let mut cfg = base_config();
        cfg.backends.push(backend("prom1"));
        let errors = validate_config(&cfg).unwrap_err();
        assert!(matches!(errors[0], ValidationError::DuplicateBackend(_)));
    }

    #[test]
    fn test_merge_mechanism_requires_output_format() {
        let mut cfg = base_config();
        cfg.alb.mechanism = "tsm".to_string();
        let errors = validate_config(&cfg).unwrap_err();
        assert!(matches!(errors[0], ValidationError::MissingOutputFormat(_)));

        cfg.alb.output_format = Some("prometheus".to_string());
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_user_router_skips_pool_checks() {
        let mut cfg = base_config();
        cfg.alb.mechanism = "ur".to_string();
        cfg.alb.pool.clear();
        cfg.alb.user_router = Some(UserRouterConfig {
            default_backend: Some("prom1".to_string()),
            users: vec![UserRouteConfig {
                username: "alice".to_string(),
                to_user: String::new(),
                to_credential: String::new(),
                to_backend: "prom2".to_string(),
            }],
            ..Default::default()
        });
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_user_router_route_integrity() {
        let mut cfg = base_config();
        cfg.alb.mechanism = "user_router".to_string();
        cfg.alb.user_router = Some(UserRouterConfig {
            default_backend: Some("ghost".to_string()),
            users: vec![UserRouteConfig {
                username: "alice".to_string(),
                to_user: String::new(),
                to_credential: String::new(),
                to_backend: "ghost2".to_string(),
            }],
            ..Default::default()
        });
        let errors = validate_config(&cfg).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_no_route_status_outside_canned_set_rejected() {
        let mut cfg = base_config();
        cfg.alb.mechanism = "ur".to_string();
        cfg.alb.user_router = Some(UserRouterConfig {
            no_route_status_code: 418,
            ..Default::default()
        });
        let errors = validate_config(&cfg).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::BadNoRouteStatus(418))));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut cfg = base_config();
        cfg.backends[0].health_check.failure_threshold = 0;
        let errors = validate_config(&cfg).unwrap_err();
        assert!(matches!(errors[0], ValidationError::BadThreshold(_)));
    }
}
