//! User-router mechanism.
//!
//! Stateless per-request lookup: resolves a username either from
//! authentication results already attached to the request (verified
//! path) or by asking the configured authenticator to extract
//! credentials without verifying them. Routes the user to its mapped
//! backend, optionally substituting upstream credentials — but only
//! when the identity was positively authenticated. Unknown users fall
//! through to the default handler. No pool dependency; it shares the
//! Mechanism interface only.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{Request, Response, StatusCode};

use crate::alb::pool::Pool;
use crate::alb::{Mechanism, MechanismId};
use crate::config::{ConfigError, UserRouterConfig};
use crate::proxy::failures::StaticResponse;
use crate::proxy::{AuthStatus, Authenticator, Handler, Resources, SharedHandler};

struct UserRoute {
    to_user: String,
    to_credential: String,
    handler: SharedHandler,
}

pub struct UserRouter {
    authenticator: Option<Arc<dyn Authenticator>>,
    replace_credentials: bool,
    users: HashMap<String, UserRoute>,
    default_handler: SharedHandler,
}

impl std::fmt::Debug for UserRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRouter")
            .field("replace_credentials", &self.replace_credentials)
            .finish_non_exhaustive()
    }
}

impl UserRouter {
    pub fn new(
        config: &UserRouterConfig,
        backends: &HashMap<String, SharedHandler>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<Self, ConfigError> {
        let mut users = HashMap::with_capacity(config.users.len());
        for route in &config.users {
            let handler = backends
                .get(&route.to_backend)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownPoolMember(route.to_backend.clone()))?;
            users.insert(
                route.username.clone(),
                UserRoute {
                    to_user: route.to_user.clone(),
                    to_credential: route.to_credential.clone(),
                    handler,
                },
            );
        }
        let default_handler = match &config.default_backend {
            Some(name) => backends
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownPoolMember(name.clone()))?,
            // no default route configured: unmatched users get the
            // canned no-route status
            None => {
                let status = StatusCode::from_u16(config.no_route_status_code).map_err(|_| {
                    ConfigError::Invalid(format!(
                        "invalid no_route_status_code [{}]",
                        config.no_route_status_code
                    ))
                })?;
                Arc::new(StaticResponse(status))
            }
        };
        Ok(Self {
            authenticator,
            replace_credentials: config.replace_credentials,
            users,
            default_handler,
        })
    }

    /// Resolve `(username, verified)` for a request. A verified
    /// identity comes from upstream authentication results; the
    /// authenticator extraction path is unverified.
    fn resolve_user(&self, req: &Request<Bytes>) -> Result<Option<(String, bool)>, StatusCode> {
        if let Some(auth) = Resources::of(req).and_then(|r| r.auth.as_ref()) {
            match auth.status {
                AuthStatus::Success => return Ok(Some((auth.username.clone(), true))),
                AuthStatus::Failure => return Err(StatusCode::UNAUTHORIZED),
                AuthStatus::NotAttempted => {}
            }
        }
        if let Some(authenticator) = &self.authenticator {
            if let Some((username, _)) = authenticator.extract_credentials(req) {
                return Ok(Some((username, false)));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Handler for UserRouter {
    async fn serve(&self, mut req: Request<Bytes>) -> Response<Bytes> {
        let resolved = match self.resolve_user(&req) {
            Ok(r) => r,
            Err(status) => return crate::proxy::failures::empty_response(status),
        };
        let Some((username, verified)) = resolved else {
            return self.default_handler.serve(req).await;
        };
        let Some(route) = self.users.get(&username) else {
            tracing::debug!(user = %username, "No route for user, serving default");
            return self.default_handler.serve(req).await;
        };
        // credential substitution requires a positively-verified
        // identity; an extracted-but-unverified name must never be
        // upgraded to a stored credential
        if verified && self.replace_credentials && !route.to_credential.is_empty() {
            if let Some(authenticator) = &self.authenticator {
                let upstream_user = if route.to_user.is_empty() {
                    &username
                } else {
                    &route.to_user
                };
                authenticator.set_credentials(&mut req, upstream_user, &route.to_credential);
            }
        }
        route.handler.serve(req).await
    }
}

impl Mechanism for UserRouter {
    fn id(&self) -> MechanismId {
        MechanismId::UserRouter
    }

    fn name(&self) -> &'static str {
        "user_router"
    }

    fn set_pool(&mut self, _pool: Arc<Pool>) {}

    fn stop_pool(&self) {}
}
