//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway and health handlers
//! - Wire up middleware (tracing, timeout, request ID)
//! - Buffer request bodies so mechanisms can clone them per leg
//! - Dispatch every other request to the current mechanism

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, Request, Response, StatusCode},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::alb::AlbRuntime;
use crate::config::ListenerConfig;
use crate::observability::metrics;
use crate::proxy::Resources;

/// UUID v4 request IDs for correlation across legs and backends.
#[derive(Clone, Copy, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Application state injected into handlers. The runtime pointer is
/// swapped wholesale on config reload.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ArcSwap<AlbRuntime>>,
    pub max_body_bytes: usize,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ListenerConfig, runtime: Arc<ArcSwap<AlbRuntime>>) -> Self {
        let state = AppState {
            runtime,
            max_body_bytes: config.max_body_bytes,
        };
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ListenerConfig, state: AppState) -> Router {
        Router::new()
            .route("/tsgate/health/{backend}", get(health_handler))
            .fallback(gateway_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.request_timeout_secs.max(1),
            )))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

/// Live uncached probe of one backend, with the cached status headers
/// attached.
async fn health_handler(
    State(state): State<AppState>,
    Path(backend): Path<String>,
) -> Response<Body> {
    let runtime = state.runtime.load_full();
    match runtime.checker().prober(&backend) {
        Some(prober) => prober.demand_probe().await.map(Body::from),
        None => {
            let mut resp = Response::new(Body::from(format!(
                "no health check configured for backend [{backend}]"
            )));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
    }
}

/// Main gateway handler: buffer the body, hand the request to the
/// current mechanism, record the outcome.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    let start = Instant::now();
    let runtime = state.runtime.load_full();
    let mechanism = runtime.mechanism();

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(b) => b,
        Err(_) => {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = StatusCode::PAYLOAD_TOO_LARGE;
            return resp;
        }
    };
    let mut req = Request::from_parts(parts, bytes);
    if Resources::of(&req).is_none() {
        Resources::default().attach(&mut req);
    }

    let resp = mechanism.serve(req).await;
    metrics::record_request(mechanism.name(), resp.status().as_u16(), start);
    resp.map(Body::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alb::{build_runtime, MechanismRegistry};
    use crate::config::GatewayConfig;
    use crate::timeseries::ProviderRegistry;
    use tower::ServiceExt;

    async fn state_with_empty_pool() -> AppState {
        let mut cfg = GatewayConfig::default();
        cfg.alb.mechanism = "rr".to_string();
        let runtime = build_runtime(
            &cfg,
            &MechanismRegistry::new(),
            &ProviderRegistry::new(),
            None,
        )
        .await
        .unwrap();
        AppState {
            runtime: Arc::new(ArcSwap::from_pointee(runtime)),
            max_body_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn test_gateway_serves_502_with_no_targets() {
        let state = state_with_empty_pool().await;
        let router = Router::new()
            .fallback(gateway_handler)
            .with_state(state.clone());
        let resp = router
            .oneshot(Request::new(Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        state.runtime.load().stop().await;
    }

    #[tokio::test]
    async fn test_health_endpoint_unknown_backend_404() {
        let state = state_with_empty_pool().await;
        let router = Router::new()
            .route("/tsgate/health/{backend}", get(health_handler))
            .with_state(state.clone());
        let mut req = Request::new(Body::empty());
        *req.uri_mut() = "/tsgate/health/ghost".parse().unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        state.runtime.load().stop().await;
    }
}
