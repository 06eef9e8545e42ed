//! Backend handler seam and the reverse-proxy handler.
//!
//! # Responsibilities
//! - Define the `Handler` trait every backend and mechanism implements
//! - Clone buffered requests for fanout legs
//! - Forward requests to upstream origins (ReverseProxy)
//!
//! # Design Decisions
//! - Request bodies are buffered to `Bytes` at the server edge so a
//!   request can be cloned once per fanout leg
//! - Upstream calls honor the per-leg cancellation token carried in
//!   `Resources`, so losing legs abort in-flight I/O early

pub mod failures;
pub mod resources;

pub use resources::{AuthResult, AuthStatus, Authenticator, MergeResources, Resources};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::uri::{Authority, Scheme};
use axum::http::{header, Request, Response, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::config::ConfigError;

/// Upper bound when buffering upstream response bodies.
const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

/// A backend handler: takes a fully-buffered request, returns a
/// fully-buffered response. The async analog of a synchronous
/// request-to-response function, object-safe so pools and mechanisms
/// can hold heterogeneous handlers.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve(&self, req: Request<Bytes>) -> Response<Bytes>;
}

pub type SharedHandler = Arc<dyn Handler>;

/// Clone a buffered request, including extensions (the `Resources`
/// side-channel is `Clone` and survives the copy).
pub fn clone_request(req: &Request<Bytes>) -> Request<Bytes> {
    let mut out = Request::new(req.body().clone());
    *out.method_mut() = req.method().clone();
    *out.uri_mut() = req.uri().clone();
    *out.version_mut() = req.version();
    *out.headers_mut() = req.headers().clone();
    *out.extensions_mut() = req.extensions().clone();
    out
}

/// Forwards requests to a single upstream origin, rewriting the URI
/// authority and streaming the response back as buffered bytes.
pub struct ReverseProxy {
    name: String,
    scheme: Scheme,
    authority: Authority,
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl ReverseProxy {
    pub fn new(name: &str, origin_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let url = Url::parse(origin_url)
            .map_err(|e| ConfigError::Invalid(format!("invalid origin_url for [{name}]: {e}")))?;
        let scheme = Scheme::try_from(url.scheme())
            .map_err(|_| ConfigError::Invalid(format!("invalid scheme in origin_url for [{name}]")))?;
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::Invalid(format!("missing host in origin_url for [{name}]")))?;
        let authority_str = match url.port() {
            Some(p) => format!("{host}:{p}"),
            None => host.to_string(),
        };
        let authority = Authority::try_from(authority_str.as_str())
            .map_err(|_| ConfigError::Invalid(format!("invalid authority in origin_url for [{name}]")))?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            name: name.to_string(),
            scheme,
            authority,
            client,
            timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Handler for ReverseProxy {
    async fn serve(&self, req: Request<Bytes>) -> Response<Bytes> {
        let rsc = req.extensions().get::<Resources>().cloned().unwrap_or_default();
        let (parts, body) = req.into_parts();

        // URI rewrite onto the configured origin
        let mut uri_parts = parts.uri.clone().into_parts();
        uri_parts.scheme = Some(self.scheme.clone());
        uri_parts.authority = Some(self.authority.clone());
        let uri = match Uri::from_parts(uri_parts) {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(backend = %self.name, error = %e, "Failed to rewrite request URI");
                return failures::bad_gateway();
            }
        };

        let mut upstream = Request::new(Body::from(body));
        *upstream.method_mut() = parts.method.clone();
        *upstream.uri_mut() = uri;
        *upstream.headers_mut() = parts.headers.clone();
        // the client derives Host from the rewritten authority
        upstream.headers_mut().remove(header::HOST);

        let fut = self.client.request(upstream);
        let outcome = tokio::select! {
            _ = rsc.cancel.cancelled() => {
                tracing::debug!(backend = %self.name, "Upstream call canceled before completion");
                return failures::bad_gateway();
            }
            r = tokio::time::timeout(self.timeout, fut) => r,
        };

        match outcome {
            Ok(Ok(resp)) => {
                let (rp, rbody) = resp.into_parts();
                match axum::body::to_bytes(Body::new(rbody), MAX_RESPONSE_BYTES).await {
                    Ok(bytes) => Response::from_parts(rp, bytes),
                    Err(e) => {
                        tracing::warn!(backend = %self.name, error = %e, "Failed reading upstream body");
                        failures::bad_gateway()
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = %self.name, error = %e, "Upstream request failed");
                failures::bad_gateway()
            }
            Err(_) => {
                tracing::warn!(backend = %self.name, timeout = ?self.timeout, "Upstream request timed out");
                failures::bad_gateway()
            }
        }
    }
}
