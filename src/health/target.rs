//! Health check probe target.
//!
//! # Responsibilities
//! - Periodically probe one backend over HTTP
//! - Classify each probe: status code, headers, body
//! - Drive the hysteresis state machine behind `Status`
//! - Serve synchronous demand probes for the health endpoint
//!
//! # State Transitions
//! ```text
//! Unknown → {Passing, Failing}   unconditional on the first probe
//! Passing → Failing              consecutive failures == failure_threshold
//! Failing → Passing              consecutive successes == recovery_threshold
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use chrono::Utc;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ConfigError;
use crate::health::status::{Status, STATUS_FAILING, STATUS_PASSING, STATUS_UNCHECKED};

/// Upper bound when reading probe response bodies for comparison.
const MAX_PROBE_BODY_BYTES: usize = 1024 * 1024;

/// Probe configuration for one target.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub interval: Duration,
    pub timeout: Duration,
    pub verb: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub expected_codes: Vec<u16>,
    pub expected_headers: HeaderMap,
    pub expected_body: Option<String>,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            verb: Method::GET,
            path: "/health".to_string(),
            headers: HeaderMap::new(),
            body: None,
            expected_codes: Vec::new(),
            expected_headers: HeaderMap::new(),
            expected_body: None,
            failure_threshold: 3,
            recovery_threshold: 3,
        }
    }
}

/// Consecutive pass/fail accounting with hysteresis. Owned by a single
/// probe loop, so no synchronization is required.
#[derive(Default)]
pub(crate) struct Hysteresis {
    fail_count: u32,
    success_count: u32,
    known_state: i32,
}

impl Hysteresis {
    /// Fold one probe outcome in; returns the new tri-state when the
    /// outcome causes a flip. The first probe after startup flips
    /// unconditionally.
    pub(crate) fn apply(
        &mut self,
        passed: bool,
        failure_threshold: u32,
        recovery_threshold: u32,
    ) -> Option<i32> {
        if passed {
            self.success_count += 1;
            self.fail_count = 0;
        } else {
            self.fail_count += 1;
            self.success_count = 0;
        }
        if !passed
            && self.known_state != STATUS_FAILING
            && (self.fail_count == failure_threshold || self.known_state == STATUS_UNCHECKED)
        {
            self.known_state = STATUS_FAILING;
            return Some(STATUS_FAILING);
        }
        if passed
            && self.known_state != STATUS_PASSING
            && (self.success_count == recovery_threshold || self.known_state == STATUS_UNCHECKED)
        {
            self.known_state = STATUS_PASSING;
            return Some(STATUS_PASSING);
        }
        None
    }
}

/// Probes one backend. Immutable once constructed; all mutable probe
/// state lives in the loop task or behind `Status`.
pub struct Prober {
    name: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Option<Bytes>,
    client: Client<HttpConnector, Body>,
    interval: Duration,
    timeout: Duration,
    expected_codes: Vec<u16>,
    expected_headers: HeaderMap,
    expected_body: Option<String>,
    failure_threshold: u32,
    recovery_threshold: u32,
    status: Arc<Status>,
}

impl Prober {
    pub fn new(
        name: &str,
        description: &str,
        origin_url: &str,
        opts: ProbeOptions,
    ) -> Result<Arc<Self>, ConfigError> {
        let base = Url::parse(origin_url)
            .map_err(|e| ConfigError::Invalid(format!("invalid origin_url for [{name}]: {e}")))?;
        let probe_url = base
            .join(&opts.path)
            .map_err(|e| ConfigError::Invalid(format!("invalid probe path for [{name}]: {e}")))?;
        let uri: Uri = probe_url
            .as_str()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid probe url for [{name}]")))?;

        let expected_codes = if opts.expected_codes.is_empty() {
            vec![200]
        } else {
            opts.expected_codes
        };
        let failure_threshold = opts.failure_threshold.max(1);
        let recovery_threshold = opts.recovery_threshold.max(1);

        let initial_detail = format!(
            "unknown monitored status (check interval: {}ms)",
            opts.interval.as_millis()
        );
        let status = Arc::new(Status::new(name, description, &initial_detail));
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Arc::new(Self {
            name: name.to_string(),
            method: opts.verb,
            uri,
            headers: opts.headers,
            body: opts.body.map(Bytes::from),
            client,
            interval: opts.interval,
            timeout: opts.timeout,
            expected_codes,
            expected_headers: opts.expected_headers,
            expected_body: opts.expected_body,
            failure_threshold,
            recovery_threshold,
            status,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Arc<Status> {
        self.status.clone()
    }

    fn build_request(&self) -> Request<Body> {
        let body = match &self.body {
            Some(b) => Body::from(b.clone()),
            None => Body::empty(),
        };
        let mut req = Request::new(body);
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        *req.headers_mut() = self.headers.clone();
        req
    }

    fn is_good_code(&self, code: u16) -> bool {
        if self.expected_codes.contains(&code) {
            return true;
        }
        self.status.set_detail(format!(
            "required status code mismatch, got [{}] expected one of {:?}",
            code, self.expected_codes
        ));
        false
    }

    fn is_good_headers(&self, headers: &HeaderMap) -> bool {
        for (k, want) in self.expected_headers.iter() {
            match headers.get(k) {
                None => {
                    self.status
                        .set_detail(format!("server response is missing required header [{k}]"));
                    return false;
                }
                Some(got) if got != want => {
                    self.status.set_detail(format!(
                        "required header mismatch for [{}] got [{}] expected [{}]",
                        k,
                        String::from_utf8_lossy(got.as_bytes()),
                        String::from_utf8_lossy(want.as_bytes())
                    ));
                    return false;
                }
                _ => {}
            }
        }
        true
    }

    async fn is_good_body(&self, body: hyper::body::Incoming) -> bool {
        let Some(want) = &self.expected_body else {
            return true;
        };
        let got = match axum::body::to_bytes(Body::new(body), MAX_PROBE_BODY_BYTES).await {
            Ok(b) => b,
            Err(_) => {
                self.status
                    .set_detail("error reading response body from target");
                return false;
            }
        };
        if got.as_ref() != want.as_bytes() {
            self.status.set_detail(format!(
                "required response body mismatch expected [{}] got [{}]",
                want,
                String::from_utf8_lossy(&got)
            ));
            return false;
        }
        true
    }

    /// One probe: transport errors always fail; otherwise the response
    /// must pass the code, header, and body checks in that order.
    async fn probe_once(&self) -> bool {
        let req = self.build_request();
        let resp = match tokio::time::timeout(self.timeout, self.client.request(req)).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                self.status.set_detail(format!("error probing target: {e}"));
                return false;
            }
            Err(_) => {
                self.status.set_detail(format!(
                    "error probing target: timed out after {:?}",
                    self.timeout
                ));
                return false;
            }
        };
        let (parts, body) = resp.into_parts();
        self.is_good_code(parts.status.as_u16())
            && self.is_good_headers(&parts.headers)
            && self.is_good_body(body).await
    }

    /// The periodic probe loop. Signals `started` before the first
    /// probe so `HealthChecker::register` can confirm the loop is live.
    pub async fn run_loop(self: Arc<Self>, cancel: CancellationToken, started: watch::Sender<bool>) {
        let _ = started.send(true);
        let mut hysteresis = Hysteresis::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(target_name = %self.name, "Probe loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let passed = self.probe_once().await;
                    match hysteresis.apply(passed, self.failure_threshold, self.recovery_threshold) {
                        Some(STATUS_FAILING) => {
                            self.status.set_failing_since(Some(Utc::now()));
                            self.status.set(STATUS_FAILING);
                            tracing::info!(
                                target_name = %self.name,
                                status = "failed",
                                detail = %self.status.detail(),
                                threshold = self.failure_threshold,
                                "hc status changed"
                            );
                        }
                        Some(_) => {
                            self.status.set_failing_since(None);
                            // detail only carries failure context
                            self.status.set_detail("");
                            self.status.set(STATUS_PASSING);
                            tracing::info!(
                                target_name = %self.name,
                                status = "available",
                                threshold = self.recovery_threshold,
                                "hc status changed"
                            );
                        }
                        None => {}
                    }
                }
            }
        }
    }

    /// One uncached probe whose live upstream response is returned to
    /// the caller, with the cached Status attached as headers. Used by
    /// the externally-exposed health endpoint.
    pub async fn demand_probe(&self) -> Response<Bytes> {
        let req = self.build_request();
        let outcome = match tokio::time::timeout(self.timeout, self.client.request(req)).await {
            Ok(Ok(r)) => Ok(r),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.timeout)),
        };
        match outcome {
            Err(e) => {
                let mut resp =
                    Response::new(Bytes::from(format!("error performing health check: {e}")));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                self.merge_status_headers(&mut resp);
                resp
            }
            Ok(upstream) => {
                let (parts, body) = upstream.into_parts();
                match axum::body::to_bytes(Body::new(body), MAX_PROBE_BODY_BYTES).await {
                    Ok(bytes) => {
                        let mut resp = Response::new(bytes);
                        *resp.status_mut() = parts.status;
                        *resp.headers_mut() = parts.headers;
                        self.merge_status_headers(&mut resp);
                        resp
                    }
                    Err(e) => {
                        let mut resp = Response::new(Bytes::from(format!(
                            "error reading health check response body: {e}"
                        )));
                        *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        self.merge_status_headers(&mut resp);
                        resp
                    }
                }
            }
        }
    }

    fn merge_status_headers(&self, resp: &mut Response<Bytes>) {
        if self.status.get() == STATUS_UNCHECKED {
            return;
        }
        for (k, v) in self.status.headers().iter() {
            resp.headers_mut().insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flips(outcomes: &[bool], fail_t: u32, recover_t: u32) -> Vec<i32> {
        let mut h = Hysteresis::default();
        outcomes
            .iter()
            .filter_map(|&p| h.apply(p, fail_t, recover_t))
            .collect()
    }

    #[test]
    fn test_first_probe_flips_unconditionally() {
        assert_eq!(flips(&[true], 3, 3), vec![STATUS_PASSING]);
        assert_eq!(flips(&[false], 3, 3), vec![STATUS_FAILING]);
    }

    #[test]
    fn test_failure_requires_threshold_after_bootstrap() {
        // passing, then two failures: no flip yet
        assert_eq!(flips(&[true, false, false], 3, 3), vec![STATUS_PASSING]);
        // third consecutive failure flips
        assert_eq!(
            flips(&[true, false, false, false], 3, 3),
            vec![STATUS_PASSING, STATUS_FAILING]
        );
    }

    #[test]
    fn test_recovery_requires_threshold() {
        assert_eq!(
            flips(&[false, true, true], 3, 2),
            vec![STATUS_FAILING, STATUS_PASSING]
        );
        assert_eq!(flips(&[false, true], 3, 2), vec![STATUS_FAILING]);
    }

    #[test]
    fn test_isolated_error_does_not_flap() {
        // a single failed probe between successes never flips a passing target
        assert_eq!(
            flips(&[true, false, true, false, true], 3, 3),
            vec![STATUS_PASSING]
        );
    }

    #[test]
    fn test_counter_resets_on_outcome_flip() {
        // interleaved failures never accumulate to the threshold
        assert_eq!(
            flips(&[true, false, false, true, false, false, true], 3, 3),
            vec![STATUS_PASSING]
        );
    }

    #[test]
    fn test_probe_options_defaults() {
        let o = ProbeOptions::default();
        assert_eq!(o.failure_threshold, 3);
        assert_eq!(o.recovery_threshold, 3);
        assert_eq!(o.verb, Method::GET);
    }

    #[test]
    fn test_prober_defaults_expected_codes() {
        let p = Prober::new("b1", "", "http://127.0.0.1:9090", ProbeOptions::default()).unwrap();
        assert_eq!(p.expected_codes, vec![200]);
        assert_eq!(p.status().get(), STATUS_UNCHECKED);
        assert!(p.status().detail().contains("unknown monitored status"));
    }
}
