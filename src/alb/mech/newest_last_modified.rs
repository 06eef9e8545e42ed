//! Newest-last-modified mechanism.
//!
//! A collect-then-release protocol: every leg captures its response
//! and registers its parsed `Last-Modified` timestamp, then waits on a
//! shared barrier. Only after all legs have reported does the leg
//! holding the newest timestamp release its capture to the client, so
//! the freshest response is chosen with global knowledge at the cost
//! of tail latency bounded by the slowest leg.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, Request, Response};
use chrono::{DateTime, FixedOffset};
use tokio::sync::{mpsc, Barrier};
use tokio::task::JoinSet;

use crate::alb::capture::{CapturePool, CaptureSet, ResponseCapture};
use crate::alb::pool::Pool;
use crate::alb::{Mechanism, MechanismId};
use crate::proxy::{clone_request, failures, Handler, Resources};

/// Tracks the newest registered timestamp and the leg that holds it.
/// Ties favor the already-recorded leg.
struct NewestMux {
    inner: Mutex<(Option<usize>, Option<DateTime<FixedOffset>>)>,
}

impl NewestMux {
    fn new() -> Self {
        Self {
            inner: Mutex::new((None, None)),
        }
    }

    fn register(&self, i: usize, when: DateTime<FixedOffset>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let newer = match inner.1 {
            Some(current) => when > current,
            None => true,
        };
        if newer {
            *inner = (Some(i), Some(when));
        }
    }

    fn winner(&self) -> Option<usize> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).0
    }
}

fn parse_last_modified(resp: &Response<Bytes>) -> Option<DateTime<FixedOffset>> {
    let value = resp.headers().get(header::LAST_MODIFIED)?.to_str().ok()?;
    // RFC1123 dates are a subset of RFC2822
    DateTime::parse_from_rfc2822(value).ok()
}

#[derive(Default)]
pub struct NewestLastModified {
    pool: Option<Arc<Pool>>,
    captures: Arc<CapturePool>,
}

impl NewestLastModified {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Handler for NewestLastModified {
    async fn serve(&self, req: Request<Bytes>) -> Response<Bytes> {
        let Some(pool) = &self.pool else {
            return failures::bad_gateway();
        };
        let handlers = pool.healthy_handlers();
        match handlers.len() {
            0 => failures::bad_gateway(),
            1 => handlers[0].serve(req).await,
            n => self.gather(&handlers, req, n).await,
        }
    }
}

impl NewestLastModified {
    async fn gather(
        &self,
        handlers: &[crate::proxy::SharedHandler],
        req: Request<Bytes>,
        n: usize,
    ) -> Response<Bytes> {
        let mux = Arc::new(NewestMux::new());
        let barrier = Arc::new(Barrier::new(n));
        let captures: Arc<CaptureSet> = self.captures.get(n);
        let base = Resources::of(&req).cloned().unwrap_or_default();
        let (tx, mut rx) = mpsc::channel::<Response<Bytes>>(1);

        // legs are all data sources here; none is proactively canceled
        let mut legs = JoinSet::new();
        for (i, handler) in handlers.iter().enumerate() {
            let mut leg_req = clone_request(&req);
            base.clone().attach(&mut leg_req);

            let handler = handler.clone();
            let mux = mux.clone();
            let barrier = barrier.clone();
            let captures = captures.clone();
            let tx = tx.clone();
            legs.spawn(async move {
                let resp = handler.serve(leg_req).await;
                // a leg with no parseable timestamp can never win, but
                // must not block the others
                if let Some(when) = parse_last_modified(&resp) {
                    mux.register(i, when);
                }
                captures.set(i, ResponseCapture::from_response(resp));
                barrier.wait().await;
                if mux.winner() == Some(i) {
                    if let Some(capture) = captures.take(i) {
                        let _ = tx.send(capture.into_response()).await;
                    }
                }
            });
        }

        let pool_captures = self.captures.clone();
        tokio::spawn(async move {
            while legs.join_next().await.is_some() {}
            if mux.winner().is_none() {
                // no leg reported a timestamp: serve the first capture
                let resp = captures
                    .take_first()
                    .map(ResponseCapture::into_response)
                    .unwrap_or_else(failures::bad_gateway);
                let _ = tx.send(resp).await;
            }
            pool_captures.put(captures);
        });

        match rx.recv().await {
            Some(resp) => resp,
            None => failures::bad_gateway(),
        }
    }
}

impl Mechanism for NewestLastModified {
    fn id(&self) -> MechanismId {
        MechanismId::NewestLastModified
    }

    fn name(&self) -> &'static str {
        "newest_last_modified"
    }

    fn set_pool(&mut self, pool: Arc<Pool>) {
        self.pool = Some(pool);
    }

    fn stop_pool(&self) {
        if let Some(pool) = &self.pool {
            pool.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alb::pool::Target;
    use crate::proxy::SharedHandler;
    use axum::http::StatusCode;

    struct DatedResponse {
        last_modified: Option<&'static str>,
        body: &'static [u8],
    }

    #[async_trait]
    impl Handler for DatedResponse {
        async fn serve(&self, _req: Request<Bytes>) -> Response<Bytes> {
            let mut resp = Response::new(Bytes::from_static(self.body));
            if let Some(lm) = self.last_modified {
                resp.headers_mut()
                    .insert(header::LAST_MODIFIED, lm.parse().unwrap());
            }
            resp
        }
    }

    fn pool_of(handlers: Vec<SharedHandler>) -> Arc<Pool> {
        Pool::new(handlers.into_iter().map(|h| Target::new(h, None)).collect(), -1)
    }

    #[tokio::test]
    async fn test_newest_timestamp_wins() {
        let mut nlm = NewestLastModified::new();
        let pool = pool_of(vec![
            Arc::new(DatedResponse {
                last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT"),
                body: b"older",
            }),
            Arc::new(DatedResponse {
                last_modified: Some("Tue, 02 Jan 2024 00:00:00 GMT"),
                body: b"newer",
            }),
        ]);
        nlm.set_pool(pool.clone());
        let resp = nlm.serve(Request::new(Bytes::new())).await;
        assert_eq!(resp.body().as_ref(), b"newer");
        pool.stop();
    }

    #[tokio::test]
    async fn test_unparseable_leg_cannot_win() {
        let mut nlm = NewestLastModified::new();
        let pool = pool_of(vec![
            Arc::new(DatedResponse {
                last_modified: None,
                body: b"undated",
            }),
            Arc::new(DatedResponse {
                last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT"),
                body: b"dated",
            }),
        ]);
        nlm.set_pool(pool.clone());
        let resp = nlm.serve(Request::new(Bytes::new())).await;
        assert_eq!(resp.body().as_ref(), b"dated");
        pool.stop();
    }

    #[tokio::test]
    async fn test_all_unparseable_falls_back_to_first_capture() {
        let mut nlm = NewestLastModified::new();
        let pool = pool_of(vec![
            Arc::new(DatedResponse {
                last_modified: None,
                body: b"a",
            }),
            Arc::new(DatedResponse {
                last_modified: Some("not a date"),
                body: b"b",
            }),
        ]);
        nlm.set_pool(pool.clone());
        let resp = nlm.serve(Request::new(Bytes::new())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.body().is_empty());
        pool.stop();
    }

    #[test]
    fn test_mux_ties_favor_first_registered() {
        let mux = NewestMux::new();
        let t = DateTime::parse_from_rfc2822("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        mux.register(0, t);
        mux.register(1, t);
        assert_eq!(mux.winner(), Some(0));

        let newer = DateTime::parse_from_rfc2822("Tue, 02 Jan 2024 00:00:00 GMT").unwrap();
        mux.register(1, newer);
        assert_eq!(mux.winner(), Some(1));
    }
}
