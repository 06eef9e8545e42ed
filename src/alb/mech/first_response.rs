//! First-response and first-good-response mechanisms.
//!
//! Both fan the request out to every healthy target and commit the
//! first leg whose response clears the claim gate. In plain
//! first-response mode every response is claimable; in
//! first-good-response mode only statuses below 400 (or in the
//! configured allow-list) qualify. When no leg ever claims, a watcher
//! serves the first captured response, or `502` if nothing was
//! captured.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{Request, Response};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::alb::capture::{CapturePool, CaptureSet, ResponseCapture};
use crate::alb::claim::ResponderClaim;
use crate::alb::pool::Pool;
use crate::alb::{Mechanism, MechanismId};
use crate::proxy::{clone_request, failures, Handler, Resources};

pub struct FirstResponse {
    pool: Option<Arc<Pool>>,
    fgr: bool,
    fgr_codes: HashSet<u16>,
    captures: Arc<CapturePool>,
}

impl FirstResponse {
    /// Plain first-response: every status is claimable.
    pub fn new() -> Self {
        Self {
            pool: None,
            fgr: false,
            fgr_codes: HashSet::new(),
            captures: Arc::new(CapturePool::new()),
        }
    }

    /// First-good-response with an optional explicit allow-list.
    pub fn new_fgr(codes: Vec<u16>) -> Self {
        Self {
            pool: None,
            fgr: true,
            fgr_codes: codes.into_iter().collect(),
            captures: Arc::new(CapturePool::new()),
        }
    }
}

fn is_claimable(fgr: bool, codes: &HashSet<u16>, status: u16) -> bool {
    if !fgr {
        return true;
    }
    if codes.is_empty() {
        return status < 400;
    }
    codes.contains(&status)
}

impl Default for FirstResponse {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for FirstResponse {
    async fn serve(&self, req: Request<Bytes>) -> Response<Bytes> {
        let Some(pool) = &self.pool else {
            return failures::bad_gateway();
        };
        let handlers = pool.healthy_handlers();
        match handlers.len() {
            0 => failures::bad_gateway(),
            // single target: skip all claim bookkeeping
            1 => handlers[0].serve(req).await,
            n => self.race(&handlers, req, n).await,
        }
    }
}

impl FirstResponse {
    async fn race(
        &self,
        handlers: &[crate::proxy::SharedHandler],
        req: Request<Bytes>,
        n: usize,
    ) -> Response<Bytes> {
        let claim = Arc::new(ResponderClaim::new(n));
        let captures: Arc<CaptureSet> = self.captures.get(n);
        let base = Resources::of(&req).cloned().unwrap_or_default();
        let (tx, mut rx) = mpsc::channel::<Response<Bytes>>(1);

        let mut legs = JoinSet::new();
        for (i, handler) in handlers.iter().enumerate() {
            let mut leg_req = clone_request(&req);
            let mut rsc = base.clone();
            rsc.cancel = claim.leg_token(i);
            rsc.attach(&mut leg_req);

            let handler = handler.clone();
            let claim = claim.clone();
            let captures = captures.clone();
            let tx = tx.clone();
            let fgr = self.fgr;
            let codes = self.fgr_codes.clone();
            legs.spawn(async move {
                let resp = handler.serve(leg_req).await;
                if is_claimable(fgr, &codes, resp.status().as_u16()) && claim.claim(i) {
                    let _ = tx.send(resp).await;
                } else {
                    // lost the race, or never qualified
                    captures.set(i, ResponseCapture::from_response(resp));
                }
            });
        }

        // the watcher owns the no-claim fallback and returns the
        // capture set to the pool once every leg has finished
        let pool_captures = self.captures.clone();
        tokio::spawn(async move {
            while legs.join_next().await.is_some() {}
            if claim.claim_fallback() {
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

impl Mechanism for FirstResponse {
    fn id(&self) -> MechanismId {
        if self.fgr {
            MechanismId::FirstGoodResponse
        } else {
            MechanismId::FirstResponse
        }
    }

    fn name(&self) -> &'static str {
        if self.fgr {
            "first_good_response"
        } else {
            "first_response"
        }
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
    use crate::proxy::failures::StaticResponse;
    use crate::proxy::SharedHandler;
    use axum::http::StatusCode;
    use std::time::Duration;

    struct DelayedResponse {
        delay: Duration,
        status: StatusCode,
        body: &'static [u8],
    }

    #[async_trait]
    impl Handler for DelayedResponse {
        async fn serve(&self, _req: Request<Bytes>) -> Response<Bytes> {
            tokio::time::sleep(self.delay).await;
            let mut resp = Response::new(Bytes::from_static(self.body));
            *resp.status_mut() = self.status;
            resp
        }
    }

    fn pool_of(handlers: Vec<SharedHandler>) -> Arc<Pool> {
        Pool::new(handlers.into_iter().map(|h| Target::new(h, None)).collect(), -1)
    }

    #[tokio::test]
    async fn test_fastest_leg_wins() {
        let mut fr = FirstResponse::new();
        let pool = pool_of(vec![
            Arc::new(DelayedResponse {
                delay: Duration::from_millis(200),
                status: StatusCode::OK,
                body: b"slow",
            }),
            Arc::new(DelayedResponse {
                delay: Duration::from_millis(5),
                status: StatusCode::OK,
                body: b"fast",
            }),
        ]);
        fr.set_pool(pool.clone());
        let resp = fr.serve(Request::new(Bytes::new())).await;
        assert_eq!(resp.body().as_ref(), b"fast");
        pool.stop();
    }

    #[tokio::test]
    async fn test_fgr_skips_disqualified_fast_leg() {
        let mut fgr = FirstResponse::new_fgr(vec![200, 201]);
        let pool = pool_of(vec![
            Arc::new(DelayedResponse {
                delay: Duration::from_millis(5),
                status: StatusCode::NOT_FOUND,
                body: b"miss",
            }),
            Arc::new(DelayedResponse {
                delay: Duration::from_millis(50),
                status: StatusCode::CREATED,
                body: b"hit",
            }),
        ]);
        fgr.set_pool(pool.clone());
        let resp = fgr.serve(Request::new(Bytes::new())).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.body().as_ref(), b"hit");
        pool.stop();
    }

    #[tokio::test]
    async fn test_no_claim_serves_first_capture() {
        let mut fgr = FirstResponse::new_fgr(Vec::new());
        let pool = pool_of(vec![
            Arc::new(StaticResponse(StatusCode::INTERNAL_SERVER_ERROR)),
            Arc::new(StaticResponse(StatusCode::SERVICE_UNAVAILABLE)),
        ]);
        fgr.set_pool(pool.clone());
        let resp = fgr.serve(Request::new(Bytes::new())).await;
        // every leg disqualified: some captured error is still served
        assert!(resp.status().is_server_error());
        pool.stop();
    }

    #[tokio::test]
    async fn test_empty_pool_serves_502() {
        let mut fr = FirstResponse::new();
        let pool = pool_of(Vec::new());
        fr.set_pool(pool.clone());
        let resp = fr.serve(Request::new(Bytes::new())).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert!(resp.body().is_empty());
        pool.stop();
    }

    #[test]
    fn test_claimable_gate() {
        let none = HashSet::new();
        assert!(is_claimable(false, &none, 500));

        assert!(is_claimable(true, &none, 200));
        assert!(is_claimable(true, &none, 304));
        assert!(!is_claimable(true, &none, 404));

        let listed: HashSet<u16> = [404].into_iter().collect();
        assert!(is_claimable(true, &listed, 404));
        assert!(!is_claimable(true, &listed, 200));
    }
}
