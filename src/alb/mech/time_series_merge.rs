//! Time-series-merge mechanism.
//!
//! Fans mergeable queries out to every healthy target and serves one
//! merged payload built from whichever legs succeeded (partial data
//! beats no data). Non-mergeable paths fall through to a plain
//! round-robin selection.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderName, HeaderValue, Request, Response, StatusCode};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::alb::mech::round_robin::RoundRobin;
use crate::alb::pool::Pool;
use crate::alb::{Mechanism, MechanismId};
use crate::config::ConfigError;
use crate::proxy::{clone_request, failures, Handler, MergeResources, Resources};
use crate::timeseries::{Accumulator, MergeProvider, ProviderRegistry};

/// Aggregated per-leg result statuses, concatenated across legs.
pub const HEADER_RESULT: &str = "x-tsgate-result";

struct LegResult {
    status: StatusCode,
    result_header: Option<String>,
}

pub struct TimeSeriesMerge {
    pool: Option<Arc<Pool>>,
    provider: Arc<dyn MergeProvider>,
    mergeable_paths: Vec<&'static str>,
    nonmerge: RoundRobin,
    semaphore: Option<Arc<Semaphore>>,
}

impl std::fmt::Debug for TimeSeriesMerge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesMerge")
            .field("mergeable_paths", &self.mergeable_paths)
            .finish_non_exhaustive()
    }
}

impl TimeSeriesMerge {
    /// Requires an output format naming a registered mergeable
    /// provider; the provider's mergeable path list is cached here.
    pub fn new(
        output_format: &str,
        providers: &ProviderRegistry,
        concurrency_limit: Option<usize>,
    ) -> Result<Self, ConfigError> {
        let provider = providers
            .get(output_format)
            .ok_or_else(|| ConfigError::UnsupportedMergeProvider(output_format.to_string()))?;
        let mergeable_paths = provider.mergeable_paths().to_vec();
        Ok(Self {
            pool: None,
            provider,
            mergeable_paths,
            nonmerge: RoundRobin::new(),
            semaphore: concurrency_limit
                .filter(|n| *n > 0)
                .map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    fn is_mergeable_path(&self, path: &str) -> bool {
        self.mergeable_paths.iter().any(|p| path.starts_with(p))
    }
}

#[async_trait]
impl Handler for TimeSeriesMerge {
    async fn serve(&self, req: Request<Bytes>) -> Response<Bytes> {
        let Some(pool) = &self.pool else {
            return failures::bad_gateway();
        };
        let handlers = pool.healthy_handlers();
        match handlers.len() {
            0 => failures::bad_gateway(),
            1 => handlers[0].serve(req).await,
            n => {
                if self.is_mergeable_path(req.uri().path()) {
                    self.fanout(&handlers, req, n).await
                } else {
                    self.nonmerge.serve(req).await
                }
            }
        }
    }
}

impl TimeSeriesMerge {
    async fn fanout(
        &self,
        handlers: &[crate::proxy::SharedHandler],
        req: Request<Bytes>,
        n: usize,
    ) -> Response<Bytes> {
        let acc = Arc::new(Accumulator::new(n));
        let base = Resources::of(&req).cloned().unwrap_or_default();

        let mut legs = JoinSet::new();
        for (i, handler) in handlers.iter().enumerate() {
            let mut leg_req = clone_request(&req);
            let mut rsc = base.clone();
            rsc.is_merge_member = true;
            rsc.merge = Some(MergeResources {
                provider: self.provider.clone(),
            });
            rsc.attach(&mut leg_req);

            let handler = handler.clone();
            let provider = self.provider.clone();
            let acc = acc.clone();
            let semaphore = self.semaphore.clone();
            legs.spawn(async move {
                // excess legs queue on the semaphore rather than run unbounded
                let _permit = match semaphore {
                    Some(s) => s.acquire_owned().await.ok(),
                    None => None,
                };
                let resp = handler.serve(leg_req).await;
                let status = resp.status();
                let result_header = resp
                    .headers()
                    .get(HEADER_RESULT)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                if status.is_success() {
                    if let Some(series) = provider.decode(resp.body()) {
                        // disjoint positional slot, no lock
                        acc.merge_at(i, series);
                    } else {
                        tracing::warn!(leg = i, "Merge leg returned an undecodable body");
                    }
                }
                (
                    i,
                    LegResult {
                        status,
                        result_header,
                    },
                )
            });
        }

        let mut results: Vec<Option<LegResult>> = (0..n).map(|_| None).collect();
        while let Some(joined) = legs.join_next().await {
            if let Ok((i, result)) = joined {
                results[i] = Some(result);
            }
        }

        // strictly sequential aggregation pass: lowest numeric status
        // wins (success over any redirect/error), result headers are
        // concatenated in leg order
        let mut status: Option<StatusCode> = None;
        let mut result_values: Vec<String> = Vec::new();
        for result in results.into_iter().flatten() {
            status = Some(match status {
                Some(s) if s <= result.status => s,
                _ => result.status,
            });
            if let Some(h) = result.result_header {
                result_values.push(h);
            }
        }

        let mut resp = self
            .provider
            .respond(&acc, status.unwrap_or(StatusCode::BAD_GATEWAY));
        if !result_values.is_empty() {
            if let Ok(v) = HeaderValue::from_str(&result_values.join(", ")) {
                resp.headers_mut()
                    .insert(HeaderName::from_static(HEADER_RESULT), v);
            }
        }
        resp
    }
}

impl Mechanism for TimeSeriesMerge {
    fn id(&self) -> MechanismId {
        MechanismId::TimeSeriesMerge
    }

    fn name(&self) -> &'static str {
        "time_series_merge"
    }

    fn set_pool(&mut self, pool: Arc<Pool>) {
        self.nonmerge.set_pool(pool.clone());
        self.pool = Some(pool);
    }

    fn stop_pool(&self) {
        if let Some(pool) = &self.pool {
            pool.stop();
        }
    }
}
