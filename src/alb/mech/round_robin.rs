//! Round-robin mechanism.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{Request, Response};

use crate::alb::pool::Pool;
use crate::alb::{Mechanism, MechanismId};
use crate::proxy::{failures, Handler};

/// Rotates requests across the healthy snapshot with a single atomic
/// counter. An empty healthy list serves `502` without advancing the
/// counter, so recovery resumes the rotation where it left off.
#[derive(Default)]
pub struct RoundRobin {
    pool: Option<Arc<Pool>>,
    next: AtomicU64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Handler for RoundRobin {
    async fn serve(&self, req: Request<Bytes>) -> Response<Bytes> {
        let Some(pool) = &self.pool else {
            return failures::bad_gateway();
        };
        let handlers = pool.healthy_handlers();
        if handlers.is_empty() {
            return failures::bad_gateway();
        }
        let i = (self.next.fetch_add(1, Ordering::Relaxed) as usize) % handlers.len();
        handlers[i].serve(req).await
    }
}

impl Mechanism for RoundRobin {
    fn id(&self) -> MechanismId {
        MechanismId::RoundRobin
    }

    fn name(&self) -> &'static str {
        "round_robin"
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
