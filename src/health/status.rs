//! Per-backend health status record.
//!
//! Mutated exclusively by the owning probe loop; read by many
//! concurrent pool and mechanism tasks without locking.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

pub const STATUS_FAILING: i32 = -1;
pub const STATUS_UNCHECKED: i32 = 0;
pub const STATUS_PASSING: i32 = 1;

/// Numeric tri-state health header consumable by upstream operators.
pub const HEADER_HEALTH_STATUS: &str = "x-tsgate-health-status";
/// Failure detail header, present while the status is below passing.
pub const HEADER_HEALTH_DETAIL: &str = "x-tsgate-health-detail";

/// Concurrency-safe health record for one backend.
pub struct Status {
    name: String,
    description: String,
    status: AtomicI32,
    detail: Mutex<String>,
    failing_since: Mutex<Option<DateTime<Utc>>>,
    subscribers: Mutex<Vec<mpsc::Sender<()>>>,
}

fn lock<'a, T>(m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Status {
    pub fn new(name: &str, description: &str, detail: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            status: AtomicI32::new(STATUS_UNCHECKED),
            detail: Mutex::new(detail.to_string()),
            failing_since: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current tri-state value: -1 failing, 0 unchecked, 1 passing.
    pub fn get(&self) -> i32 {
        self.status.load(Ordering::Relaxed)
    }

    /// Update the status and signal every subscriber. Subscriber
    /// channels are buffered; a full channel already has a pending
    /// signal, so the send is dropped rather than blocked on.
    pub fn set(&self, value: i32) {
        self.status.store(value, Ordering::Relaxed);
        let subs = lock(&self.subscribers).clone();
        for tx in subs {
            let _ = tx.try_send(());
        }
    }

    pub fn detail(&self) -> String {
        lock(&self.detail).clone()
    }

    pub fn set_detail(&self, detail: impl Into<String>) {
        *lock(&self.detail) = detail.into();
    }

    pub fn failing_since(&self) -> Option<DateTime<Utc>> {
        *lock(&self.failing_since)
    }

    pub fn set_failing_since(&self, when: Option<DateTime<Utc>>) {
        *lock(&self.failing_since) = when;
    }

    /// Register a channel signaled on every status change.
    pub fn subscribe(&self, tx: mpsc::Sender<()>) {
        lock(&self.subscribers).push(tx);
    }

    /// Signal subscribers without changing the status. Used at
    /// shutdown so dependent tasks observe the final state.
    pub fn notify_subscribers(&self) {
        let subs = lock(&self.subscribers).clone();
        for tx in subs {
            let _ = tx.try_send(());
        }
    }

    /// Header set describing this status, consumable by load balancers
    /// upstream of this process.
    pub fn headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        let st = self.get();
        if let Ok(v) = HeaderValue::from_str(&st.to_string()) {
            h.insert(HeaderName::from_static(HEADER_HEALTH_STATUS), v);
        }
        if st < STATUS_PASSING {
            if let Ok(v) = HeaderValue::from_str(&self.detail()) {
                h.insert(HeaderName::from_static(HEADER_HEALTH_DETAIL), v);
            }
        }
        h
    }
}
