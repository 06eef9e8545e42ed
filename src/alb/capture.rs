//! Buffered response capture for scatter/gather legs.
//!
//! # Responsibilities
//! - Hold one leg's full response (status, headers, body)
//! - Pool capture slot sets to cut allocation churn on the hot
//!   fanout path
//!
//! # Design Decisions
//! - Slot sets are pooled only within a bounded leg-count range so
//!   pathologically large fanouts are not retained
//! - Returned sets are reset before reuse

use std::sync::{Arc, Mutex, MutexGuard};

use axum::body::Bytes;
use axum::http::{HeaderMap, Response, StatusCode};

/// Smallest leg count worth pooling.
pub const MIN_POOLED_LEGS: usize = 4;
/// Largest leg count worth pooling.
pub const MAX_POOLED_LEGS: usize = 32;

const MAX_POOLED_SETS: usize = 32;

fn lock<'a, T>(m: &'a Mutex<T>) -> MutexGuard<'a, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// One leg's fully-buffered response.
#[derive(Clone, Debug)]
pub struct ResponseCapture {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseCapture {
    pub fn from_response(resp: Response<Bytes>) -> Self {
        let (parts, body) = resp.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    pub fn into_response(self) -> Response<Bytes> {
        let mut resp = Response::new(self.body);
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers;
        resp
    }
}

/// Fixed-size set of per-leg capture slots, shared across the legs of
/// one fanout. Each leg writes only its own index.
pub struct CaptureSet {
    slots: Vec<Mutex<Option<ResponseCapture>>>,
    len: usize,
}

impl CaptureSet {
    fn with_capacity(capacity: usize, len: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            len,
        }
    }

    /// Active slot count for the current fanout.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record leg `i`'s response.
    pub fn set(&self, i: usize, capture: ResponseCapture) {
        if i < self.len {
            *lock(&self.slots[i]) = Some(capture);
        }
    }

    /// Remove and return the capture at `i`, if present.
    pub fn take(&self, i: usize) -> Option<ResponseCapture> {
        if i < self.len {
            lock(&self.slots[i]).take()
        } else {
            None
        }
    }

    /// Remove and return the lowest-indexed capture, if any.
    pub fn take_first(&self) -> Option<ResponseCapture> {
        for slot in self.slots.iter().take(self.len) {
            if let Some(c) = lock(slot).take() {
                return Some(c);
            }
        }
        None
    }

    fn reset(&self) {
        for slot in &self.slots {
            *lock(slot) = None;
        }
    }
}

/// Bounded pool of capture slot sets.
#[derive(Default)]
pub struct CapturePool {
    sets: Mutex<Vec<CaptureSet>>,
}

impl CapturePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capture set with `legs` active slots, reusing a pooled set
    /// when the leg count is within the pooled range.
    pub fn get(&self, legs: usize) -> Arc<CaptureSet> {
        if (MIN_POOLED_LEGS..=MAX_POOLED_LEGS).contains(&legs) {
            let mut sets = lock(&self.sets);
            if let Some(mut set) = sets.pop() {
                drop(sets);
                set.len = legs;
                return Arc::new(set);
            }
            return Arc::new(CaptureSet::with_capacity(MAX_POOLED_LEGS, legs));
        }
        Arc::new(CaptureSet::with_capacity(legs, legs))
    }

    /// Return a set once every leg has released its handle. Oversized
    /// and undersized sets are dropped rather than retained.
    pub fn put(&self, set: Arc<CaptureSet>) {
        let Ok(set) = Arc::try_unwrap(set) else {
            return;
        };
        if set.slots.len() != MAX_POOLED_LEGS {
            return;
        }
        set.reset();
        let mut sets = lock(&self.sets);
        if sets.len() < MAX_POOLED_SETS {
            sets.push(set);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(status: u16, body: &'static [u8]) -> ResponseCapture {
        ResponseCapture {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn test_capture_roundtrip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-a", "1".parse().unwrap());
        let c = ResponseCapture {
            status: StatusCode::CREATED,
            headers,
            body: Bytes::from_static(b"hi"),
        };
        let resp = c.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers().get("x-a").unwrap(), "1");
        assert_eq!(resp.body().as_ref(), b"hi");
    }

    #[test]
    fn test_take_first_skips_empty_slots() {
        let pool = CapturePool::new();
        let set = pool.get(4);
        set.set(2, capture(200, b"two"));
        set.set(3, capture(200, b"three"));
        let first = set.take_first().unwrap();
        assert_eq!(first.body.as_ref(), b"two");
    }

    #[test]
    fn test_pool_reuses_and_resets_sets() {
        let pool = CapturePool::new();
        let set = pool.get(8);
        assert_eq!(set.len(), 8);
        set.set(0, capture(200, b"stale"));
        pool.put(set);

        let set2 = pool.get(4);
        assert_eq!(set2.len(), 4);
        assert!(set2.take_first().is_none());
    }

    #[test]
    fn test_out_of_range_sizes_not_pooled() {
        let pool = CapturePool::new();
        let tiny = pool.get(MIN_POOLED_LEGS - 1);
        assert_eq!(tiny.len(), MIN_POOLED_LEGS - 1);
        pool.put(tiny);
        let big = pool.get(MAX_POOLED_LEGS + 1);
        assert_eq!(big.len(), MAX_POOLED_LEGS + 1);
        pool.put(big);
        assert!(lock(&pool.sets).is_empty());
    }

    #[test]
    fn test_put_ignores_sets_with_live_handles() {
        let pool = CapturePool::new();
        let set = pool.get(4);
        let extra = set.clone();
        pool.put(set);
        assert!(lock(&pool.sets).is_empty());
        drop(extra);
    }
}
