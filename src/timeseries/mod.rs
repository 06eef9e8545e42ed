//! Mergeable time-series payload model.
//!
//! # Responsibilities
//! - Define the provider seam the TSM mechanism fans out through:
//!   mergeable paths, per-leg decode, final marshal
//! - Accumulate per-leg decoded series without locking
//!
//! # Design Decisions
//! - The provider registry is immutable after construction and passed
//!   by reference into mechanism constructors
//! - Accumulator slots are positional: each leg writes only its own
//!   index, so no lock is taken around the merge call

pub mod prom;

pub use prom::PrometheusProvider;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use axum::body::Bytes;
use axum::http::{Response, StatusCode};

/// One sample point. The value keeps its wire formatting.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub timestamp: f64,
    pub value: String,
}

/// One series: a label set plus its samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
    pub samples: Vec<Sample>,
}

/// A decoded time-series payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeSeries {
    pub series: Vec<Series>,
}

/// A time-series format that supports response merging.
pub trait MergeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// URL path prefixes whose responses this provider can merge.
    fn mergeable_paths(&self) -> &[&'static str];

    /// Decode one leg's response body. `None` means the leg
    /// contributes no data to the merge.
    fn decode(&self, body: &Bytes) -> Option<TimeSeries>;

    /// Marshal the fully-populated accumulator into the single merged
    /// client response.
    fn respond(&self, acc: &Accumulator, status: StatusCode) -> Response<Bytes>;
}

/// Per-request merge accumulator. Each fanout leg writes its decoded
/// series at its own index; aggregation happens in a strictly
/// sequential pass after the gather.
pub struct Accumulator {
    slots: Vec<OnceLock<TimeSeries>>,
}

impl Accumulator {
    pub fn new(legs: usize) -> Self {
        Self {
            slots: (0..legs).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Record leg `i`'s decoded series. Positional state is disjoint
    /// per leg, so this takes no lock.
    pub fn merge_at(&self, i: usize, series: TimeSeries) {
        if let Some(slot) = self.slots.get(i) {
            let _ = slot.set(series);
        }
    }

    /// Number of legs that contributed data.
    pub fn contributed(&self) -> usize {
        self.slots.iter().filter(|s| s.get().is_some()).count()
    }

    /// Combine every contributing leg, in leg-index order: series are
    /// keyed by label set; samples are concatenated, sorted by
    /// timestamp, and deduplicated.
    pub fn merged(&self) -> TimeSeries {
        let mut order: Vec<BTreeMap<String, String>> = Vec::new();
        let mut by_labels: HashMap<BTreeMap<String, String>, Vec<Sample>> = HashMap::new();
        for slot in &self.slots {
            let Some(ts) = slot.get() else { continue };
            for series in &ts.series {
                match by_labels.get_mut(&series.labels) {
                    Some(samples) => samples.extend(series.samples.iter().cloned()),
                    None => {
                        order.push(series.labels.clone());
                        by_labels.insert(series.labels.clone(), series.samples.clone());
                    }
                }
            }
        }
        let mut out = TimeSeries::default();
        for labels in order {
            let mut samples = by_labels.remove(&labels).unwrap_or_default();
            samples.sort_by(|a, b| {
                a.timestamp
                    .partial_cmp(&b.timestamp)
                    .unwrap_or(Ordering::Equal)
            });
            samples.dedup_by(|a, b| a.timestamp == b.timestamp);
            out.series.push(Series { labels, samples });
        }
        out
    }
}

/// Immutable provider-name → provider lookup, built once at process
/// start and injected into mechanism constructors.
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn MergeProvider>>,
}

impl ProviderRegistry {
    /// Registry with every built-in mergeable provider.
    pub fn new() -> Self {
        let mut providers: HashMap<&'static str, Arc<dyn MergeProvider>> = HashMap::new();
        let prom = Arc::new(PrometheusProvider::new());
        providers.insert(prom.name(), prom);
        Self { providers }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MergeProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn is_supported(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
