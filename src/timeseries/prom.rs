//! Prometheus HTTP API result merging.
//!
//! Decodes the query envelope (`status`/`data`/`resultType`/`result`)
//! for matrix and vector results, and marshals the merged series back
//! into a matrix envelope.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::http::{header, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{Accumulator, MergeProvider, Sample, Series, TimeSeries};

const MERGEABLE_PATHS: &[&str] = &["/api/v1/query_range", "/api/v1/query"];

#[derive(Serialize, Deserialize)]
struct Envelope {
    status: String,
    data: Data,
}

#[derive(Serialize, Deserialize)]
struct Data {
    #[serde(rename = "resultType")]
    result_type: String,
    result: Vec<ResultEntry>,
}

#[derive(Serialize, Deserialize)]
struct ResultEntry {
    metric: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    values: Vec<(f64, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<(f64, String)>,
}

#[derive(Default)]
pub struct PrometheusProvider;

impl PrometheusProvider {
    pub fn new() -> Self {
        Self
    }
}

impl MergeProvider for PrometheusProvider {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    fn mergeable_paths(&self) -> &[&'static str] {
        MERGEABLE_PATHS
    }

    fn decode(&self, body: &Bytes) -> Option<TimeSeries> {
        let envelope: Envelope = serde_json::from_slice(body).ok()?;
        if envelope.status != "success" {
            return None;
        }
        let mut out = TimeSeries::default();
        for entry in envelope.data.result {
            let samples: Vec<Sample> = if let Some((t, v)) = entry.value {
                vec![Sample { timestamp: t, value: v }]
            } else {
                entry
                    .values
                    .into_iter()
                    .map(|(t, v)| Sample { timestamp: t, value: v })
                    .collect()
            };
            out.series.push(Series {
                labels: entry.metric,
                samples,
            });
        }
        Some(out)
    }

    fn respond(&self, acc: &Accumulator, status: StatusCode) -> Response<Bytes> {
        let merged = acc.merged();
        let envelope = Envelope {
            status: "success".to_string(),
            data: Data {
                result_type: "matrix".to_string(),
                result: merged
                    .series
                    .into_iter()
                    .map(|s| ResultEntry {
                        metric: s.labels,
                        values: s
                            .samples
                            .into_iter()
                            .map(|p| (p.timestamp, p.value))
                            .collect(),
                        value: None,
                    })
                    .collect(),
            },
        };
        let body = serde_json::to_vec(&envelope).unwrap_or_default();
        let mut resp = Response::new(Bytes::from(body));
        *resp.status_mut() = status;
        resp.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATRIX: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "matrix",
            "result": [
                {
                    "metric": {"__name__": "up", "job": "a"},
                    "values": [[1709000000, "1"], [1709000015, "1"]]
                }
            ]
        }
    }"#;

    const VECTOR: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [
                {"metric": {"__name__": "up", "job": "a"}, "value": [1709000000, "1"]}
            ]
        }
    }"#;

    #[test]
    fn test_decode_matrix() {
        let p = PrometheusProvider::new();
        let ts = p.decode(&Bytes::from_static(MATRIX.as_bytes())).unwrap();
        assert_eq!(ts.series.len(), 1);
        assert_eq!(ts.series[0].samples.len(), 2);
        assert_eq!(ts.series[0].labels["job"], "a");
    }

    #[test]
    fn test_decode_vector() {
        let p = PrometheusProvider::new();
        let ts = p.decode(&Bytes::from_static(VECTOR.as_bytes())).unwrap();
        assert_eq!(ts.series.len(), 1);
        assert_eq!(ts.series[0].samples.len(), 1);
    }

    #[test]
    fn test_decode_rejects_error_envelope_and_garbage() {
        let p = PrometheusProvider::new();
        let err = r#"{"status": "error", "data": {"resultType": "matrix", "result": []}}"#;
        assert!(p.decode(&Bytes::from_static(err.as_bytes())).is_none());
        assert!(p.decode(&Bytes::from_static(b"not json")).is_none());
    }

    #[test]
    fn test_respond_round_trips_merged_series() {
        let p = PrometheusProvider::new();
        let acc = Accumulator::new(2);
        acc.merge_at(0, p.decode(&Bytes::from_static(MATRIX.as_bytes())).unwrap());
        acc.merge_at(1, p.decode(&Bytes::from_static(VECTOR.as_bytes())).unwrap());
        let resp = p.respond(&acc, StatusCode::OK);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let decoded = p.decode(resp.body()).unwrap();
        assert_eq!(decoded.series.len(), 1);
        assert_eq!(decoded.series[0].samples.len(), 2);
    }
}
