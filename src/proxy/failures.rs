//! Canned failure responses.
//!
//! Fixed status codes used across the ALB: `502` for exhaustion and
//! upstream failure, plus the user-router's canned no-route statuses
//! (`400`, `401`, `404`, `500`, `502`). Bodies are empty.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{Request, Response, StatusCode};

use super::Handler;

/// Build an empty-bodied response with the given status.
pub fn empty_response(status: StatusCode) -> Response<Bytes> {
    let mut resp = Response::new(Bytes::new());
    *resp.status_mut() = status;
    resp
}

/// `502 Bad Gateway`: no healthy targets, or the upstream call failed.
pub fn bad_gateway() -> Response<Bytes> {
    empty_response(StatusCode::BAD_GATEWAY)
}

/// A handler that always serves a fixed empty-bodied status.
pub struct StaticResponse(pub StatusCode);

#[async_trait]
impl Handler for StaticResponse {
    async fn serve(&self, _req: Request<Bytes>) -> Response<Bytes> {
        empty_response(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_response_serves_fixed_status() {
        let h = StaticResponse(StatusCode::UNAUTHORIZED);
        let resp = h.serve(Request::new(Bytes::new())).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.body().is_empty());
    }

    #[test]
    fn test_bad_gateway_is_empty_502() {
        let resp = bad_gateway();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert!(resp.body().is_empty());
    }
}
