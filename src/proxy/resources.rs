//! Per-request resources side-channel.
//!
//! # Responsibilities
//! - Carry the per-leg cancellation token through a fanout
//! - Mark merge-member legs and expose the merge provider callbacks
//! - Carry authentication results between middleware and mechanisms
//!
//! # Design Decisions
//! - Stored in `http::Extensions`, so it survives request cloning
//! - Cheap to clone: token and provider are handles, not data

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::Request;
use tokio_util::sync::CancellationToken;

use crate::timeseries::MergeProvider;

/// Request-scoped side-channel read and written by mechanisms and
/// backend handlers.
#[derive(Clone, Default)]
pub struct Resources {
    /// Canceled when this leg loses a response race.
    pub cancel: CancellationToken,
    /// True when this request is one leg of a time-series merge fanout.
    pub is_merge_member: bool,
    /// Decode/merge callbacks for merge-member legs.
    pub merge: Option<MergeResources>,
    /// Result of upstream authentication, when one ran.
    pub auth: Option<AuthResult>,
}

impl Resources {
    /// Read the resources attached to a request, if any.
    pub fn of<B>(req: &Request<B>) -> Option<&Resources> {
        req.extensions().get::<Resources>()
    }

    /// Attach these resources to a request, replacing any prior value.
    pub fn attach(self, req: &mut Request<Bytes>) {
        req.extensions_mut().insert(self);
    }
}

/// Merge callbacks for one fanout leg.
#[derive(Clone)]
pub struct MergeResources {
    pub provider: Arc<dyn MergeProvider>,
}

/// Outcome classification of an authentication attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    Success,
    Failure,
    NotAttempted,
}

/// The identity an authenticator resolved for a request.
#[derive(Clone, Debug)]
pub struct AuthResult {
    pub username: String,
    pub status: AuthStatus,
}

/// Credential extraction/substitution capability consumed by the
/// user-router mechanism. Verification itself lives outside this crate.
pub trait Authenticator: Send + Sync {
    /// Extract `(username, credential)` from the request without
    /// verifying them.
    fn extract_credentials(&self, req: &Request<Bytes>) -> Option<(String, String)>;

    /// Rewrite the request's credentials in place.
    fn set_credentials(&self, req: &mut Request<Bytes>, username: &str, credential: &str);
}
