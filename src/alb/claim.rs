//! Single-winner arbitration for racing fanout legs.
//!
//! # Responsibilities
//! - Guarantee exactly one leg claims the client response
//! - Cancel every losing leg's token the instant a winner claims
//!
//! # Design Decisions
//! - The winner cell is advanced exclusively via compare-and-swap
//! - Losing legs are not force-killed; their tokens are canceled so
//!   downstream I/O can abort cooperatively

use std::sync::atomic::{AtomicI64, Ordering};

use tokio_util::sync::CancellationToken;

/// Sentinel winner index recorded when no leg produced a claimable
/// response and the fallback path takes over.
pub const FALLBACK_WINNER: i64 = -2;

const UNCLAIMED: i64 = -1;

/// Per-request, per-fanout arbitration state.
pub struct ResponderClaim {
    winner: AtomicI64,
    legs: Vec<CancellationToken>,
}

impl ResponderClaim {
    pub fn new(leg_count: usize) -> Self {
        Self {
            winner: AtomicI64::new(UNCLAIMED),
            legs: (0..leg_count).map(|_| CancellationToken::new()).collect(),
        }
    }

    /// The cancellation token for leg `i`.
    pub fn leg_token(&self, i: usize) -> CancellationToken {
        self.legs[i].clone()
    }

    /// Attempt to claim the response for leg `i`. Returns true for
    /// exactly one leg per request; on success every other leg's token
    /// is canceled.
    pub fn claim(&self, i: usize) -> bool {
        if self
            .winner
            .compare_exchange(UNCLAIMED, i as i64, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        for (j, token) in self.legs.iter().enumerate() {
            if j != i {
                token.cancel();
            }
        }
        true
    }

    /// Claim the fallback path. Succeeds only if no leg ever claimed.
    pub fn claim_fallback(&self) -> bool {
        self.winner
            .compare_exchange(UNCLAIMED, FALLBACK_WINNER, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The recorded winner index: a leg index, `FALLBACK_WINNER`, or
    /// -1 while unclaimed.
    pub fn winner(&self) -> i64 {
        self.winner.load(Ordering::Acquire)
    }
}
