//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Probe loop (target.rs):
//!     Periodic timer
//!     → HTTP probe against the backend
//!     → Classify: status code, headers, body
//!     → Hysteresis counters
//!     → status.rs tri-state flip on threshold breach
//!     → Subscribers signaled (Pool rebuild)
//!
//! Registry (checker.rs):
//!     Register / Unregister / Shutdown targets
//!     → name → Status lookup for Pool construction
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures, except
//!   the unconditional first transition out of Unknown
//! - Status is read lock-free on the request hot path
//! - Probe loops are owned tasks with stop-and-wait semantics

pub mod checker;
pub mod status;
pub mod target;

pub use checker::HealthChecker;
pub use status::{Status, STATUS_FAILING, STATUS_PASSING, STATUS_UNCHECKED};
pub use target::{ProbeOptions, Prober};
