//! tsgate — caching reverse-proxy gateway for time-series databases.
//!
//! The core of the crate is the ALB (Application Load Balancer)
//! subsystem: a pluggable request-routing layer that fans a single
//! downstream request out to a pool of upstream backend handlers, backed
//! by a continuously-running health-check subsystem that supplies the
//! pool's notion of "available backend".
//!
//! # Architecture Overview
//!
//! ```text
//!  Client Request
//!      → http (axum server, body buffering, request ID)
//!      → alb::Mechanism (rr / fr / fgr / nlm / tsm / ur)
//!      → alb::Pool (lock-free healthy snapshot)
//!      → proxy::ReverseProxy (per-backend upstream client)
//!
//!  health::HealthChecker probes every backend on an interval and
//!  signals the Pool to recompute its healthy snapshot on each
//!  status change.
//! ```

pub mod alb;
pub mod config;
pub mod health;
pub mod http;
pub mod observability;
pub mod proxy;
pub mod timeseries;

pub use alb::{Mechanism, MechanismRegistry, Pool, Target};
pub use config::GatewayConfig;
pub use health::{HealthChecker, Status};
pub use proxy::{Handler, Resources, SharedHandler};
