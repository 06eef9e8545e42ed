//! HTTP server subsystem.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → middleware (request ID, trace, timeout)
//!     → body buffered to Bytes (bounded)
//!     → current AlbRuntime's mechanism.serve()
//!     → response + metrics
//!
//! GET /tsgate/health/{backend} → live demand probe
//! ```

pub mod server;

pub use server::HttpServer;
