//! Load balancing mechanisms.
//!
//! Each mechanism is a `Handler` strategy over the pool's healthy
//! snapshot. All of them serve `502` with an empty body when the
//! healthy list is empty, and the fanout mechanisms bypass their
//! scatter/gather machinery when exactly one target is healthy.

pub mod first_response;
pub mod newest_last_modified;
pub mod round_robin;
pub mod time_series_merge;
pub mod user_router;

pub use first_response::FirstResponse;
pub use newest_last_modified::NewestLastModified;
pub use round_robin::RoundRobin;
pub use time_series_merge::TimeSeriesMerge;
pub use user_router::UserRouter;
