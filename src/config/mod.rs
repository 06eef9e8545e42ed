//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → alb::build_runtime constructs the live runtime
//!
//! On reload signal:
//!     watcher.rs detects change
//!     → loader.rs loads & validates new config
//!     → new runtime built, atomic swap, old runtime stopped
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AlbConfig, BackendConfig, GatewayConfig, HealthCheckConfig, ListenerConfig,
    ObservabilityConfig, UserRouteConfig, UserRouterConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
