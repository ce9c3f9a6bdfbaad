//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BalancerConfig (validated, immutable)
//!     → pool membership, strategy, listener, admin, health monitor
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → ServerPool::reconcile + Balancer::switch_strategy
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A rejected reload leaves the running configuration untouched

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, Alpha1Config, BalancerConfig, Beta1Config, HealthCheckConfig, ListenerConfig,
    LogFormat, ObservabilityConfig, PoolConfig, ProxyConfig, ResponseTimeConfig, ServerConfig,
    StrategyConfig,
};
pub use validation::{validate_config, validate_strategy, ValidationError};
