//! TCP load balancer: a server pool, seven selection strategies and the
//! engine that ties them to a TCP relay.

// Selection core
pub mod engine;
pub mod pool;
pub mod strategy;

// Collaborators around the core
pub mod admin;
pub mod health;
pub mod proxy;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::BalancerConfig;
pub use engine::{Balancer, Dispatch, EngineError};
pub use lifecycle::Shutdown;
pub use pool::{Server, ServerId, ServerPool};
pub use strategy::{Strategy, StrategyKind};
