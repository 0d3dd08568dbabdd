//! Config Sentinel library.
//!
//! A versioned, audited, hot-reloadable configuration service for chat bot
//! deployments, with health checks that gate production readiness. The
//! entry point is [`orchestrator::Orchestrator`].

pub mod audit;
pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod gate;
pub mod guard;
pub mod logging;
pub mod migrator;
pub mod monitor;
pub mod orchestrator;
pub mod store;

pub use error::{ConfigError, ConfigResult};
pub use orchestrator::Orchestrator;
