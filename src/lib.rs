//! Pool Miner
//!
//! An async client for a line-oriented mining pool protocol:
//! - Parallel worker sessions, each with its own pool connection
//! - Periodic throughput monitoring with whole-pool restart on stalls
//! - A single-thread task scheduler for off-path work such as telemetry
//! - Endpoint resolution from a published address file

pub mod config;
pub mod crypto;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod resolver;
pub mod scheduler;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use pool::{PoolPhase, PoolSettings, SessionPool};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "pool-miner";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
