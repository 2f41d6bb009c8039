//! sweepgrid-core — domain types and configuration shared by the
//! scheduling engine and the master loop.
//!
//! Experiments, jobs, attempts, agents and resources are owned by the
//! durable store; the scheduler only reads them and requests changes
//! through its operations traits. The types here carry the state
//! machines and the job-status derivation so every layer agrees on them.

pub mod config;
pub mod error;
pub mod types;

pub use config::{MasterConfig, SchedulerConfig, SweepConfig};
pub use error::{CoreError, CoreResult};
pub use types::*;
