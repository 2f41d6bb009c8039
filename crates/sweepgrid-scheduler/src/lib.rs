//! sweepgrid-scheduler — the scheduling engine.
//!
//! Decides, once per control-loop iteration, which job attempts run on
//! which agents, when new agents must be launched, and how failures are
//! absorbed. All state is owned by a single caller; nothing here locks.
//!
//! # Architecture
//!
//! ```text
//! JobScheduler                    AgentScheduler
//!   ├── job queue (FIFO)            ├── pending / held attempts (FIFO)
//!   ├── retry bookkeeping           ├── AssignmentLedger  (agent ↔ job ↔ attempt)
//!   └── JobOperations (store)       ├── FailureTracker    (launch blacklist)
//!          │                        ├── SetupTracker      (node-start bootstrap)
//!          └── created attempts ──▶ ├── DemandHeuristic   (agent launches)
//!                                   └── AgentOperations   (transport, actuators)
//! ```
//!
//! Outcomes of slow operations come back as `on_*` callbacks, delivered
//! between ticks by the embedding loop.

pub mod agent_scheduler;
pub mod bimap;
pub mod error;
pub mod failure;
pub mod heuristic;
pub mod job_scheduler;
pub mod ledger;
pub mod ops;
pub mod placement;
pub mod setup;

pub use agent_scheduler::AgentScheduler;
pub use bimap::BiMap;
pub use error::{SchedulerError, SchedulerResult};
pub use failure::{FAILURE_THRESHOLD, FailureTracker};
pub use heuristic::{DemandHeuristic, LaunchRequest};
pub use job_scheduler::JobScheduler;
pub use ledger::{AssignmentLedger, Run};
pub use ops::{AgentOperations, JobOperations};
pub use placement::Assignment;
pub use setup::{SetupKey, SetupTracker};
