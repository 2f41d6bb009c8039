//! sweepgrid-master — the control loop around the scheduling engine.
//!
//! Owns an [`AgentScheduler`](sweepgrid_scheduler::AgentScheduler) and a
//! [`JobScheduler`](sweepgrid_scheduler::JobScheduler), applies inbound
//! events between ticks, and paces itself on whether the job scheduler
//! still has work.
//!
//! # Architecture
//!
//! ```text
//! transports / actuators / ops impls
//!   │  EventSender (Clone + Send)
//!   ▼
//! mpsc::unbounded ──▶ Master (single task)
//!                       ├── drain events → scheduler callbacks
//!                       ├── JobScheduler::tick
//!                       ├── created attempts → AgentScheduler::run_job
//!                       └── AgentScheduler::tick
//!
//! ActuatorRegistry: Resource::kind → Box<dyn Actuator>
//! ```

pub mod actuator;
pub mod error;
pub mod events;
pub mod master;
pub mod telemetry;

pub use actuator::{Actuator, ActuatorRegistry, ResourceStatus};
pub use error::{MasterError, MasterResult};
pub use events::{EventReceiver, EventSender, SchedulerEvent, channel};
pub use master::Master;
pub use telemetry::{LogFormat, init_tracing};
