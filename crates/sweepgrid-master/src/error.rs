use sweepgrid_core::CoreError;
use sweepgrid_scheduler::SchedulerError;
use thiserror::Error;

/// Errors surfaced by the master loop and its helpers.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("config error: {0}")]
    Config(#[from] CoreError),

    #[error("event channel closed")]
    ChannelClosed,

    #[error("no actuator for resource kind: {0}")]
    NoActuator(String),

    #[error("actuator already registered for resource kind: {0}")]
    DuplicateActuator(String),
}

pub type MasterResult<T> = Result<T, MasterError>;
