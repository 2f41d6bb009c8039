//! Scheduler error types.
//!
//! Runtime failures (launches, jobs, agents) never surface here; they are
//! absorbed into bookkeeping. These errors are contract violations by the
//! embedding loop.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0} operations already set")]
    OperationsAlreadySet(&'static str),

    #[error("{0} operations not set")]
    OperationsNotSet(&'static str),

    #[error("agent {0} already has a job")]
    AgentBusy(Uuid),

    #[error("network job {0} is already linked")]
    JobAlreadyLinked(Uuid),

    #[error("attempt {0} is already linked")]
    AttemptAlreadyLinked(Uuid),

    #[error("unknown network job: {0}")]
    UnknownJob(Uuid),

    #[error("operations error: {0}")]
    Operations(#[from] anyhow::Error),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
