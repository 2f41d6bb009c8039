//! Inbound events for the master loop.
//!
//! Transports, actuators and operations implementations run outside the
//! loop's task; they report through an [`EventSender`] and the loop
//! applies the events in arrival order before each tick.

use tokio::sync::mpsc;
use uuid::Uuid;

use sweepgrid_core::{
    Agent, AgentState, AgentUpdate, FailureReason, JobAttempt, LaunchFailure, Resource,
};

use crate::error::{MasterError, MasterResult};

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// An agent changed state. `old` is `None` for a newly seen agent.
    AgentStateChanged {
        agent: Uuid,
        resource: Resource,
        old: Option<AgentState>,
        new: AgentState,
    },
    AgentLaunchFailed {
        launch_id: Uuid,
        resource: Resource,
        failure: LaunchFailure,
    },
    AgentExpired(Agent),
    /// A command result from an agent, managed or bootstrap.
    JobUpdate(AgentUpdate),
    /// A network job could not be delivered to its agent.
    JobLaunchFailed {
        job_id: Uuid,
        soft: bool,
        message: String,
    },
    /// An attempt lost its agent.
    AttemptFailed {
        attempt: JobAttempt,
        reason: FailureReason,
    },
    /// An attempt could not be launched and will not be retried by the
    /// agent side.
    AttemptLaunchFailed { attempt: JobAttempt, message: String },
    /// Withdraw an attempt, wherever it is.
    CancelAttempt(Uuid),
    /// An operator assigned an experiment to a resource.
    ResourceAssigned(String),
}

/// Cloneable handle for feeding events to a [`Master`](crate::Master).
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SchedulerEvent>,
}

/// The loop's end of the channel.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<SchedulerEvent>,
}

pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

impl EventSender {
    pub fn send(&self, event: SchedulerEvent) -> MasterResult<()> {
        self.tx.send(event).map_err(|_| MasterError::ChannelClosed)
    }

    pub fn agent_state_changed(
        &self,
        agent: Uuid,
        resource: Resource,
        old: Option<AgentState>,
        new: AgentState,
    ) -> MasterResult<()> {
        self.send(SchedulerEvent::AgentStateChanged {
            agent,
            resource,
            old,
            new,
        })
    }

    pub fn agent_launch_failed(
        &self,
        launch_id: Uuid,
        resource: Resource,
        failure: LaunchFailure,
    ) -> MasterResult<()> {
        self.send(SchedulerEvent::AgentLaunchFailed {
            launch_id,
            resource,
            failure,
        })
    }

    pub fn job_update(&self, update: AgentUpdate) -> MasterResult<()> {
        self.send(SchedulerEvent::JobUpdate(update))
    }

    pub fn attempt_failed(&self, attempt: JobAttempt, reason: FailureReason) -> MasterResult<()> {
        self.send(SchedulerEvent::AttemptFailed { attempt, reason })
    }

    pub fn attempt_launch_failed(&self, attempt: JobAttempt, message: &str) -> MasterResult<()> {
        self.send(SchedulerEvent::AttemptLaunchFailed {
            attempt,
            message: message.to_string(),
        })
    }

    pub fn cancel_attempt(&self, attempt: Uuid) -> MasterResult<()> {
        self.send(SchedulerEvent::CancelAttempt(attempt))
    }
}

impl EventReceiver {
    /// Next queued event, if any, without waiting.
    pub fn try_next(&mut self) -> Option<SchedulerEvent> {
        self.rx.try_recv().ok()
    }
}
